//! Robodock command-line client

mod cmd_console;
mod cmd_paired;
mod cmd_pairing;
mod cmd_status;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use robodock::{logging, paths, Client, ClientStore, Config, RegistryKind};
use tracing::info;

#[derive(Parser)]
#[command(name = "robodock", version, about = "Control sessions for local and paired robots")]
struct Cli {
    /// Data directory (default: ~/.robodock)
    #[arg(long, global = true, env = "ROBODOCK_DATA_DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive operator console
    Console {
        /// Poll a directly attached robot from the start
        #[arg(long = "watch")]
        watch: Vec<String>,
        /// Poll a paired robot from the start
        #[arg(long = "watch-remote")]
        watch_remote: Vec<String>,
        /// Show records without polling the host
        #[arg(long)]
        no_poll: bool,
    },
    /// Ask the host once which activities are running for a robot
    Status {
        nickname: String,
        #[arg(long)]
        remote: bool,
    },
    /// Show this robot's pairing code until Ctrl-C
    Pairing,
    /// Manage remembered pairings
    Paired {
        #[command(subcommand)]
        action: PairedCommands,
    },
}

#[derive(Subcommand)]
pub(crate) enum PairedCommands {
    List,
    Add {
        nickname: String,
        host: String,
        #[arg(long, default_value_t = 42112)]
        port: u16,
        #[arg(long)]
        token: String,
        #[arg(long, default_value = "unknown")]
        robot_type: String,
        #[arg(long)]
        robot_name: Option<String>,
    },
    Forget {
        nickname: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let data_dir = paths::init_data_dir(cli.data_dir.as_deref())?;
    paths::ensure_dirs()?;
    let logging = logging::init_logging(&paths::log_dir()?)?;
    let config = Config::load(&paths::config_path()?)?;

    info!(
        component = "main",
        event = "main.starting",
        version = robodock::VERSION,
        run_id = %logging.run_id,
        data_dir = %data_dir.display(),
        "Robodock starting"
    );

    let db_path = paths::db_path()?;
    let store = tokio::task::spawn_blocking(move || ClientStore::open(&db_path)).await??;
    let client = Arc::new(Client::new(config, Arc::new(store))?);

    match cli.command {
        Commands::Console {
            watch,
            watch_remote,
            no_poll,
        } => {
            let initial = watch
                .into_iter()
                .map(|n| (RegistryKind::Local, n))
                .chain(watch_remote.into_iter().map(|n| (RegistryKind::Remote, n)))
                .collect();
            let _host_events = client.start_host_events();
            cmd_console::run(client.clone(), initial, !no_poll).await
        }
        Commands::Status { nickname, remote } => {
            let kind = if remote {
                RegistryKind::Remote
            } else {
                RegistryKind::Local
            };
            cmd_status::run(&client, kind, &nickname).await
        }
        Commands::Pairing => {
            let _host_events = client.start_host_events();
            cmd_pairing::run(&client).await
        }
        Commands::Paired { action } => cmd_paired::run(&client, action),
    }
}
