//! `robodock paired list|add|forget`

use robodock::Client;
use robodock_protocol::{now_ms, PairedConnection};

use crate::PairedCommands;

pub fn run(client: &Client, action: PairedCommands) -> anyhow::Result<()> {
    let pairings = client.pairings();
    match action {
        PairedCommands::List => {
            let connections = pairings.paired_connections()?;
            if connections.is_empty() {
                println!("No paired robots.");
                return Ok(());
            }
            for connection in connections.values() {
                println!(
                    "{:<16} {:<12} {}",
                    connection.nickname,
                    connection.robot_type,
                    connection.base_url()
                );
            }
        }
        PairedCommands::Add {
            nickname,
            host,
            port,
            token,
            robot_type,
            robot_name,
        } => {
            let robot_name = robot_name.unwrap_or_else(|| nickname.clone());
            client.pair(PairedConnection {
                nickname,
                host,
                port,
                token,
                robot_type,
                robot_name,
                paired_at: now_ms(),
            })?;
            println!("Paired.");
        }
        PairedCommands::Forget { nickname } => {
            if client.forget(&nickname)? {
                println!("Forgot {nickname}.");
            } else {
                println!("No pairing for {nickname}.");
            }
        }
    }
    Ok(())
}
