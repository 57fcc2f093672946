//! `robodock console`: interactive operator console.
//!
//! Reads commands from stdin, runs toggles in the background so several
//! robots can be driven at once, and prints every registry change.

use std::collections::HashMap;
use std::sync::Arc;

use robodock::{is_controlling, Client, PollerSet, RegistryEvent, RegistryKind, SessionRecord};
use robodock_host::startup_status_for;
use robodock_protocol::{ActivityConfig, ControlType, HostEvent};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::debug;

const HELP: &str = "\
  toggle <nickname> <activity> [--remote]   start or stop an activity
  connect <nickname>                         connect to a paired robot
  disconnect <nickname>                      disconnect a paired robot
  watch <nickname> [--remote]                poll a robot's status
  unwatch <nickname> [--remote]              stop polling
  status                                     print every known session
  quit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ConsoleCommand {
    Toggle {
        kind: RegistryKind,
        nickname: String,
        control_type: ControlType,
    },
    Connect(String),
    Disconnect(String),
    Watch(RegistryKind, String),
    Unwatch(RegistryKind, String),
    Status,
    Help,
    Quit,
}

/// Parse one console line. Blank lines are `Ok(None)`.
pub(crate) fn parse_command(line: &str) -> Result<Option<ConsoleCommand>, String> {
    let mut words: Vec<&str> = line.split_whitespace().collect();
    let remote = match words.iter().position(|w| *w == "--remote") {
        Some(i) => {
            words.remove(i);
            true
        }
        None => false,
    };
    let kind = if remote {
        RegistryKind::Remote
    } else {
        RegistryKind::Local
    };

    let command = match words.as_slice() {
        [] => return Ok(None),
        ["toggle", nickname, activity] => ConsoleCommand::Toggle {
            kind,
            nickname: nickname.to_string(),
            control_type: activity.parse().map_err(|e| format!("{e}"))?,
        },
        ["connect", nickname] => ConsoleCommand::Connect(nickname.to_string()),
        ["disconnect", nickname] => ConsoleCommand::Disconnect(nickname.to_string()),
        ["watch", nickname] => ConsoleCommand::Watch(kind, nickname.to_string()),
        ["unwatch", nickname] => ConsoleCommand::Unwatch(kind, nickname.to_string()),
        ["status"] => ConsoleCommand::Status,
        ["help"] | ["?"] => ConsoleCommand::Help,
        ["quit"] | ["exit"] => ConsoleCommand::Quit,
        [verb, ..] => return Err(format!("unknown command or arguments: {verb} (try help)")),
    };
    Ok(Some(command))
}

pub(crate) fn describe(record: &SessionRecord) -> String {
    let activity = match record.control_type {
        Some(control_type) if is_controlling(record) => format!("running {control_type}"),
        Some(control_type) => format!("{control_type} pending"),
        None => "idle".to_string(),
    };
    match record.status {
        Some(status) => format!("{}: {} ({})", record.nickname, activity, status),
        None => format!("{}: {}", record.nickname, activity),
    }
}

struct Console {
    client: Arc<Client>,
    watches: HashMap<(RegistryKind, String), PollerSet>,
    poll_enabled: bool,
}

impl Console {
    fn watch(&mut self, kind: RegistryKind, nickname: String) {
        if self.watches.contains_key(&(kind, nickname.clone())) {
            return;
        }
        let set = self.client.watch(kind, &nickname, self.poll_enabled);
        println!("  watching {} ({})", set.nickname(), kind);
        self.watches.insert((kind, set.nickname().to_string()), set);
    }

    fn print_status(&self) {
        for kind in [RegistryKind::Local, RegistryKind::Remote] {
            let registry = self.client.registry(kind);
            let records = registry.snapshot();
            println!(
                "  [{}] {} known, {} active",
                kind,
                records.len(),
                registry.active().len()
            );
            for record in records {
                println!("    {}", describe(&record));
            }
        }
    }

    /// Returns false on quit
    fn handle(&mut self, command: ConsoleCommand) -> bool {
        match command {
            ConsoleCommand::Toggle {
                kind,
                nickname,
                control_type,
            } => {
                let robot = self.client.robot_ref(kind, &nickname);
                let config = ActivityConfig::minimal(control_type, robot.nickname.clone());
                let orchestrator = self.client.orchestrator().clone();
                tokio::spawn(async move {
                    match orchestrator.toggle(kind, &robot, config).await {
                        Ok(outcome) => println!("  {}: {:?}", robot.nickname, outcome),
                        Err(e) => println!("  {}: {}", robot.nickname, e),
                    }
                });
            }
            ConsoleCommand::Connect(nickname) => {
                let robot = self.client.robot_ref(RegistryKind::Remote, &nickname);
                let orchestrator = self.client.orchestrator().clone();
                tokio::spawn(async move {
                    if let Err(e) = orchestrator.connect(&robot).await {
                        println!("  {}: connect failed: {}", robot.nickname, e);
                    }
                });
            }
            ConsoleCommand::Disconnect(nickname) => {
                let orchestrator = self.client.orchestrator().clone();
                tokio::spawn(async move {
                    if let Err(e) = orchestrator.disconnect(&nickname).await {
                        println!("  {}: disconnect failed: {}", nickname, e);
                    }
                });
            }
            ConsoleCommand::Watch(kind, nickname) => self.watch(kind, nickname),
            ConsoleCommand::Unwatch(kind, nickname) => {
                if self.watches.remove(&(kind, nickname.clone())).is_some() {
                    println!("  stopped watching {nickname}");
                }
            }
            ConsoleCommand::Status => self.print_status(),
            ConsoleCommand::Help => println!("{HELP}"),
            ConsoleCommand::Quit => return false,
        }
        true
    }

    fn on_host_event(&self, event: HostEvent) {
        match event {
            HostEvent::HostLog { line } => {
                for (_, nickname) in self.watches.keys() {
                    if let Some(notice) = startup_status_for(nickname, &line) {
                        println!("  {}: {}", nickname, notice.message());
                    }
                }
            }
            HostEvent::PairingOpen => println!("  host asked to show the pairing code"),
            HostEvent::PairingClose => println!("  host dismissed the pairing code"),
            HostEvent::ExternalStarting { .. } => {
                println!("  external host process detected, waiting for it to start")
            }
            HostEvent::ExternalStarted { .. } => println!("  external host is ready"),
            HostEvent::ExternalStopped { .. } => println!("  external host process stopped"),
            HostEvent::ProcessShutdown { exit_code, .. } => match exit_code {
                Some(code) => println!("  host process shut down (exit {code})"),
                None => println!("  host process shut down"),
            },
        }
    }
}

fn on_registry_event(event: RegistryEvent) {
    match event {
        RegistryEvent::Updated { kind, record } => println!("  [{}] {}", kind, describe(&record)),
        RegistryEvent::ActiveChanged { kind, active_count } => {
            println!("  [{}] {} active session(s)", kind, active_count)
        }
    }
}

pub async fn run(
    client: Arc<Client>,
    initial: Vec<(RegistryKind, String)>,
    poll_enabled: bool,
) -> anyhow::Result<()> {
    let mut local_rx = client.registry(RegistryKind::Local).subscribe();
    let mut remote_rx = client.registry(RegistryKind::Remote).subscribe();
    let mut host_rx = client.events().subscribe();

    let mut console = Console {
        client,
        watches: HashMap::new(),
        poll_enabled,
    };
    for (kind, nickname) in initial {
        console.watch(kind, nickname);
    }
    println!("{HELP}");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match parse_command(&line) {
                    Ok(Some(command)) => {
                        if !console.handle(command) {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => println!("  {e}"),
                }
            }
            event = local_rx.recv() => match event {
                Ok(event) => on_registry_event(event),
                Err(RecvError::Lagged(skipped)) => debug!(skipped = skipped, "Registry events lagged"),
                Err(RecvError::Closed) => break,
            },
            event = remote_rx.recv() => match event {
                Ok(event) => on_registry_event(event),
                Err(RecvError::Lagged(skipped)) => debug!(skipped = skipped, "Registry events lagged"),
                Err(RecvError::Closed) => break,
            },
            event = host_rx.recv() => match event {
                Ok(event) => console.on_host_event(event),
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            },
        }
    }

    console.watches.clear();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use robodock_protocol::{ConnectionStatus, RobotRef};

    #[test]
    fn parses_toggle_with_remote_flag_anywhere() {
        assert_eq!(
            parse_command("toggle --remote sourccey teleop").unwrap(),
            Some(ConsoleCommand::Toggle {
                kind: RegistryKind::Remote,
                nickname: "sourccey".into(),
                control_type: ControlType::Teleop,
            })
        );
        assert_eq!(
            parse_command("  toggle arm-01 eval ").unwrap(),
            Some(ConsoleCommand::Toggle {
                kind: RegistryKind::Local,
                nickname: "arm-01".into(),
                control_type: ControlType::Evaluate,
            })
        );
    }

    #[test]
    fn rejects_unknown_activity_and_verbs() {
        assert!(parse_command("toggle arm-01 dance").is_err());
        assert!(parse_command("launch arm-01").is_err());
        assert_eq!(parse_command("   ").unwrap(), None);
    }

    #[test]
    fn describe_marks_pending_activity() {
        let mut record = SessionRecord::idle("sourccey", RegistryKind::Remote);
        record.robot = Some(RobotRef::new("sourccey", "sourccey"));
        assert_eq!(describe(&record), "sourccey: idle (none)");

        record.control_type = Some(ControlType::Teleop);
        record.status = Some(ConnectionStatus::Started);
        assert_eq!(describe(&record), "sourccey: running teleop (started)");

        record.status = Some(ConnectionStatus::Connecting);
        assert_eq!(describe(&record), "sourccey: teleop pending (connecting)");
    }
}
