//! `robodock status <nickname>`: one poll per activity, printed.

use robodock::{Client, RegistryKind};
use robodock_protocol::ControlType;

pub async fn run(client: &Client, kind: RegistryKind, nickname: &str) -> anyhow::Result<()> {
    let host = client.orchestrator().host_for(kind, nickname);

    println!();
    println!("  {} ({})", nickname, kind);
    for control_type in ControlType::POLLED {
        match host.activity_status(control_type, Some(nickname)).await {
            Ok(status) if status.active && (status.nickname.is_empty() || status.nickname == nickname) => {
                println!(
                    "  {:<9} active (source: {}, last command: {})",
                    control_type, status.source, status.last_command_time_ms
                );
            }
            Ok(_) => println!("  {:<9} inactive", control_type),
            Err(e) => println!("  {:<9} unknown ({})", control_type, e),
        }
    }
    println!();
    Ok(())
}
