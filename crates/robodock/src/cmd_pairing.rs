//! `robodock pairing`: show the pairing code until Ctrl-C.

use std::time::Duration;

use robodock::{expires_label, Client, PairingView};
use robodock_protocol::now_ms;

fn render(view: &PairingView, code: Option<&str>, now_ms: u64) -> String {
    match view {
        PairingView::Closed => String::new(),
        PairingView::Loading => "  Loading pairing code...".to_string(),
        _ => format!(
            "  {}  {}",
            code.unwrap_or("------"),
            expires_label(view, now_ms)
        ),
    }
}

pub async fn run(client: &Client) -> anyhow::Result<()> {
    let display = client.pairing_display();
    display.open();

    let mut rx = display.subscribe();
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    println!();
    println!("  Enter this code in the desktop app:");
    let mut last = String::new();
    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = ticker.tick() => {}
        }

        let now = now_ms();
        let view = rx.borrow_and_update().clone();
        let code = display.visible_code(now).map(|c| c.code);
        let line = render(&view, code.as_deref(), now);
        if line != last {
            println!("{line}");
            last = line;
        }
    }

    display.close();
    Ok(())
}
