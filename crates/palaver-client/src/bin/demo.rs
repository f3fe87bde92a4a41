//! # palaver-demo
//!
//! Headless walk through a session against the in-memory loopback server.
//! Prints each rendered frame as JSON so it can be inspected or piped into
//! another renderer.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::info;

use palaver_client::{ClientConfig, Frame, InputEvent, Session, UiEvent, UserCommand};
use palaver_net::MemoryRemote;
use palaver_shared::{PresenceStatus, UserProfile};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    palaver_client::init_tracing();

    let config = ClientConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 1. Seed the loopback server
    // -----------------------------------------------------------------------
    let me = UserProfile::new(1, "Ada", "ada@example.com");
    let grace = UserProfile::new(2, "Grace", "grace@example.com");
    let remote = Arc::new(MemoryRemote::new(me.clone()));
    remote.add_user(grace.clone());
    remote.add_stream("engineering", &["releases", "incidents"]);
    remote.set_presence(&grace.email, PresenceStatus::Active);
    for i in 1..=30 {
        remote.seed_stream_message(
            &grace,
            "engineering",
            "releases",
            &format!("<p>Release note <strong>#{i}</strong></p>"),
        );
    }

    // -----------------------------------------------------------------------
    // 2. Start the session
    // -----------------------------------------------------------------------
    let (session, mut ui_events) = Session::start(config, remote.clone(), remote.clone())
        .await
        .context("Failed to start session")?;

    let script = [
        InputEvent::Command(UserCommand::OpenStream("engineering".into())),
        InputEvent::Command(UserCommand::OpenTopic("releases".into())),
        InputEvent::PageUp,
        InputEvent::Command(UserCommand::Send("Shipping #31 now".into())),
    ];
    for input in script {
        session.handle_input(input)?;
        tokio::time::sleep(Duration::from_millis(300)).await;
    }

    remote.deliver_direct_message(&grace, &[&me], "Nice, thanks!");
    tokio::time::sleep(Duration::from_millis(300)).await;
    print_frame(&session.render())?;

    // -----------------------------------------------------------------------
    // 3. Exit
    // -----------------------------------------------------------------------
    session.handle_input(InputEvent::Command(UserCommand::Exit))?;
    while let Ok(event) = ui_events.try_recv() {
        if event == UiEvent::Exit {
            break;
        }
    }
    print_frame(&session.render())?;
    session.shutdown().await;
    Ok(())
}

fn print_frame(frame: &Frame) -> anyhow::Result<()> {
    let chat: Vec<String> = frame.chat.iter().map(|l| l.text()).collect();
    let value = serde_json::json!({
        "mode": format!("{:?}", frame.mode),
        "chat": chat,
        "notification_bar": frame.notification_bar,
        "conversations": frame.conversations,
        "presence": frame.presence,
        "status": frame.status,
    });
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}
