//! Line-mode console against a remote command service.
//!
//! Run with: cargo run -p console-cli-demo
//!
//! Lines are sent as commands. `/cancel`, `/abort`, `/reset`, `/close` and
//! `/quit` control the session. Configure with `CODEX_WEB_API_BASE`,
//! `CODEX_WEB_TIMEOUT_SECS` and `CODEX_WEB_STATE_FILE`.

use std::{collections::HashMap, sync::Arc};

use futures::StreamExt;
use remote_console_core::{ConsoleConfig, ConsoleEvent, Role, TranscriptEntry};
use remote_console_session::ConsoleClient;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = ConsoleConfig::from_env()?;
    tracing::info!(api_base = %config.api_base(), state_file = %config.state_file.display(), "Starting console");

    let client = Arc::new(ConsoleClient::from_config(&config).await?);
    let printer = tokio::spawn(print_events(client.events().stream()));

    match client.restore().await {
        Some(session_id) => {
            println!("Resumed session {session_id}");
            for entry in client.transcript().await.entries() {
                print_entry(entry);
            }
        }
        None => println!("No previous session; one is created on the first command"),
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        match line {
            "" => {}
            "/quit" => break,
            "/cancel" => {
                if !client.cancel_command().await {
                    println!("Nothing was cancelled");
                }
            }
            "/abort" => {
                if !client.abort_command() {
                    println!("No command in flight");
                }
            }
            "/reset" => client.reset_session().await,
            "/close" => client.close_session().await,
            text => {
                if client.is_running().await {
                    println!("A command is still running; /cancel or /abort it first");
                    continue;
                }
                let client = Arc::clone(&client);
                let text = text.to_string();
                tokio::spawn(async move {
                    if let Err(e) = client.send_command(&text).await {
                        tracing::error!("{e}");
                    }
                });
            }
        }
    }

    printer.abort();
    Ok(())
}

async fn print_events(mut events: futures::stream::BoxStream<'static, ConsoleEvent>) {
    let mut shown: HashMap<String, String> = HashMap::new();
    while let Some(event) = events.next().await {
        match event {
            ConsoleEvent::SessionChanged(Some(id)) => println!("-- session {id}"),
            ConsoleEvent::SessionChanged(None) => {
                shown.clear();
                println!("-- session cleared");
            }
            ConsoleEvent::StreamStatus { status, error } => match error {
                Some(error) => println!("-- stream {status:?}: {error}"),
                None => println!("-- stream {status:?}"),
            },
            ConsoleEvent::TranscriptChanged(entries) => {
                for entry in entries.iter().filter(|e| !e.is_pending()) {
                    if shown.get(&entry.id) != Some(&entry.content) {
                        shown.insert(entry.id.clone(), entry.content.clone());
                        if entry.role != Role::User {
                            print_entry(entry);
                        }
                    }
                }
            }
        }
    }
}

fn print_entry(entry: &TranscriptEntry) {
    match entry.role {
        Role::User => println!("> {}", entry.content),
        Role::Assistant => println!("{}", entry.content),
        Role::Status => println!("[{}]", entry.content),
    }
}
