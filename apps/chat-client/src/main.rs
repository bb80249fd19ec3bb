//! Relay Chat Client
//!
//! Terminal front-end: reads lines from stdin, sends them encrypted to the
//! peer, and prints what the peer sends back.

mod config;
mod session;

use clap::Parser;
use net_transport::WebSocketConnector;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};

use config::{Args, ClientConfig};
use session::ChatEvent;

const QUIT_COMMAND: &str = "/quit";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Logs go to stderr so they don't interleave with the conversation
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("chat_client=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = ClientConfig::from(args);
    info!("Starting relay chat client (key derivation: {})", config.key_derivation);

    let connector = WebSocketConnector::new(config.relay_url.clone());
    let (handle, mut events, driver) = session::spawn(connector, config.clone());

    let label = config.peer_label.clone();
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            render(&label, event);
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut driver = driver;
    let finished = loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break None };
                let text = line.trim_end();
                if text.is_empty() {
                    continue;
                }
                if text == QUIT_COMMAND {
                    break None;
                }
                if !handle.state().is_ready() {
                    println!("[not connected to peer yet, message not sent]");
                    continue;
                }

                println!("you: {}", text);
                if handle.send(text).await.is_err() {
                    break None;
                }
            }
            result = &mut driver => break Some(result),
        }
    };

    let result = match finished {
        Some(result) => result?,
        None => {
            handle.close().await;
            driver.await?
        }
    };
    if let Err(e) = result {
        error!("Session ended: {}", e);
    }
    printer.await?;

    Ok(())
}

fn render(label: &str, event: ChatEvent) {
    match event {
        ChatEvent::Status(status) => println!("[{}]", status),
        ChatEvent::Ready { fingerprint } => {
            println!("[secure channel ready, key fingerprint {}]", fingerprint)
        }
        ChatEvent::Plaintext(text) => println!("{}: {}", label, text),
        ChatEvent::SendRejected { text, reason } => {
            println!("[not sent ({}): {}]", reason, text)
        }
        ChatEvent::Closed { reason: Some(reason) } => println!("[session closed: {}]", reason),
        ChatEvent::Closed { reason: None } => println!("[session closed]"),
    }
}
