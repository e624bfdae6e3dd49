//! Newline-delimited JSON over TCP.
//!
//! Every client gets the engine broadcast plus the replies to its own
//! commands. A slow client that falls behind the broadcast buffer loses
//! the oldest events and keeps its connection.

use crate::core::error::{Error, Result};
use crate::engine::Engine;
use crate::protocol::dispatcher::Dispatcher;
use crate::protocol::messages::{Command, Event};
use std::net::SocketAddr;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::error::RecvError;

/// Bind `addr` and serve until the listener fails.
pub async fn serve(engine: Engine, addr: &str) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    log::info!("Listening on {}", listener.local_addr()?);
    run(listener, engine).await
}

/// Accept loop over an already bound listener.
pub async fn run(listener: TcpListener, engine: Engine) -> Result<()> {
    let dispatcher = Dispatcher::new(engine);
    loop {
        let (stream, peer) = listener.accept().await?;
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move {
            log::info!("Client connected: {}", peer);
            if let Err(e) = handle_connection(stream, peer, dispatcher).await {
                log::warn!("Connection {} ended with error: {}", peer, e);
            }
            log::info!("Client disconnected: {}", peer);
        });
    }
}

async fn handle_connection(stream: TcpStream, peer: SocketAddr, dispatcher: Dispatcher) -> Result<()> {
    let _ = stream.set_nodelay(true);
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();
    // Subscribe before the greeting so nothing slips between the two.
    let mut events = dispatcher.engine().coordinator().subscribe();

    for event in dispatcher.greeting().await {
        send(&mut writer, &event).await?;
    }

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line? {
                    Some(line) => line,
                    None => break,
                };
                if line.trim().is_empty() {
                    continue;
                }
                let replies = match Command::parse(&line) {
                    Ok(command) => dispatcher.handle(command).await,
                    Err(e) => {
                        log::debug!("Malformed message from {}: {}", peer, e);
                        vec![Event::error(Error::InvalidMessage(e.to_string()))]
                    }
                };
                for reply in &replies {
                    send(&mut writer, reply).await?;
                }
            }
            event = events.recv() => match event {
                Ok(event) => send(&mut writer, &event).await?,
                Err(RecvError::Lagged(skipped)) => {
                    log::warn!("Client {} lagged, dropped {} events", peer, skipped);
                }
                Err(RecvError::Closed) => break,
            },
        }
    }
    Ok(())
}

async fn send<W: AsyncWrite + Unpin>(writer: &mut W, event: &Event) -> Result<()> {
    let mut line = event.to_line()?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::Config;
    use serde_json::Value;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::time::{timeout, Duration};

    async fn next_json(lines: &mut tokio::io::Lines<BufReader<tokio::net::tcp::OwnedReadHalf>>) -> Value {
        let line = timeout(Duration::from_secs(5), lines.next_line())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        serde_json::from_str(&line).unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_greeting_and_replies() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::open(Config::rooted_at(dir.path())).unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(run(listener, engine));

        let stream = TcpStream::connect(addr).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();

        assert_eq!(next_json(&mut lines).await["type"], "metrics");
        assert_eq!(next_json(&mut lines).await["type"], "quarantineList");
        assert_eq!(next_json(&mut lines).await["type"], "history");

        writer.write_all(b"this is not json\n").await.unwrap();
        let reply = next_json(&mut lines).await;
        assert_eq!(reply["type"], "error");
        assert!(reply["data"]
            .as_str()
            .unwrap()
            .starts_with("Invalid message format"));

        writer
            .write_all(b"{\"type\":\"getWatchStatus\"}\n")
            .await
            .unwrap();
        let reply = next_json(&mut lines).await;
        assert_eq!(reply["type"], "watchStatus");
        assert_eq!(reply["data"]["active"], false);
    }
}
