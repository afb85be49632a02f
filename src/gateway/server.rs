// src/gateway/server.rs
//
// Local WebSocket listener. Each connection runs as its own task: inbound
// frames go to the bridge as events, and the task drains the connection's
// outbound queue (responses and reader DATA frames) back to the socket.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;

use super::{Connection, ConnectionId};
use crate::bridge::BridgeEvent;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Pause after a failed accept before trying again
const ACCEPT_RETRY: Duration = Duration::from_millis(100);

/// Accept connections until the bridge goes away.
pub async fn serve(listener: TcpListener, events: mpsc::Sender<BridgeEvent>, verbose: bool) {
    if let Ok(addr) = listener.local_addr() {
        tlog!("[ws] Listening on {}", addr);
    }
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                tlog!("[ws] Accept failed: {}", e);
                // Out of descriptors (EMFILE) fails again immediately
                tokio::time::sleep(ACCEPT_RETRY).await;
                continue;
            }
        };
        let id = ConnectionId(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed));
        tlog!("[ws] {} accepted from {}", id, peer);
        let events = events.clone();
        tokio::spawn(async move {
            handle_connection(stream, id, events, verbose).await;
        });
    }
}

async fn handle_connection(
    stream: TcpStream,
    id: ConnectionId,
    events: mpsc::Sender<BridgeEvent>,
    verbose: bool,
) {
    let ws = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            tlog!("[ws] {} handshake failed: {}", id, e);
            return;
        }
    };
    let (mut sink, mut source) = ws.split();

    let (conn, mut outbound) = Connection::channel(id);
    if events.send(BridgeEvent::Connected(conn)).is_err() {
        return;
    }

    loop {
        tokio::select! {
            frame = outbound.recv() => {
                let Some(frame) = frame else { break };
                if verbose {
                    tlog!("[ws] {} -> {}", id, hex::encode(&frame));
                }
                if let Err(e) = sink.send(Message::binary(frame)).await {
                    tlog!("[ws] {} send failed: {}", id, e);
                    break;
                }
            }
            message = source.next() => {
                let frame = match message {
                    Some(Ok(Message::Binary(bytes))) => bytes.to_vec(),
                    Some(Ok(Message::Text(text))) => text.as_str().as_bytes().to_vec(),
                    Some(Ok(Message::Close(_))) | None => break,
                    // Ping/pong are answered by tungstenite
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        tlog!("[ws] {} receive failed: {}", id, e);
                        break;
                    }
                };
                if verbose {
                    tlog!("[ws] {} <- {}", id, hex::encode(&frame));
                }
                if events.send(BridgeEvent::Frame(id, frame)).is_err() {
                    break;
                }
            }
        }
    }

    let _ = events.send(BridgeEvent::Disconnected(id));
    let _ = sink.close().await;
}
