//! The relay (C6): a stateless fan-out broker. It stores no document
//! state and understands only enough of an operation's shape to route
//! it and, for synced sends, acknowledge it.

use futures_util::{SinkExt, StreamExt};
use liveshare::config::RelayConfig;
use liveshare::WireMessage;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{error, info, instrument, warn};

type ParticipantId = u64;
type Registry = Arc<Mutex<HashMap<ParticipantId, mpsc::UnboundedSender<String>>>>;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = RelayConfig::parse();
    let listener = TcpListener::bind(("0.0.0.0", config.port)).await?;
    info!("relay listening on port {}", config.port);

    let registry: Registry = Arc::new(Mutex::new(HashMap::new()));
    let next_id = Arc::new(AtomicU64::new(1));

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, addr) = accepted?;
                let registry = registry.clone();
                let next_id = next_id.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, addr, registry, next_id).await {
                        error!("connection from {addr} ended with error: {e}");
                    }
                });
            }
            _ = tokio::signal::ctrl_c() => {
                info!("received shutdown signal");
                break;
            }
        }
    }

    Ok(())
}

#[instrument(skip(stream, registry, next_id), fields(%addr))]
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    registry: Registry,
    next_id: Arc<AtomicU64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let ws = tokio_tungstenite::accept_async(stream).await?;
    let (mut sink, mut incoming) = ws.split();
    let id = next_id.fetch_add(1, Ordering::SeqCst);
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();

    {
        let mut participants = registry.lock().await;
        participants.insert(id, outbound_tx);
    }
    broadcast_users_update(&registry).await;
    info!(id, "participant connected");

    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            if sink.send(WsMessage::Text(frame)).await.is_err() {
                break;
            }
        }
    });

    while let Some(message) = incoming.next().await {
        match message {
            Ok(WsMessage::Text(text)) => handle_participant_message(id, &text, &registry).await,
            Ok(WsMessage::Close(_)) | Err(_) => break,
            Ok(_) => continue,
        }
    }

    writer.abort();
    {
        let mut participants = registry.lock().await;
        participants.remove(&id);
    }
    broadcast_users_update(&registry).await;
    info!(id, "participant disconnected");

    Ok(())
}

/// Every well-formed operation is fanned out to every other currently
/// connected participant; a sync=true send additionally gets an ack
/// back to its sender. Malformed input never reaches document state —
/// it is rejected here with `success: false` and is not fanned out
/// (spec §4.6, E1).
async fn handle_participant_message(sender: ParticipantId, text: &str, registry: &Registry) {
    match serde_json::from_str::<WireMessage>(text) {
        Ok(WireMessage::Operation { operation, is_sync }) => {
            let frame = serde_json::to_string(&WireMessage::Operation {
                operation: operation.clone(),
                is_sync: None,
            })
            .expect("wire messages always encode");
            fan_out_except(registry, sender, &frame).await;

            if is_sync == Some(true) {
                let ack = WireMessage::OperationAck {
                    operation_id: serde_json::to_string(operation.id()).unwrap_or_default(),
                    success: true,
                    error: None,
                };
                send_to(registry, sender, &serde_json::to_string(&ack).expect("acks always encode")).await;
            }
        }
        Ok(_) => {
            warn!(sender, "ignoring non-operation message from participant");
        }
        Err(e) => {
            warn!(sender, "rejecting malformed operation: {e}");
            let ack = WireMessage::OperationAck {
                operation_id: String::new(),
                success: false,
                error: Some(e.to_string()),
            };
            send_to(registry, sender, &serde_json::to_string(&ack).expect("acks always encode")).await;
        }
    }
}

async fn fan_out_except(registry: &Registry, sender: ParticipantId, frame: &str) {
    let participants = registry.lock().await;
    for (id, tx) in participants.iter() {
        if *id != sender {
            let _ = tx.send(frame.to_string());
        }
    }
}

async fn send_to(registry: &Registry, recipient: ParticipantId, frame: &str) {
    let participants = registry.lock().await;
    if let Some(tx) = participants.get(&recipient) {
        let _ = tx.send(frame.to_string());
    }
}

async fn broadcast_users_update(registry: &Registry) {
    let participants = registry.lock().await;
    let count = participants.len() as u64;
    let frame = serde_json::to_string(&WireMessage::UsersUpdate { count })
        .expect("wire messages always encode");
    for tx in participants.values() {
        let _ = tx.send(frame.clone());
    }
}
