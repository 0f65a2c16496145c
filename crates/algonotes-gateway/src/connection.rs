use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tracing::{error, info, warn};

use algonotes_types::events::{GatewayCommand, GatewayEvent};

use crate::hub::{ChatHub, ConnectionHandle, Joined};

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Drive one chat WebSocket whose token was already accepted by
/// [`ChatHub::join`] at the HTTP upgrade.
pub async fn handle_connection(socket: WebSocket, hub: ChatHub, joined: Joined) {
    let Joined {
        handle,
        history,
        online,
        mut inbox,
    } = joined;
    let identity = handle.identity().clone();
    let handle = Arc::new(handle);

    let (mut sender, receiver) = socket.split();

    let ready = GatewayEvent::Ready {
        user_id: identity.user_id,
        handle: identity.handle.clone(),
        history,
    };
    if send_event(&mut sender, &ready).await.is_err() {
        return;
    }

    // Tell the newcomer who is already here
    for peer in online.into_iter().filter(|p| p.user_id != identity.user_id) {
        let event = GatewayEvent::PresenceUpdate {
            user_id: peer.user_id,
            handle: peer.handle,
            online: true,
        };
        if send_event(&mut sender, &event).await.is_err() {
            return;
        }
    }

    if !handle.activate() {
        return;
    }

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward hub events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                event = inbox.recv() => {
                    // None: the hub closed this connection
                    let Some(event) = event else { break };
                    if send_event(&mut sender, &event).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
        let _ = sender.close().await;
    });

    // Read commands from client
    let recv_hub = hub.clone();
    let recv_handle = handle.clone();
    let mut recv_task = tokio::spawn(async move {
        read_commands(receiver, &recv_hub, &recv_handle, &pong_flag_recv).await;
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    hub.leave(&handle);
    info!("{} ({}) disconnected from chat", identity.handle, identity.user_id);
}

async fn read_commands(
    mut receiver: SplitStream<WebSocket>,
    hub: &ChatHub,
    handle: &ConnectionHandle,
    pong_flag: &AtomicBool,
) {
    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                Ok(GatewayCommand::Publish { text }) => {
                    if let Err(e) = hub.publish(handle, &text) {
                        if e.is_retryable() {
                            error!("Chat publish failed: {}", e);
                        }
                        hub.notify(
                            handle,
                            GatewayEvent::Error {
                                kind: e.kind().to_string(),
                                message: e.to_string(),
                            },
                        );
                    }
                }
                Ok(GatewayCommand::Leave) => break,
                Err(e) => {
                    let identity = handle.identity();
                    warn!(
                        "{} ({}) bad command: {} -- raw: {}",
                        identity.handle,
                        identity.user_id,
                        e,
                        text.chars().take(200).collect::<String>()
                    );
                }
            },
            Message::Pong(_) => pong_flag.store(true, Ordering::Release),
            Message::Close(_) => break,
            _ => {}
        }
    }
}

async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &GatewayEvent,
) -> Result<(), axum::Error> {
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            error!("Failed to encode gateway event: {}", e);
            return Ok(());
        }
    };
    sender.send(Message::Text(text.into())).await
}
