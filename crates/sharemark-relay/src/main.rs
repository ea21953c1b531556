//! Sharemark WebSocket Relay Server
//!
//! Rooms, membership and topic-scoped fan-out for annotation peers. The
//! relay never looks inside payloads and keeps no history.
//!
//! ## Protocol
//!
//! Messages are JSON with the following format:
//! ```json
//! { "type": "join", "room": "standup", "participantId": "alice" }
//! { "type": "publish", "topic": "annotations", "reliable": true, "data": "<base64>" }
//! { "type": "leave" }
//! ```

mod rooms;

use axum::{
    Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
    routing::get,
};
use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use rooms::{Rooms, Subscription};
use sharemark_core::transport::relay::{ClientFrame, ServerFrame};
use std::{net::SocketAddr, sync::Arc};
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

#[derive(Parser, Debug)]
#[command(name = "sharemark-relay", about = "WebSocket relay for Sharemark annotation peers")]
struct Args {
    /// Address to listen on
    #[arg(long, env = "SHAREMARK_RELAY_ADDR", default_value = "0.0.0.0:3030")]
    addr: SocketAddr,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sharemark_relay=info,tower_http=info".into()),
        )
        .init();

    let args = Args::parse();
    let state = Arc::new(Rooms::new());

    let app = Router::new()
        .route("/", get(index))
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .with_state(state);

    info!("Sharemark relay listening on {}", args.addr);
    info!("WebSocket endpoint: ws://{}/ws", args.addr);

    let listener = tokio::net::TcpListener::bind(args.addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

/// Index page
async fn index() -> &'static str {
    "Sharemark Relay Server - Connect via WebSocket at /ws"
}

/// Health check
async fn health() -> &'static str {
    "ok"
}

/// WebSocket upgrade handler
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<Rooms>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

fn encode(frame: &ServerFrame) -> Option<Message> {
    match serde_json::to_string(frame) {
        Ok(json) => Some(Message::Text(json.into())),
        Err(e) => {
            warn!("Failed to encode frame: {}", e);
            None
        }
    }
}

/// Where a connection currently is.
struct Membership {
    room: String,
    participant: String,
    subscription: Subscription,
}

/// Handle a WebSocket connection
async fn handle_socket(socket: WebSocket, state: Arc<Rooms>) {
    info!("New connection");

    let (mut sender, mut receiver) = socket.split();
    let mut membership: Option<Membership> = None;

    loop {
        tokio::select! {
            // Handle incoming messages from client
            msg = receiver.next() => {
                let text = match msg {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue, // Ignore binary/ping/pong
                    Some(Err(e)) => {
                        warn!("WebSocket error: {}", e);
                        break;
                    }
                };

                let reply = match serde_json::from_str::<ClientFrame>(&text) {
                    Ok(ClientFrame::Join { room, participant_id }) => {
                        // Leave current room if any
                        if let Some(old) = membership.take() {
                            state.leave(&old.room, &old.participant);
                        }
                        match state.join(&room, &participant_id) {
                            Ok((subscription, participants)) => {
                                info!(
                                    "{} joined room {} ({} other(s))",
                                    participant_id,
                                    room,
                                    participants.len()
                                );
                                membership = Some(Membership {
                                    room: room.clone(),
                                    participant: participant_id,
                                    subscription,
                                });
                                Some(ServerFrame::Joined { room, participants })
                            }
                            Err(e) => {
                                warn!("Join refused: {}", e);
                                Some(ServerFrame::Error { message: e.to_string() })
                            }
                        }
                    }
                    Ok(ClientFrame::Leave) => {
                        if let Some(old) = membership.take() {
                            info!("{} left room {}", old.participant, old.room);
                            state.leave(&old.room, &old.participant);
                        }
                        None
                    }
                    Ok(ClientFrame::Publish { topic, reliable: _, data }) => match &membership {
                        Some(m) => {
                            debug!("{} published {} bytes on {}", m.participant, data.len(), topic);
                            state.publish(&m.room, &m.participant, topic, data);
                            None
                        }
                        None => Some(ServerFrame::Error {
                            message: "join a room before publishing".to_string(),
                        }),
                    },
                    Err(e) => {
                        warn!("Invalid message: {}", e);
                        Some(ServerFrame::Error { message: format!("Invalid message: {}", e) })
                    }
                };

                if let Some(message) = reply.as_ref().and_then(encode) {
                    if sender.send(message).await.is_err() {
                        break;
                    }
                }
            }

            // Handle broadcast frames from the room
            event = async {
                match &mut membership {
                    Some(m) => m.subscription.recv().await,
                    None => std::future::pending().await,
                }
            } => {
                match event {
                    Ok(frame) => {
                        if let Some(message) = encode(&frame) {
                            if sender.send(message).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(e) => {
                        // Missed frames cannot be replayed; the client must rejoin and resync.
                        if let Some(m) = &membership {
                            warn!("Dropping {} from room {}: {}", m.participant, m.room, e);
                        }
                        let frame = ServerFrame::Error {
                            message: format!("{}, rejoin to resync", e),
                        };
                        if let Some(message) = encode(&frame) {
                            let _ = sender.send(message).await;
                        }
                        let _ = sender.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
        }
    }

    // Cleanup on disconnect
    if let Some(m) = membership {
        info!("{} disconnected from room {}", m.participant, m.room);
        state.leave(&m.room, &m.participant);
    }
    info!("Connection closed");
}
