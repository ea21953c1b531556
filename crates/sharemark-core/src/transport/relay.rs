//! WebSocket relay transport.
//!
//! Frames exchanged with `sharemark-relay`:
//! ```json
//! { "type": "join", "room": "standup", "participantId": "alice" }
//! { "type": "publish", "topic": "annotations", "reliable": true, "data": "<base64>" }
//! { "type": "data", "from": "bob", "topic": "annotations", "data": "<base64>" }
//! ```

use super::{BroadcastTransport, PublishOptions, RoomMembership, TransportError, TransportResult};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use std::sync::mpsc::{Receiver, Sender, TryRecvError, channel};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tungstenite::{Message, connect};
use url::Url;

/// Frames sent to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    #[serde(rename_all = "camelCase")]
    Join { room: String, participant_id: String },
    Leave,
    /// Payload is base64 encoded.
    Publish {
        topic: String,
        reliable: bool,
        data: String,
    },
}

/// Frames received from the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Join confirmed; lists the other participants already in the room.
    Joined { room: String, participants: Vec<String> },
    #[serde(rename_all = "camelCase")]
    ParticipantJoined { participant_id: String },
    #[serde(rename_all = "camelCase")]
    ParticipantLeft { participant_id: String },
    Data { from: String, topic: String, data: String },
    Error { message: String },
}

/// Encode a payload for a `publish`/`data` frame.
pub fn encode_payload(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

/// Decode the payload of a `publish`/`data` frame.
pub fn decode_payload(data: &str) -> Option<Vec<u8>> {
    BASE64.decode(data).ok()
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Events surfaced by [`RelayTransport::poll_events`].
#[derive(Debug, Clone, PartialEq)]
pub enum RelayEvent {
    Connected,
    Disconnected,
    Joined { room: String, participants: Vec<String> },
    ParticipantJoined { participant_id: String },
    ParticipantLeft { participant_id: String },
    Data { from: String, topic: String, payload: Vec<u8> },
    Error { message: String },
}

impl RelayEvent {
    fn from_frame(frame: ServerFrame) -> Option<Self> {
        Some(match frame {
            ServerFrame::Joined { room, participants } => RelayEvent::Joined { room, participants },
            ServerFrame::ParticipantJoined { participant_id } => {
                RelayEvent::ParticipantJoined { participant_id }
            }
            ServerFrame::ParticipantLeft { participant_id } => {
                RelayEvent::ParticipantLeft { participant_id }
            }
            ServerFrame::Data { from, topic, data } => {
                let Some(payload) = decode_payload(&data) else {
                    log::warn!("Dropping relay data from {} with invalid base64", from);
                    return None;
                };
                RelayEvent::Data { from, topic, payload }
            }
            ServerFrame::Error { message } => RelayEvent::Error { message },
        })
    }
}

/// Commands sent to the WebSocket thread.
enum WsCommand {
    Send(String),
    Close,
}

/// Relay client for native platforms.
///
/// Uses a background thread for non-blocking operation; events must be
/// drained with [`RelayTransport::poll_events`] from the owning event loop.
pub struct RelayTransport {
    state: ConnectionState,
    room: Option<String>,
    /// Other participants in the current room.
    participants: Vec<String>,
    /// Channel to send commands to the WebSocket thread.
    cmd_tx: Option<Sender<WsCommand>>,
    /// Channel to receive events from the WebSocket thread.
    event_rx: Option<Receiver<RelayEvent>>,
    _thread: Option<JoinHandle<()>>,
}

impl RelayTransport {
    /// Create a new disconnected client.
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            room: None,
            participants: Vec::new(),
            cmd_tx: None,
            event_rx: None,
            _thread: None,
        }
    }

    /// Connect to a relay at a `ws://` or `wss://` URL.
    pub fn connect(&mut self, url: &str) -> TransportResult<()> {
        if self.cmd_tx.is_some() {
            return Err(TransportError::Rejected("already connected".to_string()));
        }

        let parsed = Url::parse(url).map_err(|e| TransportError::InvalidUrl(e.to_string()))?;
        if parsed.scheme() != "ws" && parsed.scheme() != "wss" {
            return Err(TransportError::InvalidUrl(format!(
                "unsupported scheme: {}",
                parsed.scheme()
            )));
        }

        self.state = ConnectionState::Connecting;

        let (cmd_tx, cmd_rx) = channel::<WsCommand>();
        let (event_tx, event_rx) = channel::<RelayEvent>();
        let url = url.to_string();

        let handle = thread::spawn(move || run_socket(&url, cmd_rx, event_tx));

        self.cmd_tx = Some(cmd_tx);
        self.event_rx = Some(event_rx);
        self._thread = Some(handle);
        Ok(())
    }

    /// Ask the relay to put us in `room` as `participant_id`.
    pub fn join(&mut self, room: &str, participant_id: &str) -> TransportResult<()> {
        self.send_frame(&ClientFrame::Join {
            room: room.to_string(),
            participant_id: participant_id.to_string(),
        })
    }

    /// Leave the current room.
    pub fn leave(&mut self) -> TransportResult<()> {
        if self.room.take().is_some() {
            self.participants.clear();
            self.send_frame(&ClientFrame::Leave)?;
        }
        Ok(())
    }

    /// Close the connection.
    pub fn disconnect(&mut self) {
        if let Some(tx) = self.cmd_tx.take() {
            let _ = tx.send(WsCommand::Close);
        }
        self.event_rx = None;
        self._thread = None;
        self.room = None;
        self.participants.clear();
        self.state = ConnectionState::Disconnected;
    }

    /// Drain pending events (non-blocking), updating membership as we go.
    pub fn poll_events(&mut self) -> Vec<RelayEvent> {
        let Some(rx) = self.event_rx.as_ref() else {
            return Vec::new();
        };
        let events: Vec<RelayEvent> = rx.try_iter().collect();
        for event in &events {
            self.observe(event);
        }
        events
    }

    fn observe(&mut self, event: &RelayEvent) {
        match event {
            RelayEvent::Connected => self.state = ConnectionState::Connected,
            RelayEvent::Disconnected => {
                self.state = ConnectionState::Disconnected;
                self.room = None;
                self.participants.clear();
            }
            RelayEvent::Error { .. } => self.state = ConnectionState::Error,
            RelayEvent::Joined { room, participants } => {
                self.room = Some(room.clone());
                self.participants = participants.clone();
            }
            RelayEvent::ParticipantJoined { participant_id } => {
                if !self.participants.contains(participant_id) {
                    self.participants.push(participant_id.clone());
                }
            }
            RelayEvent::ParticipantLeft { participant_id } => {
                self.participants.retain(|p| p != participant_id);
            }
            RelayEvent::Data { .. } => {}
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn room(&self) -> Option<&str> {
        self.room.as_deref()
    }

    fn send_frame(&self, frame: &ClientFrame) -> TransportResult<()> {
        let tx = self.cmd_tx.as_ref().ok_or(TransportError::NotConnected)?;
        let json =
            serde_json::to_string(frame).map_err(|e| TransportError::Rejected(e.to_string()))?;
        tx.send(WsCommand::Send(json))
            .map_err(|_| TransportError::ChannelClosed)
    }
}

impl Default for RelayTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for RelayTransport {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl BroadcastTransport for RelayTransport {
    fn publish(&mut self, payload: &[u8], options: &PublishOptions) -> TransportResult<()> {
        if self.room.is_none() {
            return Err(TransportError::NotInRoom);
        }
        self.send_frame(&ClientFrame::Publish {
            topic: options.topic.clone(),
            reliable: options.reliable,
            data: encode_payload(payload),
        })
    }
}

impl RoomMembership for RelayTransport {
    fn remote_participants(&self) -> Vec<String> {
        self.participants.clone()
    }
}

/// Socket loop run on the background thread.
fn run_socket(url: &str, cmd_rx: Receiver<WsCommand>, event_tx: Sender<RelayEvent>) {
    log::info!("Relay thread: connecting to {}", url);

    let (mut socket, response) = match connect(url) {
        Ok(ok) => ok,
        Err(e) => {
            log::error!("Relay connection failed: {}", e);
            let _ = event_tx.send(RelayEvent::Error {
                message: format!("Connection failed: {}", e),
            });
            return;
        }
    };

    log::info!("Relay connected, status: {}", response.status());
    let _ = event_tx.send(RelayEvent::Connected);

    // Short read timeout so outgoing commands are not starved by a blocking read
    match socket.get_mut() {
        tungstenite::stream::MaybeTlsStream::Plain(tcp) => {
            let _ = tcp.set_read_timeout(Some(Duration::from_millis(50)));
            let _ = tcp.set_write_timeout(Some(Duration::from_secs(5)));
        }
        #[allow(unreachable_patterns)]
        _ => {
            log::debug!("TLS or other stream - using default timeout handling");
        }
    }

    loop {
        match cmd_rx.try_recv() {
            Ok(WsCommand::Send(msg)) => {
                log::debug!("Relay sending: {}", log_preview(&msg));
                if let Err(e) = socket.send(Message::Text(msg)) {
                    log::error!("Relay send error: {}", e);
                    break;
                }
            }
            Ok(WsCommand::Close) => {
                log::info!("Relay close requested");
                let _ = socket.close(None);
                break;
            }
            Err(TryRecvError::Disconnected) => {
                log::info!("Relay command channel disconnected");
                break;
            }
            Err(TryRecvError::Empty) => {}
        }

        match socket.read() {
            Ok(Message::Text(txt)) => match serde_json::from_str::<ServerFrame>(&txt) {
                Ok(frame) => {
                    if let Some(event) = RelayEvent::from_frame(frame) {
                        let _ = event_tx.send(event);
                    }
                }
                Err(e) => log::warn!("Failed to parse relay frame: {}", e),
            },
            Ok(Message::Ping(data)) => {
                let _ = socket.send(Message::Pong(data));
            }
            Ok(Message::Close(_)) => {
                log::info!("Relay sent close frame");
                break;
            }
            Ok(_) => {}
            Err(tungstenite::Error::Io(ref e))
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                continue;
            }
            Err(e) => {
                log::error!("Relay read error: {}", e);
                break;
            }
        }
    }

    log::info!("Relay thread exiting");
    let _ = event_tx.send(RelayEvent::Disconnected);
}

/// At most the first 100 characters of a frame, cut on a char boundary.
fn log_preview(msg: &str) -> &str {
    msg.char_indices().nth(100).map_or(msg, |(end, _)| &msg[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_preview_respects_char_boundaries() {
        let short = r#"{"type":"join","room":"café"}"#;
        assert_eq!(log_preview(short), short);

        let long = "é".repeat(150);
        let preview = log_preview(&long);
        assert_eq!(preview.chars().count(), 100);
        assert_eq!(preview.len(), 200);
    }

    #[test]
    fn test_join_frame_shape() {
        let frame = ClientFrame::Join {
            room: "standup".to_string(),
            participant_id: "alice".to_string(),
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert_eq!(json, r#"{"type":"join","room":"standup","participantId":"alice"}"#);
    }

    #[test]
    fn test_data_frame_to_event() {
        let json = format!(
            r#"{{"type":"data","from":"bob","topic":"annotations","data":"{}"}}"#,
            encode_payload(b"{\"type\":\"clear_all\"}")
        );
        let frame: ServerFrame = serde_json::from_str(&json).unwrap();
        assert_eq!(
            RelayEvent::from_frame(frame),
            Some(RelayEvent::Data {
                from: "bob".to_string(),
                topic: "annotations".to_string(),
                payload: b"{\"type\":\"clear_all\"}".to_vec(),
            })
        );
    }

    #[test]
    fn test_bad_base64_is_dropped() {
        let frame = ServerFrame::Data {
            from: "bob".to_string(),
            topic: "annotations".to_string(),
            data: "***".to_string(),
        };
        assert_eq!(RelayEvent::from_frame(frame), None);
    }

    #[test]
    fn test_membership_tracking() {
        let mut relay = RelayTransport::new();
        relay.observe(&RelayEvent::Joined {
            room: "r".to_string(),
            participants: vec!["a".to_string()],
        });
        relay.observe(&RelayEvent::ParticipantJoined { participant_id: "b".to_string() });
        relay.observe(&RelayEvent::ParticipantJoined { participant_id: "b".to_string() });
        assert_eq!(relay.remote_participants(), vec!["a".to_string(), "b".to_string()]);

        relay.observe(&RelayEvent::ParticipantLeft { participant_id: "a".to_string() });
        assert_eq!(relay.remote_participant_count(), 1);
        assert_eq!(relay.room(), Some("r"));
    }

    #[test]
    fn test_publish_requires_room() {
        let mut relay = RelayTransport::new();
        assert_eq!(
            relay.publish(b"x", &PublishOptions::reliable("annotations")),
            Err(TransportError::NotInRoom)
        );
    }

    #[test]
    fn test_connect_rejects_http_url() {
        let mut relay = RelayTransport::new();
        assert!(matches!(
            relay.connect("http://localhost:3030/ws"),
            Err(TransportError::InvalidUrl(_))
        ));
        assert!(matches!(relay.connect("not a url"), Err(TransportError::InvalidUrl(_))));
    }
}
