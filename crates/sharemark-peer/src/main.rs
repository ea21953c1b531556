//! Headless annotation peer.
//!
//! Connects to a `sharemark-relay`, joins a room and runs one annotation
//! session on a fixed 16 ms tick. When the relay drops the connection the
//! peer rejoins and syncs again, a few times before giving up.

use clap::{Parser, ValueEnum};
use sharemark_core::transport::relay::{RelayEvent, RelayTransport};
use sharemark_core::{
    AnnotationConfig, AnnotationSession, ConfigError, ParticipantRole, Point, RoomMembership,
    SessionError, SyncState, ToolKind, TransportError,
};
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

const TICK: Duration = Duration::from_millis(16);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_REJOINS: u32 = 3;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Role {
    Host,
    Annotator,
    Viewer,
}

impl From<Role> for ParticipantRole {
    fn from(role: Role) -> Self {
        match role {
            Role::Host => ParticipantRole::Host,
            Role::Annotator => ParticipantRole::Annotator,
            Role::Viewer => ParticipantRole::Viewer,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "sharemark-peer", about = "Headless Sharemark annotation peer")]
struct Args {
    /// Relay WebSocket URL
    #[arg(long, default_value = "ws://127.0.0.1:3030/ws")]
    relay: String,
    /// Room to join
    #[arg(long)]
    room: String,
    /// Participant id to join as
    #[arg(long)]
    participant: String,
    #[arg(long, value_enum, default_value = "annotator")]
    role: Role,
    /// Config file (defaults to <config dir>/sharemark/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Draw a three-point stroke once synced
    #[arg(long)]
    demo_stroke: bool,
}

#[derive(Debug, Error)]
enum PeerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("relay error: {0}")]
    Relay(String),
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("sharemark").join("config.toml"))
}

fn load_config(explicit: Option<&PathBuf>) -> Result<AnnotationConfig, ConfigError> {
    match explicit {
        Some(path) => AnnotationConfig::load(path),
        None => match default_config_path() {
            Some(path) => AnnotationConfig::load_or_default(&path),
            None => Ok(AnnotationConfig::default()),
        },
    }
}

/// Scan a batch for the first event `done` accepts.
///
/// Returns the events queued behind it, or `None` if it is not in the batch.
fn split_after(
    events: Vec<RelayEvent>,
    done: &mut impl FnMut(&RelayEvent) -> bool,
) -> Result<Option<Vec<RelayEvent>>, PeerError> {
    let mut events = events.into_iter();
    while let Some(event) = events.next() {
        match &event {
            RelayEvent::Error { message } => return Err(PeerError::Relay(message.clone())),
            RelayEvent::Disconnected => return Err(PeerError::Relay("disconnected".to_string())),
            _ if done(&event) => return Ok(Some(events.collect())),
            _ => {}
        }
    }
    Ok(None)
}

/// Pump relay events until `done` says we are there.
fn wait_for(
    relay: &mut RelayTransport,
    what: &'static str,
    mut done: impl FnMut(&RelayEvent) -> bool,
) -> Result<Vec<RelayEvent>, PeerError> {
    let deadline = Instant::now() + CONNECT_TIMEOUT;
    while Instant::now() < deadline {
        if let Some(rest) = split_after(relay.poll_events(), &mut done)? {
            return Ok(rest);
        }
        thread::sleep(TICK);
    }
    Err(PeerError::Timeout(what))
}

/// Connect and join the room, returning events that arrived with the join.
fn connect_and_join(
    relay: &mut RelayTransport,
    args: &Args,
) -> Result<Vec<RelayEvent>, PeerError> {
    relay.connect(&args.relay)?;
    wait_for(relay, "connection", |e| matches!(e, RelayEvent::Connected))?;

    relay.join(&args.room, &args.participant)?;
    let rest = wait_for(relay, "room join", |e| matches!(e, RelayEvent::Joined { .. }))?;
    log::info!(
        "Joined {} as {} with {} other participant(s)",
        args.room,
        args.participant,
        relay.remote_participant_count()
    );
    Ok(rest)
}

/// Feed one relay event to the session. Returns `false` once the relay is gone.
fn dispatch(
    session: &mut AnnotationSession<RelayTransport>,
    event: RelayEvent,
    now: Instant,
) -> bool {
    match event {
        RelayEvent::Data {
            from,
            topic,
            payload,
        } => {
            session.handle_data(&payload, &from, &topic, now);
        }
        RelayEvent::ParticipantJoined { participant_id } => {
            session.participant_joined(&participant_id, None);
        }
        RelayEvent::ParticipantLeft { participant_id } => {
            session.participant_left(&participant_id);
        }
        RelayEvent::Error { message } => log::warn!("Relay error: {}", message),
        RelayEvent::Disconnected => {
            log::info!("Relay closed the connection");
            return false;
        }
        RelayEvent::Connected | RelayEvent::Joined { .. } => {}
    }
    true
}

fn draw_demo_stroke(session: &mut AnnotationSession<RelayTransport>) -> Result<(), SessionError> {
    session.set_tool(ToolKind::Pen);
    session.pointer_down(Point::new(0.2, 0.5))?;
    session.pointer_move(Point::new(0.5, 0.45))?;
    session.pointer_move(Point::new(0.8, 0.5))?;
    session.pointer_up()?;
    session.set_tool(ToolKind::Select);
    Ok(())
}

fn run(args: Args) -> Result<(), PeerError> {
    let config = load_config(args.config.as_ref())?;

    let mut relay = RelayTransport::new();
    let mut pending = connect_and_join(&mut relay, &args)?;

    let mut session: AnnotationSession<RelayTransport> =
        AnnotationSession::new(&args.participant, args.role.into(), config, relay);
    session.activate_sync(Instant::now())?;

    let mut demo_pending = args.demo_stroke;
    let mut last_len = usize::MAX;
    let mut rejoins = 0;

    loop {
        let now = Instant::now();
        pending.extend(session.transport_mut().poll_events());
        let mut connected = true;
        for event in pending.drain(..) {
            connected &= dispatch(&mut session, event, now);
        }

        if !connected {
            rejoins += 1;
            if rejoins > MAX_REJOINS {
                log::info!("Giving up after {} rejoin(s)", MAX_REJOINS);
                return Ok(());
            }
            log::info!("Rejoining {} (attempt {})", args.room, rejoins);
            let relay = session.transport_mut();
            relay.disconnect();
            pending = connect_and_join(relay, &args)?;
            session.activate_sync(Instant::now())?;
            continue;
        }

        if let Err(e) = session.poll(now) {
            log::warn!("Tick failed: {}", e);
        }

        if demo_pending && session.sync_state() == SyncState::Synced {
            demo_pending = false;
            if let Err(e) = draw_demo_stroke(&mut session) {
                log::warn!("Demo stroke failed: {}", e);
            }
        }

        let len = session.store().len();
        if len != last_len {
            log::info!("{} stroke(s) on the board", len);
            last_len = len;
        }

        thread::sleep(TICK);
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();
    log::info!("Starting Sharemark peer");
    run(args)?;
    Ok(())
}
