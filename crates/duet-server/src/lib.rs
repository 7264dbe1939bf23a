//! Duet conversation hub server.
//!
//! Two-party real-time messaging over QUIC. A client connection attaches to
//! one of two surfaces with its opening `Hello`:
//!
//! - the presence surface, which announces users coming online and going
//!   offline and carries new-message alerts
//! - the conversation surface, which joins the connection to the group shared
//!   by the two participants and streams that conversation's messages
//!
//! # Components
//!
//! - [`MessageHub`]: join, send, delete and disconnect for conversations
//! - [`PresenceHub`]: online/offline tracking and announcements
//! - [`FrameRouter`]: per-session dispatch of inbound frames to either hub
//! - [`ConversationStore`]: persistence ([`MemoryStore`], [`RedbStore`],
//!   [`ChaoticStore`] for fault injection)
//! - [`Notifier`]: fire-and-forget push by connection id
//! - [`Server`]: QUIC runtime driving all of the above

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod error;
pub mod hub;
pub mod notifier;
pub mod presence;
pub mod router;
mod server_error;
pub mod storage;
mod system_env;
mod transport;

use std::{
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use bytes::BytesMut;
use duet_core::{ConnectionId, PresenceRegistry, SessionConfig, env::Environment};
use duet_proto::{Frame, FrameHeader};
pub use error::ServerError;
pub use hub::{GroupGuard, GroupLocks, HubConfig, MessageHub};
pub use notifier::{ConnectionNotifier, DeliveryError, Notifier};
pub use presence::PresenceHub;
pub use router::{Flow, FrameRouter};
pub use server_error::HubError;
pub use storage::{
    ChaoticStore, ConversationStore, DeleteOutcome, MemoryStore, RedbStore, StorageError,
};
pub use system_env::SystemEnv;
use tokio::{
    sync::mpsc,
    task::JoinSet,
    time::{MissedTickBehavior, interval, timeout},
};
pub use transport::{QuinnConnection, QuinnTransport};

/// Application close code for a normal close.
pub const CLOSE_NORMAL: u32 = 0;

/// Application close code when `max_connections` is reached.
pub const CLOSE_AT_CAPACITY: u32 = 1;

/// How often each session is ticked for heartbeats and timeouts.
const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Inbound frames buffered between the stream readers and the session task.
const INBOUND_QUEUE: usize = 64;

/// Time given to the writer to flush queued frames before the connection
/// closes.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Runtime configuration.
#[derive(Debug, Clone)]
pub struct ServerRuntimeConfig {
    /// Address to bind to (e.g., "0.0.0.0:4433")
    pub bind_address: String,
    /// TLS certificate (PEM)
    pub cert_path: Option<PathBuf>,
    /// TLS private key (PEM)
    pub key_path: Option<PathBuf>,
    /// Directory for the redb database; in-memory storage when unset
    pub data_dir: Option<PathBuf>,
    /// Hub limits
    pub hub: HubConfig,
    /// Session liveness
    pub session: SessionConfig,
}

impl Default for ServerRuntimeConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:4433".to_string(),
            cert_path: None,
            key_path: None,
            data_dir: None,
            hub: HubConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

type Router<S> = FrameRouter<S, ConnectionNotifier, SystemEnv>;

/// Production Duet server.
pub struct Server<S: ConversationStore> {
    router: Arc<Router<S>>,
    notifier: ConnectionNotifier,
    transport: QuinnTransport,
    env: SystemEnv,
    max_connections: usize,
    active: Arc<AtomicUsize>,
}

impl<S: ConversationStore> Server<S> {
    /// Prepare `store` and bind the QUIC endpoint.
    ///
    /// Group memberships left behind by a previous process are cleared first;
    /// none of those connections can still be live.
    ///
    /// # Errors
    ///
    /// - `ServerError::Storage` if stale memberships cannot be cleared
    /// - `ServerError::Config` / `ServerError::Transport` from binding
    pub fn bind(config: ServerRuntimeConfig, store: S) -> Result<Self, ServerError> {
        let cleared = store.clear_connections()?;
        if cleared > 0 {
            tracing::info!(cleared, "cleared stale group memberships");
        }

        let env = SystemEnv::new();
        let notifier = ConnectionNotifier::new();
        let registry = Arc::new(PresenceRegistry::new());

        let max_connections = config.hub.max_connections;
        let hub =
            MessageHub::new(store, notifier.clone(), Arc::clone(&registry), env.clone(), config.hub);
        let presence = PresenceHub::new(registry, notifier.clone());
        let router = FrameRouter::new(hub, presence, notifier.clone(), env.clone(), config.session);

        let transport = QuinnTransport::bind(
            &config.bind_address,
            config.cert_path.as_deref(),
            config.key_path.as_deref(),
        )?;

        Ok(Self {
            router: Arc::new(router),
            notifier,
            transport,
            env,
            max_connections,
            active: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Accept connections until the endpoint closes.
    ///
    /// # Errors
    ///
    /// - `ServerError::Transport` if the local address is unavailable
    pub async fn run(self) -> Result<(), ServerError> {
        tracing::info!(addr = %self.transport.local_addr()?, "server starting");

        loop {
            let conn = match self.transport.accept().await {
                Ok(Some(conn)) => conn,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!("accept failed: {e}");
                    continue;
                },
            };

            let Some(slot) = ConnectionSlot::acquire(&self.active, self.max_connections) else {
                tracing::warn!(peer = %conn.remote_addr(), "at capacity, refusing connection");
                conn.close(CLOSE_AT_CAPACITY, "server at capacity");
                continue;
            };

            let connection_id = ConnectionId::new(self.env.random_u64());
            let router = Arc::clone(&self.router);
            let notifier = self.notifier.clone();

            tokio::spawn(async move {
                let _slot = slot;
                if let Err(e) = handle_connection(conn, connection_id, router, notifier).await {
                    tracing::debug!(connection = %connection_id, "connection ended: {e}");
                }
            });
        }

        tracing::info!("endpoint closed");
        Ok(())
    }

    /// Local address the server is bound to.
    pub fn local_addr(&self) -> Result<std::net::SocketAddr, ServerError> {
        self.transport.local_addr()
    }

    /// Connections currently being served.
    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }
}

/// One unit of `max_connections`, released on drop.
struct ConnectionSlot {
    active: Arc<AtomicUsize>,
}

impl ConnectionSlot {
    fn acquire(active: &Arc<AtomicUsize>, max: usize) -> Option<Self> {
        active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < max).then_some(n + 1))
            .ok()
            .map(|_| Self { active: Arc::clone(active) })
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Drive one connection from accept to close.
///
/// Inbound frames from every client stream funnel into one channel, so the
/// session sees them one at a time. Outbound frames for this connection,
/// including broadcasts from other sessions, leave through its notifier
/// outbox and a single writer task.
async fn handle_connection<S: ConversationStore>(
    conn: QuinnConnection,
    connection_id: ConnectionId,
    router: Arc<Router<S>>,
    notifier: ConnectionNotifier,
) -> Result<(), ServerError> {
    tracing::debug!(connection = %connection_id, peer = %conn.remote_addr(), "accepted");

    let outbound = conn.open_uni().await?;
    let outbox = notifier.register(connection_id);
    let writer = tokio::spawn(write_frames(outbound, outbox, connection_id));

    let (inbound_tx, mut inbound) = mpsc::channel(INBOUND_QUEUE);
    let reader = tokio::spawn(read_streams(conn.clone(), inbound_tx, connection_id));

    let mut session = router.open_session(connection_id);
    let mut ticker = interval(TICK_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let reason = loop {
        let flow = tokio::select! {
            frame = inbound.recv() => match frame {
                Some(frame) => router.handle_frame(&mut session, &frame).await,
                None => Flow::Close { reason: "connection lost".into() },
            },
            _ = ticker.tick() => router.tick(&mut session),
        };

        if let Flow::Close { reason } = flow {
            break reason;
        }
    };

    router.close_session(&mut session).await;
    reader.abort();

    notifier.unregister(connection_id);
    if let Err(e) = writer.await {
        tracing::debug!(connection = %connection_id, "writer task failed: {e}");
    }

    conn.close(CLOSE_NORMAL, &reason);
    tracing::info!(connection = %connection_id, %reason, "connection closed");

    Ok(())
}

/// Accept client streams and forward their frames until the connection ends.
async fn read_streams(
    conn: QuinnConnection,
    inbound: mpsc::Sender<Frame>,
    connection_id: ConnectionId,
) {
    let mut streams = JoinSet::new();

    loop {
        let recv = match conn.accept_bi().await {
            Ok((_send, recv)) => recv,
            Err(e) => {
                tracing::debug!(connection = %connection_id, "stopped accepting streams: {e}");
                return;
            },
        };

        while streams.try_join_next().is_some() {}

        let inbound = inbound.clone();
        streams.spawn(async move {
            if let Err(e) = read_frames(recv, inbound).await {
                tracing::warn!(connection = %connection_id, "dropping stream: {e}");
            }
        });
    }
}

/// Read frames from one stream until it finishes.
async fn read_frames(
    mut recv: quinn::RecvStream,
    inbound: mpsc::Sender<Frame>,
) -> Result<(), ServerError> {
    let mut header = [0u8; FrameHeader::SIZE];

    loop {
        match recv.read_exact(&mut header).await {
            Ok(()) => {},
            Err(quinn::ReadExactError::FinishedEarly(0)) => return Ok(()),
            Err(e) => return Err(ServerError::Transport(e.to_string())),
        }

        let payload_size = FrameHeader::from_bytes(&header)
            .map_err(|e| ServerError::Protocol(e.to_string()))?
            .payload_size() as usize;

        let mut buf = BytesMut::zeroed(FrameHeader::SIZE + payload_size);
        buf[..FrameHeader::SIZE].copy_from_slice(&header);
        recv.read_exact(&mut buf[FrameHeader::SIZE..])
            .await
            .map_err(|e| ServerError::Transport(e.to_string()))?;

        let frame = Frame::decode(&buf).map_err(|e| ServerError::Protocol(e.to_string()))?;

        if inbound.send(frame).await.is_err() {
            return Ok(());
        }
    }
}

/// Drain a connection's outbox onto its outbound stream.
///
/// Ends when the outbox is unregistered, then waits briefly for the peer to
/// read what was written.
async fn write_frames(
    mut stream: quinn::SendStream,
    mut outbox: mpsc::UnboundedReceiver<Frame>,
    connection_id: ConnectionId,
) {
    let mut buf = Vec::new();

    while let Some(frame) = outbox.recv().await {
        buf.clear();
        if let Err(e) = frame.encode(&mut buf) {
            tracing::warn!(connection = %connection_id, "failed to encode frame: {e}");
            continue;
        }
        if let Err(e) = stream.write_all(&buf).await {
            tracing::debug!(connection = %connection_id, "write failed: {e}");
            return;
        }
    }

    if stream.finish().is_ok() {
        let _ = timeout(FLUSH_TIMEOUT, stream.stopped()).await;
    }
}
