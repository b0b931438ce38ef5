//! Matchmaking server
//!
//! `MatchmakingActor` is the single owner of the wait queue and rooms.
//! Connection handlers talk to it only through `ServerCommand`s, so all
//! matchmaking decisions are serialized without locks. `ChatServer` binds
//! the listener and starts the actor and the accept loop.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::error::ChatError;
use crate::handler::handle_connection;
use crate::matchmaker::{Delivery, Matchmaker};
use crate::message::ProtocolMessage;
use crate::registry::ConnectionRegistry;
use crate::types::ConnectionId;

/// Channel buffer size for server commands
const CHANNEL_BUFFER_SIZE: usize = 256;

/// Pause after a failed accept, so persistent errors (e.g. out of file
/// descriptors) do not spin
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Commands sent to the matchmaking actor
#[derive(Debug)]
pub enum ServerCommand {
    /// New connection registered
    Connect { connection_id: ConnectionId },
    /// Connection closed
    Disconnect { connection_id: ConnectionId },
    /// Frame received from a connection
    Inbound {
        connection_id: ConnectionId,
        message: ProtocolMessage,
    },
    /// Deferred pairing attempt
    TryPair,
    /// Read-only view of the queue and rooms
    Snapshot {
        reply: oneshot::Sender<MatchmakingSnapshot>,
    },
}

/// Point-in-time copy of matchmaking state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchmakingSnapshot {
    /// Waiting connections, oldest first
    pub waiting: Vec<ConnectionId>,
    /// Partner map, both directions
    pub rooms: HashMap<ConnectionId, ConnectionId>,
}

/// The matchmaking actor
pub struct MatchmakingActor {
    matchmaker: Matchmaker,
    registry: ConnectionRegistry,
    receiver: mpsc::Receiver<ServerCommand>,
    /// Handle for scheduling `TryPair`; weak so it does not keep the actor alive
    scheduler: mpsc::WeakSender<ServerCommand>,
    pairing_delay: Duration,
}

impl MatchmakingActor {
    pub fn new(
        receiver: mpsc::Receiver<ServerCommand>,
        scheduler: mpsc::WeakSender<ServerCommand>,
        registry: ConnectionRegistry,
        pairing_delay: Duration,
    ) -> Self {
        let matchmaker = if pairing_delay.is_zero() {
            Matchmaker::new()
        } else {
            Matchmaker::deferred()
        };
        Self {
            matchmaker,
            registry,
            receiver,
            scheduler,
            pairing_delay,
        }
    }

    /// Run the actor loop until every command sender is dropped
    pub async fn run(mut self) {
        info!("Matchmaking started");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd).await;
        }

        info!("Matchmaking shutting down");
    }

    async fn handle_command(&mut self, cmd: ServerCommand) {
        match cmd {
            ServerCommand::Connect { connection_id } => {
                let deliveries = self.matchmaker.connect(connection_id);
                self.deliver(deliveries).await;
                self.schedule_pairing();
            }
            ServerCommand::Disconnect { connection_id } => {
                let deliveries = self.matchmaker.disconnect(connection_id);
                let requeued = !deliveries.is_empty();
                self.deliver(deliveries).await;
                if requeued {
                    self.schedule_pairing();
                }
                debug!(
                    "Waiting: {}, Rooms: {}",
                    self.matchmaker.waiting().len(),
                    self.matchmaker.room_count()
                );
            }
            ServerCommand::Inbound {
                connection_id,
                message,
            } => match self.matchmaker.handle_message(connection_id, message) {
                Ok(deliveries) => self.deliver(deliveries).await,
                Err(e) => warn!("{}", e),
            },
            ServerCommand::TryPair => {
                let deliveries = self.matchmaker.try_pair();
                self.deliver(deliveries).await;
            }
            ServerCommand::Snapshot { reply } => {
                let _ = reply.send(MatchmakingSnapshot {
                    waiting: self.matchmaker.waiting(),
                    rooms: self.matchmaker.rooms(),
                });
            }
        }
    }

    /// Queue deliveries in order without waiting on any socket
    ///
    /// A peer whose outbound queue is full is evicted and handled as a
    /// disconnect, so its partner is told and re-queued.
    async fn deliver(&mut self, deliveries: Vec<Delivery>) {
        let mut pending = VecDeque::from(deliveries);
        while let Some(Delivery { to, message }) = pending.pop_front() {
            let kind = message.kind();
            match self.registry.send_to(to, message).await {
                Ok(()) => {}
                Err(ChatError::OutboundFull(slow)) => {
                    warn!("Client {} is not reading, dropping it", slow);
                    self.registry.evict(slow).await;
                    let followups = self.matchmaker.disconnect(slow);
                    if !followups.is_empty() {
                        self.schedule_pairing();
                    }
                    pending.extend(followups);
                }
                Err(e) => warn!("Failed to send {} to {}: {}", kind, to, e),
            }
        }
    }

    /// Queue a delayed `TryPair` when pairing is not eager
    fn schedule_pairing(&self) {
        if self.pairing_delay.is_zero() {
            return;
        }
        let Some(sender) = self.scheduler.upgrade() else {
            return;
        };
        let delay = self.pairing_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = sender.send(ServerCommand::TryPair).await;
        });
    }
}

/// A bound but not yet running server
pub struct ChatServer {
    listener: TcpListener,
    config: ServerConfig,
}

impl ChatServer {
    /// Bind the listening socket
    pub async fn bind(config: ServerConfig) -> Result<Self, ChatError> {
        let listener = TcpListener::bind((config.bind_addr, config.port))
            .await
            .map_err(ChatError::Connection)?;
        Ok(Self { listener, config })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ChatError> {
        Ok(self.listener.local_addr()?)
    }

    /// Spawn the matchmaking actor and the accept loop
    pub fn start(self) -> Result<ServerHandle, ChatError> {
        let local_addr = self.local_addr()?;
        let registry = ConnectionRegistry::new();

        let (cmd_tx, cmd_rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
        let actor = MatchmakingActor::new(
            cmd_rx,
            cmd_tx.downgrade(),
            registry.clone(),
            self.config.pairing_delay,
        );
        tokio::spawn(actor.run());

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let accept_task = tokio::spawn(accept_loop(
            self.listener,
            registry.clone(),
            cmd_tx.clone(),
            shutdown_rx,
        ));

        info!("Chat server listening on {}", local_addr);

        Ok(ServerHandle {
            local_addr,
            registry,
            commands: cmd_tx,
            shutdown: shutdown_tx,
            accept_task,
        })
    }
}

/// Connection accept loop
async fn accept_loop(
    listener: TcpListener,
    registry: ConnectionRegistry,
    cmd_tx: mpsc::Sender<ServerCommand>,
    shutdown: watch::Receiver<bool>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                debug!("New connection from {}", addr);
                let registry = registry.clone();
                let cmd_tx = cmd_tx.clone();
                let shutdown = shutdown.clone();

                // Spawn handler task for each connection
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, registry, cmd_tx, shutdown).await {
                        error!("Connection handler error: {}", e);
                    }
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
}

/// Handle to a running server
pub struct ServerHandle {
    local_addr: SocketAddr,
    registry: ConnectionRegistry,
    commands: mpsc::Sender<ServerCommand>,
    shutdown: watch::Sender<bool>,
    accept_task: JoinHandle<()>,
}

impl ServerHandle {
    /// The bound port (useful when the OS assigned it)
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub async fn connection_count(&self) -> usize {
        self.registry.len().await
    }

    /// Consistent view of the queue and rooms
    pub async fn snapshot(&self) -> Result<MatchmakingSnapshot, ChatError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(ServerCommand::Snapshot { reply })
            .await
            .map_err(|_| ChatError::ServerClosed)?;
        response.await.map_err(|_| ChatError::ServerClosed)
    }

    /// Waiting connections, oldest first
    pub async fn waiting_clients(&self) -> Result<Vec<ConnectionId>, ChatError> {
        Ok(self.snapshot().await?.waiting)
    }

    /// Full partner map
    pub async fn rooms(&self) -> Result<HashMap<ConnectionId, ConnectionId>, ChatError> {
        Ok(self.snapshot().await?.rooms)
    }

    /// Stop accepting and close every connection
    pub async fn shutdown(self) {
        info!("Chat server shutting down");
        self.accept_task.abort();
        let _ = self.shutdown.send(true);
        self.registry.close_all().await;
    }
}
