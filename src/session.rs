//! Peer session (connecting side)
//!
//! `ChatSession` connects to a matchmaking server, interprets the frames it
//! receives, keeps the local transcript and typing state, and exposes an
//! event surface for presentation layers.
//!
//! Phases:
//!
//! ```text
//! Idle → Connecting → Waiting ⇄ Paired
//!              └──────────┴────────┴──→ Disconnected
//! ```
//!
//! Listener callbacks run synchronously on the receive path. They must not
//! block; a callback that wants to reply should spawn a task.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Instant;

use tokio::io::AsyncRead;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::connection::{receive_loop, Connection, ConnectionHandler};
use crate::error::{ChatError, ListenerError};
use crate::listeners::Listeners;
use crate::message::ProtocolMessage;
use crate::types::{ConnectionId, HistoricMessage};

/// Lifecycle phase of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Never connected
    Idle,
    /// Stream open, server has not queued us yet
    Connecting,
    /// Queued for a partner
    Waiting,
    /// In a room
    Paired,
    /// Closed locally or by the server; terminal
    Disconnected,
}

impl SessionPhase {
    fn is_live(self) -> bool {
        matches!(self, Self::Connecting | Self::Waiting | Self::Paired)
    }
}

struct SessionState {
    phase: SessionPhase,
    has_partner: bool,
    partner_is_typing: bool,
    /// Bumped on every arm or cancel so a stale timer cannot clear a fresh indicator
    typing_generation: u64,
    typing_timer: Option<JoinHandle<()>>,
    last_typing_sent: Option<Instant>,
    history: Vec<HistoricMessage>,
    last_port: Option<u16>,
    connection: Option<Arc<Connection>>,
    reader: Option<JoinHandle<()>>,
}

impl SessionState {
    fn new() -> Self {
        Self {
            phase: SessionPhase::Idle,
            has_partner: false,
            partner_is_typing: false,
            typing_generation: 0,
            typing_timer: None,
            last_typing_sent: None,
            history: Vec::new(),
            last_port: None,
            connection: None,
            reader: None,
        }
    }

    /// Live connection, or `NotConnected`
    fn live_connection(&self) -> Result<Arc<Connection>, ChatError> {
        match (&self.connection, self.phase.is_live()) {
            (Some(connection), true) => Ok(connection.clone()),
            _ => Err(ChatError::NotConnected),
        }
    }

    /// Turn the partner typing indicator off, returning whether it was on
    fn cancel_partner_typing(&mut self) -> bool {
        self.typing_generation += 1;
        if let Some(timer) = self.typing_timer.take() {
            timer.abort();
        }
        std::mem::replace(&mut self.partner_is_typing, false)
    }
}

struct SessionListeners {
    connected: Listeners<()>,
    disconnected: Listeners<()>,
    partner_connected: Listeners<()>,
    partner_disconnected: Listeners<()>,
    partner_message: Listeners<HistoricMessage>,
    partner_started_typing: Listeners<()>,
    partner_stopped_typing: Listeners<()>,
    waiting_for_partner: Listeners<()>,
    outgoing_message: Listeners<HistoricMessage>,
}

impl SessionListeners {
    fn new() -> Self {
        Self {
            connected: Listeners::new("connected"),
            disconnected: Listeners::new("disconnected"),
            partner_connected: Listeners::new("partner_connected"),
            partner_disconnected: Listeners::new("partner_disconnected"),
            partner_message: Listeners::new("partner_message"),
            partner_started_typing: Listeners::new("partner_started_typing"),
            partner_stopped_typing: Listeners::new("partner_stopped_typing"),
            waiting_for_partner: Listeners::new("waiting_for_partner"),
            outgoing_message: Listeners::new("outgoing_message"),
        }
    }
}

struct SessionShared {
    config: ClientConfig,
    state: Mutex<SessionState>,
    listeners: SessionListeners,
}

/// Client side of a random chat
///
/// Cheap to clone; clones share the same session.
#[derive(Clone)]
pub struct ChatSession {
    shared: Arc<SessionShared>,
}

impl Default for ChatSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatSession {
    pub fn new() -> Self {
        Self::with_config(ClientConfig::default())
    }

    pub fn with_config(config: ClientConfig) -> Self {
        Self {
            shared: Arc::new(SessionShared {
                config,
                state: Mutex::new(SessionState::new()),
                listeners: SessionListeners::new(),
            }),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    // ---------------------------------------------------------------------
    // Connection lifecycle
    // ---------------------------------------------------------------------

    /// Connect to the server at `port` on the configured host
    ///
    /// # Errors
    /// `Connection` if the stream cannot be opened, `AlreadyConnected`
    /// on a live session, `NotConnected` on a session that was disconnected.
    pub async fn connect(&self, port: u16) -> Result<(), ChatError> {
        {
            let mut state = self.lock_state();
            match state.phase {
                SessionPhase::Idle => state.phase = SessionPhase::Connecting,
                SessionPhase::Disconnected => return Err(ChatError::NotConnected),
                _ => return Err(ChatError::AlreadyConnected),
            }
        }

        let addr = SocketAddr::new(self.shared.config.host, port);
        debug!("Connecting to {} ... ", addr);

        let stream = match TcpStream::connect(addr).await {
            Ok(stream) => stream,
            Err(e) => {
                let mut state = self.lock_state();
                // A disconnect during the attempt stays final
                if state.phase == SessionPhase::Connecting {
                    state.phase = SessionPhase::Idle;
                }
                drop(state);
                warn!("Failed to connect to {}: {}", addr, e);
                return Err(ChatError::Connection(e));
            }
        };

        let (connection, reader) = Connection::from_tcp(stream);
        self.attach(Arc::new(connection), reader, Some(port))?;
        info!("Connected to server on port {}", port);
        Ok(())
    }

    /// Connect to the configured default port
    pub async fn connect_default(&self) -> Result<(), ChatError> {
        self.connect(self.shared.config.default_port).await
    }

    /// Adopt an open connection and start receiving on `reader`
    ///
    /// Connected listeners fire before the first frame is processed.
    ///
    /// # Errors
    /// `NotConnected` if the session was disconnected while the stream was
    /// being opened; the new stream is dropped.
    pub(crate) fn attach<R>(
        &self,
        connection: Arc<Connection>,
        reader: R,
        port: Option<u16>,
    ) -> Result<(), ChatError>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let id = connection.id();
        {
            let mut state = self.lock_state();
            match state.phase {
                SessionPhase::Idle | SessionPhase::Connecting => {}
                SessionPhase::Disconnected => {
                    debug!("Disconnected while connecting, dropping stream");
                    return Err(ChatError::NotConnected);
                }
                SessionPhase::Waiting | SessionPhase::Paired => {
                    return Err(ChatError::AlreadyConnected);
                }
            }
            state.phase = SessionPhase::Connecting;
            state.connection = Some(connection);
            if port.is_some() {
                state.last_port = port;
            }
        }

        self.shared.listeners.connected.emit(&());

        // Spawn under the lock so the handle is stored before the reader can
        // observe a remote close
        let mut state = self.lock_state();
        if !state.phase.is_live() {
            // A connected listener disconnected us
            return Ok(());
        }
        let session = self.clone();
        state.reader = Some(tokio::spawn(async move {
            receive_loop(id, reader, &session).await;
        }));
        Ok(())
    }

    /// Close the connection
    ///
    /// # Errors
    /// `NotConnected` if the session is not connected.
    pub async fn disconnect(&self) -> Result<(), ChatError> {
        let (connection, reader) = {
            let mut state = self.lock_state();
            if !state.phase.is_live() {
                return Err(ChatError::NotConnected);
            }
            state.phase = SessionPhase::Disconnected;
            state.has_partner = false;
            state.cancel_partner_typing();
            (state.connection.take(), state.reader.take())
        };

        if let Some(reader) = reader {
            reader.abort();
        }
        if let Some(connection) = connection {
            connection.close().await;
        }

        info!("Disconnected from server");
        self.shared.listeners.disconnected.emit(&());
        Ok(())
    }

    /// The server closed the stream or it failed
    async fn handle_remote_close(&self) {
        let connection = {
            let mut state = self.lock_state();
            if !state.phase.is_live() {
                // Local disconnect already ran and fired the event
                return;
            }
            state.phase = SessionPhase::Disconnected;
            state.has_partner = false;
            state.cancel_partner_typing();
            state.reader = None;
            state.connection.take()
        };

        if let Some(connection) = connection {
            connection.close().await;
        }

        info!("Disconnected from server");
        self.shared.listeners.disconnected.emit(&());
    }

    // ---------------------------------------------------------------------
    // Outgoing
    // ---------------------------------------------------------------------

    /// Send a chat message to the partner
    ///
    /// Without a partner this logs a warning and does nothing.
    ///
    /// # Errors
    /// `NotConnected` if the session is not connected; IO errors from the write.
    pub async fn send(&self, text: impl Into<String>) -> Result<(), ChatError> {
        let text = text.into();
        let (connection, entry) = {
            let mut state = self.lock_state();
            let connection = state.live_connection()?;
            if !state.has_partner {
                warn!("Cannot send message to partner because there is no partner");
                return Ok(());
            }
            // Next keystroke announces typing again right away
            state.last_typing_sent = None;
            let entry = HistoricMessage::sent(text.clone());
            state.history.push(entry.clone());
            (connection, entry)
        };

        self.shared.listeners.outgoing_message.emit(&entry);
        connection
            .send(&ProtocolMessage::PartnerMessage(text))
            .await
    }

    /// Tell the partner we are typing
    ///
    /// Rate limited to one notification per `typing_send_interval`; calls
    /// inside the window are coalesced. No-op without a partner.
    pub async fn mark_as_typing(&self) -> Result<(), ChatError> {
        let connection = {
            let mut state = self.lock_state();
            let connection = state.live_connection()?;
            if !state.has_partner {
                return Ok(());
            }
            let now = Instant::now();
            if let Some(last) = state.last_typing_sent {
                if now.duration_since(last) < self.shared.config.typing_send_interval {
                    return Ok(());
                }
            }
            state.last_typing_sent = Some(now);
            connection
        };

        connection.send(&ProtocolMessage::PartnerTyping).await
    }

    // ---------------------------------------------------------------------
    // Incoming
    // ---------------------------------------------------------------------

    /// Apply one frame from the server
    pub(crate) fn handle_message(&self, message: ProtocolMessage) {
        debug!("Server responded with {}", message.kind());
        let listeners = &self.shared.listeners;

        match message {
            ProtocolMessage::PartnerConnected => {
                let was_typing = {
                    let mut state = self.lock_state();
                    state.phase = SessionPhase::Paired;
                    state.has_partner = true;
                    state.history.clear();
                    state.last_typing_sent = None;
                    state.cancel_partner_typing()
                };
                info!("Partner connected");
                if was_typing {
                    listeners.partner_stopped_typing.emit(&());
                }
                listeners.partner_connected.emit(&());
            }
            ProtocolMessage::PartnerDisconnected => {
                let was_typing = {
                    let mut state = self.lock_state();
                    state.phase = SessionPhase::Waiting;
                    state.has_partner = false;
                    state.cancel_partner_typing()
                };
                info!("Partner disconnected");
                if was_typing {
                    listeners.partner_stopped_typing.emit(&());
                }
                listeners.partner_disconnected.emit(&());
            }
            ProtocolMessage::WaitingForPartner => {
                {
                    let mut state = self.lock_state();
                    state.phase = SessionPhase::Waiting;
                    state.has_partner = false;
                }
                info!("Waiting for partner");
                listeners.waiting_for_partner.emit(&());
            }
            ProtocolMessage::PartnerTyping => self.partner_typing(),
            ProtocolMessage::PartnerMessage(text) => {
                let (was_typing, entry) = {
                    let mut state = self.lock_state();
                    let was_typing = state.cancel_partner_typing();
                    let entry = HistoricMessage::received(text);
                    state.history.push(entry.clone());
                    (was_typing, entry)
                };
                debug!("Partner message: {}", entry.content);
                if was_typing {
                    listeners.partner_stopped_typing.emit(&());
                }
                listeners.partner_message.emit(&entry);
            }
        }
    }

    /// (Re)arm the typing indicator timeout
    fn partner_typing(&self) {
        let started = {
            let mut state = self.lock_state();
            state.typing_generation += 1;
            let generation = state.typing_generation;
            if let Some(timer) = state.typing_timer.take() {
                timer.abort();
            }

            let weak = Arc::downgrade(&self.shared);
            let timeout = self.shared.config.typing_timeout;
            state.typing_timer = Some(tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                expire_partner_typing(weak, generation);
            }));

            !std::mem::replace(&mut state.partner_is_typing, true)
        };

        if started {
            debug!("Partner started typing");
            self.shared.listeners.partner_started_typing.emit(&());
        }
    }

    // ---------------------------------------------------------------------
    // Read-only state
    // ---------------------------------------------------------------------

    pub fn phase(&self) -> SessionPhase {
        self.lock_state().phase
    }

    pub fn is_connected(&self) -> bool {
        self.phase().is_live()
    }

    pub fn has_partner(&self) -> bool {
        self.lock_state().has_partner
    }

    pub fn partner_is_typing(&self) -> bool {
        self.lock_state().partner_is_typing
    }

    /// Transcript of the current (or last) room, oldest first
    pub fn history(&self) -> Vec<HistoricMessage> {
        self.lock_state().history.clone()
    }

    /// Port of the most recent successful connect
    pub fn last_port(&self) -> Option<u16> {
        self.lock_state().last_port
    }

    // ---------------------------------------------------------------------
    // Listener registration
    // ---------------------------------------------------------------------

    /// Stream to the server opened
    pub fn on_connected<F>(&self, callback: F)
    where
        F: Fn() -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        self.shared.listeners.connected.register(move |_| callback());
    }

    /// Stream to the server closed (locally or remotely); fires once
    pub fn on_disconnected<F>(&self, callback: F)
    where
        F: Fn() -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        self.shared.listeners.disconnected.register(move |_| callback());
    }

    pub fn on_partner_connected<F>(&self, callback: F)
    where
        F: Fn() -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        self.shared
            .listeners
            .partner_connected
            .register(move |_| callback());
    }

    pub fn on_partner_disconnected<F>(&self, callback: F)
    where
        F: Fn() -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        self.shared
            .listeners
            .partner_disconnected
            .register(move |_| callback());
    }

    pub fn on_partner_message<F>(&self, callback: F)
    where
        F: Fn(&HistoricMessage) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        self.shared.listeners.partner_message.register(callback);
    }

    pub fn on_partner_started_typing<F>(&self, callback: F)
    where
        F: Fn() -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        self.shared
            .listeners
            .partner_started_typing
            .register(move |_| callback());
    }

    pub fn on_partner_stopped_typing<F>(&self, callback: F)
    where
        F: Fn() -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        self.shared
            .listeners
            .partner_stopped_typing
            .register(move |_| callback());
    }

    pub fn on_waiting_for_partner<F>(&self, callback: F)
    where
        F: Fn() -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        self.shared
            .listeners
            .waiting_for_partner
            .register(move |_| callback());
    }

    /// A local message was accepted for sending
    pub fn on_outgoing_message<F>(&self, callback: F)
    where
        F: Fn(&HistoricMessage) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        self.shared.listeners.outgoing_message.register(callback);
    }
}

/// Timer expiry: clear the indicator unless it was re-armed or cancelled since
fn expire_partner_typing(shared: Weak<SessionShared>, generation: u64) {
    let Some(shared) = shared.upgrade() else {
        return;
    };

    let expired = {
        let mut state = shared.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.typing_generation != generation || !state.partner_is_typing {
            false
        } else {
            state.partner_is_typing = false;
            state.typing_timer = None;
            true
        }
    };

    if expired {
        debug!("Partner stopped typing");
        shared.listeners.partner_stopped_typing.emit(&());
    }
}

impl ConnectionHandler for ChatSession {
    async fn on_message(&self, _id: ConnectionId, message: ProtocolMessage) {
        self.handle_message(message);
    }

    async fn on_disconnect(&self, _id: ConnectionId) {
        self.handle_remote_close().await;
    }
}

impl std::fmt::Debug for ChatSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock_state();
        f.debug_struct("ChatSession")
            .field("phase", &state.phase)
            .field("has_partner", &state.has_partner)
            .field("partner_is_typing", &state.partner_is_typing)
            .field("history", &state.history.len())
            .finish()
    }
}
