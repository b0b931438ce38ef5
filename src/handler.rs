//! TCP connection handler
//!
//! Handles one accepted connection: registers it, announces it to the
//! matchmaking actor, and forwards every decoded frame as a command
//! until the stream ends, the server evicts it, or the server shuts down.

use std::sync::Arc;

use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info};

use crate::connection::{receive_loop, Connection, ConnectionHandler};
use crate::error::ChatError;
use crate::message::ProtocolMessage;
use crate::registry::ConnectionRegistry;
use crate::server::ServerCommand;
use crate::types::ConnectionId;

/// Handle a new TCP connection
///
/// Returns once the peer disconnects or the server shuts down.
pub async fn handle_connection(
    stream: TcpStream,
    registry: ConnectionRegistry,
    cmd_tx: mpsc::Sender<ServerCommand>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), ChatError> {
    let (connection, reader) = Connection::from_tcp(stream);
    let connection = Arc::new(connection);
    let connection_id = registry.register(connection.clone()).await;

    let peer_addr = connection
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    info!("Client {} connected from {}", connection_id, peer_addr);

    // Announce to the matchmaking actor
    if cmd_tx
        .send(ServerCommand::Connect { connection_id })
        .await
        .is_err()
    {
        error!("Failed to register client {} - server closed", connection_id);
        registry.unregister(connection_id).await;
        connection.close().await;
        return Err(ChatError::ServerClosed);
    }

    let forwarder = CommandForwarder {
        registry: registry.clone(),
        commands: cmd_tx,
    };

    tokio::select! {
        _ = receive_loop(connection_id, reader, &forwarder) => {
            debug!("Read loop completed for {}", connection_id);
        }
        _ = connection.closed() => {
            debug!("Server closed {}", connection_id);
        }
        Ok(()) = shutdown.changed() => {
            debug!("Shutdown requested, dropping {}", connection_id);
            registry.unregister(connection_id).await;
        }
    }

    connection.close().await;
    info!("Client {} disconnected", connection_id);

    Ok(())
}

/// Turns connection events into matchmaking commands
struct CommandForwarder {
    registry: ConnectionRegistry,
    commands: mpsc::Sender<ServerCommand>,
}

impl ConnectionHandler for CommandForwarder {
    async fn on_message(&self, connection_id: ConnectionId, message: ProtocolMessage) {
        debug!("{} sent {}", connection_id, message.kind());
        if self
            .commands
            .send(ServerCommand::Inbound {
                connection_id,
                message,
            })
            .await
            .is_err()
        {
            debug!("Server closed, ignoring frame from {}", connection_id);
        }
    }

    async fn on_disconnect(&self, connection_id: ConnectionId) {
        // Unregister first so the actor never writes to a dead stream
        self.registry.unregister(connection_id).await;
        let _ = self
            .commands
            .send(ServerCommand::Disconnect { connection_id })
            .await;
    }
}
