//! Transport connection
//!
//! Owns the write half of one duplex byte stream and its identity. The
//! read half is driven by `receive_loop`, which decodes frames and hands
//! them to a `ConnectionHandler`.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, trace, warn};

use crate::codec::{self, FrameDecoder};
use crate::error::ChatError;
use crate::message::ProtocolMessage;
use crate::types::ConnectionId;

/// Size of the fixed read buffer used by every receive loop
pub const READ_BUFFER_SIZE: usize = 4096;

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// One end of a duplex protocol stream
pub struct Connection {
    id: ConnectionId,
    peer_addr: Option<SocketAddr>,
    writer: Mutex<BoxedWriter>,
    open: AtomicBool,
    closed: Notify,
}

impl Connection {
    /// Wrap an arbitrary writer under the given identity
    pub fn new<W>(id: ConnectionId, writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            id,
            peer_addr: None,
            writer: Mutex::new(Box::new(writer)),
            open: AtomicBool::new(true),
            closed: Notify::new(),
        }
    }

    /// Split a TCP stream, assigning it a fresh identity
    ///
    /// The returned read half is meant for `receive_loop`.
    pub fn from_tcp(stream: TcpStream) -> (Self, OwnedReadHalf) {
        let peer_addr = stream.peer_addr().ok();
        let (reader, writer) = stream.into_split();
        let mut connection = Self::new(ConnectionId::new(), writer);
        connection.peer_addr = peer_addr;
        (connection, reader)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Resolves once `close` has been called
    pub async fn closed(&self) {
        let notified = self.closed.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if !self.is_open() {
            return;
        }
        notified.await;
    }

    /// Write one frame and flush it
    ///
    /// Concurrent senders are serialized, so frames from one caller are
    /// delivered in call order.
    pub async fn send(&self, message: &ProtocolMessage) -> Result<(), ChatError> {
        if !self.is_open() {
            return Err(ChatError::NotConnected);
        }

        let frame = codec::encode(message)?;
        let mut writer = self.writer.lock().await;
        writer.write_all(&frame).await?;
        writer.flush().await?;

        trace!(id = %self.id, kind = %message.kind(), "Frame sent");
        Ok(())
    }

    /// Shut down the write side; idempotent
    pub async fn close(&self) {
        if !self.open.swap(false, Ordering::AcqRel) {
            return;
        }
        self.closed.notify_waiters();

        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            debug!(id = %self.id, error = %e, "Shutdown on already closed stream");
        }
        debug!(id = %self.id, "Connection closed");
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("open", &self.is_open())
            .finish()
    }
}

/// Receiver of decoded frames and the final disconnect
pub trait ConnectionHandler: Send + Sync {
    /// Called once per decoded frame, in wire order
    fn on_message(
        &self,
        id: ConnectionId,
        message: ProtocolMessage,
    ) -> impl Future<Output = ()> + Send;

    /// Called exactly once when the stream ends or fails
    fn on_disconnect(&self, id: ConnectionId) -> impl Future<Output = ()> + Send;
}

/// Read frames until end-of-stream or a read error
///
/// Malformed frames are logged and dropped without ending the loop.
pub async fn receive_loop<R, H>(id: ConnectionId, mut reader: R, handler: &H)
where
    R: AsyncRead + Unpin,
    H: ConnectionHandler,
{
    let mut buffer = [0u8; READ_BUFFER_SIZE];
    let mut decoder = FrameDecoder::new();

    loop {
        match reader.read(&mut buffer).await {
            Ok(0) => {
                debug!(%id, "Stream closed by peer");
                break;
            }
            Ok(read) => {
                trace!(%id, bytes = read, "Read");
                for frame in decoder.push(&buffer[..read]) {
                    match frame {
                        Ok(message) => handler.on_message(id, message).await,
                        Err(e) => warn!(%id, error = %e, "Dropping frame"),
                    }
                }
            }
            Err(e) => {
                debug!(%id, error = %e, "Read failed");
                break;
            }
        }
    }

    handler.on_disconnect(id).await;
}
