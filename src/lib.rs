//! Anonymous 1:1 Random Chat Library
//!
//! A matchmaking server that pairs anonymous TCP clients two at a time and
//! relays chat messages and typing notifications between partners, plus the
//! client session that talks to it.
//!
//! # Features
//! - FIFO wait queue with eager (or delayed) pairing
//! - Message and typing relay between room partners
//! - Survivor re-queue when a partner disconnects
//! - Newline-delimited JSON frames over plain TCP
//! - Client-side transcript, typing debounce and event listeners
//!
//! # Architecture
//! Uses the Actor pattern with `mpsc` channels:
//! - `MatchmakingActor` owns the queue and rooms; `Matchmaker` is its pure core
//! - Each connection has a `handler` task forwarding frames as commands
//! - `ChatSession` is the connecting side; one reader task per session
//!
//! # Example
//! ```ignore
//! use random_chat::{ChatServer, ChatSession, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), random_chat::ChatError> {
//!     let server = ChatServer::bind(ServerConfig::default()).await?.start()?;
//!
//!     let session = ChatSession::new();
//!     session.on_partner_message(|message| {
//!         println!("Partner: {}", message.content);
//!         Ok(())
//!     });
//!     session.connect(server.port()).await?;
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod handler;
pub mod listeners;
pub mod matchmaker;
pub mod message;
pub mod registry;
pub mod room;
pub mod server;
pub mod session;
pub mod types;

#[cfg(test)]
mod testing;

// Re-export main types for convenience
pub use codec::FrameDecoder;
pub use config::{ClientConfig, ServerConfig};
pub use connection::{Connection, ConnectionHandler};
pub use error::{ChatError, ListenerError};
pub use handler::handle_connection;
pub use listeners::Listeners;
pub use matchmaker::{Delivery, Matchmaker};
pub use message::{MessageKind, ProtocolMessage};
pub use registry::ConnectionRegistry;
pub use room::Rooms;
pub use server::{ChatServer, MatchmakingActor, MatchmakingSnapshot, ServerCommand, ServerHandle};
pub use session::{ChatSession, SessionPhase};
pub use types::{ConnectionId, Direction, HistoricMessage};
