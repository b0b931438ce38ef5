//! Random Chat Server - Entry Point
//!
//! Binds the listener, starts the matchmaking actor, and runs until Ctrl-C.

use std::net::IpAddr;
use std::time::Duration;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use random_chat::{ChatServer, ServerConfig};

#[derive(Parser)]
#[command(name = "random-chat-server", about = "Anonymous 1:1 random chat matchmaking server")]
struct Args {
    /// Address to bind
    #[arg(short, long, default_value = "127.0.0.1")]
    bind: IpAddr,

    /// Port to listen on (0 lets the OS choose)
    #[arg(short, long, default_value_t = 0)]
    port: u16,

    /// Delay before pairing waiting clients, in milliseconds
    #[arg(long, default_value_t = 0)]
    pairing_delay_ms: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=random_chat=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("random_chat=info")),
        )
        .init();

    let args = Args::parse();
    let config = ServerConfig::default()
        .with_bind_addr(args.bind)
        .with_port(args.port)
        .with_pairing_delay(Duration::from_millis(args.pairing_delay_ms));

    let server = ChatServer::bind(config).await?.start()?;

    // Clients need the port when the OS assigned it
    println!("Listening on port {}", server.port());

    tokio::signal::ctrl_c().await?;
    info!("Ctrl-C received");
    server.shutdown().await;

    Ok(())
}
