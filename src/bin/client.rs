//! Random Chat terminal client
//!
//! Line-oriented: every stdin line is sent to the current partner.
//! `/typing` announces typing, `/quit` leaves.

use std::net::IpAddr;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use random_chat::{ChatSession, ClientConfig, HistoricMessage};

#[derive(Parser)]
#[command(name = "random-chat-client", about = "Talk to a random stranger")]
struct Args {
    /// Server host
    #[arg(long, default_value = "127.0.0.1")]
    host: IpAddr,

    /// Server port
    #[arg(short, long)]
    port: Option<u16>,
}

fn print_message(who: &str, message: &HistoricMessage) {
    println!("{} {}: {}", message.timestamp.format("%H:%M"), who, message.content);
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Quiet by default so log lines do not interleave with the chat
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("random_chat=error")),
        )
        .init();

    let args = Args::parse();
    let config = ClientConfig::default().with_host(args.host);
    let port = args.port.unwrap_or(config.default_port);
    let session = ChatSession::with_config(config);

    session.on_waiting_for_partner(|| {
        println!("Waiting for stranger...");
        Ok(())
    });
    session.on_partner_connected(|| {
        println!("Stranger connected!");
        Ok(())
    });
    session.on_partner_disconnected(|| {
        println!("Stranger disconnected.");
        Ok(())
    });
    session.on_partner_started_typing(|| {
        println!("      Stranger is typing...");
        Ok(())
    });
    session.on_partner_stopped_typing(|| {
        println!("      Stranger stopped typing.");
        Ok(())
    });
    session.on_partner_message(|message| {
        print_message("Stranger", message);
        Ok(())
    });
    session.on_outgoing_message(|message| {
        print_message("     You", message);
        Ok(())
    });

    let (closed_tx, mut closed_rx) = mpsc::unbounded_channel();
    session.on_disconnected(move || {
        closed_tx.send(())?;
        Ok(())
    });

    session.connect(port).await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                match line.trim() {
                    "" => {}
                    "/quit" => break,
                    "/typing" => session.mark_as_typing().await?,
                    text => {
                        if !session.has_partner() {
                            println!("No stranger yet, message not sent.");
                            continue;
                        }
                        session.send(text).await?;
                    }
                }
            }
            _ = closed_rx.recv() => {
                println!("Connection to server lost.");
                return Ok(());
            }
        }
    }

    if session.is_connected() {
        session.disconnect().await?;
    }
    Ok(())
}
