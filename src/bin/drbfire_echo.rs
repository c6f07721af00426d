//! Echo service reachable through a drbfire broker.
//!
//! `drbfire-echo drbfire://0.0.0.0:44324` runs a broker that echoes every
//! conversation accepted on it. With `--role client` the same service runs
//! behind a firewall, registered on a broker, and prints its callback address.

#[macro_use]
extern crate captains_log;

use captains_log::recipe;
use clap::{Parser, ValueEnum};
use drbfire::{DrbFireError, Listener, RendezvousConfig, RendezvousStream, Role, open_server};
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum RoleArg {
    Server,
    Client,
}

#[derive(Parser, Debug)]
#[command(name = "drbfire-echo", version, about = "Echo service over a drbfire rendezvous")]
struct Args {
    /// Broker address, drbfire://host:port
    uri: String,

    #[arg(long, value_enum, default_value_t = RoleArg::Server)]
    role: RoleArg,

    /// Bound on the ticket exchange, 0 to wait forever
    #[arg(long, default_value_t = 0)]
    handshake_timeout_ms: u64,

    #[arg(long, default_value = "/tmp/drbfire-echo.log")]
    log_file: String,

    #[arg(long, default_value_t = log::Level::Info)]
    log_level: log::Level,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    recipe::raw_file_logger(args.log_file.as_str(), args.log_level)
        .build()
        .map_err(|e| format!("logger setup: {:?}", e))?;

    let role = match args.role {
        RoleArg::Server => Role::Server,
        RoleArg::Client => Role::Client,
    };
    let config = RendezvousConfig {
        role,
        handshake_timeout: Duration::from_millis(args.handshake_timeout_ms),
        ..Default::default()
    };
    let listener = Arc::new(open_server(&args.uri, config).await?);
    println!("{}", listener.uri());

    let (stop_tx, stop_rx) = oneshot::channel();
    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    let signals_handle = signals.handle();
    std::thread::spawn(move || {
        if let Some(sig) = signals.forever().next() {
            let _ = stop_tx.send(sig);
        }
    });

    let server = tokio::spawn(serve(listener.clone()));
    let sig = stop_rx.await?;
    info!("got signal {}, shutting down", sig);
    listener.close().await;
    signals_handle.close();
    let _ = server.await;
    Ok(())
}

async fn serve(listener: Arc<Listener>) {
    loop {
        match listener.accept().await {
            Ok(conn) => {
                tokio::spawn(echo(conn));
            }
            Err(DrbFireError::BrokerClosed) => break,
            Err(e) => {
                warn!("accept on {}: {}", listener.uri(), e);
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

async fn echo(conn: RendezvousStream) {
    let ticket = conn.ticket();
    let (mut r, mut w) = tokio::io::split(conn);
    match tokio::io::copy(&mut r, &mut w).await {
        Ok(n) => debug!("ticket {} echoed {} bytes", ticket, n),
        Err(e) => debug!("ticket {} echo: {}", ticket, e),
    }
}
