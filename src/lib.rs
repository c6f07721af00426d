#![cfg_attr(docsrs, feature(doc_cfg))]
#![cfg_attr(docsrs, allow(unused_attributes))]

//! # drbfire
//!
//! A connection-rendezvous transport for RPC endpoints that cannot accept
//! inbound TCP connections.
//!
//! Every logical connection is carried by two independently dialable TCP legs
//! to a reachable [Broker](server::Broker):
//!
//! - the SIGNAL leg (broker port + 1), a long-lived connection on which the
//!   broker issues a ticket and later writes one completion byte;
//! - the MAIN leg (broker port), a connection per conversation whose first
//!   four bytes are a ticket, followed by the payload.
//!
//! A MAIN connection tagged `0` behaves like an ordinary connect and is matched
//! FIFO against [Listener::accept] on the broker. A non-zero ticket pairs the
//! connection with the reservation made over SIGNAL, which is how a
//! firewalled [PeerServer](client::PeerServer) receives calls: the broker
//! signals it, and it dials in.
//!
//! The crate hands back raw byte streams ([RendezvousStream]); marshalling is
//! left to the RPC layer above.
//!
//! ## Usage
//!
//! ```no_run
//! use drbfire::{RendezvousConfig, open, open_server};
//! use tokio::io::AsyncWriteExt;
//!
//! # async fn run() -> drbfire::Result<()> {
//! // on the reachable host
//! let broker = open_server("drbfire://0.0.0.0:44324", RendezvousConfig::server()).await?;
//!
//! // behind the firewall
//! let peer = open_server("drbfire://broker.example:44324", RendezvousConfig::client()).await?;
//! let callback = peer.uri(); // "drbfire://broker.example:44324?1", hand it to the broker side
//!
//! // plain call from the peer to the broker
//! let mut conn = open("drbfire://broker.example:44324", &RendezvousConfig::client()).await?;
//! conn.write_all(b"hello").await?;
//!
//! // call back into the peer, on the broker
//! let back = broker.open(&callback).await?;
//! # drop(back);
//! # Ok(())
//! # }
//! ```

#[macro_use]
extern crate captains_log;

/// Await `$f`, failing with `TimedOut` after `$timeout`. A zero timeout waits forever.
macro_rules! io_with_timeout {
    ($timeout: expr, $f: expr) => {{
        let timeout: std::time::Duration = $timeout;
        if timeout.is_zero() {
            $f.await
        } else {
            match tokio::time::timeout(timeout, $f).await {
                Ok(Ok(r)) => Ok(r),
                Ok(Err(e)) => Err(e),
                Err(_) => Err(std::io::ErrorKind::TimedOut.into()),
            }
        }
    }};
}

pub mod channel;
pub mod client;
mod config;
pub use config::*;
pub mod error;
pub mod server;
pub mod ticket;
pub mod uri;

pub use channel::RendezvousStream;
pub use error::{DrbFireError, Result};
pub use ticket::Ticket;
pub use uri::RendezvousAddress;

use client::PeerServer;
use server::Broker;

/// The receiving end returned by [open_server], in either role.
pub enum Listener {
    Broker(Broker),
    Peer(PeerServer),
}

impl Listener {
    #[inline]
    pub fn role(&self) -> Role {
        match self {
            Self::Broker(_) => Role::Server,
            Self::Peer(_) => Role::Client,
        }
    }

    /// Wait for the next inbound conversation.
    pub async fn accept(&self) -> Result<RendezvousStream> {
        match self {
            Self::Broker(b) => b.accept().await,
            Self::Peer(p) => p.accept().await,
        }
    }

    /// Start an outbound conversation. On a broker a ticketed `uri` calls
    /// back into the peer holding that ticket.
    pub async fn open(&self, uri: &str) -> Result<RendezvousStream> {
        match self {
            Self::Broker(b) => b.open(uri).await,
            Self::Peer(p) => p.open(uri).await,
        }
    }

    /// The address to publish for this endpoint.
    pub fn uri(&self) -> String {
        match self {
            Self::Broker(b) => b.address().to_string(),
            Self::Peer(p) => p.address().to_string(),
        }
    }

    /// The reservation a peer currently holds. Always `None` on a broker.
    pub fn ticket(&self) -> Option<Ticket> {
        match self {
            Self::Broker(_) => None,
            Self::Peer(p) => p.ticket(),
        }
    }

    pub async fn close(&self) {
        match self {
            Self::Broker(b) => b.close().await,
            Self::Peer(p) => p.close().await,
        }
    }
}

/// Start receiving conversations at `uri`.
///
/// In [Role::Server] this binds the MAIN and SIGNAL ports of `uri`. In
/// [Role::Client] it dials the broker at `uri` and reserves a ticket.
pub async fn open_server(uri: &str, config: RendezvousConfig) -> Result<Listener> {
    let addr = uri::parse(uri)?;
    match config.role {
        Role::Server => Broker::bind(&addr, config).await.map(Listener::Broker),
        Role::Client => PeerServer::connect(&addr, config).await.map(Listener::Peer),
    }
}

/// Dial the MAIN port of `uri` and return the stream.
///
/// The ticket in the option of `uri` is presented as is, `0` without one.
/// This never touches SIGNAL. To call back through a reservation of a broker
/// owned by this process, use [Listener::open] instead.
pub async fn open(uri: &str, config: &RendezvousConfig) -> Result<RendezvousStream> {
    let addr = uri::parse(uri)?;
    let ticket = addr.ticket().unwrap_or(ticket::WILDCARD);
    channel::main::connect(&addr, ticket, config).await
}
