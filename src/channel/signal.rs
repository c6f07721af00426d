//! The SIGNAL leg.
//!
//! The broker writes a freshly allocated ticket as soon as the connection is
//! accepted, then at most one completion byte once the reservation is
//! claimed. Reading the ticket and then blocking on the completion byte is
//! how a firewalled peer waits for an inbound call.

use super::{dial, read_ticket, write_ticket};
use crate::config::RendezvousConfig;
use crate::error::{DrbFireError, Result};
use crate::ticket::Ticket;
use crate::uri::RendezvousAddress;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// The value is not interpreted by the receiver.
pub const COMPLETION: u8 = 1;

/// Requester side of a signal connection, holding one reservation.
#[derive(Debug)]
pub struct SignalChannel {
    stream: TcpStream,
    ticket: Ticket,
}

impl SignalChannel {
    /// Dial the SIGNAL port of `addr` and read the ticket issued for us.
    pub async fn connect(addr: &RendezvousAddress, config: &RendezvousConfig) -> Result<Self> {
        let mut stream = dial(&addr.host, addr.signal_port()?, config).await?;
        let ticket = read_ticket(&mut stream, config.handshake_timeout).await?;
        debug!("reserved ticket {} on {}", ticket, addr);
        Ok(Self { stream, ticket })
    }

    #[inline]
    pub fn ticket(&self) -> Ticket {
        self.ticket
    }

    /// Block until the broker signals that our reservation was claimed.
    ///
    /// The broker hanging up first means it shut down.
    pub async fn wait_completion(&mut self) -> Result<()> {
        let mut b = [0u8; 1];
        match self.stream.read(&mut b).await {
            Ok(0) => Err(DrbFireError::BrokerClosed),
            Ok(_) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::ConnectionReset => Err(DrbFireError::BrokerClosed),
            Err(e) => Err(e.into()),
        }
    }
}

/// Broker side of a signal connection.
pub(crate) struct SignalIssuer {
    stream: TcpStream,
    pub ticket: Ticket,
}

impl SignalIssuer {
    #[inline]
    pub fn new(stream: TcpStream, ticket: Ticket) -> Self {
        Self { stream, ticket }
    }

    pub async fn issue(&mut self, timeout: Duration) -> io::Result<()> {
        write_ticket(&mut self.stream, self.ticket, timeout).await
    }

    pub async fn complete(&mut self, timeout: Duration) -> io::Result<()> {
        io_with_timeout!(timeout, async {
            self.stream.write_all(&[COMPLETION]).await?;
            self.stream.flush().await
        })
    }

    /// Resolves when the requester hangs up, or sends anything at all,
    /// which the protocol never does.
    pub async fn hangup(&mut self) -> io::Result<usize> {
        let mut probe = [0u8; 1];
        self.stream.read(&mut probe).await
    }
}
