//! Framing of the two TCP legs of a rendezvous.
//!
//! ```text
//! SIGNAL  broker -> dialer:  [ticket: u32 BE] ... [completion: 1 byte]
//! MAIN    dialer -> broker:  [ticket: u32 BE] [payload ...]
//! ```
//!
//! The byte order is fixed to big-endian. Earlier drbfire peers packed the
//! ticket in host order, so they only interoperate on big-endian hosts.

use crate::config::RendezvousConfig;
use crate::error::Result;
use crate::ticket::{self, TICKET_LEN, Ticket};
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

pub mod main;
pub use main::RendezvousStream;
pub mod signal;
pub use signal::SignalChannel;

/// Revision of the wire framing above.
pub const PROTOCOL_VERSION: u32 = 2;

pub(crate) async fn dial(host: &str, port: u16, config: &RendezvousConfig) -> Result<TcpStream> {
    let stream = io_with_timeout!(config.handshake_timeout, TcpStream::connect((host, port)))?;
    Ok(stream)
}

pub(crate) async fn write_ticket<W: AsyncWrite + Unpin>(
    w: &mut W, ticket: Ticket, timeout: Duration,
) -> io::Result<()> {
    io_with_timeout!(timeout, async {
        w.write_all(&ticket::encode(ticket)).await?;
        w.flush().await
    })
}

/// Read one ticket header. EOF before all four bytes arrive is `UnexpectedEof`.
pub(crate) async fn read_ticket<R: AsyncRead + Unpin>(
    r: &mut R, timeout: Duration,
) -> io::Result<Ticket> {
    let mut buf = [0u8; TICKET_LEN];
    io_with_timeout!(timeout, r.read_exact(&mut buf))?;
    Ok(ticket::decode(buf))
}
