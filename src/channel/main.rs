//! The MAIN leg: one TCP connection per logical conversation, tagged with a
//! ticket before any payload.

use super::{dial, write_ticket};
use crate::config::RendezvousConfig;
use crate::error::Result;
use crate::ticket::Ticket;
use crate::uri::RendezvousAddress;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::{fmt, io::IoSlice};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;

/// A paired MAIN connection, with the ticket header already consumed.
///
/// Everything read or written is application payload.
pub struct RendezvousStream {
    stream: TcpStream,
    ticket: Ticket,
}

impl RendezvousStream {
    pub(crate) fn new(stream: TcpStream, ticket: Ticket, config: &RendezvousConfig) -> Self {
        if config.nodelay {
            if let Err(e) = stream.set_nodelay(true) {
                debug!("ticket {} set_nodelay: {}", ticket, e);
            }
        }
        Self { stream, ticket }
    }

    /// The ticket this connection was paired on, `0` for the wildcard path.
    #[inline]
    pub fn ticket(&self) -> Ticket {
        self.ticket
    }

    #[inline]
    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.stream.peer_addr()
    }

    #[inline]
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.stream.local_addr()
    }

    #[inline]
    pub fn get_ref(&self) -> &TcpStream {
        &self.stream
    }

    #[inline]
    pub fn into_inner(self) -> TcpStream {
        self.stream
    }
}

impl fmt::Debug for RendezvousStream {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.stream.peer_addr() {
            Ok(addr) => write!(f, "main(ticket={}, peer={})", self.ticket, addr),
            Err(_) => write!(f, "main(ticket={})", self.ticket),
        }
    }
}

impl AsyncRead for RendezvousStream {
    #[inline]
    fn poll_read(
        self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for RendezvousStream {
    #[inline]
    fn poll_write(
        self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().stream).poll_write(cx, buf)
    }

    #[inline]
    fn poll_write_vectored(
        self: Pin<&mut Self>, cx: &mut Context<'_>, bufs: &[IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().stream).poll_write_vectored(cx, bufs)
    }

    #[inline]
    fn is_write_vectored(&self) -> bool {
        self.stream.is_write_vectored()
    }

    #[inline]
    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_flush(cx)
    }

    #[inline]
    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_shutdown(cx)
    }
}

/// Dial the MAIN port of `addr` and present `ticket` as the first four bytes.
pub async fn connect(
    addr: &RendezvousAddress, ticket: Ticket, config: &RendezvousConfig,
) -> Result<RendezvousStream> {
    let mut stream = dial(&addr.host, addr.port, config).await?;
    write_ticket(&mut stream, ticket, config.handshake_timeout).await?;
    trace!("main leg to {}:{} ticket {}", addr.host, addr.port, ticket);
    Ok(RendezvousStream::new(stream, ticket, config))
}
