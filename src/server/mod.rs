//! The broker: the reachable side of a rendezvous.
//!
//! A broker bound at `host:port` listens for MAIN connections on `port` and
//! SIGNAL connections on `port + 1`. Each listener runs its own accept loop,
//! and every inbound connection gets its own task. The tasks only meet in
//! the [PendingTable](table::PendingTable), behind one mutex.
//!
//! - A SIGNAL connection is issued the next ticket right away, whether or not
//!   anybody is waiting for it. The connection then idles until the ticket is
//!   claimed, either by [Broker::open_ticket] or by a MAIN connection carrying
//!   it. Either way the broker writes the completion byte once; after an
//!   `open_ticket` claim the holder answers by dialing MAIN with its ticket.
//! - A MAIN connection is routed by its ticket header: `0` goes FIFO to
//!   [Broker::accept], anything else to the reservation it names.

use crate::channel::signal::SignalIssuer;
use crate::channel::{self, RendezvousStream, read_ticket};
use crate::config::RendezvousConfig;
use crate::error::{DrbFireError, Result, ViolationKind};
use crate::ticket::{Ticket, WILDCARD};
use crate::uri::{self, RendezvousAddress};
use captains_log::filter::LogFilter;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::{io, mem};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, oneshot, watch};
use tokio::task::JoinHandle;

mod table;
use table::{Claim, Matched, Pending, PendingTable};

/// Attempts at finding two adjacent free ports when binding port 0.
const BIND_ATTEMPTS: usize = 16;

const VIOLATION_BACKLOG: usize = 64;

/// A MAIN connection the broker refused and closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub ticket: Ticket,
    pub kind: ViolationKind,
    pub peer: SocketAddr,
}

struct BrokerInner {
    table: Mutex<PendingTable<RendezvousStream>>,
    config: RendezvousConfig,
    logger: Arc<LogFilter>,
    violations: broadcast::Sender<Violation>,
}

impl BrokerInner {
    #[inline]
    fn table(&self) -> MutexGuard<'_, PendingTable<RendezvousStream>> {
        self.table.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn report(&self, v: Violation) {
        logger_warn!(self.logger, "main from {} rejected, ticket {}: {}", v.peer, v.ticket, v.kind);
        // nobody subscribed is fine
        let _ = self.violations.send(v);
    }
}

pub struct Broker {
    inner: Arc<BrokerInner>,
    address: RendezvousAddress,
    shutdown: watch::Sender<bool>,
    loops: Mutex<Vec<JoinHandle<()>>>,
}

impl Broker {
    /// Bind the MAIN and SIGNAL listeners of `addr` and start serving.
    ///
    /// With port 0, a free pair of adjacent ports is picked; [Broker::address]
    /// reports the one chosen. The option part of `addr` is ignored.
    pub async fn bind(addr: &RendezvousAddress, config: RendezvousConfig) -> Result<Self> {
        let (main, signal) = bind_pair(addr).await?;
        let address = RendezvousAddress::new(addr.host.clone(), main.local_addr()?.port());
        let (violations, _) = broadcast::channel(VIOLATION_BACKLOG);
        let inner = Arc::new(BrokerInner {
            table: Mutex::new(PendingTable::new()),
            config,
            logger: Arc::new(LogFilter::new()),
            violations,
        });
        let (shutdown, _) = watch::channel(false);
        let loops = vec![
            tokio::spawn(main_loop(inner.clone(), main, shutdown.subscribe())),
            tokio::spawn(signal_loop(inner.clone(), signal, shutdown.subscribe())),
        ];
        info!("broker listening on {} (signal port {})", address, address.port as u32 + 1);
        Ok(Self { inner, address, shutdown, loops: Mutex::new(loops) })
    }

    /// The address peers dial, with the actual port.
    #[inline]
    pub fn address(&self) -> &RendezvousAddress {
        &self.address
    }

    #[inline]
    pub fn config(&self) -> &RendezvousConfig {
        &self.inner.config
    }

    #[inline]
    pub fn set_log_level(&self, level: log::Level) {
        self.inner.logger.set_level(level);
    }

    /// Wait for the next MAIN connection tagged with the wildcard ticket.
    ///
    /// Callers are served first-come first-served. Dropping the future
    /// gives up the place in line.
    pub async fn accept(&self) -> Result<RendezvousStream> {
        let pending = self.inner.table().accept()?;
        match pending {
            Pending::Ready(stream) => Ok(stream),
            Pending::Wait(rx) => rx.await.unwrap_or(Err(DrbFireError::BrokerClosed)),
        }
    }

    /// Open a conversation to `uri`.
    ///
    /// Without a ticket this dials `uri` directly. With a ticket, the ticket
    /// must be one this broker issued, see [Broker::open_ticket].
    pub async fn open(&self, uri: &str) -> Result<RendezvousStream> {
        let addr = uri::parse(uri)?;
        match addr.ticket() {
            Some(ticket) => self.open_ticket(ticket).await,
            None => channel::main::connect(&addr, WILDCARD, &self.inner.config).await,
        }
    }

    /// Call back into the holder of `ticket`.
    ///
    /// Writes the completion byte on the holder's signal connection and
    /// returns the MAIN connection it dials in with. If the holder already
    /// dialed in, the byte went out when that connection parked, and the
    /// parked connection is returned.
    pub async fn open_ticket(&self, ticket: Ticket) -> Result<RendezvousStream> {
        let claim = self.inner.table().claim(ticket)?;
        match claim {
            Claim::Ready(stream) => Ok(stream),
            Claim::Wait { rx, wake } => {
                if let Some(wake) = wake {
                    let _ = wake.send(());
                }
                rx.await.unwrap_or(Err(DrbFireError::BrokerClosed))
            }
        }
    }

    /// Receive every MAIN connection rejected from now on.
    pub fn subscribe_violations(&self) -> broadcast::Receiver<Violation> {
        self.inner.violations.subscribe()
    }

    /// `accept()` calls currently waiting.
    #[inline]
    pub fn pending_accepts(&self) -> usize {
        self.inner.table().pending_accepts()
    }

    /// Issued tickets not yet consumed.
    #[inline]
    pub fn reservations(&self) -> usize {
        self.inner.table().reservations()
    }

    /// Wildcard connections waiting for an `accept()`.
    #[inline]
    pub fn queued(&self) -> usize {
        self.inner.table().queued()
    }

    /// Ticketed connections that arrived before anybody claimed their ticket.
    #[inline]
    pub fn parked(&self) -> usize {
        self.inner.table().parked()
    }

    #[inline]
    pub fn last_ticket(&self) -> Ticket {
        self.inner.table().last_ticket()
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.inner.table().is_closed()
    }

    /// Stop both listeners and fail everything pending with `BrokerClosed`.
    ///
    /// Returns once both ports are released.
    pub async fn close(&self) {
        self.inner.table().close();
        self.shutdown.send_replace(true);
        let loops = mem::take(&mut *self.loops.lock().unwrap_or_else(|e| e.into_inner()));
        for th in loops {
            let _ = th.await;
        }
        info!("broker {} closed", self.address);
    }
}

impl Drop for Broker {
    fn drop(&mut self) {
        self.inner.table().close();
        self.shutdown.send_replace(true);
    }
}

async fn bind_pair(addr: &RendezvousAddress) -> Result<(TcpListener, TcpListener)> {
    let host = addr.host.as_str();
    if addr.port != 0 {
        let main = TcpListener::bind((host, addr.port)).await?;
        let signal = TcpListener::bind((host, addr.signal_port()?)).await?;
        return Ok((main, signal));
    }
    for _ in 0..BIND_ATTEMPTS {
        let main = TcpListener::bind((host, 0)).await?;
        let Some(signal_port) = main.local_addr()?.port().checked_add(1) else {
            continue;
        };
        match TcpListener::bind((host, signal_port)).await {
            Ok(signal) => return Ok((main, signal)),
            Err(e) if e.kind() == io::ErrorKind::AddrInUse => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Err(io::Error::new(io::ErrorKind::AddrInUse, "no adjacent free port pair").into())
}

async fn main_loop(
    inner: Arc<BrokerInner>, listener: TcpListener, mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            r = listener.accept() => match r {
                Ok((stream, peer)) => {
                    tokio::spawn(handle_main(inner.clone(), stream, peer, shutdown.clone()));
                }
                Err(e) => {
                    logger_warn!(inner.logger, "main accept: {}", e);
                }
            },
        }
    }
    logger_debug!(inner.logger, "main listener stopped");
}

async fn handle_main(
    inner: Arc<BrokerInner>, mut stream: TcpStream, peer: SocketAddr,
    mut shutdown: watch::Receiver<bool>,
) {
    let header = tokio::select! {
        _ = shutdown.changed() => return,
        r = read_ticket(&mut stream, inner.config.handshake_timeout) => r,
    };
    let ticket = match header {
        Ok(ticket) => ticket,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            inner.report(Violation { ticket: WILDCARD, kind: ViolationKind::Truncated, peer });
            return;
        }
        Err(e) => {
            logger_debug!(inner.logger, "main from {} handshake: {}", peer, e);
            return;
        }
    };
    let conn = RendezvousStream::new(stream, ticket, &inner.config);
    let res = inner.table().dispatch(ticket, conn);
    match res {
        Ok(Matched::Dropped) => {
            logger_debug!(inner.logger, "main from {} ticket {}: opener gone", peer, ticket);
        }
        Ok(m) => {
            logger_trace!(inner.logger, "main from {} ticket {}: {:?}", peer, ticket, m);
        }
        Err(DrbFireError::ProtocolViolation { ticket, kind }) => {
            inner.report(Violation { ticket, kind, peer });
        }
        Err(e) => {
            logger_debug!(inner.logger, "main from {} ticket {}: {}", peer, ticket, e);
        }
    }
}

async fn signal_loop(
    inner: Arc<BrokerInner>, listener: TcpListener, mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            r = listener.accept() => match r {
                Ok((stream, peer)) => {
                    // allocate here, so tickets follow accept order
                    let reserved = inner.table().reserve();
                    match reserved {
                        Ok((ticket, wake)) => {
                            logger_debug!(inner.logger, "signal from {} issued ticket {}", peer, ticket);
                            let issuer = SignalIssuer::new(stream, ticket);
                            tokio::spawn(handle_signal(inner.clone(), issuer, wake, shutdown.clone()));
                        }
                        Err(e) => {
                            logger_error!(inner.logger, "signal from {} refused: {}", peer, e);
                        }
                    }
                }
                Err(e) => {
                    logger_warn!(inner.logger, "signal accept: {}", e);
                }
            },
        }
    }
    logger_debug!(inner.logger, "signal listener stopped");
}

enum SignalEvent {
    Wake,
    /// The reservation went away unclaimed, or the broker is closing.
    Done,
    Hangup(io::Result<usize>),
}

async fn handle_signal(
    inner: Arc<BrokerInner>, mut issuer: SignalIssuer, mut wake: oneshot::Receiver<()>,
    mut shutdown: watch::Receiver<bool>,
) {
    let ticket = issuer.ticket;
    let timeout = inner.config.handshake_timeout;
    if let Err(e) = issuer.issue(timeout).await {
        logger_debug!(inner.logger, "signal ticket {} issue: {}", ticket, e);
        inner.table().abandon(ticket);
        return;
    }
    // a pending wake wins over a hangup racing with it
    let event = tokio::select! {
        biased;
        _ = shutdown.changed() => SignalEvent::Done,
        r = &mut wake => if r.is_ok() { SignalEvent::Wake } else { SignalEvent::Done },
        r = issuer.hangup() => SignalEvent::Hangup(r),
    };
    match event {
        SignalEvent::Wake => {
            if let Err(e) = issuer.complete(timeout).await {
                logger_warn!(inner.logger, "signal ticket {} completion: {}", ticket, e);
                inner.table().abandon(ticket);
            } else {
                logger_trace!(inner.logger, "signal ticket {} completed", ticket);
            }
        }
        SignalEvent::Done => {}
        SignalEvent::Hangup(r) => {
            match r {
                Ok(0) => {
                    logger_debug!(inner.logger, "signal ticket {} hung up", ticket);
                }
                Ok(_) => {
                    logger_warn!(inner.logger, "signal ticket {} sent unexpected data", ticket);
                }
                Err(e) => {
                    logger_debug!(inner.logger, "signal ticket {} read: {}", ticket, e);
                }
            }
            inner.table().abandon(ticket);
        }
    }
}
