//! The peer: the firewalled side of a rendezvous.
//!
//! A peer never listens. To be callable it keeps a reservation on the broker
//! (an open SIGNAL connection and the ticket issued on it), publishes
//! `drbfire://broker:port?ticket` as its address, and waits for the
//! completion byte. On completion it dials the broker's MAIN port with that
//! ticket, and the resulting connection is the inbound conversation.

use crate::channel::{self, RendezvousStream, SignalChannel};
use crate::config::RendezvousConfig;
use crate::error::{DrbFireError, Result};
use crate::ticket::{Ticket, WILDCARD};
use crate::uri::RendezvousAddress;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::{Mutex, watch};

/// Accepts inbound conversations through a broker, one reservation at a time.
///
/// A ticket is consumed by the conversation it pairs, so after each
/// [PeerServer::accept] the next call makes a fresh reservation first, and
/// [PeerServer::ticket] changes accordingly.
pub struct PeerServer {
    broker: RendezvousAddress,
    config: RendezvousConfig,
    signal: Mutex<Option<SignalChannel>>,
    ticket: AtomicU32,
    closed: watch::Sender<bool>,
}

impl PeerServer {
    /// Make the first reservation on the broker at `addr`.
    pub async fn connect(addr: &RendezvousAddress, config: RendezvousConfig) -> Result<Self> {
        let broker = addr.base();
        let signal = SignalChannel::connect(&broker, &config).await?;
        let ticket = AtomicU32::new(signal.ticket());
        let (closed, _) = watch::channel(false);
        Ok(Self { broker, config, signal: Mutex::new(Some(signal)), ticket, closed })
    }

    /// The ticket currently reserved, if any.
    #[inline]
    pub fn ticket(&self) -> Option<Ticket> {
        match self.ticket.load(Ordering::Acquire) {
            WILDCARD => None,
            t => Some(t),
        }
    }

    /// The address a counterpart uses to call back into this peer.
    pub fn address(&self) -> RendezvousAddress {
        match self.ticket() {
            Some(t) => self.broker.with_ticket(t),
            None => self.broker.clone(),
        }
    }

    #[inline]
    pub fn broker(&self) -> &RendezvousAddress {
        &self.broker
    }

    #[inline]
    pub fn config(&self) -> &RendezvousConfig {
        &self.config
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Wait until the broker hands our reservation to a caller, then dial in.
    pub async fn accept(&self) -> Result<RendezvousStream> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow_and_update() {
            return Err(DrbFireError::BrokerClosed);
        }
        let mut guard = self.signal.lock().await;
        if guard.is_none() {
            let signal = SignalChannel::connect(&self.broker, &self.config).await?;
            self.ticket.store(signal.ticket(), Ordering::Release);
            *guard = Some(signal);
        }
        let signal = guard.as_mut().ok_or(DrbFireError::BrokerClosed)?;
        let completed = tokio::select! {
            _ = closed.changed() => Err(DrbFireError::BrokerClosed),
            r = signal.wait_completion() => r,
        };
        let ticket = signal.ticket();
        // the reservation is spent either way
        *guard = None;
        self.ticket.store(WILDCARD, Ordering::Release);
        completed?;
        debug!("ticket {} claimed, dialing {}", ticket, self.broker);
        channel::main::connect(&self.broker, ticket, &self.config).await
    }

    /// Outbound conversation with the config of this peer.
    pub async fn open(&self, uri: &str) -> Result<RendezvousStream> {
        crate::open(uri, &self.config).await
    }

    /// Give up the reservation. A blocked [PeerServer::accept] returns `BrokerClosed`.
    pub async fn close(&self) {
        self.closed.send_replace(true);
        *self.signal.lock().await = None;
        self.ticket.store(WILDCARD, Ordering::Release);
    }
}
