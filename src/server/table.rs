//! Everything the broker's connection handlers share: the ticket allocator,
//! the FIFO of unticketed accepts, and the ticket reservations.
//!
//! The table is plain data. The broker keeps it behind a single mutex so that
//! allocation, insertion and lookup-and-remove never interleave; waiting
//! happens outside the lock on the returned oneshot receivers.

use crate::error::{DrbFireError, Result, ViolationKind};
use crate::ticket::{Ticket, TicketAllocator, WILDCARD};
use std::collections::{HashMap, VecDeque};
use std::{io, mem};
use tokio::sync::oneshot;

pub(crate) type Waiter<S> = oneshot::Sender<Result<S>>;

enum Slot<S> {
    /// Issued over SIGNAL, nobody asked for it yet.
    Idle,
    /// An `open()` waits for the holder to dial in.
    Claimed(Waiter<S>),
    /// The holder dialed in before anybody claimed the ticket.
    Parked(S),
}

struct Reservation<S> {
    slot: Slot<S>,
    /// Tells the signal handler to write the completion byte.
    wake: Option<oneshot::Sender<()>>,
}

pub(crate) enum Pending<S> {
    Ready(S),
    Wait(oneshot::Receiver<Result<S>>),
}

pub(crate) enum Claim<S> {
    Ready(S),
    Wait { rx: oneshot::Receiver<Result<S>>, wake: Option<oneshot::Sender<()>> },
}

/// Where dispatch put a MAIN connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Matched {
    /// Handed to the oldest live `accept()`.
    Accepted,
    /// No `accept()` pending, queued for the next one.
    Queued,
    /// Handed to the `open()` that claimed the ticket.
    Paired,
    /// Waiting on its reservation for an `open()`.
    Parked,
    /// The `open()` that claimed the ticket went away. The ticket is spent.
    Dropped,
}

pub(crate) struct PendingTable<S> {
    allocator: TicketAllocator,
    closed: bool,
    accepts: VecDeque<Waiter<S>>,
    queued: VecDeque<S>,
    reservations: HashMap<Ticket, Reservation<S>>,
}

/// Returns the stream back if the receiving side is gone.
fn hand_over<S>(waiter: Waiter<S>, stream: S) -> Option<S> {
    match waiter.send(Ok(stream)) {
        Ok(()) => None,
        Err(Ok(stream)) => Some(stream),
        Err(Err(_)) => None,
    }
}

impl<S> PendingTable<S> {
    pub fn new() -> Self {
        Self {
            allocator: TicketAllocator::new(),
            closed: false,
            accepts: VecDeque::new(),
            queued: VecDeque::new(),
            reservations: HashMap::new(),
        }
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    #[inline]
    pub fn last_ticket(&self) -> Ticket {
        self.allocator.last()
    }

    /// Number of `accept()` calls still waiting.
    pub fn pending_accepts(&self) -> usize {
        self.accepts.iter().filter(|w| !w.is_closed()).count()
    }

    #[inline]
    pub fn reservations(&self) -> usize {
        self.reservations.len()
    }

    #[inline]
    pub fn queued(&self) -> usize {
        self.queued.len()
    }

    pub fn parked(&self) -> usize {
        self.reservations.values().filter(|r| matches!(r.slot, Slot::Parked(_))).count()
    }

    /// Allocate the next ticket for a new SIGNAL connection.
    pub fn reserve(&mut self) -> Result<(Ticket, oneshot::Receiver<()>)> {
        if self.closed {
            return Err(DrbFireError::BrokerClosed);
        }
        let ticket = self.allocator.next().ok_or(DrbFireError::TicketsExhausted)?;
        let (tx, rx) = oneshot::channel();
        self.reservations.insert(ticket, Reservation { slot: Slot::Idle, wake: Some(tx) });
        Ok((ticket, rx))
    }

    /// Register an unticketed accept, or take a queued wildcard connection.
    pub fn accept(&mut self) -> Result<Pending<S>> {
        if self.closed {
            return Err(DrbFireError::BrokerClosed);
        }
        if let Some(stream) = self.queued.pop_front() {
            return Ok(Pending::Ready(stream));
        }
        // cancelled accept() calls leave their sender behind
        self.accepts.retain(|w| !w.is_closed());
        let (tx, rx) = oneshot::channel();
        self.accepts.push_back(tx);
        Ok(Pending::Wait(rx))
    }

    /// Route a MAIN connection by the ticket it presented.
    ///
    /// On error the connection is dropped, which closes it.
    pub fn dispatch(&mut self, ticket: Ticket, stream: S) -> Result<Matched> {
        if self.closed {
            return Err(DrbFireError::BrokerClosed);
        }
        if ticket == WILDCARD {
            let mut stream = stream;
            while let Some(waiter) = self.accepts.pop_front() {
                match hand_over(waiter, stream) {
                    None => return Ok(Matched::Accepted),
                    Some(back) => stream = back,
                }
            }
            self.queued.push_back(stream);
            return Ok(Matched::Queued);
        }
        let Some(r) = self.reservations.get_mut(&ticket) else {
            return Err(DrbFireError::violation(ticket, self.missing(ticket)));
        };
        match mem::replace(&mut r.slot, Slot::Idle) {
            Slot::Idle => {
                r.slot = Slot::Parked(stream);
                // the holder's MAIN claimed the ticket, complete its signal leg
                if let Some(wake) = r.wake.take() {
                    let _ = wake.send(());
                }
                Ok(Matched::Parked)
            }
            Slot::Parked(prev) => {
                r.slot = Slot::Parked(prev);
                Err(DrbFireError::violation(ticket, ViolationKind::Duplicate))
            }
            Slot::Claimed(waiter) => {
                self.reservations.remove(&ticket);
                match hand_over(waiter, stream) {
                    None => Ok(Matched::Paired),
                    Some(_) => Ok(Matched::Dropped),
                }
            }
        }
    }

    /// Claim a reservation on behalf of an `open()` carrying `ticket`.
    ///
    /// The caller must fire the returned `wake` so the holder dials in. A
    /// parked connection already had its completion sent when it arrived.
    pub fn claim(&mut self, ticket: Ticket) -> Result<Claim<S>> {
        if self.closed {
            return Err(DrbFireError::BrokerClosed);
        }
        let Some(r) = self.reservations.get_mut(&ticket) else {
            return Err(DrbFireError::violation(ticket, self.missing(ticket)));
        };
        match mem::replace(&mut r.slot, Slot::Idle) {
            Slot::Idle => {
                let (tx, rx) = oneshot::channel();
                r.slot = Slot::Claimed(tx);
                Ok(Claim::Wait { rx, wake: r.wake.take() })
            }
            Slot::Parked(stream) => {
                self.reservations.remove(&ticket);
                Ok(Claim::Ready(stream))
            }
            Slot::Claimed(waiter) => {
                if waiter.is_closed() {
                    // the previous open() was abandoned after waking the holder
                    let (tx, rx) = oneshot::channel();
                    r.slot = Slot::Claimed(tx);
                    return Ok(Claim::Wait { rx, wake: None });
                }
                r.slot = Slot::Claimed(waiter);
                Err(DrbFireError::violation(ticket, ViolationKind::Duplicate))
            }
        }
    }

    /// The holder of `ticket` hung up its signal connection.
    ///
    /// Returns false if the reservation was already gone.
    pub fn abandon(&mut self, ticket: Ticket) -> bool {
        let Some(r) = self.reservations.remove(&ticket) else {
            return false;
        };
        if let Slot::Claimed(waiter) = r.slot {
            let e = io::Error::new(io::ErrorKind::ConnectionAborted, "ticket holder hung up");
            let _ = waiter.send(Err(e.into()));
        }
        true
    }

    /// Fail everything pending. Later calls fail with `BrokerClosed`.
    pub fn close(&mut self) {
        self.closed = true;
        for waiter in self.accepts.drain(..) {
            let _ = waiter.send(Err(DrbFireError::BrokerClosed));
        }
        self.queued.clear();
        for (_, r) in self.reservations.drain() {
            if let Slot::Claimed(waiter) = r.slot {
                let _ = waiter.send(Err(DrbFireError::BrokerClosed));
            }
        }
    }

    fn missing(&self, ticket: Ticket) -> ViolationKind {
        if self.allocator.issued(ticket) { ViolationKind::Consumed } else { ViolationKind::Unknown }
    }
}
