//! Ticket numbers and their allocator.
//!
//! A ticket identifies one pending logical connection on a single broker.
//! On the wire it is always a big-endian `u32`.

use std::sync::atomic::{AtomicU32, Ordering};

pub type Ticket = u32;

/// Tagging a MAIN connection with this value asks for FIFO matching against
/// unticketed accepts, without any SIGNAL round-trip.
pub const WILDCARD: Ticket = 0;

/// Size of an encoded ticket on both channels.
pub const TICKET_LEN: usize = 4;

#[inline]
pub fn encode(ticket: Ticket) -> [u8; TICKET_LEN] {
    ticket.to_be_bytes()
}

#[inline]
pub fn decode(buf: [u8; TICKET_LEN]) -> Ticket {
    Ticket::from_be_bytes(buf)
}

/// Hands out 1, 2, 3, ... for the lifetime of one broker.
///
/// Each call returns a distinct value even with concurrent callers. Once the
/// `u32` space is used up, `next()` keeps returning `None` rather than wrapping
/// onto the wildcard or reusing a ticket.
#[derive(Debug)]
pub struct TicketAllocator {
    last: AtomicU32,
}

impl TicketAllocator {
    pub fn new() -> Self {
        Self { last: AtomicU32::new(WILDCARD) }
    }

    pub fn next(&self) -> Option<Ticket> {
        self.last
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| last.checked_add(1))
            .ok()
            .map(|prev| prev + 1)
    }

    /// The most recently issued ticket, `WILDCARD` if none yet.
    #[inline]
    pub fn last(&self) -> Ticket {
        self.last.load(Ordering::Acquire)
    }

    /// True if `ticket` was handed out by this allocator.
    #[inline]
    pub fn issued(&self, ticket: Ticket) -> bool {
        ticket != WILDCARD && ticket <= self.last()
    }
}

impl Default for TicketAllocator {
    fn default() -> Self {
        Self::new()
    }
}
