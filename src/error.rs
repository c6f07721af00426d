//! Error types shared by every rendezvous operation.

use crate::ticket::Ticket;
use std::{fmt, io};
use thiserror::Error;

/// Why a MAIN connection was refused by the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationKind {
    /// The ticket was never issued by this broker.
    Unknown,
    /// The ticket was issued, but a MAIN connection already consumed it.
    Consumed,
    /// Another MAIN connection is already parked on the ticket.
    Duplicate,
    /// The connection closed before a full ticket header arrived.
    Truncated,
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::Unknown => "unknown ticket",
            Self::Consumed => "ticket already consumed",
            Self::Duplicate => "ticket already claimed",
            Self::Truncated => "truncated ticket header",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum DrbFireError {
    /// The uri does not use the `drbfire://` scheme.
    #[error("bad scheme in uri {0:?}")]
    BadScheme(String),

    /// The uri is missing a port, or host/port are malformed.
    #[error("bad address {0:?}")]
    BadAddress(String),

    /// Dialing, accepting or the ticket handshake failed on either channel.
    #[error("connection establishment failed: {0}")]
    Connection(#[from] io::Error),

    #[error("protocol violation on ticket {ticket}: {kind}")]
    ProtocolViolation { ticket: Ticket, kind: ViolationKind },

    /// The broker was shut down before or while the operation was pending.
    #[error("broker closed")]
    BrokerClosed,

    #[error("ticket space exhausted")]
    TicketsExhausted,
}

impl DrbFireError {
    #[inline]
    pub fn violation(ticket: Ticket, kind: ViolationKind) -> Self {
        Self::ProtocolViolation { ticket, kind }
    }
}

pub type Result<T> = std::result::Result<T, DrbFireError>;
