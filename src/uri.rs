//! Parsing and building `drbfire://host:port[?option]` addresses.
//!
//! The option is opaque to this module. When it is numeric it names a ticket,
//! which is how a reservation travels inside object references.

use crate::error::{DrbFireError, Result};
use crate::ticket::{Ticket, WILDCARD};
use std::fmt;

pub const SCHEME: &str = "drbfire";

const PREFIX: &str = "drbfire://";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RendezvousAddress {
    pub host: String,
    /// The MAIN port. The SIGNAL port is always the next one.
    pub port: u16,
    pub option: Option<String>,
}

impl RendezvousAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port, option: None }
    }

    /// The ticket carried by the option, if the option is a non-zero number.
    pub fn ticket(&self) -> Option<Ticket> {
        match self.option.as_deref()?.parse::<Ticket>() {
            Ok(WILDCARD) | Err(_) => None,
            Ok(t) => Some(t),
        }
    }

    pub fn signal_port(&self) -> Result<u16> {
        self.port.checked_add(1).ok_or_else(|| DrbFireError::BadAddress(self.to_string()))
    }

    /// The same endpoint with `ticket` as option, for handing out as a callback address.
    pub fn with_ticket(&self, ticket: Ticket) -> Self {
        Self { host: self.host.clone(), port: self.port, option: Some(ticket.to_string()) }
    }

    /// The same endpoint without option.
    pub fn base(&self) -> Self {
        Self { host: self.host.clone(), port: self.port, option: None }
    }
}

impl fmt::Display for RendezvousAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "{}[{}]:{}", PREFIX, self.host, self.port)?;
        } else {
            write!(f, "{}{}:{}", PREFIX, self.host, self.port)?;
        }
        if let Some(option) = self.option.as_ref() {
            write!(f, "?{}", option)?;
        }
        Ok(())
    }
}

impl std::str::FromStr for RendezvousAddress {
    type Err = DrbFireError;

    fn from_str(s: &str) -> Result<Self> {
        parse(s)
    }
}

/// Separate the trailing `?option` from a uri.
///
/// Only the scheme is checked. An empty option counts as absent.
pub fn split_option(uri: &str) -> Result<(String, Option<String>)> {
    if !uri.starts_with(PREFIX) {
        return Err(DrbFireError::BadScheme(uri.to_string()));
    }
    match uri.split_once('?') {
        Some((base, "")) => Ok((base.to_string(), None)),
        Some((base, option)) => Ok((base.to_string(), Some(option.to_string()))),
        None => Ok((uri.to_string(), None)),
    }
}

pub fn parse(uri: &str) -> Result<RendezvousAddress> {
    let (base, option) = split_option(uri)?;
    let bad = || DrbFireError::BadAddress(uri.to_string());
    let authority = &base[PREFIX.len()..];
    let authority = authority.strip_suffix('/').unwrap_or(authority);
    let (host, port) = if let Some(rest) = authority.strip_prefix('[') {
        let (host, after) = rest.split_once(']').ok_or_else(bad)?;
        (host, after.strip_prefix(':').ok_or_else(bad)?)
    } else {
        let (host, port) = authority.rsplit_once(':').ok_or_else(bad)?;
        if host.contains(':') {
            // ipv6 hosts must be bracketed
            return Err(bad());
        }
        (host, port)
    };
    if host.is_empty() || port.is_empty() {
        return Err(bad());
    }
    let port = port.parse::<u16>().map_err(|_| bad())?;
    Ok(RendezvousAddress { host: host.to_string(), port, option })
}
