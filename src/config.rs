use std::time::Duration;

/// Which side of the rendezvous this process plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Role {
    /// Reachable inbound. Owns the MAIN and SIGNAL listeners.
    #[default]
    Server,
    /// Behind a firewall. Only ever dials out to a server.
    Client,
}

/// General config for both roles
#[derive(Clone, Debug)]
pub struct RendezvousConfig {
    pub role: Role,
    /// Bounds writing and reading of the ticket header on either channel.
    /// Zero disables the timeout, leaving deadlines to the caller.
    pub handshake_timeout: Duration,
    /// Set TCP_NODELAY on every MAIN connection handed out.
    pub nodelay: bool,
}

impl RendezvousConfig {
    #[inline]
    pub fn server() -> Self {
        Self { role: Role::Server, ..Default::default() }
    }

    #[inline]
    pub fn client() -> Self {
        Self { role: Role::Client, ..Default::default() }
    }
}

impl Default for RendezvousConfig {
    fn default() -> Self {
        Self { role: Role::Server, handshake_timeout: Duration::from_secs(0), nodelay: true }
    }
}
