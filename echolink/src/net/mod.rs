// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! TCP listener and session actors which exchange unframed text messages

use std::fmt::Display;
use std::net::SocketAddr;
use std::time::Duration;

pub mod listener;
pub mod session;

/// A network port
pub type NetworkPort = u16;

/// Host both roles use when none is configured
pub const DEFAULT_HOST: &str = "localhost";

/// Port both roles use when none is configured
pub const DEFAULT_PORT: NetworkPort = 12345;

/// Pending (not yet accepted) connections the OS queues for the listener
pub const DEFAULT_BACKLOG: u32 = 5;

/// Upper bound on establishing an outbound connection
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Maximum number of bytes taken off the wire per read. One read is one message.
pub const BUFFER_SIZE: usize = 1024;

/// Text the session puts in front of every message it acknowledges
pub const REPLY_PREFIX: &str = "Server received: ";

/// Read buffer of the connector, large enough for the acknowledgement of a full [BUFFER_SIZE] message
pub const REPLY_BUFFER_SIZE: usize = BUFFER_SIZE + REPLY_PREFIX.len();

/// Input line which ends the connector loop. Matched case-insensitively and never transmitted.
pub const QUIT_SENTINEL: &str = "quit";

/// Build the acknowledgement a session sends back for a received message
pub fn acknowledge(text: &str) -> String {
    format!("{REPLY_PREFIX}{text}")
}

/// A `(host, port)` pair the listener binds to and the connector dials.
///
/// Port `0` is only meaningful when binding, where it asks the OS for an ephemeral port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Host name or IP literal
    pub host: String,
    /// TCP port
    pub port: NetworkPort,
}

impl Endpoint {
    /// Create a new endpoint
    pub fn new(host: impl Into<String>, port: NetworkPort) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Resolve the host into the socket addresses it names, in resolver order
    pub async fn resolve(&self) -> std::io::Result<Vec<SocketAddr>> {
        let addrs = tokio::net::lookup_host((self.host.as_str(), self.port))
            .await?
            .collect::<Vec<_>>();
        if addrs.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{self} did not resolve to any address"),
            ));
        }
        Ok(addrs)
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self::new(DEFAULT_HOST, DEFAULT_PORT)
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}

impl Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acknowledgement_prefixes_the_message() {
        assert_eq!(acknowledge("hello"), "Server received: hello");
        assert_eq!(acknowledge(""), REPLY_PREFIX);
    }

    #[test]
    fn reply_buffer_fits_a_full_acknowledgement() {
        let message = "x".repeat(BUFFER_SIZE);
        assert_eq!(acknowledge(&message).len(), REPLY_BUFFER_SIZE);
    }

    #[test]
    fn default_endpoint() {
        let endpoint = Endpoint::default();
        assert_eq!(endpoint.host, "localhost");
        assert_eq!(endpoint.port, 12345);
        assert_eq!(endpoint.to_string(), "localhost:12345");
    }

    #[test]
    fn ipv6_endpoints_are_bracketed() {
        let addr: SocketAddr = "[::1]:8080".parse().unwrap();
        assert_eq!(Endpoint::from(addr).to_string(), "[::1]:8080");
    }

    #[tokio::test]
    async fn resolves_ip_literals() {
        let addrs = Endpoint::new("127.0.0.1", 4000)
            .resolve()
            .await
            .expect("IP literal should resolve");
        assert_eq!(addrs, vec!["127.0.0.1:4000".parse::<SocketAddr>().unwrap()]);
    }
}
