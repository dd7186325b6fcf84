// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! TCP Server to accept incoming sessions

use std::fmt::Display;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::time::Duration;

use ractor::{Actor, ActorProcessingErr, ActorRef, SpawnErr};
use tokio::net::{TcpListener, TcpSocket};

use crate::server::{EchoServerMessage, SessionMode};

/// Pause after a failed accept, so a persistent error (e.g. out of file descriptors) does not spin
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// A failure to bring the listening socket up. Any of these is fatal to the listener process.
#[derive(Debug)]
pub enum ListenErr {
    /// The host could not be resolved to a socket address
    Resolve(String, std::io::Error),
    /// Another socket is already listening on the address
    AddressInUse(SocketAddr),
    /// Binding the address needs privileges the process does not have
    PermissionDenied(SocketAddr),
    /// Any other OS error while creating or binding the socket
    Bind(SocketAddr, std::io::Error),
    /// The bound socket could not be put into the listening state
    Listen(SocketAddr, std::io::Error),
    /// The server actors failed to start on top of the listening socket
    Startup(SpawnErr),
}

impl std::error::Error for ListenErr {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Resolve(_, cause) | Self::Bind(_, cause) | Self::Listen(_, cause) => Some(cause),
            Self::Startup(cause) => Some(cause),
            Self::AddressInUse(_) | Self::PermissionDenied(_) => None,
        }
    }
}

impl Display for ListenErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Resolve(endpoint, err) => write!(f, "failed to resolve {endpoint}: {err}"),
            Self::AddressInUse(addr) => write!(f, "address {addr} is already in use"),
            Self::PermissionDenied(addr) => write!(f, "permission denied binding {addr}"),
            Self::Bind(addr, err) => write!(f, "failed to bind {addr}: {err}"),
            Self::Listen(addr, err) => write!(f, "failed to listen on {addr}: {err}"),
            Self::Startup(err) => write!(f, "failed to start the server actors: {err}"),
        }
    }
}

impl From<SpawnErr> for ListenErr {
    fn from(value: SpawnErr) -> Self {
        Self::Startup(value)
    }
}

/// A socket bound to a local address with address reuse enabled, not yet listening
pub struct BoundSocket {
    socket: TcpSocket,
    addr: SocketAddr,
}

impl BoundSocket {
    /// The address the socket is bound to. Carries the OS-assigned port when binding port `0`.
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }
}

/// Bind a fresh socket to `addr`, enabling address reuse first so a restarted listener does not trip
/// over connections lingering in `TIME_WAIT`
pub fn bind(addr: SocketAddr) -> Result<BoundSocket, ListenErr> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()
    } else {
        TcpSocket::new_v6()
    }
    .map_err(|err| ListenErr::Bind(addr, err))?;
    socket
        .set_reuseaddr(true)
        .map_err(|err| ListenErr::Bind(addr, err))?;

    match socket.bind(addr) {
        Ok(()) => {}
        Err(err) if err.kind() == ErrorKind::AddrInUse => return Err(ListenErr::AddressInUse(addr)),
        Err(err) if err.kind() == ErrorKind::PermissionDenied => {
            return Err(ListenErr::PermissionDenied(addr))
        }
        Err(err) => return Err(ListenErr::Bind(addr, err)),
    }

    let addr = socket
        .local_addr()
        .map_err(|err| ListenErr::Bind(addr, err))?;
    Ok(BoundSocket { socket, addr })
}

/// Mark a bound socket ready to accept. `backlog` bounds the connections the OS queues before they
/// are accepted; attempts past it are refused or dropped by the OS.
pub fn listen(bound: BoundSocket, backlog: u32) -> Result<TcpListener, ListenErr> {
    let BoundSocket { socket, addr } = bound;
    match socket.listen(backlog) {
        Ok(listener) => Ok(listener),
        Err(err) if err.kind() == ErrorKind::AddrInUse => Err(ListenErr::AddressInUse(addr)),
        Err(err) => Err(ListenErr::Listen(addr, err)),
    }
}

/// A Tcp Socket [Listener] responsible for accepting new connections and handing them to the
/// [crate::EchoServer], which spawns the [super::session::Session] for each of them.
///
/// In [SessionMode::Concurrent] the listener goes straight back to accepting. In [SessionMode::Serial]
/// it waits for the server to send [ListenerMessage::Accept] once the running session has closed.
pub struct Listener {
    server: ActorRef<EchoServerMessage>,
    mode: SessionMode,
}

impl Listener {
    /// Create a new `Listener`
    pub fn new(server: ActorRef<EchoServerMessage>, mode: SessionMode) -> Self {
        Self { server, mode }
    }
}

/// The listener's state
pub struct ListenerState {
    listener: Option<TcpListener>,
    local_addr: SocketAddr,
}

/// Messages to the [Listener]
pub enum ListenerMessage {
    /// Wait for the next incoming connection
    Accept,
}

impl Actor for Listener {
    type Msg = ListenerMessage;
    type State = ListenerState;
    type Arguments = TcpListener;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        listener: TcpListener,
    ) -> Result<Self::State, ActorProcessingErr> {
        let local_addr = listener.local_addr()?;

        // startup the event processing loop by sending an initial msg
        let _ = myself.cast(ListenerMessage::Accept);

        Ok(Self::State {
            listener: Some(listener),
            local_addr,
        })
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        drop(state.listener.take());
        tracing::info!("Listener on {} closed", state.local_addr);
        Ok(())
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            ListenerMessage::Accept => {
                if let Some(listener) = &mut state.listener {
                    match listener.accept().await {
                        Ok((stream, peer_addr)) => {
                            tracing::info!("New connection from {peer_addr}");
                            let opened = EchoServerMessage::ConnectionOpened { stream, peer_addr };
                            if self.server.cast(opened).is_err() {
                                tracing::error!(
                                    "Server is gone, dropping the connection from {peer_addr}"
                                );
                                myself.stop(Some("server_closed".to_string()));
                                return Ok(());
                            }
                            if self.mode == SessionMode::Serial {
                                // the server resumes us once this session is closed
                                return Ok(());
                            }
                        }
                        Err(socket_accept_error) => {
                            accept_failed(state.local_addr, socket_accept_error).await;
                        }
                    }
                }

                // continue accepting new sockets
                let _ = myself.cast(ListenerMessage::Accept);
            }
        }
        Ok(())
    }
}

async fn accept_failed(local_addr: SocketAddr, err: std::io::Error) {
    tracing::warn!("Error accepting socket on {local_addr}: {err}");
    tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DEFAULT_BACKLOG;

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[tokio::test]
    async fn bind_assigns_an_ephemeral_port() {
        let bound = bind(loopback()).expect("Failed to bind");
        assert_ne!(bound.local_addr().port(), 0);
        let listener = listen(bound, DEFAULT_BACKLOG).expect("Failed to listen");
        assert_ne!(listener.local_addr().unwrap().port(), 0);
    }

    #[tokio::test]
    async fn bind_reports_address_in_use() {
        let first = listen(bind(loopback()).unwrap(), DEFAULT_BACKLOG).unwrap();
        let taken = first.local_addr().unwrap();

        match bind(taken) {
            Err(ListenErr::AddressInUse(addr)) => assert_eq!(addr, taken),
            Err(other) => panic!("Expected AddressInUse, got {other}"),
            Ok(_) => panic!("Binding a listening address twice should fail"),
        }
    }

    #[tokio::test]
    async fn listening_socket_accepts_connections() {
        let listener = listen(bind(loopback()).unwrap(), DEFAULT_BACKLOG).unwrap();
        let addr = listener.local_addr().unwrap();

        let client = tokio::net::TcpStream::connect(addr)
            .await
            .expect("Failed to connect");
        let (_server_side, peer) = listener.accept().await.expect("Failed to accept");
        assert_eq!(peer, client.local_addr().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_accepts_back_off_before_retrying() {
        let started = tokio::time::Instant::now();
        for _ in 0..3 {
            accept_failed(loopback(), std::io::Error::from_raw_os_error(24)).await;
        }
        assert!(started.elapsed() >= ACCEPT_RETRY_DELAY * 3);
    }

    #[test]
    fn errors_render_their_context() {
        let addr: SocketAddr = "127.0.0.1:80".parse().unwrap();
        assert_eq!(
            ListenErr::PermissionDenied(addr).to_string(),
            "permission denied binding 127.0.0.1:80"
        );
        assert_eq!(
            ListenErr::AddressInUse(addr).to_string(),
            "address 127.0.0.1:80 is already in use"
        );
    }
}
