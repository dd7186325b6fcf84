// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! The listener role: a supervised TCP accept loop with one session per connection
//!
//! ## Overview
//!
//! An [EchoServer] owns nothing but bookkeeping. It supervises
//!     1. The server-socket TCP `echolink::net::listener::Listener`
//!     2. All of the individual `echolink::net::session::Session`s
//!
//! A session which closes (for whatever reason) is removed from the server's state and counted as
//! closed. It never takes the listener or any other session down with it. The listener exiting is
//! the only child exit which stops the server.
//!
//! Use [start] to bind, listen and spawn the actors in one go.

use std::collections::HashMap;
use std::net::SocketAddr;

use ractor::concurrency::JoinHandle;
use ractor::{
    Actor, ActorCell, ActorId, ActorProcessingErr, ActorRef, RpcReplyPort, SupervisionEvent,
};
use tokio::net::{TcpListener, TcpStream};

use crate::net::listener::{bind, listen, ListenErr, Listener, ListenerMessage};
use crate::net::session::Session;
use crate::net::{Endpoint, DEFAULT_BACKLOG};


/// How accepted connections are scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionMode {
    /// Every accepted connection gets its own session immediately
    #[default]
    Concurrent,
    /// One client at a time. The next connection is accepted only after the current session closed,
    /// later clients wait in the OS backlog.
    Serial,
}

/// Listener-side configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Where to bind
    pub endpoint: Endpoint,
    /// Pending connection queue length handed to `listen`
    pub backlog: u32,
    /// Session scheduling
    pub mode: SessionMode,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            endpoint: Endpoint::default(),
            backlog: DEFAULT_BACKLOG,
            mode: SessionMode::default(),
        }
    }
}

/// Session counters of a running server
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerStats {
    /// Connections accepted since startup
    pub accepted: u64,
    /// Sessions which ran to completion (gracefully or not)
    pub closed: u64,
    /// Sessions currently open
    pub open: usize,
}

/// Messages to the [EchoServer]
pub enum EchoServerMessage {
    /// The listener accepted a new connection
    ConnectionOpened {
        /// The accepted stream, handed over to a new session
        stream: TcpStream,
        /// The remote address of the stream
        peer_addr: SocketAddr,
    },

    /// Retrieve the remote addresses of the open sessions
    GetSessions(RpcReplyPort<Vec<SocketAddr>>),

    /// Retrieve the session counters
    GetStats(RpcReplyPort<ServerStats>),

    /// Retrieve the address the listener is bound to
    GetLocalAddr(RpcReplyPort<SocketAddr>),
}

/// Supervisor of the listener and of every session
pub struct EchoServer {
    mode: SessionMode,
}

impl EchoServer {
    /// Create a new echo server. The listening socket is passed as the actor's startup argument.
    pub fn new(mode: SessionMode) -> Self {
        Self { mode }
    }
}

struct SessionInformation {
    actor: ActorCell,
    peer_addr: SocketAddr,
}

/// The state of the echo server
pub struct EchoServerState {
    listener: ActorRef<ListenerMessage>,
    listener_running: bool,
    local_addr: SocketAddr,
    sessions: HashMap<ActorId, SessionInformation>,
    stats: ServerStats,
}

impl EchoServerState {
    fn session_closed(&mut self, actor: &ActorCell) -> Option<SessionInformation> {
        let info = self.sessions.remove(&actor.get_id())?;
        self.stats.closed += 1;
        self.stats.open = self.sessions.len();
        Some(info)
    }
}

impl EchoServer {
    async fn open_session(
        &self,
        myself: &ActorRef<EchoServerMessage>,
        state: &mut EchoServerState,
        stream: TcpStream,
        peer_addr: SocketAddr,
    ) {
        state.stats.accepted += 1;
        let session = Session {
            peer_addr,
            local_addr: state.local_addr,
        };
        match Actor::spawn_linked(None, session, stream, myself.get_cell()).await {
            Ok((actor, _)) => {
                state.sessions.insert(
                    actor.get_id(),
                    SessionInformation {
                        actor: actor.get_cell(),
                        peer_addr,
                    },
                );
                state.stats.open = state.sessions.len();
                tracing::info!("TCP Session opened for {peer_addr}");
            }
            Err(err) => {
                // the stream went down with the failed spawn
                state.stats.closed += 1;
                tracing::error!("Failed to spawn session for {peer_addr}: {err}");
                self.resume_listener(state);
            }
        }
    }

    fn resume_listener(&self, state: &EchoServerState) {
        if self.mode == SessionMode::Serial {
            let _ = state.listener.cast(ListenerMessage::Accept);
        }
    }
}

impl Actor for EchoServer {
    type Msg = EchoServerMessage;
    type State = EchoServerState;
    type Arguments = TcpListener;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        listener: TcpListener,
    ) -> Result<Self::State, ActorProcessingErr> {
        let local_addr = listener.local_addr()?;
        let (listener, _) = Actor::spawn_linked(
            None,
            Listener::new(myself.clone(), self.mode),
            listener,
            myself.get_cell(),
        )
        .await?;
        tracing::info!("Server is listening on {local_addr} ({:?} sessions)", self.mode);

        Ok(Self::State {
            listener,
            listener_running: true,
            local_addr,
            sessions: HashMap::new(),
            stats: ServerStats::default(),
        })
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        // the listener is parked in `accept` and sessions in `read`, so a graceful stop would never
        // be processed. Killing drops their sockets but skips their `post_stop`, so their close is
        // logged here.
        if state.listener_running {
            state.listener.kill();
            tracing::info!("Listener on {} closed", state.local_addr);
        }
        for (_, session) in state.sessions.drain() {
            session.actor.kill();
            tracing::info!("Connection closed with {}", session.peer_addr);
        }
        tracing::info!("Server on {} shut down", state.local_addr);
        Ok(())
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            Self::Msg::ConnectionOpened { stream, peer_addr } => {
                self.open_session(&myself, state, stream, peer_addr).await;
            }
            Self::Msg::GetSessions(reply) => {
                let peers = state.sessions.values().map(|s| s.peer_addr).collect();
                let _ = reply.send(peers);
            }
            Self::Msg::GetStats(reply) => {
                let _ = reply.send(state.stats);
            }
            Self::Msg::GetLocalAddr(reply) => {
                let _ = reply.send(state.local_addr);
            }
        }
        Ok(())
    }

    async fn handle_supervisor_evt(
        &self,
        myself: ActorRef<Self::Msg>,
        message: SupervisionEvent,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            SupervisionEvent::ActorTerminated(actor, _, exit_reason) => {
                if actor.get_id() == state.listener.get_id() {
                    state.listener_running = false;
                    tracing::error!("Listener exited ({exit_reason:?}), shutting the server down");
                    myself.stop(Some("listener_exited".to_string()));
                } else if let Some(session) = state.session_closed(&actor) {
                    tracing::debug!(
                        "Session for {} exited ({exit_reason:?})",
                        session.peer_addr
                    );
                    self.resume_listener(state);
                }
            }
            SupervisionEvent::ActorFailed(actor, err) => {
                if actor.get_id() == state.listener.get_id() {
                    state.listener_running = false;
                    tracing::error!("Listener failed with '{err}', shutting the server down");
                    myself.stop(Some("listener_failed".to_string()));
                } else if let Some(session) = state.session_closed(&actor) {
                    tracing::error!("Session for {} failed with '{err}'", session.peer_addr);
                    self.resume_listener(state);
                }
            }
            _ => {
                // all ok
            }
        }
        Ok(())
    }
}

/// Resolve `config.endpoint`, bind to the first address it names, listen and spawn the [EchoServer].
///
/// Every failure here is a setup error and is returned before any connection is accepted.
pub async fn start(
    config: &ServerConfig,
) -> Result<(ActorRef<EchoServerMessage>, JoinHandle<()>), ListenErr> {
    let addrs = config
        .endpoint
        .resolve()
        .await
        .map_err(|err| ListenErr::Resolve(config.endpoint.to_string(), err))?;
    let bound = bind(addrs[0])?;
    let listener = listen(bound, config.backlog)?;
    let server = Actor::spawn(None, EchoServer::new(config.mode), listener).await?;
    Ok(server)
}
