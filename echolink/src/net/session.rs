// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! TCP session actor which services a single accepted connection

use std::fmt::Display;
use std::io::ErrorKind;
use std::net::SocketAddr;

use ractor::{Actor, ActorProcessingErr, ActorRef};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use super::{acknowledge, BUFFER_SIZE};

/// Why a session stopped servicing its connection early
#[derive(Debug)]
pub enum SessionErr {
    /// The peer reset or aborted the connection
    PeerReset(std::io::Error),
    /// The received bytes were not valid UTF-8
    Decode(std::str::Utf8Error),
    /// Any other I/O failure, tagged with the operation which failed
    Io(&'static str, std::io::Error),
}

impl SessionErr {
    fn from_io(operation: &'static str, err: std::io::Error) -> Self {
        match err.kind() {
            ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted | ErrorKind::BrokenPipe => {
                Self::PeerReset(err)
            }
            _ => Self::Io(operation, err),
        }
    }
}

impl std::error::Error for SessionErr {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::PeerReset(cause) | Self::Io(_, cause) => Some(cause),
            Self::Decode(cause) => Some(cause),
        }
    }
}

impl Display for SessionErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PeerReset(err) => write!(f, "connection reset by peer: {err}"),
            Self::Decode(err) => write!(f, "message is not valid UTF-8: {err}"),
            Self::Io(operation, err) => write!(f, "{operation} failed: {err}"),
        }
    }
}

/// The outcome of servicing one read off a connection
#[derive(Debug, PartialEq, Eq)]
pub enum SessionStep {
    /// A message was received and acknowledged
    Exchanged(String),
    /// The peer shut its side of the connection down
    PeerClosed,
}

/// Read one message (at most `buf.len()` bytes) and write its acknowledgement in full.
///
/// A zero-length read is a graceful shutdown by the peer and nothing is written.
pub async fn serve_once<S>(stream: &mut S, buf: &mut [u8]) -> Result<SessionStep, SessionErr>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let n = stream
        .read(buf)
        .await
        .map_err(|err| SessionErr::from_io("read", err))?;
    if n == 0 {
        return Ok(SessionStep::PeerClosed);
    }

    let text = std::str::from_utf8(&buf[..n]).map_err(SessionErr::Decode)?;
    let reply = acknowledge(text);
    stream
        .write_all(reply.as_bytes())
        .await
        .map_err(|err| SessionErr::from_io("write", err))?;
    stream
        .flush()
        .await
        .map_err(|err| SessionErr::from_io("flush", err))?;

    Ok(SessionStep::Exchanged(text.to_string()))
}

// ========================= Session actor ========================= //

/// Services exactly one accepted connection until it closes.
///
/// The session is `OPEN` for as long as the actor runs. An empty read, a peer reset, a decode failure
/// or any other I/O error stops the actor, which is the terminal `CLOSED` state. None of these are
/// reported as actor failures, so the supervising [crate::EchoServer] just forgets about the session.
pub struct Session {
    pub(crate) peer_addr: SocketAddr,
    pub(crate) local_addr: SocketAddr,
}

/// The session messages
pub enum SessionMessage {
    /// Service the next message on the connection
    Read,
}

/// The session's state
pub struct SessionState {
    stream: Option<TcpStream>,
    buf: Vec<u8>,
    received: u64,
}

impl Actor for Session {
    type Msg = SessionMessage;
    type State = SessionState;
    type Arguments = TcpStream;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        stream: TcpStream,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::debug!("Session {} <- {} opened", self.local_addr, self.peer_addr);
        let _ = myself.cast(SessionMessage::Read);
        Ok(Self::State {
            stream: Some(stream),
            buf: vec![0u8; BUFFER_SIZE],
            received: 0,
        })
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        drop(state.stream.take());
        tracing::info!(
            "Connection closed with {} after {} message(s)",
            self.peer_addr,
            state.received
        );
        Ok(())
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            SessionMessage::Read => {
                let Some(stream) = &mut state.stream else {
                    return Ok(());
                };
                match serve_once(stream, &mut state.buf).await {
                    Ok(SessionStep::Exchanged(text)) => {
                        state.received += 1;
                        tracing::info!(
                            "Received #{} from {}: {text}",
                            state.received,
                            self.peer_addr
                        );
                        let _ = myself.cast(SessionMessage::Read);
                    }
                    Ok(SessionStep::PeerClosed) => {
                        tracing::debug!("{} closed its side of the connection", self.peer_addr);
                        drop(state.stream.take());
                        myself.stop(Some("peer_closed".to_string()));
                    }
                    Err(SessionErr::PeerReset(err)) => {
                        tracing::warn!(
                            "Client {} disconnected unexpectedly: {err}",
                            self.peer_addr
                        );
                        drop(state.stream.take());
                        myself.stop(Some("peer_reset".to_string()));
                    }
                    Err(err) => {
                        tracing::error!("Error handling client {}: {err}", self.peer_addr);
                        drop(state.stream.take());
                        myself.stop(Some("session_error".to_string()));
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::duplex;

    use super::*;

    #[tokio::test]
    async fn acknowledges_a_message() {
        let (mut client, mut server) = duplex(4096);
        client.write_all(b"hello").await.unwrap();

        let mut buf = vec![0u8; BUFFER_SIZE];
        let step = serve_once(&mut server, &mut buf).await.unwrap();
        assert_eq!(step, SessionStep::Exchanged("hello".to_string()));

        let mut reply = vec![0u8; 64];
        let n = client.read(&mut reply).await.unwrap();
        assert_eq!(&reply[..n], b"Server received: hello");
    }

    #[tokio::test]
    async fn empty_read_is_a_graceful_close() {
        let (client, mut server) = duplex(64);
        drop(client);

        let mut buf = vec![0u8; BUFFER_SIZE];
        let step = serve_once(&mut server, &mut buf).await.unwrap();
        assert_eq!(step, SessionStep::PeerClosed);
    }

    #[tokio::test]
    async fn reads_are_capped_at_the_buffer_size() {
        let (mut client, mut server) = duplex(4 * BUFFER_SIZE);
        let message = "a".repeat(BUFFER_SIZE + 10);
        client.write_all(message.as_bytes()).await.unwrap();

        let mut buf = vec![0u8; BUFFER_SIZE];
        let first = serve_once(&mut server, &mut buf).await.unwrap();
        assert_eq!(first, SessionStep::Exchanged("a".repeat(BUFFER_SIZE)));
        let second = serve_once(&mut server, &mut buf).await.unwrap();
        assert_eq!(second, SessionStep::Exchanged("a".repeat(10)));
    }

    #[tokio::test]
    async fn invalid_utf8_is_a_decode_error() {
        let (mut client, mut server) = duplex(64);
        client.write_all(&[0xff, 0xfe, 0xfd]).await.unwrap();

        let mut buf = vec![0u8; BUFFER_SIZE];
        match serve_once(&mut server, &mut buf).await {
            Err(SessionErr::Decode(_)) => {}
            other => panic!("Expected a decode error, got {other:?}"),
        }
    }

    #[test]
    fn resets_are_told_apart_from_other_io_errors() {
        let reset = SessionErr::from_io("read", std::io::Error::from(ErrorKind::ConnectionReset));
        assert!(matches!(reset, SessionErr::PeerReset(_)));

        let pipe = SessionErr::from_io("write", std::io::Error::from(ErrorKind::BrokenPipe));
        assert!(matches!(pipe, SessionErr::PeerReset(_)));

        let other = SessionErr::from_io("read", std::io::Error::from(ErrorKind::InvalidData));
        assert!(matches!(other, SessionErr::Io("read", _)));
    }
}
