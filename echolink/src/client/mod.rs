// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! This module contains the logic for initiating client connections to an [crate::EchoServer] and
//! driving the request/response loop over them

use std::fmt::Display;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::net::{
    Endpoint, BUFFER_SIZE, DEFAULT_CONNECT_TIMEOUT, QUIT_SENTINEL, REPLY_BUFFER_SIZE,
};


/// A client connection error. Each variant is a distinct failure kind; none of them are retried.
#[derive(Debug)]
pub enum ConnectErr {
    /// No connection was established within the given bound
    Timeout(Duration),
    /// The target actively refused the connection, i.e. nothing is listening there
    Refused(SocketAddr),
    /// The host could not be resolved
    Resolve(String, std::io::Error),
    /// Any other socket failure, returning the underlying tokio error
    Socket(std::io::Error),
}

impl std::error::Error for ConnectErr {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Resolve(_, cause) | Self::Socket(cause) => Some(cause),
            Self::Timeout(_) | Self::Refused(_) => None,
        }
    }
}

impl Display for ConnectErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout(after) => write!(f, "connection timed out after {after:?}"),
            Self::Refused(addr) => write!(f, "connection to {addr} refused, is the server running?"),
            Self::Resolve(endpoint, err) => write!(f, "failed to resolve {endpoint}: {err}"),
            Self::Socket(err) => write!(f, "connection failed: {err}"),
        }
    }
}

impl From<std::io::Error> for ConnectErr {
    fn from(value: std::io::Error) -> Self {
        Self::Socket(value)
    }
}

/// A failure while exchanging messages over an established connection
#[derive(Debug)]
pub enum ExchangeErr {
    /// Writing the message failed
    Send(std::io::Error),
    /// Reading the reply failed
    Receive(std::io::Error),
    /// No reply arrived within the configured reply timeout
    Timeout(Duration),
    /// The reply was not valid UTF-8
    Decode(std::str::Utf8Error),
    /// Reading user input or writing to the console failed
    Console(std::io::Error),
    /// The message is longer than one server read, so it was not sent
    TooLong(usize),
}

impl std::error::Error for ExchangeErr {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Send(cause) | Self::Receive(cause) | Self::Console(cause) => Some(cause),
            Self::Decode(cause) => Some(cause),
            Self::Timeout(_) | Self::TooLong(_) => None,
        }
    }
}

impl Display for ExchangeErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Send(err) => write!(f, "failed to send message: {err}"),
            Self::Receive(err) => write!(f, "failed to receive reply: {err}"),
            Self::Timeout(after) => write!(f, "no reply within {after:?}"),
            Self::Decode(err) => write!(f, "reply is not valid UTF-8: {err}"),
            Self::Console(err) => write!(f, "console I/O failed: {err}"),
            Self::TooLong(len) => write!(
                f,
                "message of {len} bytes exceeds the {BUFFER_SIZE} byte limit"
            ),
        }
    }
}

/// What came back for one sent message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// The server's reply text
    Received(String),
    /// A zero-length read: the server closed the connection without replying
    NoResponse,
}

/// Why [Connector::run] returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunEnd {
    /// The user entered the quit sentinel
    Quit,
    /// The input ran out
    EndOfInput,
    /// The server closed the connection (a [Reply::NoResponse])
    PeerClosed,
}

/// Result of a [Connector::run] loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    /// Messages sent and answered
    pub exchanged: u64,
    /// Why the loop ended
    pub end: RunEnd,
}

/// Connector-side configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Where to connect
    pub endpoint: Endpoint,
    /// Upper bound on establishing the connection
    pub connect_timeout: Duration,
    /// Upper bound on waiting for each reply, unbounded if [None]
    pub reply_timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: Endpoint::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            reply_timeout: None,
        }
    }
}

impl ClientConfig {
    /// Connect as configured
    pub async fn connect(&self) -> Result<Connector, ConnectErr> {
        let connector = connect(&self.endpoint, self.connect_timeout).await?;
        Ok(connector.with_reply_timeout(self.reply_timeout))
    }
}

fn classify(addr: SocketAddr, err: std::io::Error) -> ConnectErr {
    if err.kind() == ErrorKind::ConnectionRefused {
        ConnectErr::Refused(addr)
    } else {
        ConnectErr::Socket(err)
    }
}

async fn open_stream(endpoint: &Endpoint) -> Result<TcpStream, ConnectErr> {
    let addrs = endpoint
        .resolve()
        .await
        .map_err(|err| ConnectErr::Resolve(endpoint.to_string(), err))?;

    // try every resolved address, `localhost` commonly names both ::1 and 127.0.0.1
    let mut last_err = None;
    for addr in addrs {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(err) => {
                tracing::debug!("Connecting to {addr} failed: {err}");
                last_err = Some(classify(addr, err));
            }
        }
    }
    Err(last_err.unwrap_or_else(|| {
        ConnectErr::Resolve(
            endpoint.to_string(),
            std::io::Error::from(ErrorKind::NotFound),
        )
    }))
}

/// Connect to an [crate::EchoServer]
///
/// * `endpoint` - The host and port to dial. Every address the host resolves to is tried in turn.
/// * `timeout` - Bound on the whole attempt, resolution included
///
/// Returns: [Ok(Connector)] owning the established connection, or the specific [ConnectErr]. Nothing is
/// retried and no socket outlives a failed attempt.
pub async fn connect(endpoint: &Endpoint, timeout: Duration) -> Result<Connector, ConnectErr> {
    tracing::info!("Connecting to {endpoint}...");
    let stream = match tokio::time::timeout(timeout, open_stream(endpoint)).await {
        Ok(result) => result?,
        Err(_elapsed) => return Err(ConnectErr::Timeout(timeout)),
    };
    let peer_addr = stream.peer_addr()?;
    let local_addr = stream.local_addr()?;
    tracing::info!("Connected to {peer_addr}");

    Ok(Connector {
        stream,
        peer_addr,
        local_addr,
        reply_timeout: None,
        buf: vec![0u8; REPLY_BUFFER_SIZE],
    })
}

/// Owns one outbound connection and exchanges messages over it, strictly one at a time.
///
/// Dropping the connector closes the connection. [Connector::close] additionally shuts the write side
/// down first so the server sees a graceful end of stream.
pub struct Connector {
    stream: TcpStream,
    peer_addr: SocketAddr,
    local_addr: SocketAddr,
    reply_timeout: Option<Duration>,
    buf: Vec<u8>,
}

impl Connector {
    /// Bound every reply wait by `reply_timeout`
    pub fn with_reply_timeout(mut self, reply_timeout: Option<Duration>) -> Self {
        self.reply_timeout = reply_timeout;
        self
    }

    /// The server's address
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Our side of the connection
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Write `message` in full, then wait for one read's worth of reply.
    ///
    /// A zero-length read comes back as [Reply::NoResponse]; it means the server closed the connection.
    /// Messages over [BUFFER_SIZE] bytes are refused with [ExchangeErr::TooLong] before anything is
    /// written, since the server would acknowledge them in pieces.
    pub async fn exchange(&mut self, message: &str) -> Result<Reply, ExchangeErr> {
        if message.len() > BUFFER_SIZE {
            return Err(ExchangeErr::TooLong(message.len()));
        }
        tracing::debug!("Sending to {}: {message}", self.peer_addr);
        self.stream
            .write_all(message.as_bytes())
            .await
            .map_err(ExchangeErr::Send)?;

        let reply_timeout = self.reply_timeout;
        let read = self.stream.read(&mut self.buf);
        let n = match reply_timeout {
            Some(after) => tokio::time::timeout(after, read)
                .await
                .map_err(|_| ExchangeErr::Timeout(after))?,
            None => read.await,
        }
        .map_err(ExchangeErr::Receive)?;

        if n == 0 {
            return Ok(Reply::NoResponse);
        }
        let text = std::str::from_utf8(&self.buf[..n]).map_err(ExchangeErr::Decode)?;
        Ok(Reply::Received(text.to_string()))
    }

    /// Drive the request/response loop from `input`, one line per message, echoing prompts and replies
    /// to `output`.
    ///
    /// The loop ends on the quit sentinel (never transmitted), at the end of `input`, or when the
    /// server closes the connection. Empty lines are skipped since a zero-length write carries no
    /// message, and lines over [BUFFER_SIZE] bytes are skipped with a note on `output`. Any I/O error
    /// ends the loop and is returned.
    pub async fn run<I, O>(&mut self, input: I, output: &mut O) -> Result<RunSummary, ExchangeErr>
    where
        I: AsyncBufRead + Unpin,
        O: AsyncWrite + Unpin,
    {
        let mut lines = input.lines();
        let mut exchanged = 0;
        loop {
            write_console(
                output,
                &format!("Enter message (or '{QUIT_SENTINEL}' to exit): "),
            )
            .await?;
            let Some(line) = lines.next_line().await.map_err(ExchangeErr::Console)? else {
                return Ok(RunSummary {
                    exchanged,
                    end: RunEnd::EndOfInput,
                });
            };

            if line.eq_ignore_ascii_case(QUIT_SENTINEL) {
                return Ok(RunSummary {
                    exchanged,
                    end: RunEnd::Quit,
                });
            }
            if line.is_empty() {
                continue;
            }

            let reply = match self.exchange(&line).await {
                Err(ExchangeErr::TooLong(len)) => {
                    tracing::warn!("Not sending a {len} byte message to {}", self.peer_addr);
                    write_console(
                        output,
                        &format!("Message not sent, it is longer than {BUFFER_SIZE} bytes\n"),
                    )
                    .await?;
                    continue;
                }
                other => other?,
            };
            match reply {
                Reply::Received(text) => {
                    exchanged += 1;
                    write_console(output, &format!("Received: {text}\n")).await?;
                }
                Reply::NoResponse => {
                    tracing::warn!("No response from {}, connection closed", self.peer_addr);
                    return Ok(RunSummary {
                        exchanged,
                        end: RunEnd::PeerClosed,
                    });
                }
            }
        }
    }

    /// Shut the connection down and release it
    pub async fn close(mut self) {
        tracing::info!("Closing connection to {}...", self.peer_addr);
        if let Err(err) = self.stream.shutdown().await {
            tracing::debug!("Shutdown of the connection to {} failed: {err}", self.peer_addr);
        }
    }
}

async fn write_console<O>(output: &mut O, text: &str) -> Result<(), ExchangeErr>
where
    O: AsyncWrite + Unpin,
{
    output
        .write_all(text.as_bytes())
        .await
        .map_err(ExchangeErr::Console)?;
    output.flush().await.map_err(ExchangeErr::Console)
}
