// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! # Acknowledging text exchange over TCP
//!
//! Two roles share a plain TCP stream:
//!
//! * The **listener** side is an [EchoServer] actor. It supervises a `Listener` actor which owns the
//!   server socket and a `Session` actor per accepted connection. Each session reads a message, answers
//!   with `"Server received: " + message` and waits for the next one until the peer goes away.
//! * The **connector** side is a [Connector] which dials the server with a bounded timeout and then
//!   drives a strict request/response loop: the next message is never written before the reply to the
//!   previous one was observed.
//!
//! ## Wire format
//!
//! There is no framing. One successful `read` of at most [BUFFER_SIZE] bytes is one message. This is
//! fine on a loopback or a quiet LAN, but under arbitrary TCP segmentation a single write may be
//! observed as several messages (or several writes as one). Callers needing hard message boundaries
//! should put a framing layer on top.
//!
//! ## Ownership
//!
//! Every [tokio::net::TcpStream] has exactly one owner (a session actor's state or a [Connector]) so
//! sockets are closed exactly once, when that owner is dropped, on every exit path.

#![warn(unused_imports)]
#![warn(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod net;
pub mod server;

// ============== Re-exports ============== //
pub use client::{connect, ClientConfig, ConnectErr, Connector, ExchangeErr, Reply, RunEnd, RunSummary};
pub use net::listener::{bind, listen, BoundSocket, ListenErr};
pub use net::{
    acknowledge, Endpoint, NetworkPort, BUFFER_SIZE, DEFAULT_BACKLOG, DEFAULT_CONNECT_TIMEOUT,
    DEFAULT_HOST, DEFAULT_PORT, QUIT_SENTINEL, REPLY_BUFFER_SIZE, REPLY_PREFIX,
};
pub use server::{start, EchoServer, EchoServerMessage, ServerConfig, ServerStats, SessionMode};
