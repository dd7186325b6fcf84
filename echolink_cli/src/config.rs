// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! Command line configuration of both roles. Every flag falls back to an environment variable and
//! then to the protocol defaults, so neither role needs any argument.

use std::time::Duration;

use clap::Args;
use echolink::{
    ClientConfig, Endpoint, ServerConfig, SessionMode, DEFAULT_BACKLOG, DEFAULT_CONNECT_TIMEOUT,
    DEFAULT_HOST, DEFAULT_PORT,
};

const DEFAULT_TIMEOUT_MS: u64 = DEFAULT_CONNECT_TIMEOUT.as_millis() as u64;

/// Listener configuration
#[derive(Args, Debug, Clone)]
pub struct ListenConfig {
    /// Host (name or IP) to bind to
    #[arg(long, env = "ECHOLINK_HOST", default_value = DEFAULT_HOST)]
    host: String,
    /// Server port
    #[arg(
        short,
        long,
        env = "ECHOLINK_PORT",
        default_value_t = DEFAULT_PORT,
        value_parser = clap::value_parser!(u16).range(1..)
    )]
    port: u16,
    /// Pending connections the OS queues before they are accepted
    #[arg(long, env = "ECHOLINK_BACKLOG", default_value_t = DEFAULT_BACKLOG)]
    backlog: u32,
    /// Serve one client at a time instead of one session per connection
    #[arg(long, env = "ECHOLINK_SERIAL")]
    serial: bool,
}

impl From<ListenConfig> for ServerConfig {
    fn from(config: ListenConfig) -> Self {
        Self {
            endpoint: Endpoint::new(config.host, config.port),
            backlog: config.backlog,
            mode: if config.serial {
                SessionMode::Serial
            } else {
                SessionMode::Concurrent
            },
        }
    }
}

/// Connector configuration
#[derive(Args, Debug, Clone)]
pub struct ConnectConfig {
    /// Host (name or IP) of the server
    #[arg(long, env = "ECHOLINK_HOST", default_value = DEFAULT_HOST)]
    host: String,
    /// Server port
    #[arg(
        short,
        long,
        env = "ECHOLINK_PORT",
        default_value_t = DEFAULT_PORT,
        value_parser = clap::value_parser!(u16).range(1..)
    )]
    port: u16,
    /// Milliseconds to wait for the connection to be established
    #[arg(long, env = "ECHOLINK_TIMEOUT_MS", default_value_t = DEFAULT_TIMEOUT_MS)]
    timeout_ms: u64,
    /// Milliseconds to wait for each reply, unbounded if not set
    #[arg(long, env = "ECHOLINK_REPLY_TIMEOUT_MS")]
    reply_timeout_ms: Option<u64>,
}

impl From<ConnectConfig> for ClientConfig {
    fn from(config: ConnectConfig) -> Self {
        Self {
            endpoint: Endpoint::new(config.host, config.port),
            connect_timeout: Duration::from_millis(config.timeout_ms),
            reply_timeout: config.reply_timeout_ms.map(Duration::from_millis),
        }
    }
}
