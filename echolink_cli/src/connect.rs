// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! The connector process

use std::future::Future;
use std::process::ExitCode;

use echolink::{ClientConfig, RunEnd};
use tokio::io::{AsyncBufRead, AsyncWrite, BufReader};

use crate::config::ConnectConfig;

/// Connect and exchange stdin lines until 'quit', end of input or Ctrl-C, which all exit 0.
/// Failing to connect, a communication error or the server hanging up exit non-zero.
pub async fn run(config: ConnectConfig) -> ExitCode {
    let stdin = BufReader::new(tokio::io::stdin());
    let mut stdout = tokio::io::stdout();
    converse(
        ClientConfig::from(config),
        stdin,
        &mut stdout,
        tokio::signal::ctrl_c(),
    )
    .await
}

/// Connect as configured and drive the exchange loop over `input` and `output`. `interrupt`
/// resolving at any point, while connecting included, ends the process successfully.
async fn converse<I, O, F>(config: ClientConfig, input: I, output: &mut O, interrupt: F) -> ExitCode
where
    I: AsyncBufRead + Unpin,
    O: AsyncWrite + Unpin,
    F: Future,
{
    tokio::pin!(interrupt);

    let connected = tokio::select! {
        biased;
        _ = &mut interrupt => {
            tracing::warn!("Program interrupted by user");
            return ExitCode::SUCCESS;
        }
        connected = config.connect() => connected,
    };
    let mut connector = match connected {
        Ok(connector) => connector,
        Err(err) => {
            tracing::error!("Failed to connect to {}: {err}", config.endpoint);
            return ExitCode::FAILURE;
        }
    };
    let peer_addr = connector.peer_addr();

    let code = tokio::select! {
        outcome = connector.run(input, output) => match outcome {
            Ok(summary) => {
                tracing::info!("Exchanged {} message(s) with {peer_addr}", summary.exchanged);
                match summary.end {
                    RunEnd::Quit | RunEnd::EndOfInput => ExitCode::SUCCESS,
                    RunEnd::PeerClosed => ExitCode::FAILURE,
                }
            }
            Err(err) => {
                tracing::error!("Communication error with {peer_addr}: {err}");
                ExitCode::FAILURE
            }
        },
        _ = &mut interrupt => {
            tracing::warn!("Program interrupted by user");
            ExitCode::SUCCESS
        }
    };

    connector.close().await;
    code
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use echolink::Endpoint;
    use tokio::net::{TcpListener, TcpSocket};

    use super::*;

    fn config_for(endpoint: Endpoint, connect_timeout: Duration) -> ClientConfig {
        ClientConfig {
            endpoint,
            connect_timeout,
            reply_timeout: None,
        }
    }

    #[tokio::test]
    async fn interrupt_while_connecting_exits_cleanly() {
        // a listener that never accepts, so the connect attempt is still pending
        let socket = TcpSocket::new_v4().unwrap();
        socket.bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let listener = socket.listen(1).unwrap();
        let addr = listener.local_addr().unwrap();
        let endpoint = Endpoint::from(addr);
        let mut held = Vec::new();
        for _ in 0..16 {
            match tokio::time::timeout(
                Duration::from_millis(250),
                tokio::net::TcpStream::connect(addr),
            )
            .await
            {
                Ok(stream) => held.push(stream.unwrap()),
                Err(_) => break,
            }
        }

        let started = tokio::time::Instant::now();
        let code = converse(
            config_for(endpoint, Duration::from_secs(10)),
            &b"never sent\n"[..],
            &mut tokio::io::sink(),
            tokio::time::sleep(Duration::from_millis(100)),
        )
        .await;
        assert_eq!(code, ExitCode::SUCCESS);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn interrupt_wins_over_a_failing_connect() {
        let code = converse(
            config_for(Endpoint::new("127.0.0.1", 1), Duration::from_secs(2)),
            &b""[..],
            &mut tokio::io::sink(),
            std::future::ready(()),
        )
        .await;
        assert_eq!(code, ExitCode::SUCCESS);
    }

    #[tokio::test]
    async fn refused_connection_exits_with_failure() {
        let code = converse(
            config_for(Endpoint::new("127.0.0.1", 1), Duration::from_secs(2)),
            &b""[..],
            &mut tokio::io::sink(),
            std::future::pending::<()>(),
        )
        .await;
        assert_eq!(code, ExitCode::FAILURE);
    }

    #[tokio::test]
    async fn quit_exits_with_success() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = Endpoint::from(listener.local_addr().unwrap());
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            stream
        });

        let code = converse(
            config_for(endpoint, Duration::from_secs(2)),
            &b"quit\n"[..],
            &mut tokio::io::sink(),
            std::future::pending::<()>(),
        )
        .await;
        assert_eq!(code, ExitCode::SUCCESS);
        drop(server.await.unwrap());
    }
}
