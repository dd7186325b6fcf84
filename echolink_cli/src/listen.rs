// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! The listener process

use std::process::ExitCode;

use echolink::ServerConfig;

use crate::config::ListenConfig;

/// Serve until Ctrl-C. Non-zero exit if the socket cannot be bound or the listener dies.
pub async fn run(config: ListenConfig) -> ExitCode {
    let config = ServerConfig::from(config);
    let (server, mut handle) = match echolink::start(&config).await {
        Ok(server) => server,
        Err(err) => {
            tracing::error!("Failed to create server on {}: {err}", config.endpoint);
            return ExitCode::FAILURE;
        }
    };

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            if let Err(err) = signal {
                tracing::error!("Failed to listen for the interrupt signal: {err}");
            }
            tracing::warn!("Server shutdown initiated...");
            server.stop(Some("interrupted".to_string()));
            if let Err(err) = (&mut handle).await {
                tracing::error!("Server exited abnormally: {err}");
                return ExitCode::FAILURE;
            }
            tracing::info!("Server shutdown complete");
            ExitCode::SUCCESS
        }
        exited = &mut handle => {
            // the server only stops by itself when its listener is gone
            match exited {
                Ok(()) => tracing::error!("Server stopped accepting connections"),
                Err(err) => tracing::error!("Server exited abnormally: {err}"),
            }
            ExitCode::FAILURE
        }
    }
}
