// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

use std::io::stderr;
use std::io::IsTerminal;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::Registry;

mod config;
mod connect;
mod listen;

#[derive(Debug, clap::Subcommand)]
enum Command {
    /// Bind, listen and acknowledge every message of every client until interrupted
    Listen(config::ListenConfig),
    /// Connect to a listener and exchange the lines typed on stdin until 'quit'
    Connect(config::ConnectConfig),
}

/// Listener and connector of the echolink text exchange
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Set the logging level based on the set of filter directives.
    ///
    /// Normal logging levels are supported (e.g. trace, debug, info, warn,
    /// error), but it's possible to set verbosity for specific spans and
    /// events.
    #[clap(short, long, default_value = "info", use_value_delimiter = true, global = true)]
    log: Vec<Directive>,
}

// MAIN //
fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();
    init_logging(args.log);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()?;

    let code = runtime.block_on(async move {
        match args.command {
            Command::Listen(config) => listen::run(config).await,
            Command::Connect(config) => connect::run(config).await,
        }
    });

    // a pending stdin read parks a blocking thread which would otherwise hold the exit up
    runtime.shutdown_timeout(Duration::from_millis(100));
    Ok(code)
}

fn init_logging(directives: Vec<Directive>) {
    let fmt = tracing_subscriber::fmt::Layer::default()
        .with_ansi(stderr().is_terminal())
        .with_writer(std::io::stderr);

    let filter = directives
        .into_iter()
        .fold(EnvFilter::from_default_env(), |filter, directive| {
            filter.add_directive(directive)
        });

    let subscriber = Registry::default().with(filter).with(fmt);
    tracing::subscriber::set_global_default(subscriber).expect("to set global subscriber");
}
