//! # skiff: single-service deployment CLI
//!
//! Plans, applies and tears down the stack that runs one container image
//! behind a load balancer and a public HTTP gateway.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

mod commands;
mod output;

use clap::Parser;

use crate::commands::Cli;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(cli.global.log_json);
    commands::execute(cli)
}

/// Logs go to stderr in both formats; stdout carries command output only.
fn init_logging(json: bool) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
