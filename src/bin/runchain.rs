// src/bin/runchain.rs

use anyhow::{Context as _, Result};
use clap::Parser;
use colored::*;
use runchain::cli::Cli;
use runchain::system::config::RunnerConfig;
use runchain::{Context, EnvMap, ProcessRegistry};
use std::io::{self, Write};
use std::sync::Arc;

/// The entry point of the `runchain` binary.
/// Sets up logging, runs the chain and reports any error in one place.
fn main() {
    env_logger::init();

    if let Err(e) = run_cli(Cli::parse()) {
        eprintln!("\n{}: {:#}", "Error".red().bold(), e);
        std::process::exit(1);
    }
}

fn run_cli(cli: Cli) -> Result<()> {
    log::debug!("CLI args parsed: {:?}", cli);

    let ctx = match &cli.config {
        Some(path) => {
            let config = RunnerConfig::load(path)?;
            let registry = Arc::new(ProcessRegistry::new(config.poll_interval()));
            Context::new(EnvMap::from_os(), config).with_registry(registry)
        }
        None => Context::ambient()?,
    };

    let (chain, captured) = cli.build_chain();
    let result = chain.run_with(&ctx);
    if cli.background {
        ctx.registry().wait();
    }

    // Captured output is printed even when the run failed.
    if let Some(captured) = captured {
        io::stdout()
            .write_all(&captured.stdout.to_bytes())
            .context("Could not print captured stdout")?;
        io::stderr()
            .write_all(&captured.stderr.to_bytes())
            .context("Could not print captured stderr")?;
    }

    result?;
    Ok(())
}
