// src/cli.rs

use crate::core::runnable::Runnable;
use crate::system::redirect::{Capture, StreamMask};
use clap::Parser;
use std::path::PathBuf;

/// runchain: run command lines with scoped environments and directories.
///
/// Each positional argument is a command text. Multi-line texts run one
/// statement per line; leading `KEY=VALUE` words are per-command overrides.
///
/// Examples:
/// - `runchain "echo A" "echo B"`
/// - `runchain --with GREETING=hi --shell 'echo $GREETING'`
/// - `runchain --at /tmp --capture "ls -la"`
#[derive(Parser, Debug, Default)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Command texts, run in order.
    #[arg(required = true)]
    pub commands: Vec<String>,

    /// Combine `KEY=VALUE` into the environment of every command.
    #[arg(long = "with", value_name = "KEY=VALUE")]
    pub with: Vec<String>,

    /// Working directory for the commands. The runner's own directory is not changed.
    #[arg(long, value_name = "DIR")]
    pub at: Option<PathBuf>,

    /// Change the runner's working directory while the commands run.
    #[arg(long = "in", value_name = "DIR")]
    pub in_dir: Option<PathBuf>,

    /// Treat each command text as a shell script.
    #[arg(long, conflicts_with = "background")]
    pub shell: bool,

    /// Shell binary for `--shell`. Defaults to the configured shell.
    #[arg(long, value_name = "BIN", requires = "shell")]
    pub shell_bin: Option<String>,

    /// Start the commands in the background, then wait for all of them.
    #[arg(long)]
    pub background: bool,

    /// Runner configuration file.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Capture stdout and stderr and print them once the run is over.
    #[arg(long)]
    pub capture: bool,
}

/// Buffers filled when `--capture` is given.
#[derive(Debug, Clone, Default)]
pub struct Captured {
    pub stdout: Capture,
    pub stderr: Capture,
}

impl Cli {
    /// Builds the chain described by the arguments.
    pub fn build_chain(&self) -> (Runnable, Option<Captured>) {
        let mut chain = Runnable::Empty;
        for command in &self.commands {
            chain = if self.shell {
                match &self.shell_bin {
                    Some(bin) => chain.shell([bin.clone(), command.clone()]),
                    None => chain.shell([command.clone()]),
                }
            } else if self.background {
                chain.start(command.clone())
            } else {
                chain.call(command.clone())
            };
        }

        if !self.with.is_empty() {
            chain = chain.with(self.with.iter().cloned());
        }
        if let Some(dir) = &self.at {
            chain = chain.at(dir.clone());
        }
        if let Some(dir) = &self.in_dir {
            chain = chain.in_dir(dir.clone());
        }

        if !self.capture {
            return (chain, None);
        }
        let captured = Captured::default();
        let chain = chain
            .pipe(StreamMask::STDOUT, &captured.stdout)
            .pipe(StreamMask::STDERR, &captured.stderr);
        (chain, Some(captured))
    }
}
