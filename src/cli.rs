// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "skald",
    about = "An AI coding agent runtime with a multiplexing daemon",
    version
)]
pub struct Cli {
    /// Explicit config file (merged over the discovered layers)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Working directory for the session (defaults to the current directory)
    #[arg(long, short = 'C', global = true)]
    pub workdir: Option<PathBuf>,

    /// Pre-authorize a shell command prefix (repeatable)
    #[arg(long = "allow-command", global = true)]
    pub allow_commands: Vec<String>,

    /// Pre-authorize a domain pattern (repeatable)
    #[arg(long = "allow-domain", global = true)]
    pub allow_domains: Vec<String>,

    /// Run the planning sub-agent before the main loop
    #[arg(long, global = true)]
    pub plan: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,

    /// One-shot prompt (when no subcommand is given)
    #[arg(trailing_var_arg = true)]
    pub prompt: Vec<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Manage the long-lived daemon
    Daemon {
        #[command(subcommand)]
        action: DaemonCommands,
    },
    /// Run a single prompt and exit
    Chat {
        /// The prompt text
        prompt: Vec<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum DaemonCommands {
    /// Start the daemon in the foreground
    Start,
    /// Report whether a daemon is running
    Status,
    /// Ask a running daemon to shut down
    Stop,
}
