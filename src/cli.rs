use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Force-directed graph layout engine.
#[derive(Parser, Debug)]
#[command(name = "graphforce")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Lay out a graph document until it settles
    Run {
        /// Graph document (.json, .yaml, .yml)
        #[arg(short, long)]
        input: PathBuf,

        /// Settings file; overrides settings embedded in the document
        #[arg(short, long)]
        settings: Option<PathBuf>,

        /// Step on a background worker instead of inline
        #[arg(long)]
        offload: bool,

        /// Give up after this many steps
        #[arg(long, default_value = "20000")]
        max_steps: usize,

        /// Write final positions here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Speak the worker protocol as JSON lines on stdin/stdout
    Worker,
}
