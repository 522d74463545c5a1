//! Command-line interface for streamscribe
//!
//! Provides argument parsing using clap derive macros.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Streaming speech transcription worker
#[derive(Parser, Debug)]
#[command(
    name = "streamscribe",
    version,
    about = "Streaming speech transcription worker"
)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Suppress status output (quiet mode)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose logging (-v: info, -vv: debug, -vvv: trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Whisper model name (overrides config)
    #[arg(long, global = true, value_name = "MODEL")]
    pub model: Option<String>,

    /// Language code for transcription. Examples: auto, en, de
    #[arg(long, global = true, value_name = "LANG")]
    pub language: Option<String>,

    /// Prevent automatic model download if the configured model is missing
    #[arg(long, global = true)]
    pub no_download: bool,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Transcribe a WAV file in-process and print worker messages
    Transcribe {
        /// WAV file to transcribe ("-" reads stdin)
        wav: PathBuf,

        /// Human-readable output instead of JSON lines
        #[arg(long)]
        pretty: bool,
    },

    /// Host the worker on a Unix socket
    Serve {
        /// Path to Unix socket (default: $XDG_RUNTIME_DIR/streamscribe.sock)
        #[arg(long, value_name = "PATH")]
        socket: Option<PathBuf>,
    },

    /// Send a WAV file to a running worker host
    Send {
        /// WAV file to transcribe ("-" reads stdin)
        wav: PathBuf,

        /// Path to Unix socket (default: $XDG_RUNTIME_DIR/streamscribe.sock)
        #[arg(long, value_name = "PATH")]
        socket: Option<PathBuf>,

        /// Human-readable output instead of JSON lines
        #[arg(long)]
        pretty: bool,
    },

    /// Manage Whisper models
    Models {
        /// Action to perform
        #[command(subcommand)]
        action: ModelsAction,
    },
}

/// Model management actions
#[derive(Subcommand, Debug)]
pub enum ModelsAction {
    /// List available models
    List,
    /// Download and install a model
    Install {
        /// Model name (e.g., base.en, small.en, tiny)
        name: String,
    },
}
