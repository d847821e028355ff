//! Shared CLI helpers and small reusable Clap fragments

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::protocol::DEFAULT_PORT;

/// Daemon options for filexferd. Flags override values from `--config`.
#[derive(Clone, Debug, Default, Parser)]
#[command(name = "filexferd", version, about = "filexfer file transfer daemon")]
pub struct DaemonOpts {
    /// TOML config file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Bind address (host:port)
    #[arg(long)]
    pub bind: Option<String>,

    /// Root directory to serve
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// Largest accepted frame payload, in bytes
    #[arg(long)]
    pub max_frame_size: Option<usize>,

    /// Close connections idle for this many seconds
    #[arg(long = "idle-timeout")]
    pub idle_timeout_secs: Option<u64>,

    /// Create sample files in the root if they are missing
    #[arg(long)]
    pub seed_samples: bool,

    /// Append transfer audit lines to this file
    #[arg(long = "log-file")]
    pub log_file: Option<PathBuf>,
}

/// Client options for filexfer
#[derive(Clone, Debug, Parser)]
#[command(name = "filexfer", version, about = "filexfer client")]
pub struct ClientOpts {
    /// Server host
    #[arg(long, default_value = "localhost")]
    pub host: String,

    /// Server port
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    #[command(subcommand)]
    pub command: Option<ClientCommand>,
}

#[derive(Clone, Debug, Subcommand)]
pub enum ClientCommand {
    /// List files on the server
    List,
    /// Download a file from the server
    Download {
        /// Remote file name
        filename: String,
        /// Local destination (defaults to the remote name)
        local_path: Option<PathBuf>,
    },
    /// Upload a local file to the server
    Upload {
        /// Local file to send
        local_path: PathBuf,
        /// Remote name (defaults to the local file name)
        remote_name: Option<String>,
    },
    /// Show server information
    Info,
    /// Interactive shell (default)
    Shell,
}
