//! Daemon configuration: defaults, optional TOML file, CLI overrides.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cli::DaemonOpts;
use crate::protocol::MAX_FRAME_SIZE;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (host:port)
    pub bind: String,
    /// Directory holding the served files
    pub root: PathBuf,
    /// Largest frame payload accepted or sent
    pub max_frame_size: usize,
    /// Close connections idle this long; `None` keeps them open
    pub idle_timeout_secs: Option<u64>,
    /// Create sample files on startup
    pub seed_samples: bool,
    /// Transfer audit log
    pub log_file: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:5000".to_string(),
            root: PathBuf::from("server_files"),
            max_frame_size: MAX_FRAME_SIZE,
            idle_timeout_secs: None,
            seed_samples: false,
            log_file: None,
        }
    }
}

impl ServerConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        let cfg: ServerConfig =
            toml::from_str(&data).with_context(|| format!("parse config {}", path.display()))?;
        Ok(cfg)
    }

    /// Config file (if any) with command-line flags applied on top.
    pub fn from_opts(opts: &DaemonOpts) -> Result<Self> {
        let mut cfg = match &opts.config {
            Some(p) => Self::load(p)?,
            None => Self::default(),
        };
        cfg.apply(opts);
        Ok(cfg)
    }

    pub fn apply(&mut self, opts: &DaemonOpts) {
        if let Some(bind) = &opts.bind {
            self.bind = bind.clone();
        }
        if let Some(root) = &opts.root {
            self.root = root.clone();
        }
        if let Some(max) = opts.max_frame_size {
            self.max_frame_size = max;
        }
        if opts.idle_timeout_secs.is_some() {
            self.idle_timeout_secs = opts.idle_timeout_secs;
        }
        if opts.seed_samples {
            self.seed_samples = true;
        }
        if opts.log_file.is_some() {
            self.log_file = opts.log_file.clone();
        }
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_secs
            .filter(|s| *s > 0)
            .map(Duration::from_secs)
    }
}
