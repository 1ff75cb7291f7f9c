//! Session configuration
//!
//! Timeouts, polling cadence and pipe locations for an editor session.
//! Stored as JSON; missing fields fall back to defaults.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PubliCastError, Result};
use crate::retry::RetryPolicy;

/// Line terminator expected by the scripting pipe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Eol {
    /// `\n`
    Lf,
    /// `\r\n\0`
    CrLfNul,
}

impl Eol {
    /// Terminator used by the editor on the current platform
    pub fn platform_default() -> Self {
        if cfg!(windows) {
            Eol::CrLfNul
        } else {
            Eol::Lf
        }
    }

    pub fn as_bytes(&self) -> &'static [u8] {
        match self {
            Eol::Lf => b"\n",
            Eol::CrLfNul => b"\r\n\0",
        }
    }
}

/// Configuration for discovering, connecting to and talking with the editor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// How long `run_command` waits for a response
    pub command_timeout_ms: u64,
    /// How long discovery polls for endpoints
    pub discovery_timeout_ms: u64,
    /// Cadence of "still waiting" progress lines during discovery
    pub progress_log_every_ms: u64,
    /// Idle delay between reader polls when the pipe had nothing to read
    pub reader_idle_ms: u64,
    /// Bound on how long closing waits for the reader thread
    pub reader_join_timeout_ms: u64,
    /// Maximum bytes consumed by one read
    pub read_chunk_size: usize,
    /// Directory holding the pipes (platform default when unset)
    pub pipe_dir: Option<PathBuf>,
    /// Spacing of discovery polls and retries of each endpoint open
    pub retry: RetryPolicy,
    /// Override of the platform line terminator
    pub eol: Option<Eol>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            command_timeout_ms: 5000,
            discovery_timeout_ms: 30_000,
            progress_log_every_ms: 5000,
            reader_idle_ms: 20,
            reader_join_timeout_ms: 1000,
            read_chunk_size: 4096,
            pipe_dir: None,
            retry: RetryPolicy::default(),
            eol: None,
        }
    }
}

impl SessionConfig {
    /// Load a config file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(PubliCastError::FileNotFound {
                path: path.display().to_string(),
            });
        }
        let contents = std::fs::read_to_string(path)?;
        let config = serde_json::from_str(&contents)?;
        Ok(config)
    }

    /// Write the config as pretty JSON, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Defaults overlaid with `PUBLICAST_*` environment variables
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Apply `PUBLICAST_PIPE_DIR`, `PUBLICAST_COMMAND_TIMEOUT_MS` and
    /// `PUBLICAST_DISCOVERY_TIMEOUT_MS` when set and parseable
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(dir) = env::var("PUBLICAST_PIPE_DIR") {
            if !dir.is_empty() {
                self.pipe_dir = Some(PathBuf::from(dir));
            }
        }
        if let Some(ms) = env::var("PUBLICAST_COMMAND_TIMEOUT_MS")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            self.command_timeout_ms = ms;
        }
        if let Some(ms) = env::var("PUBLICAST_DISCOVERY_TIMEOUT_MS")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            self.discovery_timeout_ms = ms;
        }
        self
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }

    pub fn reader_idle(&self) -> Duration {
        Duration::from_millis(self.reader_idle_ms)
    }

    pub fn reader_join_timeout(&self) -> Duration {
        Duration::from_millis(self.reader_join_timeout_ms)
    }

    /// Effective line terminator
    pub fn eol(&self) -> Eol {
        self.eol.unwrap_or_else(Eol::platform_default)
    }
}
