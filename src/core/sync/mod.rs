//! Directional replication between the high and the low side.
//!
//! "Local" is always the high side and "remote" the low side. The low side
//! is reached either through the local filesystem or over SSH.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::error::{Error, Result};
use crate::util;

pub mod command;
pub mod engine;
pub mod progress;
pub mod summary;

pub use command::SyncCommand;
pub use engine::{CommandExecutor, CommandOutput, ProcessExecutor, SyncEngine, SyncResult};

pub const SYNC_CONFIG_FILENAME: &str = "high_side_sync_config.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncDirection {
    LocalToRemote,
    RemoteToLocal,
}

impl fmt::Display for SyncDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SyncDirection::LocalToRemote => "local_to_remote",
            SyncDirection::RemoteToLocal => "remote_to_local",
        })
    }
}

fn default_true() -> bool {
    true
}

/// One transfer rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncEntry {
    pub local_dir: PathBuf,
    pub remote_dir: PathBuf,
    pub direction: SyncDirection,
    #[serde(default = "default_true")]
    pub ignore_existing: bool,
    #[serde(default)]
    pub excludes: Vec<String>,
}

impl SyncEntry {
    pub fn new(
        local_dir: impl Into<PathBuf>,
        remote_dir: impl Into<PathBuf>,
        direction: SyncDirection,
        ignore_existing: bool,
    ) -> Self {
        Self {
            local_dir: local_dir.into(),
            remote_dir: remote_dir.into(),
            direction,
            ignore_existing,
            excludes: Vec::new(),
        }
    }

    pub fn exclude(mut self, pattern: impl Into<String>) -> Self {
        self.excludes.push(pattern.into());
        self
    }
}

fn default_ssh_port() -> u16 {
    22
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshConnection {
    pub host: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    pub user: String,
    #[serde(default)]
    pub ssh_key_path: Option<PathBuf>,
}

impl SshConnection {
    pub fn new(host: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: default_ssh_port(),
            user: user.into(),
            ssh_key_path: None,
        }
    }

    pub fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }

    /// `ssh -p <port> [-i <key>]`, without the destination.
    pub fn ssh_argv(&self) -> Vec<String> {
        let mut argv = vec!["ssh".to_string(), "-p".to_string(), self.port.to_string()];
        if let Some(key) = &self.ssh_key_path {
            argv.push("-i".to_string());
            argv.push(key.to_string_lossy().to_string());
        }
        argv
    }

    /// Runs `remote_argv` on the remote host through ssh.
    pub fn remote_command(&self, remote_argv: &[String]) -> SyncCommand {
        let mut argv = self.ssh_argv();
        let program = argv.remove(0);
        argv.push(self.destination());
        argv.push(shell_words::join(remote_argv));
        SyncCommand::new(program, argv)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Connection {
    /// The low side root is reachable as a local path.
    #[default]
    Local,
    Ssh(SshConnection),
}

impl Connection {
    pub fn is_local(&self) -> bool {
        matches!(self, Connection::Local)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    pub high_side_name: String,
    pub high_root: PathBuf,
    pub low_root: PathBuf,
    #[serde(default)]
    pub connection: Connection,
    #[serde(default)]
    pub entries: Vec<SyncEntry>,
}

impl SyncConfig {
    pub fn new(
        high_side_name: impl Into<String>,
        high_root: impl Into<PathBuf>,
        low_root: impl Into<PathBuf>,
        connection: Connection,
    ) -> Self {
        Self {
            high_side_name: high_side_name.into(),
            high_root: high_root.into(),
            low_root: low_root.into(),
            connection,
            entries: Vec::new(),
        }
    }

    pub fn path(high_root: &Path) -> PathBuf {
        high_root.join(SYNC_CONFIG_FILENAME)
    }

    pub fn save(&self) -> Result<()> {
        util::write_json(&Self::path(&self.high_root), self)
    }

    pub fn load(high_root: &Path) -> Result<Self> {
        let path = Self::path(high_root);
        if !path.is_file() {
            return Err(Error::config(format!(
                "high side sync config not found at {}; connect to a low side first",
                path.display()
            )));
        }
        util::read_json(&path)
    }

    /// Maps a path under the high root to the same place under the low root.
    pub fn mirror(&self, high_path: &Path) -> Result<PathBuf> {
        let relative = high_path.strip_prefix(&self.high_root).map_err(|_| {
            Error::config(format!(
                "{} is outside the high side root {}",
                high_path.display(),
                self.high_root.display()
            ))
        })?;
        Ok(self.low_root.join(relative))
    }

    /// Adds `entry` unless an identical rule is already present.
    pub fn add_entry(&mut self, entry: SyncEntry) -> bool {
        if self.entries.contains(&entry) {
            return false;
        }
        self.entries.push(entry);
        true
    }

    /// Commands for every entry, optionally only those moving in `direction`.
    pub fn commands(&self, direction: Option<SyncDirection>) -> Vec<SyncCommand> {
        self.entries
            .iter()
            .filter(|entry| direction.map_or(true, |d| entry.direction == d))
            .map(|entry| SyncCommand::from_entry(entry, &self.connection))
            .collect()
    }
}
