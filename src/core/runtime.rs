use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::core::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeKind {
    Interpreter,
    Container,
    Cluster,
}

impl RuntimeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RuntimeKind::Interpreter => "interpreter",
            RuntimeKind::Container => "container",
            RuntimeKind::Cluster => "cluster",
        }
    }
}

impl fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterpreterConfig {
    pub cmd: Vec<String>,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MountMode {
    #[default]
    Ro,
    Rw,
}

impl MountMode {
    pub fn as_str(self) -> &'static str {
        match self {
            MountMode::Ro => "ro",
            MountMode::Rw => "rw",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerMount {
    pub source: PathBuf,
    pub target: PathBuf,
    #[serde(default)]
    pub mode: MountMode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerConfig {
    pub dockerfile_content: String,
    #[serde(default)]
    pub image_name: Option<String>,
    #[serde(default = "default_container_cmd")]
    pub cmd: Vec<String>,
    /// Selects a registered mount provider.
    #[serde(default)]
    pub app_name: Option<String>,
    #[serde(default)]
    pub extra_mounts: Vec<ContainerMount>,
}

fn default_container_cmd() -> Vec<String> {
    vec!["python".to_string()]
}

impl ContainerConfig {
    pub fn from_dockerfile_content(content: &str) -> Result<Self> {
        let content = content.trim();
        if content.is_empty() {
            return Err(Error::Validation {
                message: "Dockerfile cannot be empty".to_string(),
            });
        }
        Ok(Self {
            dockerfile_content: content.to_string(),
            image_name: None,
            cmd: default_container_cmd(),
            app_name: None,
            extra_mounts: Vec::new(),
        })
    }

    pub fn from_dockerfile(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::PathNotFound {
                what: "Dockerfile",
                path: path.to_path_buf(),
            });
        }
        let content = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Self::from_dockerfile_content(&content)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub image: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default = "default_workers")]
    pub num_workers: u32,
    #[serde(default)]
    pub cmd: Vec<String>,
}

fn default_namespace() -> String {
    "highlow".to_string()
}

fn default_workers() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuntimeConfig {
    Interpreter(InterpreterConfig),
    Container(ContainerConfig),
    Cluster(ClusterConfig),
}

impl RuntimeConfig {
    pub fn interpreter(cmd: Vec<String>) -> Self {
        RuntimeConfig::Interpreter(InterpreterConfig { cmd, version: None })
    }

    pub fn kind(&self) -> RuntimeKind {
        match self {
            RuntimeConfig::Interpreter(_) => RuntimeKind::Interpreter,
            RuntimeConfig::Container(_) => RuntimeKind::Container,
            RuntimeConfig::Cluster(_) => RuntimeKind::Cluster,
        }
    }

    pub fn cmd(&self) -> &[String] {
        match self {
            RuntimeConfig::Interpreter(config) => &config.cmd,
            RuntimeConfig::Container(config) => &config.cmd,
            RuntimeConfig::Cluster(config) => &config.cmd,
        }
    }

    /// `{kind}_{6 hex chars}` derived from the sorted JSON form of the config.
    pub fn derived_name(&self) -> String {
        // `Value` objects are BTreeMaps, so keys serialize in sorted order.
        let canonical = serde_json::to_value(self)
            .map(|value| value.to_string())
            .unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        format!("{}_{}", self.kind(), &digest[..6])
    }
}

/// Immutable execution profile referenced by jobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Runtime {
    pub name: String,
    pub config: RuntimeConfig,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Runtime {
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            name: config.derived_name(),
            config,
            description: None,
            tags: Vec::new(),
        }
    }

    pub fn named(name: impl Into<String>, config: RuntimeConfig) -> Self {
        Self {
            name: name.into(),
            config,
            description: None,
            tags: Vec::new(),
        }
    }

    pub fn kind(&self) -> RuntimeKind {
        self.config.kind()
    }

    pub fn cmd(&self) -> &[String] {
        self.config.cmd()
    }
}
