use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub const DATASETS_FOLDER: &str = "syft_datasets";
pub const RUNTIMES_FOLDER: &str = "syft_runtimes";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    High,
    Low,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Side::High => "high",
            Side::Low => "low",
        })
    }
}

/// One side's storage root, seen as `principal`.
///
/// ```text
/// <root>/datasites/<owner>/public/syft_datasets/<name>/   mock data + dataset.yaml
/// <root>/private/<owner>/syft_datasets/<name>/            private data (high side only)
/// <root>/private/<owner>/syft_runtimes/<runtime>/         job queue
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    pub root: PathBuf,
    pub principal: String,
    pub side: Side,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>, principal: impl Into<String>, side: Side) -> Self {
        Self {
            root: root.into(),
            principal: principal.into(),
            side,
        }
    }

    pub fn high(root: impl Into<PathBuf>, principal: impl Into<String>) -> Self {
        Self::new(root, principal, Side::High)
    }

    pub fn low(root: impl Into<PathBuf>, principal: impl Into<String>) -> Self {
        Self::new(root, principal, Side::Low)
    }

    pub fn datasites_dir(&self) -> PathBuf {
        self.root.join("datasites")
    }

    pub fn public_datasets_dir(&self, owner: &str) -> PathBuf {
        self.datasites_dir().join(owner).join("public").join(DATASETS_FOLDER)
    }

    pub fn private_datasets_dir(&self, owner: &str) -> PathBuf {
        self.root.join("private").join(owner).join(DATASETS_FOLDER)
    }

    pub fn runtimes_dir(&self) -> PathBuf {
        self.root.join("private").join(&self.principal).join(RUNTIMES_FOLDER)
    }

    pub fn runtime_dir(&self, runtime_name: &str) -> PathBuf {
        self.runtimes_dir().join(runtime_name)
    }

    /// `path` relative to the root, when it lives under it.
    pub fn relative<'a>(&self, path: &'a Path) -> Option<&'a Path> {
        path.strip_prefix(&self.root).ok()
    }
}
