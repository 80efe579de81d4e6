use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::error::{Error, Result};
use crate::core::workspace::{Side, Workspace};
use crate::util;

pub const METADATA_FILENAME: &str = "dataset.yaml";

/// Public description of a dataset, stored next to its mock data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dataset {
    pub name: String,
    pub owner: String,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// README file name inside the mock folder.
    #[serde(default)]
    pub readme: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Resolves a dataset name to the directory a job should read.
pub trait DatasetResolver {
    fn resolve_data_dir(&self, dataset_name: &str) -> Result<PathBuf>;
}

#[derive(Debug, Clone)]
pub struct NewDataset<'a> {
    pub name: &'a str,
    pub mock_path: &'a Path,
    pub private_path: &'a Path,
    pub summary: Option<String>,
    pub readme_path: Option<&'a Path>,
    pub tags: Vec<String>,
}

pub struct DatasetStore<'a> {
    workspace: &'a Workspace,
}

impl<'a> DatasetStore<'a> {
    pub fn new(workspace: &'a Workspace) -> Self {
        Self { workspace }
    }

    pub fn mock_dir(&self, name: &str, owner: &str) -> PathBuf {
        self.workspace.public_datasets_dir(owner).join(name)
    }

    /// Private data location. Only the owner, on the high side, may resolve it.
    pub fn private_dir(&self, dataset: &Dataset) -> Result<PathBuf> {
        if self.workspace.side == Side::Low {
            return Err(Error::PermissionDenied {
                message: format!(
                    "private data of dataset '{}' is not reachable from the low side",
                    dataset.name
                ),
            });
        }
        if dataset.owner != self.workspace.principal {
            return Err(Error::PermissionDenied {
                message: format!(
                    "{} cannot access private data of dataset '{}' owned by {}",
                    self.workspace.principal, dataset.name, dataset.owner
                ),
            });
        }
        Ok(self
            .workspace
            .private_datasets_dir(&dataset.owner)
            .join(&dataset.name))
    }

    pub fn create(&self, new: NewDataset<'_>) -> Result<Dataset> {
        if new.name.trim().is_empty() || new.name.contains(['/', '\\']) {
            return Err(Error::Validation {
                message: format!("invalid dataset name '{}'", new.name),
            });
        }
        if self.workspace.side == Side::Low {
            return Err(Error::PermissionDenied {
                message: "datasets can only be created on the high side".to_string(),
            });
        }

        let owner = self.workspace.principal.clone();
        let mock_dir = self.mock_dir(new.name, &owner);
        let private_dir = self.workspace.private_datasets_dir(&owner).join(new.name);

        if !new.mock_path.exists() {
            return Err(Error::PathNotFound {
                what: "mock data",
                path: new.mock_path.to_path_buf(),
            });
        }
        if !new.private_path.exists() {
            return Err(Error::PathNotFound {
                what: "private data",
                path: new.private_path.to_path_buf(),
            });
        }
        if new.mock_path.join(METADATA_FILENAME).exists() {
            return Err(Error::Validation {
                message: format!(
                    "mock data at {} contains the reserved file {METADATA_FILENAME}",
                    new.mock_path.display()
                ),
            });
        }
        for dir in [&mock_dir, &private_dir] {
            if !is_empty_dir(dir)? {
                return Err(Error::AlreadyExists { path: dir.clone() });
            }
        }

        copy_into(new.mock_path, &mock_dir)?;
        copy_into(new.private_path, &private_dir)?;

        let readme = match new.readme_path {
            Some(readme) => {
                let is_markdown = readme
                    .extension()
                    .map(|ext| ext.eq_ignore_ascii_case("md"))
                    .unwrap_or(false);
                if !readme.is_file() || !is_markdown {
                    return Err(Error::Validation {
                        message: format!("README {} must be an existing .md file", readme.display()),
                    });
                }
                copy_into(readme, &mock_dir)?;
                readme.file_name().map(|name| name.to_string_lossy().to_string())
            }
            None => None,
        };

        let dataset = Dataset {
            name: new.name.to_string(),
            owner,
            summary: new.summary,
            tags: new.tags,
            readme,
            created_at: Utc::now(),
        };
        util::write_yaml(&mock_dir.join(METADATA_FILENAME), &dataset)?;
        tracing::info!(dataset = %dataset.name, mock = %mock_dir.display(), "dataset created");
        Ok(dataset)
    }

    /// Looks a dataset up by name; `owner` defaults to the workspace principal.
    pub fn get(&self, name: &str, owner: Option<&str>) -> Result<Dataset> {
        let owner = owner.unwrap_or(&self.workspace.principal);
        let metadata = self.mock_dir(name, owner).join(METADATA_FILENAME);
        if !metadata.is_file() {
            return Err(Error::DatasetNotFound {
                name: name.to_string(),
            });
        }
        util::read_yaml(&metadata)
    }

    /// All datasets visible under `owner`, or under every datasite.
    pub fn list(&self, owner: Option<&str>) -> Result<Vec<Dataset>> {
        let owners = match owner {
            Some(owner) => vec![owner.to_string()],
            None => child_names(&self.workspace.datasites_dir())?,
        };

        let mut datasets = Vec::new();
        for owner in owners {
            for name in child_names(&self.workspace.public_datasets_dir(&owner))? {
                match self.get(&name, Some(&owner)) {
                    Ok(dataset) => datasets.push(dataset),
                    Err(Error::DatasetNotFound { .. }) => {
                        tracing::debug!(owner = %owner, name = %name, "folder without dataset metadata");
                    }
                    Err(err) => {
                        tracing::warn!(owner = %owner, name = %name, error = %err, "unreadable dataset metadata");
                    }
                }
            }
        }
        datasets.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(datasets)
    }

    pub fn readme(&self, dataset: &Dataset) -> Result<Option<String>> {
        let Some(readme) = &dataset.readme else {
            return Ok(None);
        };
        let path = self.mock_dir(&dataset.name, &dataset.owner).join(readme);
        fs::read_to_string(&path).map(Some).map_err(|e| Error::io(&path, e))
    }
}

impl DatasetResolver for DatasetStore<'_> {
    fn resolve_data_dir(&self, dataset_name: &str) -> Result<PathBuf> {
        let dataset = self.get(dataset_name, None)?;
        self.private_dir(&dataset)
    }
}

fn is_empty_dir(dir: &Path) -> Result<bool> {
    if !dir.exists() {
        return Ok(true);
    }
    let mut entries = fs::read_dir(dir).map_err(|e| Error::io(dir, e))?;
    Ok(entries.next().is_none())
}

/// Copies a file into `dst`, or a directory's contents into `dst`.
fn copy_into(src: &Path, dst: &Path) -> Result<()> {
    if src.is_dir() {
        return util::copy_dir_all(src, dst);
    }
    util::ensure_dir(dst)?;
    let file_name = src.file_name().ok_or_else(|| Error::Validation {
        message: format!("{} has no file name", src.display()),
    })?;
    let target = dst.join(file_name);
    fs::copy(src, &target).map_err(|e| Error::io(src, e))?;
    Ok(())
}

fn child_names(dir: &Path) -> Result<Vec<String>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut names = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| Error::io(dir, e))? {
        let entry = entry.map_err(|e| Error::io(dir, e))?;
        if entry.path().is_dir() {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
    }
    names.sort();
    Ok(names)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn create_dataset(workspace: &Workspace, name: &str) -> Dataset {
        let src = workspace.root.join("src").join(name);
        fs::create_dir_all(src.join("mock")).unwrap();
        fs::create_dir_all(src.join("private")).unwrap();
        fs::write(src.join("mock/data.csv"), "x\n1\n").unwrap();
        fs::write(src.join("private/data.csv"), "x\n42\n").unwrap();
        DatasetStore::new(workspace)
            .create(NewDataset {
                name,
                mock_path: &src.join("mock"),
                private_path: &src.join("private"),
                summary: Some(format!("{name} dataset")),
                readme_path: None,
                tags: vec![],
            })
            .unwrap()
    }

    #[test]
    fn create_lays_out_mock_and_private_data() {
        let tmp = tempfile::tempdir().unwrap();
        let ws = Workspace::high(tmp.path(), "do@example.org");
        let dataset = create_dataset(&ws, "alpha");
        let store = DatasetStore::new(&ws);

        let mock = store.mock_dir("alpha", "do@example.org");
        assert!(mock.join("data.csv").is_file());
        assert!(mock.join(METADATA_FILENAME).is_file());
        let private = store.private_dir(&dataset).unwrap();
        assert_eq!(fs::read_to_string(private.join("data.csv")).unwrap(), "x\n42\n");
        assert_eq!(store.resolve_data_dir("alpha").unwrap(), private);
        assert_eq!(store.list(None).unwrap(), vec![dataset]);
    }

    #[test]
    fn private_dir_requires_owner_on_high_side() {
        let tmp = tempfile::tempdir().unwrap();
        let ws = Workspace::high(tmp.path(), "do@example.org");
        let dataset = create_dataset(&ws, "alpha");

        let stranger = Workspace::high(tmp.path(), "ds@example.org");
        let err = DatasetStore::new(&stranger).private_dir(&dataset).unwrap_err();
        assert!(matches!(err, Error::PermissionDenied { .. }));

        let low = Workspace::low(tmp.path(), "do@example.org");
        let err = DatasetStore::new(&low).private_dir(&dataset).unwrap_err();
        assert!(matches!(err, Error::PermissionDenied { .. }));
    }

    #[test]
    fn unknown_and_duplicate_datasets() {
        let tmp = tempfile::tempdir().unwrap();
        let ws = Workspace::high(tmp.path(), "do@example.org");
        let store = DatasetStore::new(&ws);
        assert!(matches!(store.get("nope", None), Err(Error::DatasetNotFound { .. })));

        create_dataset(&ws, "alpha");
        let src = tmp.path().join("src/alpha");
        let err = store
            .create(NewDataset {
                name: "alpha",
                mock_path: &src.join("mock"),
                private_path: &src.join("private"),
                summary: None,
                readme_path: None,
                tags: vec![],
            })
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyExists { .. }));
    }
}
