use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::core::error::{Error, Result};

/// Largest output file `load_output` will read into memory.
pub const MAX_OUTPUT_BYTES: u64 = 10 * 1024 * 1024;

/// A loaded output file, typed by its extension.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputValue {
    Json(Value),
    /// Raw CSV text; parsing is left to the consumer.
    Csv(String),
    /// Raw parquet bytes.
    Parquet(Vec<u8>),
    Text(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputKind {
    Json,
    Csv,
    Parquet,
    Text,
}

fn output_kind(path: &Path) -> Option<OutputKind> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "json" => Some(OutputKind::Json),
        "csv" => Some(OutputKind::Csv),
        "parquet" => Some(OutputKind::Parquet),
        "txt" | "log" | "md" | "html" => Some(OutputKind::Text),
        _ => None,
    }
}

/// Outputs of a batch load. Files with unknown extensions are listed in
/// `unsupported` instead of failing the batch.
#[derive(Debug, Default)]
pub struct LoadedOutputs {
    pub values: BTreeMap<String, OutputValue>,
    pub unsupported: Vec<PathBuf>,
}

/// Read-only view over a finished job's folder in `done/`.
#[derive(Debug, Clone)]
pub struct JobResults {
    results_dir: PathBuf,
}

impl JobResults {
    pub fn new(results_dir: impl Into<PathBuf>) -> Self {
        Self {
            results_dir: results_dir.into(),
        }
    }

    pub fn results_dir(&self) -> &Path {
        &self.results_dir
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.results_dir.join("logs")
    }

    pub fn output_dir(&self) -> PathBuf {
        self.results_dir.join("output")
    }

    /// Contents of `logs/stdout.log`, or `None` when the log is absent.
    pub fn stdout(&self) -> Result<Option<String>> {
        read_optional(&self.logs_dir().join("stdout.log"))
    }

    pub fn stderr(&self) -> Result<Option<String>> {
        read_optional(&self.logs_dir().join("stderr.log"))
    }

    pub fn log_files(&self) -> Result<Vec<PathBuf>> {
        list_files(&self.logs_dir())
    }

    pub fn output_files(&self) -> Result<Vec<PathBuf>> {
        list_files(&self.output_dir())
    }

    /// Loads one file from `output/`, by name relative to it or by path.
    pub fn load_output(&self, file: impl AsRef<Path>) -> Result<OutputValue> {
        let file = file.as_ref();
        let path = if file.is_absolute() {
            file.to_path_buf()
        } else {
            self.output_dir().join(file)
        };

        if !path.is_file() {
            return Err(Error::PathNotFound {
                what: "output file",
                path,
            });
        }
        let kind = output_kind(&path).ok_or_else(|| Error::UnsupportedFileType { path: path.clone() })?;

        let size = fs::metadata(&path).map_err(|e| Error::io(&path, e))?.len();
        if size > MAX_OUTPUT_BYTES {
            return Err(Error::FileTooLarge {
                path,
                max_bytes: MAX_OUTPUT_BYTES,
            });
        }

        let value = match kind {
            OutputKind::Json => {
                let text = fs::read_to_string(&path).map_err(|e| Error::io(&path, e))?;
                OutputValue::Json(serde_json::from_str(&text)?)
            }
            OutputKind::Csv => OutputValue::Csv(fs::read_to_string(&path).map_err(|e| Error::io(&path, e))?),
            OutputKind::Parquet => OutputValue::Parquet(fs::read(&path).map_err(|e| Error::io(&path, e))?),
            OutputKind::Text => OutputValue::Text(fs::read_to_string(&path).map_err(|e| Error::io(&path, e))?),
        };
        Ok(value)
    }

    /// Loads every top-level file in `output/`, keyed by file name.
    pub fn outputs(&self) -> Result<LoadedOutputs> {
        let mut loaded = LoadedOutputs::default();
        for path in self.output_files()? {
            let key = path
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_default();
            match self.load_output(&path) {
                Ok(value) => {
                    loaded.values.insert(key, value);
                }
                Err(Error::UnsupportedFileType { path }) => {
                    tracing::warn!(path = %path.display(), "skipping output with unsupported file type");
                    loaded.unsupported.push(path);
                }
                Err(err) => return Err(err),
            }
        }
        Ok(loaded)
    }
}

fn read_optional(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::io(path, e)),
    }
}

fn list_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| Error::io(dir, e))? {
        let entry = entry.map_err(|e| Error::io(dir, e))?;
        let path = entry.path();
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn results_fixture() -> (tempfile::TempDir, JobResults) {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("done/abc_results");
        fs::create_dir_all(dir.join("logs")).unwrap();
        fs::create_dir_all(dir.join("output")).unwrap();
        fs::write(dir.join("logs/stdout.log"), "Starting job...\nhi\n").unwrap();
        fs::write(dir.join("output/result.json"), r#"{"rows": 3}"#).unwrap();
        fs::write(dir.join("output/table.csv"), "a,b\n1,2\n").unwrap();
        fs::write(dir.join("output/notes.md"), "# done").unwrap();
        fs::write(dir.join("output/model.bin"), [0u8, 1, 2]).unwrap();
        (tmp, JobResults::new(dir))
    }

    #[test]
    fn loads_typed_outputs() {
        let (_tmp, results) = results_fixture();
        assert_eq!(
            results.load_output("result.json").unwrap(),
            OutputValue::Json(serde_json::json!({"rows": 3}))
        );
        assert_eq!(
            results.load_output("table.csv").unwrap(),
            OutputValue::Csv("a,b\n1,2\n".to_string())
        );
        assert!(results.stdout().unwrap().unwrap().contains("hi"));
        assert_eq!(results.stderr().unwrap(), None);
    }

    #[test]
    fn unknown_extension_is_surfaced() {
        let (_tmp, results) = results_fixture();
        let err = results.load_output("model.bin").unwrap_err();
        assert!(matches!(err, Error::UnsupportedFileType { .. }));

        let loaded = results.outputs().unwrap();
        assert_eq!(loaded.values.len(), 3);
        assert_eq!(loaded.unsupported.len(), 1);
        assert!(loaded.values.contains_key("notes.md"));
    }

    #[test]
    fn oversized_output_is_refused() {
        let (_tmp, results) = results_fixture();
        let big = results.output_dir().join("big.txt");
        let file = fs::File::create(&big).unwrap();
        file.set_len(MAX_OUTPUT_BYTES + 1).unwrap();
        assert!(matches!(
            results.load_output("big.txt").unwrap_err(),
            Error::FileTooLarge { .. }
        ));
    }
}
