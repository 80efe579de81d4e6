use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::job::Job;
use crate::core::runtime::Runtime;

pub const DEFAULT_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_DATA_MOUNT_DIR: &str = "/app/data";

/// Ceilings applied to sandboxed processes. Only the container backend can
/// enforce all of them; the interpreter backend enforces the timeout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    pub memory: String,
    pub cpus: String,
    pub pids_limit: u32,
    pub nproc: u32,
    pub nofile: u32,
    pub fsize_bytes: u64,
    pub tmpfs_size: String,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            memory: "1G".to_string(),
            cpus: "1".to_string(),
            pids_limit: 100,
            nproc: 4096,
            nofile: 50,
            fsize_bytes: 10_000_000,
            tmpfs_size: "16m".to_string(),
        }
    }
}

/// Execution-time view of a job, derived at dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct JobConfig {
    pub function_folder: PathBuf,
    pub args: Vec<String>,
    pub data_path: PathBuf,
    pub runtime: Runtime,
    pub job_folder: PathBuf,
    pub timeout: u64,
    pub data_mount_dir: String,
    pub extra_env: BTreeMap<String, String>,
    pub resources: ResourceLimits,
    pub blocking: bool,
}

impl JobConfig {
    pub fn new(
        function_folder: impl Into<PathBuf>,
        args: Vec<String>,
        data_path: impl Into<PathBuf>,
        runtime: Runtime,
        job_folder: impl Into<PathBuf>,
    ) -> Self {
        Self {
            function_folder: function_folder.into(),
            args,
            data_path: data_path.into(),
            runtime,
            job_folder: job_folder.into(),
            timeout: DEFAULT_TIMEOUT_SECS,
            data_mount_dir: DEFAULT_DATA_MOUNT_DIR.to_string(),
            extra_env: BTreeMap::new(),
            resources: ResourceLimits::default(),
            blocking: true,
        }
    }

    pub fn for_job(job: &Job, function_folder: PathBuf, data_path: PathBuf, job_folder: PathBuf) -> Self {
        let mut config = Self::new(
            function_folder,
            job.args.clone(),
            data_path,
            job.runtime.clone(),
            job_folder,
        );
        config.timeout = job.timeout;
        config.extra_env = job.extra_env.clone();
        if let Some(resources) = &job.resources {
            config.resources = resources.clone();
        }
        config
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.job_folder.join("logs")
    }

    pub fn output_dir(&self) -> PathBuf {
        self.job_folder.join("output")
    }

    pub fn entrypoint(&self) -> &str {
        self.args.first().map(String::as_str).unwrap_or_default()
    }

    pub fn entrypoint_path(&self) -> PathBuf {
        self.function_folder.join(self.entrypoint())
    }

    pub fn interpreter(&self) -> String {
        self.runtime.cmd().join(" ")
    }

    /// Variables every backend exposes to the job, on top of `extra_env`.
    pub fn base_env(&self) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        env.insert("OUTPUT_DIR".to_string(), display(&absolute(&self.output_dir())));
        env.insert("DATA_DIR".to_string(), display(&absolute(&self.data_path)));
        env.insert("CODE_DIR".to_string(), display(&absolute(&self.function_folder)));
        env.insert("TIMEOUT".to_string(), self.timeout.to_string());
        env.insert("INPUT_FILE".to_string(), display(&self.entrypoint_path()));
        env.insert("INTERPRETER".to_string(), self.interpreter());
        env
    }

    /// Job-declared variables merged with the derived ones; derived win.
    pub fn env(&self) -> BTreeMap<String, String> {
        let mut env = self.extra_env.clone();
        env.extend(self.base_env());
        env
    }
}

pub(crate) fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

fn display(path: &Path) -> String {
    path.to_string_lossy().to_string()
}
