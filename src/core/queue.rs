//! File-system job queue for one runtime instance on one side.
//!
//! ```text
//! <runtime dir>/
//!   config.yaml
//!   jobs/<id>.json            pending definitions
//!   jobs/<id>/code/           bundled job code
//!   running/<id>_status.json  in-flight markers
//!   running/<id>/             work folder while executing
//!   done/<id>.json            terminal records
//!   done/<id>_results/        logs/ and output/
//! ```
//!
//! A directory has exactly one writer per side: the processing loop on the
//! high side, the submitting client on the low side. Running two writers
//! against the same directory is not supported.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::core::dataset::DatasetResolver;
use crate::core::error::{Error, Result};
use crate::core::event::{FileOutputHandler, OutputHandlers};
use crate::core::job::{Job, JobErrorKind, JobStatus, JobUpdate};
use crate::core::job_config::{JobConfig, ResourceLimits, DEFAULT_TIMEOUT_SECS};
use crate::core::lifecycle;
use crate::core::results::JobResults;
use crate::core::runner::RunnerFactory;
use crate::core::runtime::Runtime;
use crate::util;

pub const CONFIG_FILENAME: &str = "config.yaml";
pub const BUNDLED_CODE_DIR: &str = "code";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfigFile {
    #[serde(default)]
    pub datasets: Vec<String>,
    pub runtime_name: String,
    #[serde(default)]
    pub cmd: Vec<String>,
}

/// What a client asks to run.
#[derive(Debug, Clone)]
pub struct JobSubmission {
    pub name: Option<String>,
    pub dataset_name: String,
    pub code_dir: PathBuf,
    pub args: Vec<String>,
    pub runtime: Runtime,
    pub timeout: u64,
    pub extra_env: BTreeMap<String, String>,
    pub resources: Option<ResourceLimits>,
}

impl JobSubmission {
    pub fn new(dataset_name: impl Into<String>, code_dir: impl Into<PathBuf>, args: Vec<String>, runtime: Runtime) -> Self {
        Self {
            name: None,
            dataset_name: dataset_name.into(),
            code_dir: code_dir.into(),
            args,
            runtime,
            timeout: DEFAULT_TIMEOUT_SECS,
            extra_env: BTreeMap::new(),
            resources: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueReport {
    pub processed: usize,
    pub finished: usize,
    pub failed: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone)]
pub struct RuntimeDirectory {
    root: PathBuf,
}

impl RuntimeDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn jobs_dir(&self) -> PathBuf {
        self.root.join("jobs")
    }

    pub fn running_dir(&self) -> PathBuf {
        self.root.join("running")
    }

    pub fn done_dir(&self) -> PathBuf {
        self.root.join("done")
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join(CONFIG_FILENAME)
    }

    fn pending_path(&self, id: &str) -> PathBuf {
        self.jobs_dir().join(format!("{id}.json"))
    }

    fn bundle_dir(&self, id: &str) -> PathBuf {
        self.jobs_dir().join(id)
    }

    fn marker_path(&self, id: &str) -> PathBuf {
        self.running_dir().join(format!("{id}_status.json"))
    }

    fn work_dir(&self, id: &str) -> PathBuf {
        self.running_dir().join(id)
    }

    fn done_path(&self, id: &str) -> PathBuf {
        self.done_dir().join(format!("{id}.json"))
    }

    /// Relative to the runtime root so the location survives replication.
    pub fn results_location(id: &str) -> PathBuf {
        Path::new("done").join(format!("{id}_results"))
    }

    pub fn exists(&self) -> bool {
        self.config_path().is_file()
    }

    /// Creates the lifecycle directories. An existing config keeps its
    /// tracked datasets.
    pub fn init(&self, runtime_name: &str, cmd: &[String]) -> Result<RuntimeConfigFile> {
        for dir in [self.jobs_dir(), self.running_dir(), self.done_dir()] {
            util::ensure_dir(&dir)?;
        }
        let config = if self.config_path().is_file() {
            let mut config = self.load_config()?;
            config.runtime_name = runtime_name.to_string();
            config.cmd = cmd.to_vec();
            config
        } else {
            RuntimeConfigFile {
                datasets: Vec::new(),
                runtime_name: runtime_name.to_string(),
                cmd: cmd.to_vec(),
            }
        };
        self.save_config(&config)?;
        tracing::info!(root = %self.root.display(), runtime = runtime_name, "runtime directory ready");
        Ok(config)
    }

    pub fn load_config(&self) -> Result<RuntimeConfigFile> {
        let path = self.config_path();
        if !path.is_file() {
            return Err(Error::PathNotFound {
                what: "runtime config",
                path,
            });
        }
        util::read_yaml(&path)
    }

    pub fn save_config(&self, config: &RuntimeConfigFile) -> Result<()> {
        util::write_yaml(&self.config_path(), config)
    }

    /// Adds `name` to the tracked datasets. Returns `false` if it was
    /// already tracked.
    pub fn attach_dataset(&self, name: &str) -> Result<bool> {
        let mut config = self.load_config()?;
        if config.datasets.iter().any(|existing| existing == name) {
            tracing::debug!(dataset = name, "dataset already attached");
            return Ok(false);
        }
        config.datasets.push(name.to_string());
        self.save_config(&config)?;
        tracing::info!(dataset = name, root = %self.root.display(), "dataset attached");
        Ok(true)
    }

    pub fn datasets(&self) -> Result<Vec<String>> {
        Ok(self.load_config()?.datasets)
    }

    /// Writes `jobs/<id>.json` referencing the code where it is.
    pub fn submit(&self, submission: JobSubmission) -> Result<String> {
        let job = self.new_job(submission);
        lifecycle::validate(&job)?;
        util::write_json(&self.pending_path(&job.uid), &job)?;
        tracing::info!(job = %job.uid, dataset = %job.dataset_name, "job submitted");
        Ok(job.uid)
    }

    /// Like [`submit`](Self::submit), but copies the code into
    /// `jobs/<id>/code/` so it replicates with the definition.
    pub fn submit_bundled(&self, mut submission: JobSubmission) -> Result<String> {
        if !submission.code_dir.is_dir() {
            return Err(Error::PathNotFound {
                what: "code directory",
                path: submission.code_dir,
            });
        }
        let source = std::mem::replace(&mut submission.code_dir, PathBuf::from(BUNDLED_CODE_DIR));
        let job = self.new_job(submission);
        lifecycle::validate(&job)?;

        let bundle = self.bundle_dir(&job.uid).join(BUNDLED_CODE_DIR);
        util::copy_dir_all(&source, &bundle)?;
        // Definition last, so a replicated definition always has its code.
        util::write_json(&self.pending_path(&job.uid), &job)?;
        tracing::info!(job = %job.uid, dataset = %job.dataset_name, code = %source.display(), "job submitted with bundled code");
        Ok(job.uid)
    }

    fn new_job(&self, submission: JobSubmission) -> Job {
        let now = Utc::now();
        Job {
            uid: uuid::Uuid::new_v4().simple().to_string(),
            name: submission.name,
            dataset_name: submission.dataset_name,
            code_dir: submission.code_dir,
            args: submission.args,
            runtime: submission.runtime,
            timeout: submission.timeout,
            extra_env: submission.extra_env,
            resources: submission.resources,
            created_at: now,
            updated_at: now,
            status: JobStatus::PendingCodeReview,
            error: JobErrorKind::NoError,
            error_message: None,
            output_location: None,
        }
    }

    /// Looks in `jobs/`, then `done/`, then the running markers.
    pub fn get(&self, id: &str) -> Result<Job> {
        for path in [self.pending_path(id), self.done_path(id), self.marker_path(id)] {
            if path.is_file() {
                return util::read_json(&path);
            }
        }
        Err(Error::JobNotFound { id: id.to_string() })
    }

    pub fn status(&self, id: &str) -> Result<JobStatus> {
        Ok(self.get(id)?.status)
    }

    pub fn results(&self, id: &str) -> Result<JobResults> {
        let done = self.done_path(id);
        if !done.is_file() {
            let job = self.get(id)?;
            return Err(Error::ResultsNotReady {
                id: id.to_string(),
                reason: format!("job is {}", job.status),
            });
        }
        let job: Job = util::read_json(&done)?;
        if !matches!(job.status, JobStatus::RunFinished | JobStatus::Shared) {
            return Err(Error::ResultsNotReady {
                id: id.to_string(),
                reason: format!("job is {}", job.status),
            });
        }
        let location = job
            .output_location
            .unwrap_or_else(|| Self::results_location(id));
        let dir = self.root.join(location);
        if !dir.is_dir() {
            return Err(Error::ResultsNotReady {
                id: id.to_string(),
                reason: format!("{} has not been replicated yet", dir.display()),
            });
        }
        Ok(JobResults::new(dir))
    }

    /// Every job known to this directory, oldest first.
    pub fn list(&self) -> Result<Vec<Job>> {
        let mut by_id: BTreeMap<String, Job> = BTreeMap::new();
        for (dir, suffix) in [
            (self.running_dir(), "_status.json"),
            (self.done_dir(), ".json"),
            (self.jobs_dir(), ".json"),
        ] {
            for path in json_files(&dir)? {
                let Some(file_name) = path.file_name().and_then(|name| name.to_str()) else {
                    continue;
                };
                if !file_name.ends_with(suffix) {
                    continue;
                }
                match util::read_json::<Job>(&path) {
                    // Later directories take precedence.
                    Ok(job) => {
                        by_id.insert(job.uid.clone(), job);
                    }
                    Err(err) => tracing::warn!(path = %path.display(), error = %err, "skipping unreadable job record"),
                }
            }
        }
        let mut jobs: Vec<Job> = by_id.into_values().collect();
        jobs.sort_by_key(|job| job.created_at);
        Ok(jobs)
    }

    pub fn reject(&self, id: &str, reason: &str) -> Result<Job> {
        let pending = self.pending_path(id);
        let done = self.done_path(id);
        let (mut job, source) = if done.is_file() {
            (util::read_json::<Job>(&done)?, None)
        } else if pending.is_file() {
            (util::read_json::<Job>(&pending)?, Some(pending))
        } else {
            return Err(match self.get(id) {
                Ok(job) => Error::InvalidTransition {
                    action: "reject",
                    from: job.status,
                },
                Err(err) => err,
            });
        };

        let update = lifecycle::transition_reject(&job, reason)?;
        job.apply(update);
        util::write_json(&done, &job)?;
        if source.is_some() {
            self.clear_pending(id)?;
        }
        tracing::info!(job = id, reason = job.error_message.as_deref().unwrap_or_default(), "job rejected");
        Ok(job)
    }

    pub fn share(&self, id: &str) -> Result<Job> {
        let done = self.done_path(id);
        if !done.is_file() {
            let job = self.get(id)?;
            return Err(Error::InvalidTransition {
                action: "share",
                from: job.status,
            });
        }
        let mut job: Job = util::read_json(&done)?;
        let update = lifecycle::transition_share(&job)?;
        job.apply(update);
        util::write_json(&done, &job)?;
        tracing::info!(job = id, "job shared");
        Ok(job)
    }

    /// Drops pending definitions whose terminal record already exists.
    /// Replication may bring back a definition the other side finished.
    pub fn reconcile(&self) -> Result<usize> {
        let mut removed = 0;
        for path in json_files(&self.jobs_dir())? {
            let Some(id) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            if self.done_path(id).is_file() {
                self.clear_pending(id)?;
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::debug!(removed, root = %self.root.display(), "reconciled finished jobs");
        }
        Ok(removed)
    }

    fn clear_pending(&self, id: &str) -> Result<()> {
        util::remove_path(&self.pending_path(id))?;
        util::remove_path(&self.bundle_dir(id))
    }

    /// Runs every pending job once, one at a time.
    pub fn process_queue(
        &self,
        runners: &RunnerFactory,
        datasets: &dyn DatasetResolver,
        make_handlers: &mut dyn FnMut(&Job) -> OutputHandlers,
    ) -> Result<QueueReport> {
        let mut report = QueueReport::default();
        for path in json_files(&self.jobs_dir())? {
            match self.process_job(&path, runners, datasets, make_handlers) {
                Ok(Some(status)) => {
                    report.processed += 1;
                    if status == JobStatus::RunFinished {
                        report.finished += 1;
                    } else {
                        report.failed += 1;
                    }
                }
                Ok(None) => report.skipped += 1,
                Err(err) => {
                    report.skipped += 1;
                    tracing::error!(path = %path.display(), error = %err, "failed to process job");
                }
            }
        }
        Ok(report)
    }

    /// Repeats [`process_queue`](Self::process_queue) every `interval`
    /// until `stop` is set.
    pub fn watch(
        &self,
        runners: &RunnerFactory,
        datasets: &dyn DatasetResolver,
        make_handlers: &mut dyn FnMut(&Job) -> OutputHandlers,
        interval: Duration,
        stop: &AtomicBool,
    ) -> Result<()> {
        tracing::info!(root = %self.root.display(), interval_ms = interval.as_millis() as u64, "watching job queue");
        while !stop.load(Ordering::Relaxed) {
            let report = self.process_queue(runners, datasets, make_handlers)?;
            if report.processed > 0 {
                tracing::info!(
                    processed = report.processed,
                    finished = report.finished,
                    failed = report.failed,
                    "queue pass complete"
                );
            }
            thread::sleep(interval);
        }
        Ok(())
    }

    fn process_job(
        &self,
        path: &Path,
        runners: &RunnerFactory,
        datasets: &dyn DatasetResolver,
        make_handlers: &mut dyn FnMut(&Job) -> OutputHandlers,
    ) -> Result<Option<JobStatus>> {
        let mut job: Job = util::read_json(path)?;
        if self.done_path(&job.uid).is_file() {
            tracing::debug!(job = %job.uid, "already finished, dropping replicated definition");
            self.clear_pending(&job.uid)?;
            return Ok(None);
        }
        if job.status != JobStatus::PendingCodeReview {
            tracing::debug!(job = %job.uid, status = %job.status, "skipping job");
            return Ok(None);
        }

        let config = match self.prepare(&job, runners, datasets) {
            Ok(config) => config,
            Err(err) if err.is_job_local() || matches!(err, Error::Validation { .. }) => {
                tracing::warn!(job = %job.uid, error = %err, "job failed pre-flight checks");
                let update = lifecycle::transition_failure(&job, err.to_string());
                return self.finish(job, update).map(Some);
            }
            Err(err) => return Err(err),
        };

        job.apply(lifecycle::transition_in_progress(&job)?);
        util::write_json(&self.pending_path(&job.uid), &job)?;
        util::write_json(&self.marker_path(&job.uid), &job)?;
        tracing::info!(job = %job.uid, runtime = %job.runtime.name, "job started");

        let mut handlers = OutputHandlers::new().with(FileOutputHandler::new());
        handlers.append(make_handlers(&job));

        let update = match crate::core::run_job(&job, &config, runners, &mut handlers) {
            Ok(update) => update,
            Err(err) => {
                tracing::warn!(job = %job.uid, error = %err, "job could not be executed");
                lifecycle::transition_failure(&job, err.to_string())
            }
        };
        self.finish(job, update).map(Some)
    }

    fn prepare(&self, job: &Job, runners: &RunnerFactory, datasets: &dyn DatasetResolver) -> Result<JobConfig> {
        lifecycle::validate(job)?;
        let data_dir = datasets.resolve_data_dir(&job.dataset_name)?;
        let code_dir = if job.code_dir.is_absolute() {
            job.code_dir.clone()
        } else {
            self.bundle_dir(&job.uid).join(&job.code_dir)
        };
        let mut config = JobConfig::for_job(job, code_dir, data_dir, self.work_dir(&job.uid));
        config.blocking = true;
        runners.for_config(&config).validate(&config)?;
        Ok(config)
    }

    /// Moves the work folder into `done/`, writes the terminal record and
    /// clears every trace of the job from `jobs/` and `running/`.
    fn finish(&self, mut job: Job, update: JobUpdate) -> Result<JobStatus> {
        let work = self.work_dir(&job.uid);
        let mut update = update;
        if work.is_dir() {
            let location = Self::results_location(&job.uid);
            let target = self.root.join(&location);
            util::ensure_dir(&self.done_dir())?;
            util::remove_path(&target)?;
            fs::rename(&work, &target).map_err(|e| Error::io(&work, e))?;
            update = update.with_output_location(location);
        }
        job.apply(update);
        lifecycle::validate(&job)?;
        util::write_json(&self.done_path(&job.uid), &job)?;
        self.clear_pending(&job.uid)?;
        util::remove_path(&self.marker_path(&job.uid))?;

        match job.status {
            JobStatus::RunFinished => tracing::info!(job = %job.uid, "job finished"),
            status => tracing::warn!(
                job = %job.uid,
                status = %status,
                error = %job.error,
                detail = job.error_message.as_deref().unwrap_or_default(),
                "job did not finish cleanly"
            ),
        }
        Ok(job.status)
    }
}

fn json_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| Error::io(dir, e))? {
        let entry = entry.map_err(|e| Error::io(dir, e))?;
        let path = entry.path();
        let is_json = path.extension().map(|ext| ext == "json").unwrap_or(false);
        let is_hidden = path
            .file_name()
            .and_then(|name| name.to_str())
            .map(|name| name.starts_with('.'))
            .unwrap_or(true);
        if path.is_file() && is_json && !is_hidden {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
