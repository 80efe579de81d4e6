//! High/low pairing: one job queue per side, joined by replication.
//!
//! Job definitions flow low to high, results and mock datasets flow high
//! to low, and the tracked dataset list is merged in both directions.
//! Nothing here assumes the other side is up to date; callers sync and
//! poll.

use std::path::PathBuf;
use std::time::Duration;

use crate::core::dataset::{Dataset, DatasetStore};
use crate::core::error::{Error, Result};
use crate::core::event::OutputHandlers;
use crate::core::job::{Job, JobStatus};
use crate::core::queue::{JobSubmission, QueueReport, RuntimeConfigFile, RuntimeDirectory, CONFIG_FILENAME};
use crate::core::results::JobResults;
use crate::core::runner::RunnerFactory;
use crate::core::sync::{
    CommandExecutor, Connection, SyncCommand, SyncConfig, SyncDirection, SyncEngine, SyncEntry, SyncResult,
};
use crate::core::workspace::Workspace;
use crate::util;

const LOW_CONFIG_STAGING: &str = ".low_config.yaml";

/// The trusted side: owns private data, runs jobs, drives replication.
#[derive(Debug, Clone)]
pub struct HighSide {
    workspace: Workspace,
    runtime_name: String,
}

impl HighSide {
    pub fn new(workspace: Workspace, runtime_name: impl Into<String>) -> Self {
        Self {
            workspace,
            runtime_name: runtime_name.into(),
        }
    }

    /// Creates the high-side runtime directory. Refuses to reuse an existing
    /// one unless `force_overwrite` is set, in which case it is wiped.
    pub fn initialize(
        workspace: Workspace,
        runtime_name: impl Into<String>,
        cmd: &[String],
        force_overwrite: bool,
    ) -> Result<Self> {
        let high = Self::new(workspace, runtime_name);
        let dir = high.runtime_dir();
        if dir.root().exists() {
            if !force_overwrite {
                return Err(Error::AlreadyExists {
                    path: dir.root().to_path_buf(),
                });
            }
            tracing::warn!(root = %dir.root().display(), "overwriting existing runtime directory");
            util::remove_path(dir.root())?;
        }
        util::ensure_dir(&high.workspace.public_datasets_dir(&high.workspace.principal))?;
        dir.init(&high.runtime_name, cmd)?;
        tracing::info!(runtime = %high.runtime_name, root = %high.workspace.root.display(), "high side initialized");
        Ok(high)
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn runtime_name(&self) -> &str {
        &self.runtime_name
    }

    pub fn runtime_dir(&self) -> RuntimeDirectory {
        RuntimeDirectory::new(self.workspace.runtime_dir(&self.runtime_name))
    }

    pub fn datasets(&self) -> DatasetStore<'_> {
        DatasetStore::new(&self.workspace)
    }

    pub fn sync_config(&self) -> Result<SyncConfig> {
        SyncConfig::load(&self.workspace.root)
    }

    /// Jobs pulled from the low side and results pushed back to it.
    pub fn default_entries(&self, config: &SyncConfig) -> Result<Vec<SyncEntry>> {
        let dir = self.runtime_dir();
        let jobs = dir.jobs_dir();
        let done = dir.done_dir();
        Ok(vec![
            SyncEntry::new(&jobs, config.mirror(&jobs)?, SyncDirection::RemoteToLocal, true),
            SyncEntry::new(&done, config.mirror(&done)?, SyncDirection::LocalToRemote, false),
        ])
    }

    fn dataset_entry(&self, config: &SyncConfig, name: &str) -> Result<SyncEntry> {
        let mock_dir = self.datasets().mock_dir(name, &self.workspace.principal);
        Ok(SyncEntry::new(
            &mock_dir,
            config.mirror(&mock_dir)?,
            SyncDirection::LocalToRemote,
            true,
        ))
    }

    fn low_runtime_dir(&self, config: &SyncConfig) -> Result<PathBuf> {
        config.mirror(self.runtime_dir().root())
    }

    /// Records the low side, prepares its runtime directory and runs a
    /// first full sync.
    pub fn connect_low<E: CommandExecutor>(
        &self,
        low_root: impl Into<PathBuf>,
        connection: Connection,
        engine: &SyncEngine<E>,
    ) -> Result<(SyncConfig, SyncResult)> {
        let dir = self.runtime_dir();
        let high_config = dir.load_config()?;
        let mut config = SyncConfig::new(
            self.runtime_name.clone(),
            self.workspace.root.clone(),
            low_root,
            connection,
        );
        let low_dir = self.low_runtime_dir(&config)?;

        match &config.connection {
            Connection::Local => {
                let low = RuntimeDirectory::new(&low_dir);
                low.init(&high_config.runtime_name, &high_config.cmd)?;
            }
            Connection::Ssh(ssh) => {
                let mut mkdir = vec!["mkdir".to_string(), "-p".to_string()];
                for sub in ["jobs", "running", "done"] {
                    mkdir.push(low_dir.join(sub).to_string_lossy().to_string());
                }
                engine.run_one(&ssh.remote_command(&mkdir)).map_err(|err| {
                    Error::config(format!("cannot prepare low side over ssh: {err}"))
                })?;
                let push = SyncCommand::copy_file(
                    &dir.config_path(),
                    &low_dir.join(CONFIG_FILENAME),
                    &config.connection,
                    true,
                );
                engine.run_one(&push).map_err(|err| {
                    Error::config(format!("cannot upload runtime config over ssh: {err}"))
                })?;
            }
        }

        for entry in self.default_entries(&config)? {
            config.add_entry(entry);
        }
        for name in &high_config.datasets {
            let entry = self.dataset_entry(&config, name)?;
            config.add_entry(entry);
        }
        config.save()?;
        tracing::info!(
            runtime = %self.runtime_name,
            low_root = %config.low_root.display(),
            entries = config.entries.len(),
            "connected to low side"
        );

        let result = engine.execute(&config.commands(None));
        Ok((config, result))
    }

    /// Pulls job definitions submitted on the low side.
    pub fn sync_pending_jobs<E: CommandExecutor>(&self, engine: &SyncEngine<E>) -> Result<SyncResult> {
        let config = self.sync_config()?;
        Ok(engine.execute(&config.commands(Some(SyncDirection::RemoteToLocal))))
    }

    /// Pushes results and tracked datasets to the low side.
    pub fn sync_done_jobs<E: CommandExecutor>(&self, engine: &SyncEngine<E>) -> Result<SyncResult> {
        let config = self.sync_config()?;
        Ok(engine.execute(&config.commands(Some(SyncDirection::LocalToRemote))))
    }

    pub fn sync_all<E: CommandExecutor>(&self, engine: &SyncEngine<E>) -> Result<SyncResult> {
        let config = self.sync_config()?;
        Ok(engine.execute(&config.commands(None)))
    }

    /// Releases one dataset's mock payload to the low side and makes the
    /// standing sync include it from now on.
    pub fn sync_dataset<E: CommandExecutor>(&self, name: &str, engine: &SyncEngine<E>) -> Result<SyncResult> {
        let mut config = self.sync_config()?;
        let dataset = self.datasets().get(name, None)?;
        let mock_dir = self.datasets().mock_dir(&dataset.name, &dataset.owner);
        if !mock_dir.is_dir() {
            return Err(Error::DatasetNotFound {
                name: name.to_string(),
            });
        }

        let entry = self.dataset_entry(&config, name)?;
        let mut result = engine.execute(&[SyncCommand::from_entry(&entry, &config.connection)]);

        let dir = self.runtime_dir();
        let low_config_path = self.low_runtime_dir(&config)?.join(CONFIG_FILENAME);
        let low_datasets = self.pull_low_datasets(&config, &low_config_path, engine);

        let mut high_config = dir.load_config()?;
        let mut added = Vec::new();
        for candidate in low_datasets.into_iter().chain(std::iter::once(name.to_string())) {
            if !high_config.datasets.contains(&candidate) {
                high_config.datasets.push(candidate.clone());
                added.push(candidate);
            }
        }
        dir.save_config(&high_config)?;
        tracing::info!(dataset = name, added = ?added, "tracked datasets updated");

        let push = SyncCommand::copy_file(&dir.config_path(), &low_config_path, &config.connection, true);
        result.merge(engine.execute(&[push]));

        if config.add_entry(entry) {
            config.save()?;
        }
        Ok(result)
    }

    /// Dataset names tracked by the low side. Failures are logged and read
    /// as an empty list.
    fn pull_low_datasets<E: CommandExecutor>(
        &self,
        config: &SyncConfig,
        low_config_path: &std::path::Path,
        engine: &SyncEngine<E>,
    ) -> Vec<String> {
        let staging = self.runtime_dir().root().join(LOW_CONFIG_STAGING);
        let pull = SyncCommand::copy_file(low_config_path, &staging, &config.connection, false);
        let datasets = match engine.run_one(&pull) {
            Ok(_) => match util::read_yaml::<RuntimeConfigFile>(&staging) {
                Ok(low) => low.datasets,
                Err(err) => {
                    tracing::warn!(error = %err, "unreadable low side runtime config");
                    Vec::new()
                }
            },
            Err(err) => {
                tracing::warn!(error = %err, "could not fetch low side runtime config");
                Vec::new()
            }
        };
        if let Err(err) = util::remove_path(&staging) {
            tracing::debug!(error = %err, "staging file left behind");
        }
        datasets
    }

    /// Runs all pending jobs once against the owner's private data.
    pub fn process_queue(
        &self,
        runners: &RunnerFactory,
        make_handlers: &mut dyn FnMut(&Job) -> OutputHandlers,
    ) -> Result<QueueReport> {
        let dir = self.runtime_dir();
        dir.reconcile()?;
        let datasets = self.datasets();
        dir.process_queue(runners, &datasets, make_handlers)
    }

    /// Pull, run, push; repeated every `interval` until `stop` is set.
    pub fn serve<E: CommandExecutor>(
        &self,
        runners: &RunnerFactory,
        engine: &SyncEngine<E>,
        make_handlers: &mut dyn FnMut(&Job) -> OutputHandlers,
        interval: Duration,
        stop: &std::sync::atomic::AtomicBool,
    ) -> Result<()> {
        use std::sync::atomic::Ordering;

        while !stop.load(Ordering::Relaxed) {
            let pulled = self.sync_pending_jobs(engine)?;
            let report = self.process_queue(runners, make_handlers)?;
            if report.processed > 0 || !pulled.success() {
                let pushed = self.sync_done_jobs(engine)?;
                tracing::info!(
                    processed = report.processed,
                    pull_failures = pulled.failed_syncs,
                    push_failures = pushed.failed_syncs,
                    "serve cycle complete"
                );
            }
            std::thread::sleep(interval);
        }
        Ok(())
    }

    pub fn reject(&self, id: &str, reason: &str) -> Result<Job> {
        self.runtime_dir().reject(id, reason)
    }

    pub fn share(&self, id: &str) -> Result<Job> {
        self.runtime_dir().share(id)
    }
}

/// The untrusted side: submits jobs and reads replicated results and mock
/// data.
#[derive(Debug, Clone)]
pub struct LowSide {
    workspace: Workspace,
    runtime_name: String,
}

impl LowSide {
    pub fn new(workspace: Workspace, runtime_name: impl Into<String>) -> Self {
        Self {
            workspace,
            runtime_name: runtime_name.into(),
        }
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn runtime_dir(&self) -> RuntimeDirectory {
        RuntimeDirectory::new(self.workspace.runtime_dir(&self.runtime_name))
    }

    fn connected_dir(&self) -> Result<RuntimeDirectory> {
        let dir = self.runtime_dir();
        if !dir.exists() {
            return Err(Error::config(format!(
                "no runtime '{}' at {}; the high side has not connected yet",
                self.runtime_name,
                dir.root().display()
            )));
        }
        Ok(dir)
    }

    /// Bundles the code with the definition under `jobs/`.
    pub fn submit_job(&self, submission: JobSubmission) -> Result<String> {
        self.connected_dir()?.submit_bundled(submission)
    }

    pub fn job(&self, id: &str) -> Result<Job> {
        let dir = self.connected_dir()?;
        dir.reconcile()?;
        dir.get(id)
    }

    pub fn status(&self, id: &str) -> Result<JobStatus> {
        Ok(self.job(id)?.status)
    }

    pub fn results(&self, id: &str) -> Result<JobResults> {
        let dir = self.connected_dir()?;
        dir.reconcile()?;
        dir.results(id)
    }

    pub fn list_jobs(&self) -> Result<Vec<Job>> {
        let dir = self.connected_dir()?;
        dir.reconcile()?;
        dir.list()
    }

    /// Datasets the high side has released to this runtime.
    pub fn list_datasets(&self) -> Result<Vec<Dataset>> {
        let names = self.connected_dir()?.datasets()?;
        let store = DatasetStore::new(&self.workspace);
        let mut datasets = Vec::with_capacity(names.len());
        for name in names {
            match store.get(&name, None) {
                Ok(dataset) => datasets.push(dataset),
                Err(Error::DatasetNotFound { .. }) => {
                    tracing::warn!(dataset = %name, "dataset tracked but its mock data has not arrived yet");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(datasets)
    }

    pub fn mock_dir(&self, name: &str) -> Result<PathBuf> {
        let dataset = DatasetStore::new(&self.workspace).get(name, None)?;
        Ok(DatasetStore::new(&self.workspace).mock_dir(&dataset.name, &dataset.owner))
    }

    /// Always fails: private data never leaves the high side.
    pub fn private_dir(&self, name: &str) -> Result<PathBuf> {
        let store = DatasetStore::new(&self.workspace);
        let dataset = store.get(name, None)?;
        store.private_dir(&dataset)
    }
}
