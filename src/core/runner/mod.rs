//! Sandboxed job execution.
//!
//! One [`JobRunner`] per [`RuntimeKind`], picked by [`RunnerFactory`]. The
//! backends share path validation, job-folder preparation and the
//! stream/poll loop in this module; command construction and backend
//! pre-flight checks live in each backend.

use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use crate::core::error::{Error, Result};
use crate::core::event::OutputHandlers;
use crate::core::job_config::JobConfig;
use crate::core::runtime::RuntimeKind;
use crate::util::{self, spawn_line_reader, StreamKind};

pub mod cluster;
pub mod container;
pub mod interpreter;
pub mod mounts;

pub use cluster::ClusterRunner;
pub use container::ContainerRunner;
pub use interpreter::InterpreterRunner;
pub use mounts::{MountProvider, MountRegistry};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_WORKDIR: &str = "/app";

#[derive(Debug, Clone)]
pub struct RunnerSettings {
    /// Docker-compatible CLI used by the container backend.
    pub engine: String,
    pub poll_interval: Duration,
    /// Build context handed to `<engine> build`.
    pub build_context: PathBuf,
    pub container_workdir: String,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            engine: "docker".to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            build_context: PathBuf::from("."),
            container_workdir: DEFAULT_WORKDIR.to_string(),
        }
    }
}

/// Result of a blocking run. `error_message` is the captured stderr when
/// there was any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitReport {
    pub exit_code: i32,
    pub error_message: Option<String>,
    pub timed_out: bool,
}

pub enum Execution {
    Completed(ExitReport),
    /// Non-blocking mode: the caller owns the process and must wait on it.
    Detached(JobHandle),
}

impl Execution {
    /// Blocks on a detached handle if needed.
    pub fn into_report(self, handlers: &mut OutputHandlers) -> Result<ExitReport> {
        match self {
            Execution::Completed(report) => Ok(report),
            Execution::Detached(handle) => handle.wait(handlers),
        }
    }
}

pub trait JobRunner {
    fn kind(&self) -> RuntimeKind;

    /// Checks that must pass before any process is started.
    fn validate(&self, config: &JobConfig) -> Result<()>;

    fn run(&self, config: &JobConfig, handlers: &mut OutputHandlers) -> Result<Execution>;
}

pub struct RunnerFactory {
    settings: RunnerSettings,
    mounts: MountRegistry,
}

impl RunnerFactory {
    pub fn new(settings: RunnerSettings) -> Self {
        Self {
            settings,
            mounts: MountRegistry::default(),
        }
    }

    pub fn with_mounts(mut self, mounts: MountRegistry) -> Self {
        self.mounts = mounts;
        self
    }

    pub fn settings(&self) -> &RunnerSettings {
        &self.settings
    }

    pub fn for_kind(&self, kind: RuntimeKind) -> Box<dyn JobRunner + '_> {
        match kind {
            RuntimeKind::Interpreter => Box::new(InterpreterRunner::new(&self.settings)),
            RuntimeKind::Container => Box::new(ContainerRunner::new(&self.settings, &self.mounts)),
            RuntimeKind::Cluster => Box::new(ClusterRunner),
        }
    }

    pub fn for_config(&self, config: &JobConfig) -> Box<dyn JobRunner + '_> {
        self.for_kind(config.runtime.kind())
    }
}

impl Default for RunnerFactory {
    fn default() -> Self {
        Self::new(RunnerSettings::default())
    }
}

pub(crate) fn validate_paths(config: &JobConfig) -> Result<()> {
    if config.entrypoint().trim().is_empty() {
        return Err(Error::Validation {
            message: "job config has no entrypoint".to_string(),
        });
    }
    if !config.function_folder.exists() {
        return Err(Error::PathNotFound {
            what: "code directory",
            path: config.function_folder.clone(),
        });
    }
    if !config.data_path.exists() {
        return Err(Error::PathNotFound {
            what: "dataset directory",
            path: config.data_path.clone(),
        });
    }
    Ok(())
}

/// Creates `logs/` and `output/`; output is world-writable so sandboxed
/// users can write into it.
pub(crate) fn prepare_job_folders(config: &JobConfig) -> Result<()> {
    util::ensure_dir(&config.job_folder)?;
    util::ensure_dir(&config.logs_dir())?;
    let output_dir = config.output_dir();
    util::ensure_dir(&output_dir)?;
    util::make_world_writable(&output_dir)
}

/// Spawns `cmd` in its own process group and attaches the output readers.
/// `on_kill` runs before the group is killed at the deadline; backends whose
/// job outlives the spawned client (containers) use it to stop the real work.
pub(crate) fn launch(
    mut cmd: Command,
    config: &JobConfig,
    handlers: &mut OutputHandlers,
    settings: &RunnerSettings,
    on_kill: Option<Command>,
) -> Result<Execution> {
    let program = cmd.get_program().to_string_lossy().to_string();
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    util::isolate_process_group(&mut cmd);

    let mut child = cmd.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::ExecutionFailed {
                exit_code: None,
                stderr: format!("`{program}` not found in PATH"),
            }
        } else {
            Error::ExecutionFailed {
                exit_code: None,
                stderr: e.to_string(),
            }
        }
    })?;

    tracing::debug!(pid = child.id(), program = %program, "job process started");
    handlers.start(config);

    let (line_tx, line_rx) = mpsc::channel::<(StreamKind, String)>();
    let mut readers = Vec::with_capacity(2);
    if let Some(stdout) = child.stdout.take() {
        readers.push(spawn_line_reader(StreamKind::Stdout, stdout, line_tx.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(spawn_line_reader(StreamKind::Stderr, stderr, line_tx.clone()));
    }
    drop(line_tx);

    let handle = JobHandle {
        child,
        lines: line_rx,
        readers,
        started: Instant::now(),
        timeout: Duration::from_secs(config.timeout),
        poll_interval: settings.poll_interval,
        on_kill,
    };

    if config.blocking {
        tracing::info!(job_folder = %config.job_folder.display(), "running job in blocking mode");
        Ok(Execution::Completed(handle.wait(handlers)?))
    } else {
        tracing::info!(job_folder = %config.job_folder.display(), "running job in non-blocking mode");
        Ok(Execution::Detached(handle))
    }
}

/// A live job process with its output plumbing attached. The process leads
/// its own process group; everything it starts is killed with it.
pub struct JobHandle {
    child: Child,
    lines: Receiver<(StreamKind, String)>,
    readers: Vec<thread::JoinHandle<()>>,
    started: Instant,
    timeout: Duration,
    poll_interval: Duration,
    on_kill: Option<Command>,
}

impl JobHandle {
    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// Exit code if the process has finished.
    pub fn try_wait(&mut self) -> Result<Option<i32>> {
        let status = self
            .child
            .try_wait()
            .map_err(|e| Error::ExecutionFailed {
                exit_code: None,
                stderr: e.to_string(),
            })?;
        Ok(status.map(|status| status.code().unwrap_or(-1)))
    }

    /// Runs the kill hook, then SIGKILLs the whole process group.
    pub fn kill(&mut self) -> Result<()> {
        if let Some(mut hook) = self.on_kill.take() {
            let status = hook
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status();
            match status {
                Ok(status) if status.success() => {}
                Ok(status) => tracing::warn!(code = ?status.code(), "kill hook exited with an error"),
                Err(e) => tracing::warn!(error = %e, "kill hook could not be started"),
            }
        }
        util::kill_process_group(self.child.id());
        match self.child.kill() {
            Ok(()) => Ok(()),
            // Already exited.
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
            Err(e) => Err(Error::ExecutionFailed {
                exit_code: None,
                stderr: e.to_string(),
            }),
        }
    }

    /// Streams output to `handlers` until the process has exited and both
    /// streams are closed, or until the job's timeout elapses. A background
    /// process holding the streams open counts against the same deadline.
    pub fn wait(mut self, handlers: &mut OutputHandlers) -> Result<ExitReport> {
        let deadline = self.started + self.timeout;
        let mut stderr_logs = String::new();
        let mut exited: Option<i32> = None;
        let mut streams_open = true;
        let mut timed_out = false;

        loop {
            if streams_open {
                match self.lines.recv_timeout(self.poll_interval) {
                    Ok(line) => {
                        dispatch(line, handlers, &mut stderr_logs);
                        while let Ok(line) = self.lines.try_recv() {
                            dispatch(line, handlers, &mut stderr_logs);
                        }
                    }
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => streams_open = false,
                }
            } else {
                thread::sleep(self.poll_interval);
            }

            if exited.is_none() {
                if let Some(code) = self.try_wait()? {
                    tracing::debug!(pid = self.child.id(), code, "job process terminated");
                    exited = Some(code);
                }
            }
            if exited.is_some() && !streams_open {
                break;
            }

            if Instant::now() >= deadline {
                tracing::warn!(
                    pid = self.child.id(),
                    timeout_secs = self.timeout.as_secs(),
                    still_running = exited.is_none(),
                    "job exceeded its timeout, killing its process group"
                );
                self.kill()?;
                let _ = self.child.wait();
                timed_out = true;
                break;
            }
        }

        if timed_out {
            // Processes that left the group may still hold the pipes, so the
            // readers are abandoned rather than joined.
            self.readers.clear();
        } else {
            for reader in self.readers.drain(..) {
                let _ = reader.join();
            }
            if util::kill_process_group(self.child.id()) {
                tracing::debug!(pid = self.child.id(), "killed processes left behind by the job");
            }
        }
        while let Ok(line) = self.lines.try_recv() {
            dispatch(line, handlers, &mut stderr_logs);
        }

        let exit_code = match (timed_out, exited) {
            (false, Some(code)) => code,
            _ => -1,
        };
        handlers.completion(exit_code);

        let error_message = if stderr_logs.is_empty() {
            None
        } else {
            Some(stderr_logs)
        };
        Ok(ExitReport {
            exit_code,
            error_message,
            timed_out,
        })
    }
}

fn dispatch(
    (stream, line): (StreamKind, String),
    handlers: &mut OutputHandlers,
    stderr_logs: &mut String,
) {
    match stream {
        StreamKind::Stdout => handlers.progress(&line, ""),
        StreamKind::Stderr => {
            stderr_logs.push_str(&line);
            handlers.progress("", &line);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::fs;
    use std::path::Path;
    use std::sync::mpsc;

    use super::*;
    use crate::core::event::{ChannelOutputHandler, FileOutputHandler, JobEvent};
    use crate::core::runtime::{Runtime, RuntimeConfig};

    pub(crate) fn sh_config(root: &Path, script: &str) -> JobConfig {
        let code = root.join("code");
        let data = root.join("data");
        fs::create_dir_all(&code).unwrap();
        fs::create_dir_all(&data).unwrap();
        fs::write(code.join("main.sh"), script).unwrap();
        let runtime = Runtime::new(RuntimeConfig::interpreter(vec!["sh".to_string()]));
        JobConfig::new(code, vec!["main.sh".to_string()], data, runtime, root.join("job"))
    }

    #[test]
    fn factory_covers_every_kind() {
        let factory = RunnerFactory::default();
        for kind in [
            RuntimeKind::Interpreter,
            RuntimeKind::Container,
            RuntimeKind::Cluster,
        ] {
            assert_eq!(factory.for_kind(kind).kind(), kind);
        }
    }

    #[test]
    fn missing_code_dir_fails_before_spawn() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = sh_config(tmp.path(), "exit 0\n");
        config.function_folder = tmp.path().join("missing");

        let (tx, rx) = mpsc::channel();
        let mut handlers = OutputHandlers::new().with(ChannelOutputHandler::new(tx));
        let factory = RunnerFactory::default();
        let err = factory
            .for_config(&config)
            .run(&config, &mut handlers)
            .err()
            .unwrap();

        assert!(matches!(err, Error::PathNotFound { what: "code directory", .. }));
        drop(handlers);
        assert!(rx.iter().next().is_none());
        assert!(!config.job_folder.exists());
    }

    #[test]
    fn blocking_run_streams_and_reports_stderr() {
        let tmp = tempfile::tempdir().unwrap();
        let config = sh_config(
            tmp.path(),
            "echo hello\necho oops >&2\nprintf partial\nexit 3\n",
        );

        let (tx, rx) = mpsc::channel();
        let mut handlers = OutputHandlers::new()
            .with(FileOutputHandler::new())
            .with(ChannelOutputHandler::new(tx));
        let factory = RunnerFactory::default();
        let report = factory
            .for_config(&config)
            .run(&config, &mut handlers)
            .unwrap()
            .into_report(&mut handlers)
            .unwrap();

        assert_eq!(report.exit_code, 3);
        assert!(!report.timed_out);
        assert_eq!(report.error_message.as_deref(), Some("oops\n"));

        drop(handlers);
        let events: Vec<JobEvent> = rx.iter().collect();
        assert!(matches!(events.first(), Some(JobEvent::Started { .. })));
        assert_eq!(events.last(), Some(&JobEvent::Completed { exit_code: 3 }));

        let stdout = fs::read_to_string(config.logs_dir().join("stdout.log")).unwrap();
        assert!(stdout.starts_with("Starting job...\n"));
        assert!(stdout.contains("hello\npartial"));
        assert!(stdout.ends_with("Job completed with return code 3\n"));
    }

    #[test]
    fn clean_run_has_no_error_message() {
        let tmp = tempfile::tempdir().unwrap();
        let config = sh_config(tmp.path(), "printf ABC > \"$OUTPUT_DIR/output.txt\"\n");
        let mut handlers = OutputHandlers::new();
        let factory = RunnerFactory::default();
        let report = factory
            .for_config(&config)
            .run(&config, &mut handlers)
            .unwrap()
            .into_report(&mut handlers)
            .unwrap();

        assert_eq!(report.exit_code, 0);
        assert_eq!(report.error_message, None);
        let written = fs::read_to_string(config.output_dir().join("output.txt")).unwrap();
        assert_eq!(written, "ABC");
    }

    #[test]
    fn timeout_kills_the_process() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = sh_config(tmp.path(), "exec sleep 30\n");
        config.timeout = 1;
        let mut handlers = OutputHandlers::new();
        let factory = RunnerFactory::default();

        let started = Instant::now();
        let report = factory
            .for_config(&config)
            .run(&config, &mut handlers)
            .unwrap()
            .into_report(&mut handlers)
            .unwrap();

        assert!(report.timed_out);
        assert!(started.elapsed() < Duration::from_secs(20));
    }

    #[test]
    fn background_process_holding_stdout_cannot_outlive_the_timeout() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = sh_config(tmp.path(), "sleep 12 &\necho started\nexit 0\n");
        config.timeout = 2;
        let mut handlers = OutputHandlers::new();
        let factory = RunnerFactory::default();

        let started = Instant::now();
        let report = factory
            .for_config(&config)
            .run(&config, &mut handlers)
            .unwrap()
            .into_report(&mut handlers)
            .unwrap();

        assert!(report.timed_out);
        assert_eq!(report.exit_code, -1);
        assert!(started.elapsed() < Duration::from_secs(6), "{:?}", started.elapsed());
    }

    #[test]
    fn timeout_kills_grandchildren() {
        let tmp = tempfile::tempdir().unwrap();
        let marker = tmp.path().join("marker");
        let script = format!("sh -c \"sleep 3; touch '{}'\"\n", marker.display());
        let mut config = sh_config(tmp.path(), &script);
        config.timeout = 1;
        let mut handlers = OutputHandlers::new();
        let factory = RunnerFactory::default();

        let report = factory
            .for_config(&config)
            .run(&config, &mut handlers)
            .unwrap()
            .into_report(&mut handlers)
            .unwrap();
        assert!(report.timed_out);

        thread::sleep(Duration::from_secs(4));
        assert!(!marker.exists(), "grandchild survived the timeout");
    }

    #[test]
    fn clean_exit_reaps_leftover_background_processes() {
        let tmp = tempfile::tempdir().unwrap();
        let marker = tmp.path().join("marker");
        let script = format!(
            "(sleep 2; touch '{}') >/dev/null 2>&1 &\necho done\n",
            marker.display()
        );
        let config = sh_config(tmp.path(), &script);
        let mut handlers = OutputHandlers::new();
        let factory = RunnerFactory::default();

        let report = factory
            .for_config(&config)
            .run(&config, &mut handlers)
            .unwrap()
            .into_report(&mut handlers)
            .unwrap();
        assert_eq!(report.exit_code, 0);
        assert!(!report.timed_out);

        thread::sleep(Duration::from_secs(3));
        assert!(!marker.exists());
    }

    #[test]
    fn non_blocking_run_hands_back_the_process() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = sh_config(tmp.path(), "echo done\n");
        config.blocking = false;
        let mut handlers = OutputHandlers::new();
        let factory = RunnerFactory::default();

        let execution = factory.for_config(&config).run(&config, &mut handlers).unwrap();
        let handle = match execution {
            Execution::Detached(handle) => handle,
            Execution::Completed(_) => panic!("expected a detached handle"),
        };
        assert!(handle.id() > 0);
        let report = handle.wait(&mut handlers).unwrap();
        assert_eq!(report.exit_code, 0);
    }
}
