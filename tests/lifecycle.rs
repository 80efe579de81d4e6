mod common;

use std::fs;
use std::path::PathBuf;
use std::sync::mpsc;

use highlow::core::dataset::DatasetResolver;
use highlow::core::event::{ChannelOutputHandler, OutputHandlers};
use highlow::core::lifecycle;
use highlow::core::run_job;
use highlow::core::runner::RunnerFactory;
use highlow::{
    Error, HighSide, Job, JobConfig, JobErrorKind, JobStatus, JobSubmission, Runtime, RuntimeConfig,
    RuntimeDirectory, Workspace,
};

use common::{create_dataset, sh_job, PRINCIPAL, RUNTIME};

struct FixedData(PathBuf);

impl DatasetResolver for FixedData {
    fn resolve_data_dir(&self, _dataset_name: &str) -> highlow::Result<PathBuf> {
        Ok(self.0.clone())
    }
}

fn sh_runtime() -> Runtime {
    Runtime::new(RuntimeConfig::interpreter(vec!["sh".to_string()]))
}

fn runtime_dir(root: &std::path::Path) -> RuntimeDirectory {
    let dir = RuntimeDirectory::new(root.join("rt"));
    dir.init(RUNTIME, &["sh".to_string()]).unwrap();
    dir
}

#[test]
fn missing_code_directory_fails_before_the_process_starts() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = runtime_dir(tmp.path());
    let missing = tmp.path().join("no-such-code");
    let id = dir
        .submit(JobSubmission::new("alpha", &missing, vec!["main.py".to_string()], sh_runtime()))
        .unwrap();
    let job = dir.get(&id).unwrap();

    let data = tmp.path().join("data");
    fs::create_dir_all(&data).unwrap();
    let work = tmp.path().join("work");
    let config = JobConfig::for_job(&job, job.code_dir.clone(), data, work.clone());

    let (tx, rx) = mpsc::channel();
    let mut handlers = OutputHandlers::new().with(ChannelOutputHandler::new(tx));
    let err = run_job(&job, &config, &RunnerFactory::default(), &mut handlers).unwrap_err();

    assert!(matches!(err, Error::PathNotFound { what: "code directory", .. }), "{err}");
    assert!(rx.try_recv().is_err(), "no job events expected");
    assert!(!work.exists());
    assert_eq!(dir.status(&id).unwrap(), JobStatus::PendingCodeReview);
}

#[test]
fn queue_records_missing_code_without_starting_the_job() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = runtime_dir(tmp.path());
    let data = tmp.path().join("data");
    fs::create_dir_all(&data).unwrap();

    let id = dir
        .submit(JobSubmission::new(
            "alpha",
            tmp.path().join("no-such-code"),
            vec!["main.py".to_string()],
            sh_runtime(),
        ))
        .unwrap();

    let mut started = 0;
    let report = dir
        .process_queue(&RunnerFactory::default(), &FixedData(data), &mut |_: &Job| {
            started += 1;
            OutputHandlers::new()
        })
        .unwrap();
    assert_eq!((report.processed, report.failed), (1, 1));
    assert_eq!(started, 0);

    let job = dir.get(&id).unwrap();
    assert_eq!(job.status, JobStatus::RunFailed);
    assert_eq!(job.error, JobErrorKind::ExecutionFailed);
    assert!(job.error_message.unwrap().contains("code directory"));
    assert!(!dir.running_dir().join(&id).exists());
}

#[test]
fn rejecting_pending_and_shared_jobs() {
    let tmp = tempfile::tempdir().unwrap();
    let ws = Workspace::high(tmp.path().join("high"), PRINCIPAL);
    create_dataset(&ws, &tmp.path().join("scratch"), "alpha");
    let high = HighSide::initialize(ws, RUNTIME, &["sh".to_string()], false).unwrap();
    let dir = high.runtime_dir();
    let code = sh_job(tmp.path(), "echo hello\n");

    let pending = dir
        .submit_bundled(JobSubmission::new("alpha", &code, vec!["main.sh".to_string()], sh_runtime()))
        .unwrap();
    let rejected = high.reject(&pending, "bad code").unwrap();
    assert_eq!(rejected.status, JobStatus::Rejected);
    assert_eq!(rejected.error, JobErrorKind::FailedCodeReview);
    assert_eq!(rejected.error_message.as_deref(), Some("bad code"));
    assert_eq!(dir.status(&pending).unwrap(), JobStatus::Rejected);

    let finished = dir
        .submit_bundled(JobSubmission::new("alpha", &code, vec!["main.sh".to_string()], sh_runtime()))
        .unwrap();
    let report = high
        .process_queue(&RunnerFactory::default(), &mut |_: &Job| OutputHandlers::new())
        .unwrap();
    assert_eq!(report.finished, 1);
    assert_eq!(high.share(&finished).unwrap().status, JobStatus::Shared);

    let err = high.reject(&finished, "too late").unwrap_err();
    assert!(matches!(
        err,
        Error::InvalidTransition {
            action: "reject",
            from: JobStatus::Shared
        }
    ));
    assert_eq!(dir.status(&finished).unwrap(), JobStatus::Shared);
}

#[test]
fn failed_status_without_error_is_invalid() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = runtime_dir(tmp.path());
    let id = dir
        .submit(JobSubmission::new("alpha", tmp.path(), vec!["main.sh".to_string()], sh_runtime()))
        .unwrap();
    let mut job = dir.get(&id).unwrap();

    job.status = JobStatus::RunFailed;
    job.error = JobErrorKind::NoError;
    assert!(matches!(lifecycle::validate(&job), Err(Error::Validation { .. })));

    job.error = JobErrorKind::Timeout;
    lifecycle::validate(&job).unwrap();
}

#[test]
fn error_marker_on_stderr_fails_a_clean_exit() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = runtime_dir(tmp.path());
    let data = tmp.path().join("data");
    fs::create_dir_all(&data).unwrap();
    let code = sh_job(tmp.path(), "echo '12:00:01 | ERROR | could not read input' >&2\nexit 0\n");

    let id = dir
        .submit_bundled(JobSubmission::new("alpha", &code, vec!["main.sh".to_string()], sh_runtime()))
        .unwrap();
    dir.process_queue(&RunnerFactory::default(), &FixedData(data), &mut |_: &Job| OutputHandlers::new())
        .unwrap();

    let job = dir.get(&id).unwrap();
    assert_eq!(job.status, JobStatus::RunFailed);
    assert_eq!(job.error, JobErrorKind::ExecutionFailed);
    assert!(job.error_message.unwrap().contains("could not read input"));
    // The job still ran, so its logs are kept.
    let results = dir.root().join(RuntimeDirectory::results_location(&id));
    assert!(results.join("logs").is_dir());
}
