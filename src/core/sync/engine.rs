use std::process::{Command, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::{Duration, Instant};

use crate::core::error::{Error, Result};
use crate::core::sync::progress::parse_progress_line;
use crate::core::sync::summary::{parse_transfer_summary, TransferSummary};
use crate::core::sync::SyncCommand;
use crate::util::{self, spawn_line_reader, StreamKind};

pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(300);
const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Runs one command to completion. A timeout is reported as
/// [`Error::SyncTimeout`].
pub trait CommandExecutor {
    fn execute(&self, command: &SyncCommand, timeout: Duration) -> Result<CommandOutput>;
}

/// Spawns the command in its own process group and kills the whole group at
/// the deadline.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessExecutor;

impl CommandExecutor for ProcessExecutor {
    fn execute(&self, command: &SyncCommand, timeout: Duration) -> Result<CommandOutput> {
        let display = command.display();
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        util::isolate_process_group(&mut cmd);
        let mut child = cmd.spawn().map_err(|e| Error::SyncCommandFailed {
            command: display.clone(),
            exit_code: None,
            stderr: e.to_string(),
        })?;

        let (tx, rx) = mpsc::channel::<(StreamKind, String)>();
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(spawn_line_reader(StreamKind::Stdout, stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(spawn_line_reader(StreamKind::Stderr, stderr, tx.clone()));
        }
        drop(tx);

        let mut output = CommandOutput::default();
        let deadline = Instant::now() + timeout;
        let mut status = None;
        let mut streams_open = true;

        loop {
            if streams_open {
                match rx.recv_timeout(POLL_INTERVAL) {
                    Ok(line) => collect_line(line, &mut output),
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => streams_open = false,
                }
            } else {
                std::thread::sleep(POLL_INTERVAL);
            }
            if status.is_none() {
                status = child.try_wait().map_err(|e| Error::io(&command.program, e))?;
            }
            if status.is_some() && !streams_open {
                break;
            }
            if Instant::now() >= deadline {
                tracing::warn!(command = %command.display(), "sync command timed out, killing its process group");
                util::kill_process_group(child.id());
                let _ = child.kill();
                let _ = child.wait();
                return Err(Error::SyncTimeout {
                    command: display,
                    seconds: timeout.as_secs(),
                });
            }
        }

        for reader in readers {
            let _ = reader.join();
        }
        util::kill_process_group(child.id());
        while let Ok(line) = rx.try_recv() {
            collect_line(line, &mut output);
        }
        output.exit_code = status.and_then(|status| status.code());
        Ok(output)
    }
}

fn collect_line((stream, line): (StreamKind, String), output: &mut CommandOutput) {
    match stream {
        StreamKind::Stdout => {
            if let Some(progress) = parse_progress_line(&line) {
                tracing::trace!(bytes = progress.bytes, percent = progress.percent, "transfer progress");
            }
            output.stdout.push_str(&line);
        }
        StreamKind::Stderr => output.stderr.push_str(&line),
    }
}

/// Aggregate outcome of a batch of transfers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncResult {
    pub commands_executed: usize,
    pub successful_syncs: usize,
    pub failed_syncs: usize,
    pub errors: Vec<String>,
    pub elapsed: Duration,
}

impl SyncResult {
    pub fn success(&self) -> bool {
        self.failed_syncs == 0
    }

    pub fn merge(&mut self, other: SyncResult) {
        self.commands_executed += other.commands_executed;
        self.successful_syncs += other.successful_syncs;
        self.failed_syncs += other.failed_syncs;
        self.errors.extend(other.errors);
        self.elapsed += other.elapsed;
    }
}

/// Executes transfer commands one after another. A failing command is
/// recorded and the rest still run.
pub struct SyncEngine<E = ProcessExecutor> {
    executor: E,
    timeout: Duration,
}

impl SyncEngine<ProcessExecutor> {
    pub fn new() -> Self {
        Self::with_executor(ProcessExecutor)
    }
}

impl Default for SyncEngine<ProcessExecutor> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: CommandExecutor> SyncEngine<E> {
    pub fn with_executor(executor: E) -> Self {
        Self {
            executor,
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    /// Runs one command; a nonzero exit becomes [`Error::SyncCommandFailed`].
    pub fn run_one(&self, command: &SyncCommand) -> Result<Option<TransferSummary>> {
        tracing::debug!(command = %command.display(), "executing sync command");
        let output = self.executor.execute(command, self.timeout)?;
        if !output.success() {
            return Err(Error::SyncCommandFailed {
                command: command.display(),
                exit_code: output.exit_code,
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(parse_transfer_summary(&output.stdout))
    }

    pub fn execute(&self, commands: &[SyncCommand]) -> SyncResult {
        let started = Instant::now();
        let mut result = SyncResult::default();

        for command in commands {
            result.commands_executed += 1;
            match self.run_one(command) {
                Ok(summary) => {
                    result.successful_syncs += 1;
                    match summary {
                        Some(summary) => tracing::info!(
                            command = %command.display(),
                            sent_bytes = summary.sent_bytes,
                            received_bytes = summary.received_bytes,
                            total_size_bytes = summary.total_size_bytes,
                            "sync command succeeded"
                        ),
                        None => tracing::info!(command = %command.display(), "sync command succeeded"),
                    }
                }
                Err(err) => {
                    tracing::error!(command = %command.display(), error = %err, "sync command failed");
                    result.failed_syncs += 1;
                    result.errors.push(err.to_string());
                }
            }
        }

        result.elapsed = started.elapsed();
        if result.success() {
            tracing::info!(
                executed = result.commands_executed,
                elapsed_ms = result.elapsed.as_millis() as u64,
                "sync completed"
            );
        } else {
            tracing::warn!(
                executed = result.commands_executed,
                failed = result.failed_syncs,
                "sync completed with failures"
            );
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> SyncCommand {
        SyncCommand::new("sh", vec!["-c".into(), script.into()])
    }

    #[test]
    fn process_executor_captures_output() {
        let out = ProcessExecutor
            .execute(&sh("echo out; echo err >&2; exit 4"), Duration::from_secs(10))
            .unwrap();
        assert_eq!(out.exit_code, Some(4));
        assert_eq!(out.stdout, "out\n");
        assert_eq!(out.stderr, "err\n");
    }

    #[test]
    fn process_executor_times_out() {
        let err = ProcessExecutor
            .execute(&sh("exec sleep 30"), Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(err, Error::SyncTimeout { seconds: 1, .. }));
    }

    #[test]
    fn timeout_kills_the_whole_process_group() {
        let tmp = tempfile::tempdir().unwrap();
        let marker = tmp.path().join("marker");
        let script = format!("sh -c \"sleep 3; touch '{}'\"", marker.display());
        let err = ProcessExecutor
            .execute(&sh(&script), Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(err, Error::SyncTimeout { .. }));

        std::thread::sleep(Duration::from_secs(4));
        assert!(!marker.exists());
    }

    #[test]
    fn background_child_holding_the_pipe_hits_the_deadline() {
        let started = Instant::now();
        let err = ProcessExecutor
            .execute(&sh("sleep 12 & echo started"), Duration::from_secs(2))
            .unwrap_err();
        assert!(matches!(err, Error::SyncTimeout { seconds: 2, .. }));
        assert!(started.elapsed() < Duration::from_secs(6));
    }

    #[test]
    fn missing_program_is_a_command_failure() {
        let cmd = SyncCommand::new("highlow-no-such-rsync", vec![]);
        let result = SyncEngine::new().execute(&[cmd, sh("true")]);
        assert_eq!(result.commands_executed, 2);
        assert_eq!(result.failed_syncs, 1);
        assert_eq!(result.successful_syncs, 1);
        assert!(!result.success());
    }

    #[test]
    fn engine_reports_each_failure_and_keeps_going() {
        let commands = [sh("exit 0"), sh("echo nope >&2; exit 23"), sh("exec sleep 30"), sh("exit 0")];
        let result = SyncEngine::new()
            .timeout(Duration::from_secs(1))
            .execute(&commands);

        assert_eq!(result.commands_executed, 4);
        assert_eq!(result.successful_syncs, 2);
        assert_eq!(result.failed_syncs, 2);
        assert!(result.errors[0].contains("nope"));
        assert!(result.errors[1].contains("timed out"));
    }
}
