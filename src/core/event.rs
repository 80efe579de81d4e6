use std::fs::File;
use std::io::{self, Write};
use std::sync::mpsc::Sender;

use crossterm::style::Stylize;

use crate::core::formatter::format_job_banner;
use crate::core::job_config::JobConfig;

#[derive(Debug, Clone, PartialEq)]
pub enum LogLevel {
    Error,
    Warning,
    Info,
    Noise,
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    Started { job_folder: String },
    Progress { stdout: String, stderr: String },
    Completed { exit_code: i32 },
}

/// Classifies a line of job output for display.
pub fn classify_log_line(line: &str) -> LogLevel {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return LogLevel::Noise;
    }

    if trimmed.contains("| ERROR") || trimmed.contains("| CRITICAL") {
        return LogLevel::Error;
    }
    if trimmed.contains("| WARNING") {
        return LogLevel::Warning;
    }

    let lower = trimmed.to_ascii_lowercase();
    if lower.starts_with("traceback") || lower.contains("error") || lower.contains("no such file") {
        return LogLevel::Error;
    }
    if lower.contains("warning") || lower.contains("deprecated") {
        return LogLevel::Warning;
    }

    LogLevel::Info
}

/// Observer of one job execution. Chunks may be empty or partial lines.
pub trait JobOutputHandler: Send {
    fn on_job_start(&mut self, config: &JobConfig);
    fn on_job_progress(&mut self, stdout: &str, stderr: &str);
    fn on_job_completion(&mut self, exit_code: i32);
}

#[derive(Default)]
pub struct OutputHandlers {
    handlers: Vec<Box<dyn JobOutputHandler>>,
}

impl OutputHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, handler: impl JobOutputHandler + 'static) -> Self {
        self.push(handler);
        self
    }

    pub fn push(&mut self, handler: impl JobOutputHandler + 'static) {
        self.handlers.push(Box::new(handler));
    }

    pub fn append(&mut self, mut other: OutputHandlers) {
        self.handlers.append(&mut other.handlers);
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn start(&mut self, config: &JobConfig) {
        for handler in &mut self.handlers {
            handler.on_job_start(config);
        }
    }

    pub fn progress(&mut self, stdout: &str, stderr: &str) {
        for handler in &mut self.handlers {
            handler.on_job_progress(stdout, stderr);
        }
    }

    pub fn completion(&mut self, exit_code: i32) {
        for handler in &mut self.handlers {
            handler.on_job_completion(exit_code);
        }
    }
}

/// Writes `logs/stdout.log` and `logs/stderr.log` under the job folder.
#[derive(Default)]
pub struct FileOutputHandler {
    stdout: Option<File>,
    stderr: Option<File>,
}

impl FileOutputHandler {
    pub fn new() -> Self {
        Self::default()
    }

    fn write_both(&mut self, stdout: &str, stderr: &str) {
        if !stdout.is_empty() {
            if let Some(file) = self.stdout.as_mut() {
                if let Err(err) = file.write_all(stdout.as_bytes()).and_then(|_| file.flush()) {
                    tracing::warn!(error = %err, "failed to write stdout log");
                }
            }
        }
        if !stderr.is_empty() {
            if let Some(file) = self.stderr.as_mut() {
                if let Err(err) = file.write_all(stderr.as_bytes()).and_then(|_| file.flush()) {
                    tracing::warn!(error = %err, "failed to write stderr log");
                }
            }
        }
    }
}

impl JobOutputHandler for FileOutputHandler {
    fn on_job_start(&mut self, config: &JobConfig) {
        let logs_dir = config.logs_dir();
        let open = |name: &str| match File::create(logs_dir.join(name)) {
            Ok(file) => Some(file),
            Err(err) => {
                tracing::warn!(error = %err, path = %logs_dir.join(name).display(), "cannot open log file");
                None
            }
        };
        self.stdout = open("stdout.log");
        self.stderr = open("stderr.log");
        self.write_both("Starting job...\n", "Starting job...\n");
    }

    fn on_job_progress(&mut self, stdout: &str, stderr: &str) {
        self.write_both(stdout, stderr);
    }

    fn on_job_completion(&mut self, exit_code: i32) {
        let line = format!("Job completed with return code {exit_code}\n");
        self.write_both(&line, &line);
        self.stdout = None;
        self.stderr = None;
    }
}

/// Streams job output to the terminal.
pub struct ConsoleOutputHandler {
    show_stdout: bool,
    show_stderr: bool,
    running: bool,
}

impl ConsoleOutputHandler {
    pub fn new(show_stdout: bool, show_stderr: bool) -> Self {
        Self {
            show_stdout,
            show_stderr,
            running: false,
        }
    }
}

impl JobOutputHandler for ConsoleOutputHandler {
    fn on_job_start(&mut self, config: &JobConfig) {
        let mut out = io::stdout();
        let _ = writeln!(out, "{}", format_job_banner(config).cyan());
        let _ = writeln!(out, "{}", "[STARTING JOB]".bold());
        self.running = true;
    }

    fn on_job_progress(&mut self, stdout: &str, stderr: &str) {
        if !self.running {
            return;
        }
        let mut out = io::stdout();
        if !stdout.is_empty() && self.show_stdout {
            let _ = write!(out, "{stdout}");
        }
        if !stderr.is_empty() && self.show_stderr {
            let styled = match classify_log_line(stderr) {
                LogLevel::Error => stderr.red().to_string(),
                LogLevel::Warning => stderr.yellow().to_string(),
                _ => stderr.dark_grey().to_string(),
            };
            let _ = write!(out, "{styled}");
        }
        let _ = out.flush();
    }

    fn on_job_completion(&mut self, exit_code: i32) {
        self.running = false;
        let mut out = io::stdout();
        if exit_code == 0 {
            let _ = writeln!(out, "\n{}", "[JOB COMPLETED SUCCESSFULLY]".green().bold());
        } else {
            let _ = writeln!(
                out,
                "\n{}",
                format!("[JOB FAILED] Return code: {exit_code}").red().bold()
            );
        }
    }
}

/// Forwards events to another thread.
pub struct ChannelOutputHandler {
    sender: Sender<JobEvent>,
}

impl ChannelOutputHandler {
    pub fn new(sender: Sender<JobEvent>) -> Self {
        Self { sender }
    }
}

impl JobOutputHandler for ChannelOutputHandler {
    fn on_job_start(&mut self, config: &JobConfig) {
        let _ = self.sender.send(JobEvent::Started {
            job_folder: config.job_folder.to_string_lossy().to_string(),
        });
    }

    fn on_job_progress(&mut self, stdout: &str, stderr: &str) {
        let _ = self.sender.send(JobEvent::Progress {
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
        });
    }

    fn on_job_completion(&mut self, exit_code: i32) {
        let _ = self.sender.send(JobEvent::Completed { exit_code });
    }
}
