use std::path::PathBuf;
use std::process::Command;

use crate::core::error::{Error, Result};
use crate::core::event::OutputHandlers;
use crate::core::job_config::{absolute, JobConfig};
use crate::core::runtime::RuntimeKind;

use super::{launch, prepare_job_folders, validate_paths, Execution, JobRunner, RunnerSettings};

/// Runs the entrypoint with a host interpreter, e.g. `python3 main.py`.
/// Only the timeout is enforced; there is no filesystem or network
/// isolation.
pub struct InterpreterRunner<'a> {
    settings: &'a RunnerSettings,
}

impl<'a> InterpreterRunner<'a> {
    pub fn new(settings: &'a RunnerSettings) -> Self {
        Self { settings }
    }

    /// Program, arguments and working directory for `config`.
    pub fn command_line(config: &JobConfig) -> Result<(Vec<String>, PathBuf)> {
        let cmd = config.runtime.cmd();
        if cmd.is_empty() {
            return Err(Error::Validation {
                message: format!("runtime '{}' has an empty interpreter command", config.runtime.name),
            });
        }
        let mut argv: Vec<String> = cmd.to_vec();
        argv.push(absolute(&config.entrypoint_path()).to_string_lossy().to_string());
        argv.extend(config.args.iter().skip(1).cloned());
        Ok((argv, absolute(&config.job_folder)))
    }
}

impl JobRunner for InterpreterRunner<'_> {
    fn kind(&self) -> RuntimeKind {
        RuntimeKind::Interpreter
    }

    fn validate(&self, config: &JobConfig) -> Result<()> {
        validate_paths(config)?;
        let entrypoint = config.entrypoint_path();
        if !entrypoint.is_file() {
            return Err(Error::PathNotFound {
                what: "entrypoint",
                path: entrypoint,
            });
        }
        Self::command_line(config).map(|_| ())
    }

    fn run(&self, config: &JobConfig, handlers: &mut OutputHandlers) -> Result<Execution> {
        self.validate(config)?;
        prepare_job_folders(config)?;

        let (argv, workdir) = Self::command_line(config)?;
        tracing::info!(command = %shell_words::join(&argv), "starting interpreter job");

        let mut cmd = Command::new(&argv[0]);
        cmd.args(&argv[1..]).current_dir(workdir).envs(config.env());
        launch(cmd, config, handlers, self.settings, None)
    }
}
