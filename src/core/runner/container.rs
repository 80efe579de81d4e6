use std::io::Write;
use std::process::{Command, Stdio};

use crate::core::error::{Error, Result};
use crate::core::event::OutputHandlers;
use crate::core::job_config::{absolute, JobConfig};
use crate::core::runtime::{ContainerConfig, ContainerMount, MountMode, RuntimeConfig, RuntimeKind};

use super::mounts::MountRegistry;
use super::{launch, prepare_job_folders, validate_paths, Execution, JobRunner, RunnerSettings};

const CODE_MOUNT: &str = "/app/code";
const OUTPUT_MOUNT: &str = "/app/output";
const CONTAINER_PREFIX: &str = "highlow-";

/// Runs jobs inside a throwaway container with no network, no capabilities
/// and the job's resource ceilings applied.
pub struct ContainerRunner<'a> {
    settings: &'a RunnerSettings,
    mounts: &'a MountRegistry,
}

impl<'a> ContainerRunner<'a> {
    pub fn new(settings: &'a RunnerSettings, mounts: &'a MountRegistry) -> Self {
        Self { settings, mounts }
    }

    fn container_config(config: &JobConfig) -> Result<&ContainerConfig> {
        match &config.runtime.config {
            RuntimeConfig::Container(container) => Ok(container),
            other => Err(Error::Validation {
                message: format!(
                    "runtime '{}' is a {} runtime, not a container runtime",
                    config.runtime.name,
                    other.kind()
                ),
            }),
        }
    }

    pub fn image_name(config: &JobConfig) -> Result<String> {
        let container = Self::container_config(config)?;
        Ok(container
            .image_name
            .clone()
            .unwrap_or_else(|| config.runtime.name.clone()))
    }

    /// Deterministic per job folder, so a timed-out container can be
    /// stopped by name after its CLI client has been killed.
    pub fn container_name(config: &JobConfig) -> String {
        let folder = config
            .job_folder
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        let folder: String = folder
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') { c } else { '-' })
            .collect();
        format!("{CONTAINER_PREFIX}{folder}")
    }

    fn kill_command(&self, name: &str) -> Command {
        let mut cmd = Command::new(&self.settings.engine);
        cmd.args(["kill", name]);
        cmd
    }

    fn check_engine(&self) -> Result<()> {
        let engine = &self.settings.engine;
        let output = Command::new(engine)
            .arg("info")
            .stdin(Stdio::null())
            .output()
            .map_err(|e| Error::SandboxUnavailable {
                engine: engine.clone(),
                message: e.to_string(),
            })?;
        if !output.status.success() {
            return Err(Error::SandboxUnavailable {
                engine: engine.clone(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }

    fn image_exists(&self, image: &str) -> bool {
        Command::new(&self.settings.engine)
            .args(["image", "inspect", image])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false)
    }

    fn build_image(&self, image: &str, dockerfile: &str) -> Result<()> {
        tracing::info!(image, engine = %self.settings.engine, "building image");
        let context = self.settings.build_context.to_string_lossy().to_string();
        let mut child = Command::new(&self.settings.engine)
            .args(["build", "-t", image, "-f", "-", &context])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::SandboxUnavailable {
                engine: self.settings.engine.clone(),
                message: e.to_string(),
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(dockerfile.as_bytes())
                .map_err(|e| Error::BuildFailure {
                    image: image.to_string(),
                    stderr: e.to_string(),
                })?;
        }

        let output = child.wait_with_output().map_err(|e| Error::BuildFailure {
            image: image.to_string(),
            stderr: e.to_string(),
        })?;
        if !output.status.success() {
            return Err(Error::BuildFailure {
                image: image.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        tracing::info!(image, "image built");
        Ok(())
    }

    fn ensure_image(&self, config: &JobConfig) -> Result<String> {
        let container = Self::container_config(config)?;
        let image = Self::image_name(config)?;
        if self.image_exists(&image) {
            tracing::debug!(image = %image, "image already present");
        } else {
            self.build_image(&image, &container.dockerfile_content)?;
        }
        Ok(image)
    }

    /// Arguments after the engine binary, starting with `run`.
    pub fn run_args(&self, config: &JobConfig, image: &str) -> Result<Vec<String>> {
        let container = Self::container_config(config)?;
        let limits = &config.resources;
        let mut args: Vec<String> = vec!["run".into(), "--rm".into()];
        args.extend(["--name".into(), Self::container_name(config)]);

        args.extend(["--cap-drop".into(), "ALL".into()]);
        args.extend(["--network".into(), "none".into()]);
        args.extend([
            "--tmpfs".into(),
            format!("/tmp:size={},noexec,nosuid,nodev", limits.tmpfs_size),
        ]);
        args.extend(["--memory".into(), limits.memory.clone()]);
        args.extend(["--cpus".into(), limits.cpus.clone()]);
        args.extend(["--pids-limit".into(), limits.pids_limit.to_string()]);
        args.extend([
            "--ulimit".into(),
            format!("nproc={}:{}", limits.nproc, limits.nproc),
        ]);
        args.extend([
            "--ulimit".into(),
            format!("nofile={}:{}", limits.nofile, limits.nofile),
        ]);
        args.extend([
            "--ulimit".into(),
            format!("fsize={}:{}", limits.fsize_bytes, limits.fsize_bytes),
        ]);

        let entry_in_container = format!("{CODE_MOUNT}/{}", config.entrypoint());
        let interpreter = container.cmd.join(" ");
        let mut env = config.extra_env.clone();
        env.insert("TIMEOUT".into(), config.timeout.to_string());
        env.insert("DATA_DIR".into(), config.data_mount_dir.clone());
        env.insert("OUTPUT_DIR".into(), OUTPUT_MOUNT.into());
        env.insert("CODE_DIR".into(), CODE_MOUNT.into());
        env.insert("INTERPRETER".into(), interpreter);
        env.insert("INPUT_FILE".into(), entry_in_container.clone());
        for (key, value) in env {
            args.extend(["-e".into(), format!("{key}={value}")]);
        }

        let mut mounts = vec![
            ContainerMount {
                source: absolute(&config.function_folder),
                target: CODE_MOUNT.into(),
                mode: MountMode::Ro,
            },
            ContainerMount {
                source: absolute(&config.data_path),
                target: config.data_mount_dir.clone().into(),
                mode: MountMode::Ro,
            },
            ContainerMount {
                source: absolute(&config.output_dir()),
                target: OUTPUT_MOUNT.into(),
                mode: MountMode::Rw,
            },
        ];
        mounts.extend(container.extra_mounts.iter().cloned());
        if let Some(app_name) = container.app_name.as_deref() {
            mounts.extend(self.mounts.mounts_for(app_name, config));
        }
        for mount in mounts {
            args.extend([
                "-v".into(),
                format!(
                    "{}:{}:{}",
                    mount.source.display(),
                    mount.target.display(),
                    mount.mode.as_str()
                ),
            ]);
        }

        args.extend(["--workdir".into(), self.settings.container_workdir.clone()]);
        args.push(image.to_string());
        args.extend(container.cmd.iter().cloned());
        args.push(entry_in_container);
        args.extend(config.args.iter().skip(1).cloned());
        Ok(args)
    }
}

impl JobRunner for ContainerRunner<'_> {
    fn kind(&self) -> RuntimeKind {
        RuntimeKind::Container
    }

    fn validate(&self, config: &JobConfig) -> Result<()> {
        validate_paths(config)?;
        Self::container_config(config).map(|_| ())
    }

    fn run(&self, config: &JobConfig, handlers: &mut OutputHandlers) -> Result<Execution> {
        self.validate(config)?;
        self.check_engine()?;
        let image = self.ensure_image(config)?;
        prepare_job_folders(config)?;

        let args = self.run_args(config, &image)?;
        tracing::info!(
            engine = %self.settings.engine,
            command = %shell_words::join(&args),
            "starting container job"
        );

        let mut cmd = Command::new(&self.settings.engine);
        cmd.args(&args);
        let on_kill = self.kill_command(&Self::container_name(config));
        launch(cmd, config, handlers, self.settings, Some(on_kill))
    }
}
