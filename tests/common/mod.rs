#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use highlow::core::dataset::{DatasetStore, NewDataset};
use highlow::core::sync::{CommandExecutor, CommandOutput, SyncCommand};
use highlow::Result;
use highlow::Workspace;

pub const PRINCIPAL: &str = "do@example.org";
pub const RUNTIME: &str = "highside";

/// Local stand-in for rsync. Understands the subset the sync engine emits:
/// trailing `/` on the source copies the directory's contents, otherwise a
/// single file is copied; `--ignore-existing` skips files already present.
#[derive(Clone, Default)]
pub struct LocalRsync {
    pub commands: Arc<Mutex<Vec<SyncCommand>>>,
}

impl LocalRsync {
    pub fn executed(&self) -> Vec<SyncCommand> {
        self.commands.lock().unwrap().clone()
    }
}

impl CommandExecutor for LocalRsync {
    fn execute(&self, command: &SyncCommand, _timeout: Duration) -> Result<CommandOutput> {
        self.commands.lock().unwrap().push(command.clone());
        assert_eq!(command.program, "rsync", "only rsync is emulated");

        let ignore_existing = command.args.iter().any(|arg| arg == "--ignore-existing");
        let n = command.args.len();
        let (source, dest) = (&command.args[n - 2], &command.args[n - 1]);

        let copied = if source.ends_with('/') {
            copy_contents(Path::new(source), Path::new(dest), ignore_existing)
        } else {
            copy_file(Path::new(source), Path::new(dest), ignore_existing)
        };
        Ok(match copied {
            Ok(()) => CommandOutput {
                exit_code: Some(0),
                stdout: "sent 10 bytes  received 20 bytes  60.00 bytes/sec\ntotal size is 30  speedup is 1.00\n"
                    .to_string(),
                stderr: String::new(),
            },
            Err(err) => CommandOutput {
                exit_code: Some(23),
                stdout: String::new(),
                stderr: format!("rsync: {err}"),
            },
        })
    }
}

fn copy_file(source: &Path, dest: &Path, ignore_existing: bool) -> std::io::Result<()> {
    if ignore_existing && dest.exists() {
        return Ok(());
    }
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(source, dest).map(|_| ())
}

fn copy_contents(source: &Path, dest: &Path, ignore_existing: bool) -> std::io::Result<()> {
    if !source.is_dir() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("change_dir \"{}\" failed", source.display()),
        ));
    }
    fs::create_dir_all(dest)?;
    for entry in fs::read_dir(source)? {
        let entry = entry?;
        let target = dest.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_contents(&entry.path(), &target, ignore_existing)?;
        } else {
            copy_file(&entry.path(), &target, ignore_existing)?;
        }
    }
    Ok(())
}

/// Fails the commands at the given positions with exit code 1.
#[derive(Clone, Default)]
pub struct ScriptedExecutor {
    pub failing: Vec<usize>,
    pub commands: Arc<Mutex<Vec<SyncCommand>>>,
}

impl CommandExecutor for ScriptedExecutor {
    fn execute(&self, command: &SyncCommand, _timeout: Duration) -> Result<CommandOutput> {
        let mut commands = self.commands.lock().unwrap();
        let index = commands.len();
        commands.push(command.clone());
        let exit_code = if self.failing.contains(&index) { 1 } else { 0 };
        Ok(CommandOutput {
            exit_code: Some(exit_code),
            stdout: String::new(),
            stderr: if exit_code == 0 { String::new() } else { "connection refused".to_string() },
        })
    }
}

pub fn write_file(path: &Path, content: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

/// Creates a dataset with one mock and one private CSV.
pub fn create_dataset(workspace: &Workspace, scratch: &Path, name: &str) {
    let mock = scratch.join(format!("{name}-mock"));
    let private = scratch.join(format!("{name}-private"));
    write_file(&mock.join("data.csv"), "id,value\n1,0.0\n");
    write_file(&private.join("data.csv"), "id,value\n1,42.0\n");

    DatasetStore::new(workspace)
        .create(NewDataset {
            name,
            mock_path: &mock,
            private_path: &private,
            summary: Some(format!("{name} sample")),
            readme_path: None,
            tags: vec!["test".to_string()],
        })
        .unwrap();
}

/// A code folder with `main.sh`.
pub fn sh_job(scratch: &Path, script: &str) -> PathBuf {
    let code = scratch.join("job-code");
    write_file(&code.join("main.sh"), script);
    code
}
