use std::path::Path;

use crate::core::sync::{Connection, SyncDirection, SyncEntry};

pub const RSYNC: &str = "rsync";

/// A transfer ready to execute: program plus argv, no shell involved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl SyncCommand {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn from_entry(entry: &SyncEntry, connection: &Connection) -> Self {
        let mut args: Vec<String> = vec!["-avh".into(), "--progress".into(), "--mkpath".into()];
        if entry.ignore_existing {
            args.push("--ignore-existing".into());
        }
        for pattern in &entry.excludes {
            args.push(format!("--exclude={pattern}"));
        }

        let local = transfer_path(&entry.local_dir);
        let remote = transfer_path(&entry.remote_dir);
        let remote = match connection {
            Connection::Local => remote,
            Connection::Ssh(ssh) => {
                args.push("-e".into());
                args.push(shell_words::join(ssh.ssh_argv()));
                format!("{}:{remote}", ssh.destination())
            }
        };

        match entry.direction {
            SyncDirection::LocalToRemote => {
                args.push(local);
                args.push(remote);
            }
            SyncDirection::RemoteToLocal => {
                args.push(remote);
                args.push(local);
            }
        }
        Self::new(RSYNC, args)
    }

    /// Single-file transfer; neither side gets a trailing separator.
    pub fn copy_file(source: &Path, destination: &Path, connection: &Connection, to_remote: bool) -> Self {
        let entry = SyncEntry {
            local_dir: if to_remote { source } else { destination }.to_path_buf(),
            remote_dir: if to_remote { destination } else { source }.to_path_buf(),
            direction: if to_remote {
                SyncDirection::LocalToRemote
            } else {
                SyncDirection::RemoteToLocal
            },
            ignore_existing: false,
            excludes: Vec::new(),
        };
        Self::from_entry(&entry, connection)
    }

    pub fn argv(&self) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.args.len() + 1);
        argv.push(self.program.clone());
        argv.extend(self.args.iter().cloned());
        argv
    }

    /// Shell-quoted form, for logs and error messages.
    pub fn display(&self) -> String {
        shell_words::join(self.argv())
    }
}

/// A path with a file extension is transferred as a file. Anything else is
/// a directory and gets a trailing `/`, so its contents are copied rather
/// than the directory itself. Extension-less files are misread as
/// directories.
pub fn transfer_path(path: &Path) -> String {
    let text = path.to_string_lossy().to_string();
    if is_file_path(path) || text.ends_with('/') {
        text
    } else {
        format!("{text}/")
    }
}

pub fn is_file_path(path: &Path) -> bool {
    path.extension().is_some()
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::core::sync::SshConnection;

    #[test]
    fn directories_get_trailing_separators() {
        let entry = SyncEntry::new("/high/done", "/low/done", SyncDirection::LocalToRemote, false);
        let cmd = SyncCommand::from_entry(&entry, &Connection::Local);
        assert_eq!(cmd.program, "rsync");
        assert_eq!(cmd.args, ["-avh", "--progress", "--mkpath", "/high/done/", "/low/done/"]);
    }

    #[test]
    fn file_destination_has_no_separator() {
        let cmd = SyncCommand::copy_file(
            &PathBuf::from("/high/rt/config.yaml"),
            &PathBuf::from("/low/rt/config.yaml"),
            &Connection::Local,
            true,
        );
        let n = cmd.args.len();
        assert_eq!(&cmd.args[n - 2..], ["/high/rt/config.yaml", "/low/rt/config.yaml"]);
        assert!(!cmd.args.contains(&"--ignore-existing".to_string()));
    }

    #[test]
    fn ssh_remote_to_local_with_excludes() {
        let mut ssh = SshConnection::new("low.example.org", "ops");
        ssh.port = 2222;
        ssh.ssh_key_path = Some(PathBuf::from("/keys/low"));
        let entry = SyncEntry::new("/high/jobs", "/srv/low/jobs", SyncDirection::RemoteToLocal, true)
            .exclude("*.tmp");

        let cmd = SyncCommand::from_entry(&entry, &Connection::Ssh(ssh));
        assert_eq!(
            cmd.args,
            [
                "-avh",
                "--progress",
                "--mkpath",
                "--ignore-existing",
                "--exclude=*.tmp",
                "-e",
                "ssh -p 2222 -i /keys/low",
                "ops@low.example.org:/srv/low/jobs/",
                "/high/jobs/",
            ]
        );
        assert!(cmd.display().contains("-e 'ssh -p 2222 -i /keys/low'"));
    }
}
