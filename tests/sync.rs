mod common;

use std::path::Path;

use highlow::core::sync::command::transfer_path;
use highlow::core::sync::{Connection, SshConnection, SyncCommand, SyncDirection, SyncEngine, SyncEntry};

use common::ScriptedExecutor;

fn transfer(source: &str, dest: &str) -> SyncCommand {
    SyncCommand::copy_file(Path::new(source), Path::new(dest), &Connection::Local, true)
}

#[test]
fn failing_command_does_not_stop_the_rest() {
    let executor = ScriptedExecutor {
        failing: vec![1],
        ..ScriptedExecutor::default()
    };
    let engine = SyncEngine::with_executor(executor.clone());
    let commands = [
        transfer("/high/a.json", "/low/a.json"),
        transfer("/high/b.json", "/low/b.json"),
        transfer("/high/c.json", "/low/c.json"),
    ];

    let result = engine.execute(&commands);
    assert_eq!(result.commands_executed, 3);
    assert_eq!(result.successful_syncs, 2);
    assert_eq!(result.failed_syncs, 1);
    assert!(!result.success());
    assert_eq!(result.errors.len(), 1);
    assert!(result.errors[0].contains("connection refused"));

    let executed = executor.commands.lock().unwrap();
    assert_eq!(executed.len(), 3);
    assert_eq!(executed[2], commands[2]);
}

#[test]
fn directory_transfers_end_with_a_separator() {
    let entry = SyncEntry::new(
        "/high/datasites/owner/public/syft_datasets/alpha",
        "/low/datasites/owner/public/syft_datasets/alpha",
        SyncDirection::LocalToRemote,
        true,
    );
    let command = SyncCommand::from_entry(&entry, &Connection::Local);
    let n = command.args.len();
    assert_eq!(command.args[n - 2], "/high/datasites/owner/public/syft_datasets/alpha/");
    assert_eq!(command.args[n - 1], "/low/datasites/owner/public/syft_datasets/alpha/");

    let ssh = Connection::Ssh(SshConnection::new("low.internal", "ops"));
    let command = SyncCommand::from_entry(&entry, &ssh);
    assert!(command.args.last().unwrap().starts_with("ops@low.internal:/low/"));
    assert!(command.args.last().unwrap().ends_with("alpha/"));
}

#[test]
fn file_transfers_never_get_a_separator() {
    for path in ["/low/rt/config.yaml", "/low/done/1f2e.json", "/low/out/table.parquet"] {
        assert_eq!(transfer_path(Path::new(path)), path);
    }
    let command = transfer("/high/rt/config.yaml", "/low/rt/config.yaml");
    assert!(command.args.iter().all(|arg| !arg.ends_with(".yaml/")));
    assert!(!command.args.contains(&"--ignore-existing".to_string()));
}
