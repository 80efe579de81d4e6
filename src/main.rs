mod cli;

use std::sync::atomic::AtomicBool;
use std::time::Duration;

use clap::Parser;
use crossterm::style::Stylize;
use tracing_subscriber::EnvFilter;

use highlow::core::dataset::{DatasetStore, NewDataset};
use highlow::core::event::{ConsoleOutputHandler, OutputHandlers};
use highlow::core::formatter::{format_bytes, format_job_line, format_sync_result};
use highlow::core::results::OutputValue;
use highlow::core::runner::{RunnerFactory, RunnerSettings};
use highlow::core::sync::{SyncEngine, SyncResult};
use highlow::{HighSide, JobStatus, JobSubmission, LowSide, Result, Workspace};

use cli::{Cli, Commands, DatasetCommand, HighCommand, LowCommand, RuntimeCommand, SyncScope};

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(err) = run(cli) {
        eprintln!("{} {err}", "error:".red().bold());
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "info,highlow=debug" } else { "warn,highlow=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::High(command) => {
            let workspace = Workspace::high(&cli.root, &cli.principal);
            run_high(workspace, &cli.runtime, command)
        }
        Commands::Low(command) => {
            let workspace = Workspace::low(&cli.root, &cli.principal);
            run_low(LowSide::new(workspace, &cli.runtime), command)
        }
        Commands::Dataset(command) => {
            let workspace = Workspace::high(&cli.root, &cli.principal);
            run_dataset(&workspace, command)
        }
        Commands::Runtime(RuntimeCommand::Name(args)) => {
            let runtime = cli::runtime_from_args(&args)?;
            println!("{}", runtime.name);
            Ok(())
        }
    }
}

fn sync_engine(timeout_secs: u64) -> SyncEngine {
    SyncEngine::new().timeout(Duration::from_secs(timeout_secs))
}

fn print_sync(result: &SyncResult) {
    let text = format_sync_result(result);
    if result.success() {
        println!("{}", text.green());
    } else {
        println!("{}", text.yellow());
    }
}

fn run_high(workspace: Workspace, runtime: &str, command: HighCommand) -> Result<()> {
    let high = HighSide::new(workspace.clone(), runtime);
    match command {
        HighCommand::Init { cmd, force } => {
            let argv = cli::split_command(&cmd)?;
            let high = HighSide::initialize(workspace, runtime, &argv, force)?;
            println!("initialized {}", high.runtime_dir().root().display());
        }
        HighCommand::Connect(args) => {
            let connection = cli::connection_from_args(&args)?;
            let (config, result) = high.connect_low(&args.low_root, connection, &sync_engine(300))?;
            println!("connected to {} ({} entries)", config.low_root.display(), config.entries.len());
            print_sync(&result);
        }
        HighCommand::Sync { scope, timeout_secs } => {
            let engine = sync_engine(timeout_secs);
            let result = match scope {
                SyncScope::Pull => high.sync_pending_jobs(&engine)?,
                SyncScope::Push => high.sync_done_jobs(&engine)?,
                SyncScope::All => high.sync_all(&engine)?,
            };
            print_sync(&result);
        }
        HighCommand::SyncDataset { name, timeout_secs } => {
            let result = high.sync_dataset(&name, &sync_engine(timeout_secs))?;
            print_sync(&result);
        }
        HighCommand::RunQueue(args) => {
            let runners = RunnerFactory::new(RunnerSettings {
                engine: args.engine.clone(),
                ..RunnerSettings::default()
            });
            let quiet = args.quiet;
            let mut make_handlers = move |_: &highlow::Job| {
                if quiet {
                    OutputHandlers::new()
                } else {
                    OutputHandlers::new().with(ConsoleOutputHandler::new(true, true))
                }
            };
            let interval = Duration::from_millis(args.interval_ms);
            let stop = AtomicBool::new(false);

            if args.sync && args.watch {
                high.serve(&runners, &sync_engine(300), &mut make_handlers, interval, &stop)?;
            } else if args.watch {
                let dir = high.runtime_dir();
                dir.reconcile()?;
                dir.watch(&runners, &high.datasets(), &mut make_handlers, interval, &stop)?;
            } else {
                let engine = sync_engine(300);
                if args.sync {
                    print_sync(&high.sync_pending_jobs(&engine)?);
                }
                let report = high.process_queue(&runners, &mut make_handlers)?;
                println!(
                    "processed {} job(s): {} finished, {} failed, {} skipped",
                    report.processed, report.finished, report.failed, report.skipped
                );
                if args.sync && report.processed > 0 {
                    print_sync(&high.sync_done_jobs(&engine)?);
                }
            }
        }
        HighCommand::Jobs => {
            let dir = high.runtime_dir();
            dir.reconcile()?;
            for job in dir.list()? {
                println!("{}", format_job_line(&job));
            }
        }
        HighCommand::Reject { id, reason } => {
            let job = high.reject(&id, &reason)?;
            println!("{}", format_job_line(&job));
        }
        HighCommand::Share { id } => {
            let job = high.share(&id)?;
            println!("{}", format_job_line(&job));
        }
    }
    Ok(())
}

fn run_low(low: LowSide, command: LowCommand) -> Result<()> {
    match command {
        LowCommand::Submit(args) => {
            let runtime = cli::runtime_from_args(&args.runtime)?;
            let mut submission = JobSubmission::new(&args.dataset, &args.code, args.args.clone(), runtime);
            submission.name = args.name.clone();
            submission.timeout = args.timeout_secs;
            submission.extra_env = cli::env_map(&args.env);
            let id = low.submit_job(submission)?;
            println!("{id}");
        }
        LowCommand::Status { id } => {
            let job = low.job(&id)?;
            let status = job.status.to_string();
            let styled = match job.status {
                JobStatus::RunFinished | JobStatus::Shared => status.green(),
                JobStatus::RunFailed | JobStatus::Rejected => status.red(),
                _ => status.yellow(),
            };
            println!("{styled}");
            if let Some(message) = job.error_message.as_deref() {
                println!("{}: {message}", job.error);
            }
        }
        LowCommand::Results { id, output } => {
            let results = low.results(&id)?;
            match output {
                Some(file) => print_output(results.load_output(&file)?),
                None => {
                    println!("{}", results.results_dir().display());
                    for file in results.output_files()? {
                        println!("  output  {} ({})", file.display(), file_size(&file));
                    }
                    for file in results.log_files()? {
                        println!("  log     {} ({})", file.display(), file_size(&file));
                    }
                }
            }
        }
        LowCommand::Jobs => {
            for job in low.list_jobs()? {
                println!("{}", format_job_line(&job));
            }
        }
        LowCommand::Datasets => {
            for dataset in low.list_datasets()? {
                println!(
                    "{}  owner={} {}",
                    dataset.name,
                    dataset.owner,
                    dataset.summary.as_deref().unwrap_or_default()
                );
            }
        }
    }
    Ok(())
}

fn file_size(path: &std::path::Path) -> String {
    std::fs::metadata(path)
        .map(|meta| format_bytes(meta.len()))
        .unwrap_or_else(|_| "?".to_string())
}

fn print_output(value: OutputValue) {
    match value {
        OutputValue::Json(json) => {
            println!("{}", serde_json::to_string_pretty(&json).unwrap_or_else(|_| json.to_string()))
        }
        OutputValue::Csv(text) | OutputValue::Text(text) => print!("{text}"),
        OutputValue::Parquet(bytes) => println!("<parquet, {} bytes>", bytes.len()),
    }
}

fn run_dataset(workspace: &Workspace, command: DatasetCommand) -> Result<()> {
    let store = DatasetStore::new(workspace);
    match command {
        DatasetCommand::Create {
            name,
            mock,
            private,
            summary,
            readme,
            tags,
        } => {
            let dataset = store.create(NewDataset {
                name: &name,
                mock_path: &mock,
                private_path: &private,
                summary,
                readme_path: readme.as_deref(),
                tags,
            })?;
            println!("created dataset {} for {}", dataset.name, dataset.owner);
        }
        DatasetCommand::List { owner } => {
            for dataset in store.list(owner.as_deref())? {
                println!(
                    "{}  owner={} tags={} {}",
                    dataset.name,
                    dataset.owner,
                    dataset.tags.join(","),
                    dataset.summary.as_deref().unwrap_or_default()
                );
            }
        }
    }
    Ok(())
}
