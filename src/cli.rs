use std::collections::BTreeMap;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use highlow::core::error::{Error, Result};
use highlow::core::runtime::{ContainerConfig, Runtime, RuntimeConfig};
use highlow::core::sync::{Connection, SshConnection};

#[derive(Debug, Parser)]
#[command(name = "highlow", version, about = "Air-gapped job runtime with rsync replication")]
pub struct Cli {
    /// Storage root of this side
    #[arg(long, env = "HIGHLOW_ROOT", global = true, default_value = ".")]
    pub root: PathBuf,
    /// Identity that owns datasets and runtimes
    #[arg(long, env = "HIGHLOW_PRINCIPAL", global = true, default_value = "owner")]
    pub principal: String,
    /// Name of the high/low runtime pairing
    #[arg(long, env = "HIGHLOW_RUNTIME", global = true, default_value = "highside")]
    pub runtime: String,
    /// Debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Trusted side: run jobs and drive replication
    #[command(subcommand)]
    High(HighCommand),
    /// Untrusted side: submit jobs and read results
    #[command(subcommand)]
    Low(LowCommand),
    #[command(subcommand)]
    Dataset(DatasetCommand),
    #[command(subcommand)]
    Runtime(RuntimeCommand),
}

#[derive(Debug, Subcommand)]
pub enum HighCommand {
    Init {
        /// Interpreter command recorded in the runtime config
        #[arg(long, default_value = "python3")]
        cmd: String,
        #[arg(long)]
        force: bool,
    },
    Connect(ConnectArgs),
    Sync {
        #[arg(long, value_enum, default_value_t = SyncScope::All)]
        scope: SyncScope,
        #[arg(long, default_value_t = 300)]
        timeout_secs: u64,
    },
    SyncDataset {
        name: String,
        #[arg(long, default_value_t = 300)]
        timeout_secs: u64,
    },
    RunQueue(RunQueueArgs),
    Jobs,
    Reject {
        id: String,
        #[arg(long, default_value = "")]
        reason: String,
    },
    Share {
        id: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SyncScope {
    /// Pull job definitions from the low side
    Pull,
    /// Push results and datasets to the low side
    Push,
    All,
}

#[derive(Debug, Args)]
pub struct ConnectArgs {
    /// Low side root, local or on the SSH host
    #[arg(long)]
    pub low_root: PathBuf,
    #[arg(long)]
    pub ssh_host: Option<String>,
    #[arg(long, requires = "ssh_host")]
    pub ssh_user: Option<String>,
    #[arg(long, default_value_t = 22)]
    pub ssh_port: u16,
    #[arg(long)]
    pub ssh_key: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct RunQueueArgs {
    /// Keep polling instead of a single pass
    #[arg(long)]
    pub watch: bool,
    /// Also pull jobs before and push results after each pass
    #[arg(long)]
    pub sync: bool,
    #[arg(long, default_value_t = 2000)]
    pub interval_ms: u64,
    /// Docker-compatible engine for container runtimes
    #[arg(long, default_value = "docker")]
    pub engine: String,
    /// Do not stream job output to the terminal
    #[arg(long)]
    pub quiet: bool,
}

#[derive(Debug, Subcommand)]
pub enum LowCommand {
    Submit(SubmitArgs),
    Status { id: String },
    Results {
        id: String,
        /// Print one output file instead of the listing
        #[arg(long)]
        output: Option<String>,
    },
    Jobs,
    Datasets,
}

#[derive(Debug, Args)]
pub struct RuntimeArgs {
    /// Interpreter command, e.g. "python3 -u"
    #[arg(long, default_value = "python3", conflicts_with = "dockerfile")]
    pub cmd: String,
    /// Run in a container built from this Dockerfile
    #[arg(long)]
    pub dockerfile: Option<PathBuf>,
    #[arg(long, requires = "dockerfile")]
    pub image: Option<String>,
}

#[derive(Debug, Args)]
pub struct SubmitArgs {
    #[arg(long)]
    pub dataset: String,
    /// Directory with the job's code
    #[arg(long)]
    pub code: PathBuf,
    #[arg(long)]
    pub name: Option<String>,
    #[arg(long, default_value_t = 60)]
    pub timeout_secs: u64,
    /// Extra environment, KEY=VALUE
    #[arg(long = "env", value_parser = parse_env_pair)]
    pub env: Vec<(String, String)>,
    #[command(flatten)]
    pub runtime: RuntimeArgs,
    /// Entrypoint relative to the code directory, then its arguments
    #[arg(last = true, required = true)]
    pub args: Vec<String>,
}

#[derive(Debug, Subcommand)]
pub enum DatasetCommand {
    Create {
        name: String,
        #[arg(long)]
        mock: PathBuf,
        #[arg(long)]
        private: PathBuf,
        #[arg(long)]
        summary: Option<String>,
        #[arg(long)]
        readme: Option<PathBuf>,
        #[arg(long = "tag")]
        tags: Vec<String>,
    },
    List {
        /// Only datasets of this owner
        #[arg(long)]
        owner: Option<String>,
    },
}

#[derive(Debug, Subcommand)]
pub enum RuntimeCommand {
    /// Print the derived name of a runtime configuration
    Name(RuntimeArgs),
}

pub fn parse_env_pair(raw: &str) -> std::result::Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))?;
    if key.is_empty() {
        return Err(format!("empty variable name in '{raw}'"));
    }
    Ok((key.to_string(), value.to_string()))
}

pub fn split_command(raw: &str) -> Result<Vec<String>> {
    let argv = shell_words::split(raw).map_err(|err| Error::config(format!("cannot parse command '{raw}': {err}")))?;
    if argv.is_empty() {
        return Err(Error::config("command must not be empty"));
    }
    Ok(argv)
}

pub fn runtime_from_args(args: &RuntimeArgs) -> Result<Runtime> {
    let config = match &args.dockerfile {
        Some(dockerfile) => {
            let mut container = ContainerConfig::from_dockerfile(dockerfile)?;
            container.image_name = args.image.clone();
            if args.cmd != "python3" {
                container.cmd = split_command(&args.cmd)?;
            }
            RuntimeConfig::Container(container)
        }
        None => RuntimeConfig::interpreter(split_command(&args.cmd)?),
    };
    Ok(Runtime::new(config))
}

pub fn connection_from_args(args: &ConnectArgs) -> Result<Connection> {
    match (&args.ssh_host, &args.ssh_user) {
        (None, _) => Ok(Connection::Local),
        (Some(host), Some(user)) => Ok(Connection::Ssh(SshConnection {
            host: host.clone(),
            port: args.ssh_port,
            user: user.clone(),
            ssh_key_path: args.ssh_key.clone(),
        })),
        (Some(_), None) => Err(Error::config("--ssh-host needs --ssh-user")),
    }
}

pub fn env_map(pairs: &[(String, String)]) -> BTreeMap<String, String> {
    pairs.iter().cloned().collect()
}
