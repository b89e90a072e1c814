//! warden - launch an editor server, or hand paths to one already running

use std::path::PathBuf;
use std::sync::Arc;

use tracing::debug;

use warden_utils::{LogConfig, Result};

mod arbitration;
mod channel;
mod cli;
mod cli_delegate;
mod cli_worker;
mod config;
mod delegate;
mod extensions;
mod heartbeat;
mod invocation;
mod probe;
mod server;
mod supervisor;

use arbitration::Arbitrator;
use cli::Args;
use config::{AppConfig, ConfigLoader};
use invocation::Invocation;
use server::DefaultServerFactory;
use supervisor::{ProcessRole, WorkerCommand};

#[tokio::main]
async fn main() {
    let args = Args::parse_args();

    let exit_code = match run(args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    };

    std::process::exit(exit_code);
}

async fn run(args: Args) -> Result<i32> {
    let config = ConfigLoader::load_and_validate(args.config.as_deref())?;

    if let Some(parent_pid) = cli_worker::parent_pid_from_env() {
        init_logging(LogConfig::cli_worker(), &config, &args)?;
        debug!(parent_pid, "Running as CLI worker");
        let extensions_dir: PathBuf = args
            .extensions_dir
            .clone()
            .or_else(|| config.extensions.dir.clone())
            .unwrap_or_else(warden_utils::extensions_dir);
        return Ok(cli_worker::run(extensions_dir).await);
    }

    let role = ProcessRole::detect()?;
    let preset = if role.is_child() {
        LogConfig::worker()
    } else {
        LogConfig::launcher()
    };
    init_logging(preset, &config, &args)?;
    debug!(?role, "Starting");

    let invocation = Invocation::from_args(args, &config);
    let worker = WorkerCommand::current()?;
    let arbitrator = Arbitrator::new(config, Arc::new(DefaultServerFactory), worker);

    Ok(arbitrator.run(invocation, role).await)
}

/// Apply the config file's logging section and `--log` over a preset
fn init_logging(mut log: LogConfig, config: &AppConfig, args: &Args) -> Result<()> {
    log.output = config.logging.output.into();
    if let Some(name) = &config.logging.file_name {
        log.file_name = Some(name.clone());
    }
    if let Some(filter) = &args.log {
        log.filter = filter.clone();
    }
    warden_utils::init_logging_with_config(log)
}
