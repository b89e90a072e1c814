//! Command-line argument parsing

use std::path::PathBuf;

use clap::Parser;

use crate::config::AuthMode;

/// Launch an editor server, or hand paths to one that is already running
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "warden")]
#[command(version)]
#[command(about = "Launch an editor server, or hand paths to one that is already running")]
pub struct Args {
    /// Files or folders to open
    pub paths: Vec<String>,

    /// Open the folders in a new window
    #[arg(short = 'n', long)]
    pub new_window: bool,

    /// Open the paths in the last active window
    #[arg(short = 'r', long)]
    pub reuse_window: bool,

    /// List installed extensions
    #[arg(long)]
    pub list_extensions: bool,

    /// Show versions of installed extensions (with --list-extensions)
    #[arg(long)]
    pub show_versions: bool,

    /// Install an extension by id (publisher.name[@version]); repeatable
    #[arg(long, value_name = "ID")]
    pub install_extension: Vec<String>,

    /// Uninstall an extension by id; repeatable
    #[arg(long, value_name = "ID")]
    pub uninstall_extension: Vec<String>,

    /// Overwrite an already installed extension
    #[arg(long)]
    pub force: bool,

    /// Directory holding installed extensions
    #[arg(long, value_name = "DIR")]
    pub extensions_dir: Option<PathBuf>,

    /// Authentication mode for the HTTP layer
    #[arg(long, value_enum)]
    pub auth: Option<AuthMode>,

    /// Address the HTTP layer binds (host:port)
    #[arg(long, value_name = "HOST:PORT")]
    pub bind_addr: Option<String>,

    /// Instance socket path
    #[arg(long, value_name = "PATH")]
    pub socket: Option<PathBuf>,

    /// Run the server in a supervised child process
    #[arg(long)]
    pub supervise: bool,

    /// Configuration file
    #[arg(long, env = "WARDEN_CONFIG", value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Log filter (e.g. "debug" or "warden_server=trace")
    #[arg(long, value_name = "FILTER")]
    pub log: Option<String>,

    /// Socket of the instance whose integrated terminal launched us
    #[arg(long, env = "WARDEN_IPC_HOOK", hide = true)]
    pub ipc_hook: Option<String>,
}

impl Args {
    /// Parse command-line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
