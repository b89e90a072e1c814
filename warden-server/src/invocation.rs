//! The parsed command for one process launch
//!
//! An [`Invocation`] is built once from the command line and the loaded
//! configuration, then handed by value to the arbitrator. Nothing mutates it
//! afterwards.

use std::path::PathBuf;

use warden_protocol::CliForward;

use crate::cli::Args;
use crate::config::{AppConfig, AuthMode};

/// Recognized flags of one invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Flags {
    pub new_window: bool,
    pub reuse_window: bool,
    pub list_extensions: bool,
    pub show_versions: bool,
    pub install_extension: Vec<String>,
    pub uninstall_extension: Vec<String>,
    pub force: bool,
    pub supervise: bool,
    /// Any of --auth, --bind-addr, --socket was given explicitly
    pub server_overrides: bool,
}

/// Configuration values resolved from flags, config file and defaults
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConfig {
    pub auth: AuthMode,
    pub bind_addr: String,
    pub socket_path: PathBuf,
    pub proxy_domains: Vec<String>,
    pub extensions_dir: PathBuf,
    /// Wrap a fresh server in a supervised child process
    pub supervise: bool,
}

/// One parsed command-line launch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    paths: Vec<String>,
    flags: Flags,
    resolved: ResolvedConfig,
    ipc_hook: Option<String>,
}

impl Invocation {
    /// Merge command-line arguments over the loaded configuration
    pub fn from_args(args: Args, config: &AppConfig) -> Self {
        let server_overrides =
            args.auth.is_some() || args.bind_addr.is_some() || args.socket.is_some();

        let resolved = ResolvedConfig {
            auth: args.auth.unwrap_or(config.server.auth),
            bind_addr: args
                .bind_addr
                .unwrap_or_else(|| config.server.bind_addr.clone()),
            socket_path: args
                .socket
                .or_else(|| config.server.socket_path.clone())
                .unwrap_or_else(warden_utils::socket_path),
            proxy_domains: config.server.proxy_domains.clone(),
            extensions_dir: args
                .extensions_dir
                .or_else(|| config.extensions.dir.clone())
                .unwrap_or_else(warden_utils::extensions_dir),
            supervise: args.supervise || config.supervisor.enabled,
        };

        let flags = Flags {
            new_window: args.new_window,
            reuse_window: args.reuse_window,
            list_extensions: args.list_extensions,
            show_versions: args.show_versions,
            install_extension: args.install_extension,
            uninstall_extension: args.uninstall_extension,
            force: args.force,
            supervise: args.supervise,
            server_overrides,
        };

        Self {
            paths: args.paths,
            flags,
            resolved,
            ipc_hook: args.ipc_hook.filter(|hook| !hook.is_empty()),
        }
    }

    /// Positional path arguments, in the order given
    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    pub fn flags(&self) -> &Flags {
        &self.flags
    }

    pub fn resolved(&self) -> &ResolvedConfig {
        &self.resolved
    }

    /// Socket address of the instance whose terminal launched this process
    pub fn ipc_hook(&self) -> Option<&str> {
        self.ipc_hook.as_deref()
    }

    /// True for install/list/uninstall extension requests
    pub fn is_cli_operation(&self) -> bool {
        self.flags.list_extensions
            || !self.flags.install_extension.is_empty()
            || !self.flags.uninstall_extension.is_empty()
    }

    /// True when --new-window or --reuse-window was given
    pub fn has_window_flags(&self) -> bool {
        self.flags.new_window || self.flags.reuse_window
    }

    /// True when the invocation names paths and sets no other flag
    pub fn is_paths_only(&self) -> bool {
        !self.paths.is_empty() && self.flags == Flags::default()
    }

    /// Extension management flags for the CLI worker
    pub fn cli_forward(&self) -> CliForward {
        CliForward {
            list_extensions: self.flags.list_extensions,
            show_versions: self.flags.show_versions,
            install_extension: self.flags.install_extension.clone(),
            uninstall_extension: self.flags.uninstall_extension.clone(),
            force: self.flags.force,
            extensions_dir: Some(self.resolved.extensions_dir.to_string_lossy().into_owned()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn invocation(args: Args) -> Invocation {
        Invocation::from_args(args, &AppConfig::default())
    }

    #[test]
    fn test_cli_operation_detection() {
        assert!(!invocation(Args::default()).is_cli_operation());
        assert!(invocation(Args {
            list_extensions: true,
            ..Default::default()
        })
        .is_cli_operation());
        assert!(invocation(Args {
            install_extension: vec!["acme.theme".into()],
            ..Default::default()
        })
        .is_cli_operation());
        assert!(invocation(Args {
            uninstall_extension: vec!["acme.theme".into()],
            ..Default::default()
        })
        .is_cli_operation());
        // --show-versions alone is not an operation
        assert!(!invocation(Args {
            show_versions: true,
            ..Default::default()
        })
        .is_cli_operation());
    }

    #[test]
    fn test_paths_only() {
        let inv = invocation(Args {
            paths: vec!["a.txt".into()],
            ..Default::default()
        });
        assert!(inv.is_paths_only());

        let inv = invocation(Args {
            paths: vec!["a.txt".into()],
            bind_addr: Some("0.0.0.0:9000".into()),
            ..Default::default()
        });
        assert!(!inv.is_paths_only());

        assert!(!invocation(Args::default()).is_paths_only());
    }

    #[test]
    fn test_window_flags() {
        let inv = invocation(Args {
            reuse_window: true,
            ..Default::default()
        });
        assert!(inv.has_window_flags());
        assert!(!inv.is_paths_only());
    }

    #[test]
    fn test_flags_override_config() {
        let mut config = AppConfig::default();
        config.server.socket_path = Some(PathBuf::from("/from/config.sock"));
        config.server.bind_addr = "127.0.0.1:1".into();

        let inv = Invocation::from_args(
            Args {
                socket: Some(PathBuf::from("/from/flag.sock")),
                ..Default::default()
            },
            &config,
        );
        assert_eq!(inv.resolved().socket_path, Path::new("/from/flag.sock"));
        assert_eq!(inv.resolved().bind_addr, "127.0.0.1:1");
        assert!(inv.flags().server_overrides);
    }

    #[test]
    fn test_default_socket_path() {
        let inv = invocation(Args::default());
        assert_eq!(inv.resolved().socket_path, warden_utils::socket_path());
    }

    #[test]
    fn test_supervise_from_config() {
        let mut config = AppConfig::default();
        config.supervisor.enabled = true;
        let inv = Invocation::from_args(
            Args {
                paths: vec!["a.txt".into()],
                ..Default::default()
            },
            &config,
        );
        assert!(inv.resolved().supervise);
        // A config-level setting is not a flag of this invocation
        assert!(!inv.flags().supervise);
        assert!(inv.is_paths_only());
    }

    #[test]
    fn test_empty_ipc_hook_is_ignored() {
        let inv = invocation(Args {
            ipc_hook: Some(String::new()),
            ..Default::default()
        });
        assert!(inv.ipc_hook().is_none());
    }

    #[test]
    fn test_cli_forward_carries_extension_flags() {
        let inv = invocation(Args {
            list_extensions: true,
            show_versions: true,
            force: true,
            extensions_dir: Some(PathBuf::from("/opt/ext")),
            ..Default::default()
        });
        let forward = inv.cli_forward();
        assert!(forward.list_extensions);
        assert!(forward.show_versions);
        assert!(forward.force);
        assert_eq!(forward.extensions_dir.as_deref(), Some("/opt/ext"));
    }
}
