//! Default configuration values
//!
//! These are embedded in the binary and used when no config file exists.

/// Configuration used when no file exists at the default location
pub const DEFAULT_CONFIG_TOML: &str = r##"
# warden configuration

[server]
auth = "password"
bind_addr = "127.0.0.1:8080"
# socket_path = "/run/user/1000/warden/warden.sock"
proxy_domains = []

[probe]
# Look up the most recently started instance when no IPC hook is set
use_last_instance = true
# liveness_timeout_ms = 1000

[delegation]
# timeout_ms = 5000

[supervisor]
# Run the server in a supervised child process
enabled = false
# handshake_timeout_ms = 10000

[extensions]
# dir = "/home/me/.local/share/warden/extensions"

[logging]
output = "stderr"
# file_name = "warden.log"
"##;
