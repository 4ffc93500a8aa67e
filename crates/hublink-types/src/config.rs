//! Link configuration with TOML loading and defaults.
//!
//! The configuration is an explicit, immutable value constructed once and
//! passed into each agent. Sharing defaults across agents in a process is
//! done by cloning the same value, not through global state.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Default heartbeat / sweep interval in milliseconds.
const DEFAULT_PING_INTERVAL_MS: u64 = 3000;

/// Default liveness budget (consecutive misses before a peer is declared gone).
const DEFAULT_MAX_LIVENESS: u32 = 3;

/// Default IPC socket path.
const DEFAULT_IPC_PATH: &str = "/tmp/hublink.sock";

/// Default TCP port.
const DEFAULT_TCP_PORT: u16 = 3559;

/// Configuration shared by client and hub agents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Heartbeat cadence on the client and sweep cadence on the hub, in
    /// milliseconds. One value drives both sides; the timers are otherwise
    /// independent and tolerate arbitrary phase offset.
    pub ping_interval_ms: u64,
    /// Liveness budget: how many consecutive failed heartbeats (client) or
    /// silent sweep intervals (hub) before the failure callback fires.
    pub max_liveness: u32,
    /// Default path for `ipc://` endpoints.
    pub default_ipc_path: PathBuf,
    /// Default port for `tcp://` endpoints.
    pub default_tcp_port: u16,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            ping_interval_ms: DEFAULT_PING_INTERVAL_MS,
            max_liveness: DEFAULT_MAX_LIVENESS,
            default_ipc_path: PathBuf::from(DEFAULT_IPC_PATH),
            default_tcp_port: DEFAULT_TCP_PORT,
        }
    }
}

impl LinkConfig {
    /// The ping interval as a [`Duration`].
    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    /// Load configuration from a TOML file, with defaults.
    ///
    /// A missing, unreadable, or unparseable file logs a warning and falls
    /// back to defaults; configuration problems never abort startup.
    pub fn load(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        match std::fs::read_to_string(path) {
            Ok(contents) => match toml::from_str::<Self>(&contents) {
                Ok(config) => {
                    info!(path = %path.display(), "Loaded configuration");
                    config
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        path = %path.display(),
                        "Failed to parse config, using defaults"
                    );
                    Self::default()
                }
            },
            Err(e) => {
                warn!(
                    error = %e,
                    path = %path.display(),
                    "Failed to read config file, using defaults"
                );
                Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = LinkConfig::default();
        assert_eq!(config.ping_interval_ms, 3000);
        assert_eq!(config.max_liveness, 3);
        assert_eq!(config.ping_interval(), Duration::from_millis(3000));
        assert_eq!(config.default_tcp_port, 3559);
    }

    #[test]
    fn test_load_missing_file_falls_back() {
        let config = LinkConfig::load(Some(Path::new("/nonexistent/hublink.toml")));
        assert_eq!(config, LinkConfig::default());
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "ping_interval_ms = 500\nmax_liveness = 5").unwrap();

        let config = LinkConfig::load(Some(file.path()));
        assert_eq!(config.ping_interval_ms, 500);
        assert_eq!(config.max_liveness, 5);
        // Unspecified fields keep their defaults.
        assert_eq!(config.default_tcp_port, 3559);
    }

    #[test]
    fn test_load_invalid_file_falls_back() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "ping_interval_ms = \"soon\"").unwrap();

        let config = LinkConfig::load(Some(file.path()));
        assert_eq!(config, LinkConfig::default());
    }
}
