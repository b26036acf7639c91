//! Core configuration.
//!
//! Defaults are overridable through `FLEETMON_*` environment variables
//! (read via dotenvy so a `.env` file works in development).

use std::path::PathBuf;
use std::time::Duration;

use crate::remote::{CONNECT_TIMEOUT, DEFAULT_PROBE_TIMEOUT, HostKeyPolicy};

/// Filesystem layout and operation timeouts.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Root of the persisted layout; everything below lives under it.
    pub data_dir: PathBuf,
    /// Raw archive payloads land here.
    pub upload_dir: PathBuf,
    /// One workspace subdirectory per archive identity.
    pub extract_dir: PathBuf,
    /// Default record store location.
    pub db_path: PathBuf,
    /// TCP dial bound for sessions.
    pub connect_timeout: Duration,
    /// TCP dial bound for liveness probes.
    pub probe_timeout: Duration,
    /// Host-key verification policy for all sessions.
    pub host_key_policy: HostKeyPolicy,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self::with_data_dir(PathBuf::from("./data"))
    }
}

impl CoreConfig {
    /// Layout rooted at `data_dir` with default timeouts and policy.
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        let upload_dir = data_dir.join("uploads");
        let extract_dir = data_dir.join("extracted");
        let db_path = data_dir.join("fleetmon.db");
        Self {
            data_dir,
            upload_dir,
            extract_dir,
            db_path,
            connect_timeout: CONNECT_TIMEOUT,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            host_key_policy: HostKeyPolicy::AcceptAny,
        }
    }

    /// Load config from environment variables.
    pub fn from_env() -> Self {
        let data_dir = dotenvy::var("FLEETMON_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data"));
        let mut cfg = Self::with_data_dir(data_dir);

        if let Ok(val) = dotenvy::var("FLEETMON_CONNECT_TIMEOUT_SECS")
            && let Ok(secs) = val.parse()
        {
            cfg.connect_timeout = Duration::from_secs(secs);
        }

        if let Ok(val) = dotenvy::var("FLEETMON_PROBE_TIMEOUT_SECS")
            && let Ok(secs) = val.parse()
        {
            cfg.probe_timeout = Duration::from_secs(secs);
        }

        if let Ok(path) = dotenvy::var("FLEETMON_KNOWN_HOSTS") {
            cfg.host_key_policy = HostKeyPolicy::KnownHosts {
                path: PathBuf::from(path),
            };
        }

        cfg
    }
}
