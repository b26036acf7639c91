//! Remote shell sessions for fleet hosts.
//!
//! One session is one TCP connection: every logical operation (probe, install
//! step sequence, server-path scan) dials its own session and tears it down on
//! every exit path. There is no pooling or multiplexing - stale-session bugs
//! are traded away for a reconnect per operation.
//!
//! The session boundary is a pair of traits so orchestration code never
//! depends on libssh2 directly:
//!
//! - [`Dialer`] - opens an authenticated [`RemoteShell`] to a [`HostTarget`].
//! - [`RemoteShell`] - executes commands, returning combined stdout+stderr.
//!
//! Production uses [`ssh::SshDialer`]; tests substitute scripted fakes.

pub mod probe;
pub mod ssh;

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::model::{AuthMethod, Host, ServerPath};

pub use probe::{DEFAULT_PROBE_TIMEOUT, probe, refresh_host};
pub use ssh::SshDialer;

/// Default TCP connect timeout for session establishment.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors establishing a session.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("connection to {addr} timed out after {secs}s")]
    Timeout { addr: String, secs: u64 },

    #[error("host {addr} unreachable: {reason}")]
    Unreachable { addr: String, reason: String },

    #[error("authentication failed for {username}@{addr}: {reason}")]
    AuthFailed {
        addr: String,
        username: String,
        reason: String,
    },

    #[error("key-file authentication is not implemented")]
    AuthMethodUnsupported,

    #[error("host key for {addr} rejected by policy")]
    HostKeyRejected { addr: String },

    #[error("ssh handshake with {addr} failed: {reason}")]
    Handshake { addr: String, reason: String },
}

/// Errors executing a command over an established session.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("session is closed")]
    SessionClosed,

    #[error("channel error: {0}")]
    Channel(String),

    /// The remote command exited non-zero. The combined output is carried so
    /// callers keep partial diagnostics.
    #[error("command exited with status {status}")]
    CommandFailed { status: i32, output: String },
}

impl ExecError {
    /// Combined output captured before the failure, if any.
    pub fn output(&self) -> &str {
        match self {
            Self::CommandFailed { output, .. } => output,
            _ => "",
        }
    }
}

/// How (and whether) to verify a remote host's key.
///
/// `AcceptAny` preserves the platform's historical behaviour and is logged as
/// a warning on every connect; `KnownHosts` checks an OpenSSH-format file and
/// rejects unknown or mismatched keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum HostKeyPolicy {
    #[default]
    AcceptAny,
    KnownHosts {
        path: PathBuf,
    },
}

/// Everything needed to dial one host.
#[derive(Debug, Clone)]
pub struct HostTarget {
    pub address: String,
    pub port: u16,
    pub username: String,
    pub auth: AuthMethod,
}

impl HostTarget {
    pub fn new(
        address: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        auth: AuthMethod,
    ) -> Self {
        Self {
            address: address.into(),
            port,
            username: username.into(),
            auth,
        }
    }

    /// `host:port` form used in errors and logs.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

impl From<&Host> for HostTarget {
    fn from(host: &Host) -> Self {
        Self::new(
            host.address.clone(),
            host.ssh_port,
            host.username.clone(),
            host.auth.clone(),
        )
    }
}

impl From<&ServerPath> for HostTarget {
    fn from(path: &ServerPath) -> Self {
        Self::new(
            path.host.clone(),
            path.ssh_port,
            path.username.clone(),
            AuthMethod::Password {
                password: path.password.clone(),
            },
        )
    }
}

/// An authenticated remote command-execution channel to one host.
pub trait RemoteShell: Send {
    /// Run `command`, returning combined stdout+stderr. A non-zero remote
    /// exit surfaces as [`ExecError::CommandFailed`] with the output
    /// preserved inside the error.
    fn exec(&mut self, command: &str) -> Result<String, ExecError>;

    /// Tear the session down. Idempotent; safe on half-established sessions.
    fn close(&mut self);
}

/// Opens sessions. Injected into the installer, scanner and verifier so tests
/// can script the remote side.
pub trait Dialer: Send + Sync {
    fn dial(&self, target: &HostTarget) -> Result<Box<dyn RemoteShell>, ConnectError>;
}
