//! libssh2-backed session client.
//!
//! Password authentication only. The TCP dial is bounded by
//! [`super::CONNECT_TIMEOUT`] (overridable per dialer); the ssh2 session
//! inherits the same bound for handshake and channel operations.

use std::io::Read;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use ssh2::{CheckResult, KnownHostFileKind, Session};
use tracing::{debug, warn};

use super::{
    CONNECT_TIMEOUT, ConnectError, Dialer, ExecError, HostKeyPolicy, HostTarget, RemoteShell,
};
use crate::model::AuthMethod;

/// Production dialer over libssh2.
#[derive(Debug, Clone)]
pub struct SshDialer {
    connect_timeout: Duration,
    host_key_policy: HostKeyPolicy,
}

impl Default for SshDialer {
    fn default() -> Self {
        Self {
            connect_timeout: CONNECT_TIMEOUT,
            host_key_policy: HostKeyPolicy::AcceptAny,
        }
    }
}

impl SshDialer {
    pub fn new(host_key_policy: HostKeyPolicy) -> Self {
        Self {
            host_key_policy,
            ..Self::default()
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    fn dial_tcp(&self, target: &HostTarget) -> Result<TcpStream, ConnectError> {
        let addr = target.addr();
        let resolved = addr
            .to_socket_addrs()
            .map_err(|e| ConnectError::Unreachable {
                addr: addr.clone(),
                reason: format!("resolve failed: {e}"),
            })?
            .collect::<Vec<_>>();
        if resolved.is_empty() {
            return Err(ConnectError::Unreachable {
                addr,
                reason: "no addresses resolved".into(),
            });
        }

        let mut last_err: Option<std::io::Error> = None;
        for sock_addr in resolved {
            match TcpStream::connect_timeout(&sock_addr, self.connect_timeout) {
                Ok(stream) => return Ok(stream),
                Err(e) => last_err = Some(e),
            }
        }
        let err = last_err.ok_or_else(|| ConnectError::Unreachable {
            addr: addr.clone(),
            reason: "no addresses resolved".into(),
        })?;
        if err.kind() == std::io::ErrorKind::TimedOut {
            Err(ConnectError::Timeout {
                addr,
                secs: self.connect_timeout.as_secs(),
            })
        } else {
            Err(ConnectError::Unreachable {
                addr,
                reason: err.to_string(),
            })
        }
    }

    fn check_host_key(&self, session: &Session, target: &HostTarget) -> Result<(), ConnectError> {
        match &self.host_key_policy {
            HostKeyPolicy::AcceptAny => {
                warn!(addr = %target.addr(), "host key verification disabled; accepting any key");
                Ok(())
            }
            HostKeyPolicy::KnownHosts { path } => {
                let addr = target.addr();
                let mut known = session
                    .known_hosts()
                    .map_err(|e| ConnectError::Handshake {
                        addr: addr.clone(),
                        reason: e.to_string(),
                    })?;
                known
                    .read_file(path, KnownHostFileKind::OpenSSH)
                    .map_err(|e| ConnectError::Handshake {
                        addr: addr.clone(),
                        reason: format!("known_hosts {}: {e}", path.display()),
                    })?;
                let (key, _key_type) = session.host_key().ok_or(ConnectError::Handshake {
                    addr: addr.clone(),
                    reason: "no host key presented".into(),
                })?;
                match known.check_port(&target.address, target.port, key) {
                    CheckResult::Match => Ok(()),
                    _ => Err(ConnectError::HostKeyRejected { addr }),
                }
            }
        }
    }
}

impl Dialer for SshDialer {
    fn dial(&self, target: &HostTarget) -> Result<Box<dyn RemoteShell>, ConnectError> {
        // Refuse unsupported auth before any network work so callers can't
        // silently fall back.
        let password = match &target.auth {
            AuthMethod::Password { password } => password.clone(),
            AuthMethod::KeyFile { .. } => return Err(ConnectError::AuthMethodUnsupported),
        };

        let addr = target.addr();
        let stream = self.dial_tcp(target)?;

        let mut session = Session::new().map_err(|e| ConnectError::Handshake {
            addr: addr.clone(),
            reason: e.to_string(),
        })?;
        let timeout_ms = u32::try_from(self.connect_timeout.as_millis()).unwrap_or(u32::MAX);
        session.set_timeout(timeout_ms);
        session.set_tcp_stream(stream);
        session.handshake().map_err(|e| ConnectError::Handshake {
            addr: addr.clone(),
            reason: e.to_string(),
        })?;

        self.check_host_key(&session, target)?;

        session
            .userauth_password(&target.username, &password)
            .map_err(|e| ConnectError::AuthFailed {
                addr: addr.clone(),
                username: target.username.clone(),
                reason: e.to_string(),
            })?;
        if !session.authenticated() {
            return Err(ConnectError::AuthFailed {
                addr: addr.clone(),
                username: target.username.clone(),
                reason: "authentication incomplete".into(),
            });
        }

        debug!(addr = %addr, user = %target.username, "session established");
        Ok(Box::new(SshSession {
            session,
            addr,
            open: true,
        }))
    }
}

/// One live session over one TCP connection.
pub struct SshSession {
    session: Session,
    addr: String,
    open: bool,
}

impl RemoteShell for SshSession {
    fn exec(&mut self, command: &str) -> Result<String, ExecError> {
        if !self.open {
            return Err(ExecError::SessionClosed);
        }

        let mut channel = self
            .session
            .channel_session()
            .map_err(|e| ExecError::Channel(e.to_string()))?;
        channel
            .exec(command)
            .map_err(|e| ExecError::Channel(e.to_string()))?;

        // Stdout first, then stderr, merged into one buffer: partial
        // diagnostics stay with the caller even on failure.
        let mut raw = Vec::new();
        channel
            .read_to_end(&mut raw)
            .map_err(|e| ExecError::Channel(e.to_string()))?;
        channel
            .stderr()
            .read_to_end(&mut raw)
            .map_err(|e| ExecError::Channel(e.to_string()))?;
        let output = String::from_utf8_lossy(&raw).into_owned();

        channel
            .wait_close()
            .map_err(|e| ExecError::Channel(e.to_string()))?;
        let status = channel
            .exit_status()
            .map_err(|e| ExecError::Channel(e.to_string()))?;

        debug!(addr = %self.addr, status, command, "remote command finished");
        if status != 0 {
            return Err(ExecError::CommandFailed { status, output });
        }
        Ok(output)
    }

    fn close(&mut self) {
        if self.open {
            let _ = self.session.disconnect(None, "closing", None);
            self.open = false;
        }
    }
}

impl Drop for SshSession {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn password_target(port: u16) -> HostTarget {
        HostTarget::new(
            "127.0.0.1",
            port,
            "ops",
            AuthMethod::Password {
                password: "pw".into(),
            },
        )
    }

    #[test]
    fn key_auth_is_rejected_before_dialing() {
        let dialer = SshDialer::default();
        // Port 1 would refuse instantly, but the auth check must fire first.
        let target = HostTarget::new(
            "127.0.0.1",
            1,
            "ops",
            AuthMethod::KeyFile {
                path: PathBuf::from("/home/ops/.ssh/id_ed25519"),
            },
        );
        assert!(matches!(
            dialer.dial(&target).map(|_| ()),
            Err(ConnectError::AuthMethodUnsupported)
        ));
    }

    #[test]
    fn closed_port_reports_unreachable() {
        // Bind then drop to get a port nothing is listening on.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let dialer = SshDialer::default().with_connect_timeout(Duration::from_secs(2));
        match dialer.dial(&password_target(port)).map(|_| ()) {
            Err(ConnectError::Unreachable { .. }) | Err(ConnectError::Timeout { .. }) => {}
            other => panic!("expected unreachable/timeout, got {other:?}"),
        }
    }

    #[test]
    fn unresolvable_host_reports_unreachable() {
        let dialer = SshDialer::default();
        let target = HostTarget::new(
            "host.invalid",
            22,
            "ops",
            AuthMethod::Password {
                password: "pw".into(),
            },
        );
        assert!(matches!(
            dialer.dial(&target).map(|_| ()),
            Err(ConnectError::Unreachable { .. })
        ));
    }
}
