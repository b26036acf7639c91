//! TCP liveness probing.
//!
//! A probe is a bare connect-and-drop against the host's shell port: no
//! authentication, no session. Unreachability is a normal outcome, never an
//! error - the prober exists so host status can be refreshed far more cheaply
//! than a full session would allow.

use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::model::{HostStatus, now_ts};
use crate::store::{RecordStore, StoreError};

/// Default probe timeout.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Check whether `address:port` accepts a TCP connection within `timeout`.
///
/// Returns `false` for unresolvable names, refused connections and timeouts
/// alike; never blocks past the timeout bound.
pub fn probe(address: &str, port: u16, timeout: Duration) -> bool {
    let Ok(resolved) = (address, port).to_socket_addrs() else {
        return false;
    };
    for addr in resolved {
        if TcpStream::connect_timeout(&addr, timeout).is_ok() {
            return true;
        }
    }
    false
}

/// Probe a registered host and persist the observed status.
///
/// Reachable hosts become `Connected` with a fresh `last_seen`; unreachable
/// ones become `Disconnected` with `last_seen` left as it was.
pub fn refresh_host(
    store: &Arc<dyn RecordStore>,
    host_id: i64,
    timeout: Duration,
) -> Result<bool, StoreError> {
    let host = store.get_host(host_id)?;
    let reachable = probe(&host.address, host.ssh_port, timeout);
    debug!(host = %host.name, addr = %host.address, reachable, "liveness probe");
    if reachable {
        store.set_host_status(host_id, HostStatus::Connected, Some(now_ts()))?;
    } else {
        store.set_host_status(host_id, HostStatus::Disconnected, None)?;
    }
    Ok(reachable)
}
