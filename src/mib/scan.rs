//! Remote server-path scanning.
//!
//! Discovery only: one session per scan, a bounded `find` listing, and a
//! `stat` per discovered file. File content is not transferred - discovered
//! files become `source = server` records pointing at their remote paths.
//! An individual stat failure skips that file; only connection or listing
//! failures fail the scan.

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use super::is_mib_file;
use crate::model::{MibFile, MibFileStatus, MibSource, PathStatus, now_ts};
use crate::ops::CancelToken;
use crate::remote::{ConnectError, Dialer, HostTarget};
use crate::store::{RecordStore, StoreError};

/// Hard cap on listed files per scan.
const SCAN_RESULT_CAP: usize = 1000;

/// Errors failing an entire scan.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error("remote listing failed: {0}")]
    Listing(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("scan cancelled")]
    Cancelled,
}

/// Scan a configured server path and record the discovered MIB files.
///
/// Returns the number of files recorded. The path record's status lands on
/// `connected` (success) or `error` (connect/listing failure); `last_scan`
/// and `file_count` are only updated on success.
pub fn scan_server_path(
    store: &Arc<dyn RecordStore>,
    dialer: &Arc<dyn Dialer>,
    path_id: i64,
    cancel: &CancelToken,
) -> Result<u32, ScanError> {
    let mut record = store.get_server_path(path_id)?;
    record.status = PathStatus::Scanning;
    store.update_server_path(&record)?;

    let result = run_scan(store, dialer, &record, cancel);
    match result {
        Ok(count) => {
            record.status = PathStatus::Connected;
            record.file_count = count;
            record.last_scan = Some(now_ts());
            store.update_server_path(&record)?;
            info!(path = %record.name, count, "server path scanned");
            Ok(count)
        }
        Err(e) => {
            record.status = PathStatus::Error;
            store.update_server_path(&record)?;
            warn!(path = %record.name, error = %e, "server path scan failed");
            Err(e)
        }
    }
}

fn run_scan(
    store: &Arc<dyn RecordStore>,
    dialer: &Arc<dyn Dialer>,
    record: &crate::model::ServerPath,
    cancel: &CancelToken,
) -> Result<u32, ScanError> {
    let mut shell = dialer.dial(&HostTarget::from(record))?;

    let list_cmd = format!(
        "find {} -name '*.mib' -o -name '*.txt' | head -{SCAN_RESULT_CAP}",
        record.path
    );
    let listing = match shell.exec(&list_cmd) {
        Ok(output) => output,
        Err(e) => {
            shell.close();
            return Err(ScanError::Listing(e.to_string()));
        }
    };

    let mut count = 0u32;
    for file in parse_file_list(&listing) {
        if cancel.is_cancelled() {
            shell.close();
            return Err(ScanError::Cancelled);
        }
        // Tolerate stat failures: a file disappearing mid-scan is not fatal.
        let stat_cmd = format!("stat -c '%s %Y' {file}");
        let (size, _mtime) = match shell.exec(&stat_cmd).ok().and_then(|o| parse_stat(&o)) {
            Some(parsed) => parsed,
            None => {
                debug!(file = %file, "stat failed; skipping");
                continue;
            }
        };

        let remote_path = PathBuf::from(&file);
        let filename = remote_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| file.clone());
        if !is_mib_file(&filename) {
            continue;
        }
        let mib = MibFile {
            id: None,
            name: remote_path
                .file_stem()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| filename.clone()),
            filename,
            vendor: String::new(),
            category: String::new(),
            description: String::new(),
            oid_count: 0,
            size,
            path: remote_path,
            // Content stays remote, so classification is deferred.
            status: MibFileStatus::Pending,
            source: MibSource::Server,
            archive_id: None,
        };
        store.insert_mib_file(&mib)?;
        count += 1;
    }

    shell.close();
    Ok(count)
}

/// Split a `find` listing into trimmed, non-empty paths.
fn parse_file_list(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse `stat -c '%s %Y'` output: `<size> <mtime>`.
fn parse_stat(output: &str) -> Option<(u64, i64)> {
    let mut parts = output.split_whitespace();
    let size = parts.next()?.parse().ok()?;
    let mtime = parts.next()?.parse().ok()?;
    Some((size, mtime))
}
