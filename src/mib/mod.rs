//! MIB artifact ingestion.
//!
//! Uploaded archives are extracted into per-archive workspaces
//! ([`extract`]), extracted files are classified into MIB records
//! ([`classify`]), and configured remote directories are enumerated for MIB
//! files without transferring content ([`scan`]).

pub mod classify;
pub mod extract;
pub mod scan;

use std::path::Path;

pub use classify::{DEFAULT_VENDOR_RULES, MibFileMeta, VendorRule, classify_content};
pub use extract::{ExtractError, Ingestor};
pub use scan::{ScanError, scan_server_path};

/// Extensions accepted by the relevance heuristic.
pub const MIB_EXTENSIONS: &[&str] = &["mib", "txt", "my"];

/// Keyword that admits oddly named files.
const MIB_KEYWORD: &str = "mib";

/// The qualifying-file heuristic: extension allowlist plus a case-insensitive
/// filename keyword. Deliberately coarse - it may both over- and under-match
/// and is kept in one place so its precision can be tuned against real
/// corpora.
pub fn is_mib_file(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    let by_extension = Path::new(&lower)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| MIB_EXTENSIONS.contains(&ext));
    by_extension || lower.contains(MIB_KEYWORD)
}
