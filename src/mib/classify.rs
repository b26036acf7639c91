//! Content-based MIB metadata classification.
//!
//! Classification is intentionally coarse pattern matching, not a
//! grammar-aware parser: vendor and category come from an ordered rule table
//! of case-insensitive content substrings (first match wins), the object
//! count is a marker-token tally, and the description is the first
//! sufficiently long comment line. A single unreadable file degrades to an
//! error-status record; it never aborts the walk over the rest of the tree.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, warn};
use walkdir::WalkDir;

use super::is_mib_file;
use crate::model::{MibFile, MibFileStatus, MibSource};
use crate::store::{RecordStore, StoreError};

/// Marker token counted as the object metric. A proxy, not a schema count.
const OID_MARKER: &str = "OBJECT-TYPE";

/// Minimum comment length (after trimming) accepted as a description.
const MIN_DESCRIPTION_LEN: usize = 10;

/// One vendor-assignment rule: if the upper-cased content contains `marker`,
/// the file is attributed to `vendor`/`category`.
#[derive(Debug, Clone, Copy)]
pub struct VendorRule {
    pub marker: &'static str,
    pub vendor: &'static str,
    pub category: &'static str,
}

/// Ordered default rules; first match wins.
pub const DEFAULT_VENDOR_RULES: &[VendorRule] = &[
    VendorRule {
        marker: "CISCO",
        vendor: "Cisco",
        category: "Network Equipment",
    },
    VendorRule {
        marker: "HUAWEI",
        vendor: "Huawei",
        category: "Network Equipment",
    },
    VendorRule {
        marker: "JUNIPER",
        vendor: "Juniper",
        category: "Network Equipment",
    },
    VendorRule {
        marker: "HP",
        vendor: "HP",
        category: "Printers",
    },
];

/// Metadata derived from one file's content.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MibFileMeta {
    pub vendor: String,
    pub category: String,
    pub description: String,
    pub oid_count: u32,
}

/// Classify file content. Pure: identical text yields identical metadata.
pub fn classify_content(text: &str, rules: &[VendorRule]) -> MibFileMeta {
    let upper = text.to_uppercase();
    let (vendor, category) = rules
        .iter()
        .find(|rule| upper.contains(rule.marker))
        .map_or((String::new(), String::new()), |rule| {
            (rule.vendor.to_string(), rule.category.to_string())
        });

    let oid_count = u32::try_from(text.matches(OID_MARKER).count()).unwrap_or(u32::MAX);

    let description = text
        .lines()
        .filter_map(|line| line.trim().strip_prefix("--"))
        .map(str::trim)
        .find(|candidate| candidate.len() > MIN_DESCRIPTION_LEN)
        .unwrap_or_default()
        .to_string();

    MibFileMeta {
        vendor,
        category,
        description,
        oid_count,
    }
}

/// Read and classify one file on disk.
pub fn classify_file(path: &Path, rules: &[VendorRule]) -> std::io::Result<MibFileMeta> {
    let bytes = std::fs::read(path)?;
    let text = String::from_utf8_lossy(&bytes);
    Ok(classify_content(&text, rules))
}

fn record_for(path: &Path, size: u64, source: MibSource, archive_id: Option<i64>) -> MibFile {
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = path
        .file_stem()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| filename.clone());
    MibFile {
        id: None,
        name,
        filename,
        vendor: String::new(),
        category: String::new(),
        description: String::new(),
        oid_count: 0,
        size,
        path: path.to_path_buf(),
        status: MibFileStatus::Pending,
        source,
        archive_id,
    }
}

/// Walk an extraction workspace and create one MIB record per qualifying
/// file. Returns the number of records created.
pub fn classify_tree(
    store: &Arc<dyn RecordStore>,
    workspace: &Path,
    archive_id: i64,
    rules: &[VendorRule],
) -> Result<u32, StoreError> {
    let mut created = 0u32;
    for entry in WalkDir::new(workspace).into_iter().filter_map(Result::ok) {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let Some(filename) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !is_mib_file(filename) {
            continue;
        }

        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        let mut record = record_for(path, size, MibSource::Archive, Some(archive_id));
        match classify_file(path, rules) {
            Ok(meta) => {
                record.vendor = meta.vendor;
                record.category = meta.category;
                record.description = meta.description;
                record.oid_count = meta.oid_count;
                record.status = MibFileStatus::Validated;
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "classification read failed");
                record.status = MibFileStatus::Error;
            }
        }
        store.insert_mib_file(&record)?;
        created += 1;
    }
    debug!(archive = archive_id, created, "classified extraction workspace");
    Ok(created)
}

/// Classify a single uploaded MIB file and create its record.
pub fn classify_upload(
    store: &Arc<dyn RecordStore>,
    path: &Path,
    size: u64,
    rules: &[VendorRule],
) -> Result<i64, StoreError> {
    let mut record = record_for(path, size, MibSource::Upload, None);
    match classify_file(path, rules) {
        Ok(meta) => {
            record.vendor = meta.vendor;
            record.category = meta.category;
            record.description = meta.description;
            record.oid_count = meta.oid_count;
            record.status = MibFileStatus::Validated;
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "classification read failed");
            record.status = MibFileStatus::Error;
        }
    }
    store.insert_mib_file(&record)
}
