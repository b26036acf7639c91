//! Archive extraction into per-archive workspaces.
//!
//! Supported formats are dispatched on filename suffix: `.zip`, `.tar.gz`,
//! `.tgz` and `.tar`. Entry counts are recorded before any content is
//! written so progress is computable from the first entry onward. Entries
//! whose names resolve outside the workspace are rejected individually;
//! partially extracted trees are left on disk when an extraction errors so
//! they can be inspected.

use std::fs::File;
use std::io::Read;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use flate2::read::GzDecoder;
use thiserror::Error;
use tracing::{info, warn};
use zip::ZipArchive;

use super::classify::{DEFAULT_VENDOR_RULES, classify_tree};
use super::is_mib_file;
use crate::config::CoreConfig;
use crate::model::{ArchiveStatus, MibArchive, now_ts};
use crate::ops::CancelToken;
use crate::store::{RecordStore, StoreError};

/// Errors during archive ingestion.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("unsupported archive format: {name}")]
    UnsupportedFormat { name: String },

    #[error("entry {entry:?} escapes the extraction workspace")]
    PathTraversal { entry: String },

    #[error("archive error: {0}")]
    Archive(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("archive {id} is {status:?}; extraction requires an uploaded archive")]
    NotReady { id: i64, status: ArchiveStatus },

    #[error("extraction cancelled")]
    Cancelled,
}

/// Archive container format, decided by filename suffix only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArchiveFormat {
    Zip,
    TarGz,
    Tar,
}

impl ArchiveFormat {
    fn from_name(name: &str) -> Option<Self> {
        let lower = name.to_ascii_lowercase();
        if lower.ends_with(".zip") {
            Some(Self::Zip)
        } else if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
            Some(Self::TarGz)
        } else if lower.ends_with(".tar") {
            Some(Self::Tar)
        } else {
            None
        }
    }
}

/// Resolve an entry name beneath `workspace`, rejecting anything that would
/// land outside it (absolute paths, `..` segments, drive prefixes).
fn safe_entry_path(workspace: &Path, entry_name: &str) -> Result<PathBuf, ExtractError> {
    let entry = Path::new(entry_name);
    let mut dest = workspace.to_path_buf();
    for component in entry.components() {
        match component {
            Component::Normal(part) => dest.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(ExtractError::PathTraversal {
                    entry: entry_name.to_string(),
                });
            }
        }
    }
    if dest == workspace {
        return Err(ExtractError::PathTraversal {
            entry: entry_name.to_string(),
        });
    }
    Ok(dest)
}

/// Relevance check on the entry's file name, not its directory path - a
/// directory called `mibs/` must not admit every file under it.
fn qualifies(entry_name: &str) -> bool {
    Path::new(entry_name)
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(is_mib_file)
}

fn percent(extracted: u32, total: u32) -> u8 {
    if total == 0 {
        return 100;
    }
    let pct = (u64::from(extracted) * 100) / u64::from(total);
    u8::try_from(pct.min(100)).unwrap_or(100)
}

/// Ingests uploaded MIB archives.
pub struct Ingestor {
    store: Arc<dyn RecordStore>,
    upload_dir: PathBuf,
    extract_dir: PathBuf,
}

impl Ingestor {
    pub fn new(store: Arc<dyn RecordStore>, config: &CoreConfig) -> Self {
        Self {
            store,
            upload_dir: config.upload_dir.clone(),
            extract_dir: config.extract_dir.clone(),
        }
    }

    /// Workspace directory for one archive, keyed by its identity so
    /// concurrent archives can never collide.
    pub fn workspace_for(&self, archive_id: i64) -> PathBuf {
        self.extract_dir.join(format!("archive_{archive_id}"))
    }

    /// Record an already-persisted upload (the surrounding layer stores the
    /// payload and hands this core the local path and size).
    pub fn register_upload(
        &self,
        original_name: &str,
        path: &Path,
        size: u64,
    ) -> Result<i64, ExtractError> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| original_name.to_string());
        let archive = MibArchive {
            id: None,
            name,
            original_name: original_name.to_string(),
            path: path.to_path_buf(),
            size,
            status: ArchiveStatus::Uploaded,
            extracted_files: 0,
            total_files: 0,
            progress: 0,
            error: None,
            uploaded_at: now_ts(),
            extracted_at: None,
        };
        let id = self.store.insert_archive(&archive)?;
        info!(archive = id, name = %archive.original_name, size, "archive registered");
        Ok(id)
    }

    /// Copy a local archive into the uploads area and register it.
    pub fn import_upload(&self, source: &Path) -> Result<i64, ExtractError> {
        let original_name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "archive".to_string());
        std::fs::create_dir_all(&self.upload_dir)?;
        let stored_name = format!("{}_{}", now_ts(), original_name);
        let dest = self.upload_dir.join(&stored_name);
        std::fs::copy(source, &dest)?;
        let size = std::fs::metadata(&dest)?.len();
        self.register_upload(&original_name, &dest, size)
    }

    /// Re-arm a terminal archive for another extraction pass. The workspace
    /// directory is reused; previously classified files keep their records.
    pub fn reset(&self, archive_id: i64) -> Result<(), ExtractError> {
        let mut archive = self.store.get_archive(archive_id)?;
        archive.status = ArchiveStatus::Uploaded;
        archive.extracted_files = 0;
        archive.total_files = 0;
        archive.progress = 0;
        archive.error = None;
        archive.extracted_at = None;
        self.store.update_archive(&archive)?;
        Ok(())
    }

    /// Extract one uploaded archive and classify its workspace.
    ///
    /// Callers must hold the archive's operation key (see [`crate::ops`]):
    /// two concurrent extractions of the same archive would interleave their
    /// record writes.
    pub fn extract(&self, archive_id: i64, cancel: &CancelToken) -> Result<(), ExtractError> {
        let mut archive = self.store.get_archive(archive_id)?;
        if archive.status != ArchiveStatus::Uploaded {
            return Err(ExtractError::NotReady {
                id: archive_id,
                status: archive.status,
            });
        }

        archive.status = ArchiveStatus::Extracting;
        archive.progress = 0;
        archive.extracted_files = 0;
        archive.total_files = 0;
        archive.error = None;
        self.store.update_archive(&archive)?;

        let workspace = self.workspace_for(archive_id);
        let result = self.run_extraction(&mut archive, &workspace, cancel);

        match result {
            Ok(()) => {
                archive.status = ArchiveStatus::Extracted;
                archive.progress = 100;
                archive.extracted_at = Some(now_ts());
                self.store.update_archive(&archive)?;
                info!(
                    archive = archive_id,
                    extracted = archive.extracted_files,
                    total = archive.total_files,
                    "archive extracted"
                );
                classify_tree(&self.store, &workspace, archive_id, DEFAULT_VENDOR_RULES)?;
                Ok(())
            }
            Err(e) => {
                // Partial extracts stay on disk for inspection.
                archive.status = ArchiveStatus::Error;
                archive.error = Some(e.to_string());
                self.store.update_archive(&archive)?;
                warn!(archive = archive_id, error = %e, "extraction failed");
                Err(e)
            }
        }
    }

    fn run_extraction(
        &self,
        archive: &mut MibArchive,
        workspace: &Path,
        cancel: &CancelToken,
    ) -> Result<(), ExtractError> {
        let format =
            ArchiveFormat::from_name(&archive.name).ok_or_else(|| ExtractError::UnsupportedFormat {
                name: archive.name.clone(),
            })?;
        std::fs::create_dir_all(workspace)?;

        match format {
            ArchiveFormat::Zip => self.extract_zip(archive, workspace, cancel),
            ArchiveFormat::TarGz => self.extract_tar(archive, workspace, cancel, true),
            ArchiveFormat::Tar => self.extract_tar(archive, workspace, cancel, false),
        }
    }

    fn extract_zip(
        &self,
        archive: &mut MibArchive,
        workspace: &Path,
        cancel: &CancelToken,
    ) -> Result<(), ExtractError> {
        let file = File::open(&archive.path)?;
        let mut zip = ZipArchive::new(file).map_err(|e| ExtractError::Archive(e.to_string()))?;

        archive.total_files = u32::try_from(zip.len()).unwrap_or(u32::MAX);
        self.store.update_archive(archive)?;

        for index in 0..zip.len() {
            if cancel.is_cancelled() {
                return Err(ExtractError::Cancelled);
            }
            let mut entry = zip
                .by_index(index)
                .map_err(|e| ExtractError::Archive(e.to_string()))?;
            if entry.is_dir() {
                continue;
            }
            let entry_name = entry.name().to_string();
            if !qualifies(&entry_name) {
                continue;
            }
            let dest = match safe_entry_path(workspace, &entry_name) {
                Ok(dest) => dest,
                Err(ExtractError::PathTraversal { entry }) => {
                    warn!(archive = archive.id, entry = %entry, "rejected traversal entry");
                    continue;
                }
                Err(e) => return Err(e),
            };
            write_entry(&mut entry, &dest)?;
            archive.extracted_files += 1;
            archive.progress = percent(archive.extracted_files, archive.total_files);
            self.store.update_archive(archive)?;
        }
        Ok(())
    }

    fn extract_tar(
        &self,
        archive: &mut MibArchive,
        workspace: &Path,
        cancel: &CancelToken,
        gzipped: bool,
    ) -> Result<(), ExtractError> {
        // First pass counts entries so total_files is known before any
        // content hits disk; tar is stream-only, so the file is reopened.
        archive.total_files = count_tar_entries(&archive.path, gzipped)?;
        self.store.update_archive(archive)?;

        let mut tar = open_tar(&archive.path, gzipped)?;
        let entries = tar
            .entries()
            .map_err(|e| ExtractError::Archive(e.to_string()))?;
        for entry in entries {
            if cancel.is_cancelled() {
                return Err(ExtractError::Cancelled);
            }
            let mut entry = entry.map_err(|e| ExtractError::Archive(e.to_string()))?;
            if entry.header().entry_type().is_dir() {
                continue;
            }
            let entry_name = entry
                .path()
                .map_err(|e| ExtractError::Archive(e.to_string()))?
                .to_string_lossy()
                .into_owned();
            if !qualifies(&entry_name) {
                continue;
            }
            let dest = match safe_entry_path(workspace, &entry_name) {
                Ok(dest) => dest,
                Err(ExtractError::PathTraversal { entry }) => {
                    warn!(archive = archive.id, entry = %entry, "rejected traversal entry");
                    continue;
                }
                Err(e) => return Err(e),
            };
            write_entry(&mut entry, &dest)?;
            archive.extracted_files += 1;
            archive.progress = percent(archive.extracted_files, archive.total_files);
            self.store.update_archive(archive)?;
        }
        Ok(())
    }
}

fn open_tar(path: &Path, gzipped: bool) -> Result<tar::Archive<Box<dyn Read>>, ExtractError> {
    let file = File::open(path)?;
    let reader: Box<dyn Read> = if gzipped {
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(file)
    };
    Ok(tar::Archive::new(reader))
}

fn count_tar_entries(path: &Path, gzipped: bool) -> Result<u32, ExtractError> {
    let mut tar = open_tar(path, gzipped)?;
    let entries = tar
        .entries()
        .map_err(|e| ExtractError::Archive(e.to_string()))?;
    let mut total = 0u32;
    for entry in entries {
        entry.map_err(|e| ExtractError::Archive(e.to_string()))?;
        total = total.saturating_add(1);
    }
    Ok(total)
}

/// Materialize one entry's bytes at `dest`, creating parent directories.
fn write_entry(reader: &mut dyn Read, dest: &Path) -> Result<(), ExtractError> {
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut out = File::create(dest)?;
    std::io::copy(reader, &mut out)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_dispatch_by_suffix() {
        assert_eq!(ArchiveFormat::from_name("mibs.zip"), Some(ArchiveFormat::Zip));
        assert_eq!(
            ArchiveFormat::from_name("vendor.tar.gz"),
            Some(ArchiveFormat::TarGz)
        );
        assert_eq!(ArchiveFormat::from_name("vendor.tgz"), Some(ArchiveFormat::TarGz));
        assert_eq!(ArchiveFormat::from_name("vendor.tar"), Some(ArchiveFormat::Tar));
        assert_eq!(ArchiveFormat::from_name("MIBS.ZIP"), Some(ArchiveFormat::Zip));
        assert_eq!(ArchiveFormat::from_name("vendor.rar"), None);
        assert_eq!(ArchiveFormat::from_name("plain.mib"), None);
    }

    #[test]
    fn safe_paths_stay_inside_workspace() {
        let ws = Path::new("/data/extract/archive_1");
        let dest = safe_entry_path(ws, "cisco/CISCO-SMI.mib").unwrap();
        assert!(dest.starts_with(ws));
        assert!(dest.ends_with("cisco/CISCO-SMI.mib"));
    }

    #[test]
    fn parent_segments_are_rejected() {
        let ws = Path::new("/data/extract/archive_1");
        assert!(matches!(
            safe_entry_path(ws, "../outside.mib"),
            Err(ExtractError::PathTraversal { .. })
        ));
        assert!(matches!(
            safe_entry_path(ws, "nested/../../outside.mib"),
            Err(ExtractError::PathTraversal { .. })
        ));
        assert!(matches!(
            safe_entry_path(ws, "/etc/passwd"),
            Err(ExtractError::PathTraversal { .. })
        ));
    }

    #[test]
    fn curdir_segments_are_ignored() {
        let ws = Path::new("/data/extract/archive_1");
        let dest = safe_entry_path(ws, "./vendor/./router.mib").unwrap();
        assert_eq!(dest, ws.join("vendor/router.mib"));
    }

    #[test]
    fn empty_entry_name_is_rejected() {
        let ws = Path::new("/data/extract/archive_1");
        assert!(matches!(
            safe_entry_path(ws, ""),
            Err(ExtractError::PathTraversal { .. })
        ));
    }

    #[test]
    fn qualification_checks_the_basename_only() {
        assert!(qualifies("vendor/switch.mib"));
        assert!(qualifies("deep/dir/SNMPv2-MIB"));
        assert!(qualifies("../escape.mib"));
        assert!(!qualifies("mibs/firmware.bin"));
        assert!(!qualifies("vendor/logo.png"));
    }

    #[test]
    fn percent_is_bounded_and_total_zero_is_complete() {
        assert_eq!(percent(0, 10), 0);
        assert_eq!(percent(5, 10), 50);
        assert_eq!(percent(10, 10), 100);
        assert_eq!(percent(0, 0), 100);
    }

    proptest::proptest! {
        /// Whatever an archive entry calls itself, its resolved path either
        /// stays under the workspace or the entry is rejected.
        #[test]
        fn sanitized_entries_never_escape(
            segments in proptest::collection::vec(
                proptest::string::string_regex("([a-zA-Z0-9_.-]{1,12}|\\.\\.|\\.)").unwrap(),
                1..6,
            ),
            leading_slash in proptest::bool::ANY,
        ) {
            let mut name = segments.join("/");
            if leading_slash {
                name.insert(0, '/');
            }
            let ws = Path::new("/data/extract/archive_9");
            if let Ok(dest) = safe_entry_path(ws, &name) {
                proptest::prop_assert!(dest.starts_with(ws));
                proptest::prop_assert_ne!(dest, ws.to_path_buf());
            }
        }
    }
}
