//! Library maintenance
//!
//! Small repairs run outside the intake flow: pruning emptied folders,
//! backfilling content hashes and renaming files whose sequence prefix no
//! longer matches their catalog id.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::mover::{relocate, MoveFailure};
use super::placement::sequence_file_name;
use crate::error::{CatalogError, Result};
use crate::fits::extract::hash_file;
use crate::progress::Progress;
use crate::state::data::JournalStatus;
use crate::state::library::Library;

/// Remove every empty directory below `root`, deepest first
///
/// `root` itself is never removed. Folders that only held empty folders are
/// removed too.
pub fn prune_empty_dirs(root: &Path) -> Result<Vec<PathBuf>> {
    let mut removed = Vec::new();
    for entry in WalkDir::new(root).min_depth(1).contents_first(true) {
        let entry = entry?;
        if !entry.file_type().is_dir() {
            continue;
        }
        let path = entry.path();
        if fs::read_dir(path)?.next().is_none() {
            fs::remove_dir(path)?;
            tracing::info!(path = %path.display(), "Removed empty folder");
            removed.push(path.to_path_buf());
        } else {
            tracing::debug!(path = %path.display(), "Leaving non-empty folder");
        }
    }
    Ok(removed)
}

#[derive(Debug, Default)]
pub struct HashReport {
    /// Ids that now have a hash
    pub updated: Vec<i64>,
    /// Ids whose file is not on disk
    pub not_found: Vec<i64>,
    pub failures: Vec<(i64, CatalogError)>,
}

/// Compute and store the hash of every catalog entry that lacks one
pub fn fill_missing_hashes(library: &Library, progress: &mut dyn Progress) -> Result<HashReport> {
    let missing: Vec<_> = library
        .load_library()?
        .into_iter()
        .filter(|r| r.md5sum.is_none())
        .collect();

    let mut report = HashReport::default();
    progress.begin("Generating md5sums", missing.len());
    for record in &missing {
        progress.advance();
        match hash_file(&record.path()) {
            Ok(hash) => {
                library.update_hash(record.id, &hash)?;
                report.updated.push(record.id);
            }
            Err(CatalogError::Io(e)) if e.kind() == io::ErrorKind::NotFound => {
                tracing::warn!(id = record.id, path = %record.path().display(), "File not found");
                report.not_found.push(record.id);
            }
            Err(error) => {
                tracing::warn!(id = record.id, %error, "Could not hash file");
                report.failures.push((record.id, error));
            }
        }
    }
    progress.finish();

    tracing::info!(
        updated = report.updated.len(),
        not_found = report.not_found.len(),
        "Hash backfill finished"
    );
    Ok(report)
}

#[derive(Debug, Default)]
pub struct AlignReport {
    pub renamed: Vec<i64>,
    pub failures: Vec<MoveFailure>,
}

/// The id a library file name claims, if it carries a sequence prefix
fn file_prefix(file: &str) -> Option<i64> {
    let digits = file.get(..6)?;
    if !digits.bytes().all(|b| b.is_ascii_digit()) || file.as_bytes().get(6) != Some(&b'_') {
        return None;
    }
    digits.parse().ok()
}

/// Rename library files whose sequence prefix disagrees with their id
///
/// Files without a prefix are left alone.
pub fn align_file_prefixes(library: &Library, progress: &mut dyn Progress) -> Result<AlignReport> {
    let records = library.load_library()?;
    let mut report = AlignReport::default();
    progress.begin("Aligning file names", records.len());

    for record in &records {
        progress.advance();
        match file_prefix(&record.file) {
            Some(prefix) if prefix != record.id => {}
            _ => continue,
        }

        let file = sequence_file_name(record.id, &record.file[7..]);
        let from = record.path();
        let to = record.folder.join(&file);

        let seq = library.journal_begin(record.id, &from, &to)?;
        match relocate(&from, &to) {
            Ok(()) => {
                library.journal_finish(seq, JournalStatus::Done)?;
                library.update_location(record.id, &record.folder, &file)?;
                tracing::info!(id = record.id, from = %record.file, to = %file, "Renamed");
                report.renamed.push(record.id);
            }
            Err(error) => {
                library.journal_finish(seq, JournalStatus::Failed)?;
                tracing::warn!(id = record.id, %error, "Rename failed");
                report.failures.push(MoveFailure {
                    record_id: record.id,
                    from,
                    to,
                    error,
                });
            }
        }
    }
    progress.finish();
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TableNames;
    use crate::progress::Silent;
    use crate::state::data::testing::sample_record;
    use crate::state::data::ImageRecord;
    use crate::state::library::WriteMode;

    fn catalog(records: &[ImageRecord]) -> Library {
        let library = Library::open_in_memory(TableNames::default()).unwrap();
        let table = library.tables().library.clone();
        library.write_table(&table, records, WriteMode::Append).unwrap();
        library
    }

    #[test]
    fn test_prune_empty_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("a/b/c")).unwrap();
        fs::create_dir_all(root.join("keep/empty")).unwrap();
        fs::write(root.join("keep/file.fits"), b"x").unwrap();

        let removed = prune_empty_dirs(root).unwrap();

        assert_eq!(removed.len(), 4);
        assert!(!root.join("a").exists());
        assert!(!root.join("keep/empty").exists());
        assert!(root.join("keep/file.fits").exists());
        assert!(root.exists());
    }

    #[test]
    fn test_fill_missing_hashes() {
        let dir = tempfile::tempdir().unwrap();
        let mut present = sample_record(1, "");
        present.md5sum = None;
        present.folder = dir.path().to_path_buf();
        fs::write(present.path(), b"").unwrap();
        let mut gone = sample_record(2, "");
        gone.md5sum = None;
        gone.folder = dir.path().to_path_buf();
        let hashed = sample_record(3, "already");
        let library = catalog(&[present, gone, hashed]);

        let report = fill_missing_hashes(&library, &mut Silent).unwrap();

        assert_eq!(report.updated, vec![1]);
        assert_eq!(report.not_found, vec![2]);
        let stored = library.load_library().unwrap();
        assert_eq!(stored[0].md5sum.as_deref(), Some("d41d8cd98f00b204e9800998ecf8427e"));
        assert_eq!(stored[2].md5sum.as_deref(), Some("already"));
    }

    #[test]
    fn test_file_prefix() {
        assert_eq!(file_prefix("000042_m31.fits"), Some(42));
        assert_eq!(file_prefix("m31.fits"), None);
        assert_eq!(file_prefix("0000420m31.fits"), None);
    }

    #[test]
    fn test_align_file_prefixes() {
        let dir = tempfile::tempdir().unwrap();
        let mut wrong = sample_record(7, "a");
        wrong.folder = dir.path().to_path_buf();
        wrong.file = "000005_m31.fits".into();
        fs::write(wrong.path(), b"x").unwrap();
        let mut right = sample_record(8, "b");
        right.folder = dir.path().to_path_buf();
        right.file = "000008_m31.fits".into();
        fs::write(right.path(), b"y").unwrap();
        let library = catalog(&[wrong, right]);

        let report = align_file_prefixes(&library, &mut Silent).unwrap();

        assert_eq!(report.renamed, vec![7]);
        assert!(dir.path().join("000007_m31.fits").exists());
        assert!(!dir.path().join("000005_m31.fits").exists());
        assert_eq!(library.load_library().unwrap()[0].file, "000007_m31.fits");
    }
}
