//! Move, commit and revert
//!
//! Moves staged files into the library layout, merges the staged batch into
//! the permanent catalog and, when needed, puts files back where they were
//! found. Each filesystem move is journaled before it is attempted. Failures
//! are collected per record; the rest of the batch carries on.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use super::placement::plan;
use crate::config::Config;
use crate::error::{CatalogError, Result};
use crate::progress::Progress;
use crate::state::data::{ImageRecord, JournalStatus};
use crate::state::library::{Library, WriteMode};

/// Whether `move_files` touches the filesystem
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveMode {
    /// Move the files and record the new locations
    Execute,
    /// Only compute and record the destinations
    PlanOnly,
}

/// A record whose file could not be moved
#[derive(Debug)]
pub struct MoveFailure {
    pub record_id: i64,
    pub from: PathBuf,
    pub to: PathBuf,
    pub error: CatalogError,
}

#[derive(Debug, Default)]
pub struct MoveReport {
    /// The batch after the move; failed records keep their old location
    pub records: Vec<ImageRecord>,
    pub moved: usize,
    pub failures: Vec<MoveFailure>,
}

#[derive(Debug, Default)]
pub struct CommitReport {
    pub moves: MoveReport,
    /// Rows added to the permanent catalog
    pub merged: usize,
}

#[derive(Debug, Default)]
pub struct RevertReport {
    /// Ids whose files are back at their original location
    pub reverted: Vec<i64>,
    /// Ids with no recorded origin or already in place
    pub skipped: Vec<i64>,
    pub failures: Vec<MoveFailure>,
}

/// Rename `from` to `to`, creating the destination folder
///
/// Refuses to overwrite an existing destination.
pub(crate) fn relocate(from: &Path, to: &Path) -> Result<()> {
    if to.exists() {
        return Err(CatalogError::PlacementConflict {
            from: from.to_path_buf(),
            destination: to.to_path_buf(),
        });
    }
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::rename(from, to).map_err(|source| CatalogError::Move {
        from: from.to_path_buf(),
        to: to.to_path_buf(),
        source,
    })
}

/// Where a record's file is now
///
/// A planned-only record names its destination but the file is still at its
/// original path.
fn source_path(record: &ImageRecord) -> PathBuf {
    let current = record.path();
    match record.original_path() {
        Some(original) if !current.exists() && original.exists() => original,
        _ => current,
    }
}

pub struct Mover<'a> {
    library: &'a Library,
    image_dir: &'a Path,
}

impl<'a> Mover<'a> {
    pub fn new(library: &'a Library, config: &'a Config) -> Self {
        Self {
            library,
            image_dir: &config.image_dir,
        }
    }

    /// Move each record's file to its canonical place in the library
    ///
    /// Returns new record values; the input batch is left untouched. Only
    /// catalog errors abort; filesystem failures are reported per record.
    pub fn move_files(&self, records: &[ImageRecord], mode: MoveMode, progress: &mut dyn Progress) -> Result<MoveReport> {
        let mut report = MoveReport::default();
        progress.begin("Moving files", records.len());

        for record in records {
            progress.advance();
            let placement = plan(self.image_dir, record);
            let from = source_path(record);
            let to = placement.path();
            let moved = record.relocated(placement.folder, placement.file);

            if mode == MoveMode::PlanOnly || from == to {
                report.records.push(moved);
                continue;
            }

            let seq = self.library.journal_begin(record.id, &from, &to)?;
            match relocate(&from, &to) {
                Ok(()) => {
                    self.library.journal_finish(seq, JournalStatus::Done)?;
                    tracing::debug!(id = record.id, from = %from.display(), to = %to.display(), "Moved");
                    report.records.push(moved);
                    report.moved += 1;
                }
                Err(error) => {
                    self.library.journal_finish(seq, JournalStatus::Failed)?;
                    tracing::warn!(id = record.id, from = %from.display(), %error, "Move failed");
                    report.records.push(record.clone());
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

        tracing::info!(
            moved = report.moved,
            failed = report.failures.len(),
            ?mode,
            "Move batch finished"
        );
        Ok(report)
    }

    /// Move the staged batch into the library and merge it into the catalog
    ///
    /// The staging table is rewritten with the outcome either way. If any
    /// move failed the merge is held back; fix the cause and commit again,
    /// records already in place are not moved twice.
    pub fn commit(&self, progress: &mut dyn Progress) -> Result<CommitReport> {
        let staged = self.library.read_staged()?;
        let moves = self.move_files(&staged, MoveMode::Execute, progress)?;
        self.library.write_staged(&moves.records)?;

        if !moves.failures.is_empty() {
            tracing::warn!(
                failed = moves.failures.len(),
                "Not merging into catalog until every staged file is in place"
            );
            return Ok(CommitReport { moves, merged: 0 });
        }

        let merged = self.library.merge_staged()?;
        Ok(CommitReport { moves, merged })
    }

    /// Record planned destinations in the staging table without moving anything
    pub fn preview(&self, progress: &mut dyn Progress) -> Result<MoveReport> {
        let staged = self.library.read_staged()?;
        let report = self.move_files(&staged, MoveMode::PlanOnly, progress)?;
        self.library.write_staged(&report.records)?;
        Ok(report)
    }

    /// Put every file of the last staging batch back where it was found
    ///
    /// Files are taken from where the catalog says they are now, so a batch
    /// can still be reverted after the library was reorganised. Reverted ids
    /// are dropped from the permanent catalog. The staging rows stay as a
    /// record of what was reverted.
    pub fn revert(&self, progress: &mut dyn Progress) -> Result<RevertReport> {
        let staged = self.library.read_staged()?;
        let catalogued: HashMap<i64, ImageRecord> = self
            .library
            .load_library()?
            .into_iter()
            .map(|r| (r.id, r))
            .collect();
        let mut report = RevertReport::default();
        progress.begin("Reverting files", staged.len());

        for record in &staged {
            progress.advance();
            let Some(original) = record.original_path() else {
                report.skipped.push(record.id);
                continue;
            };
            let current = catalogued
                .get(&record.id)
                .filter(|c| c.md5sum == record.md5sum)
                .map_or_else(|| record.path(), ImageRecord::path);
            if current == original || (!current.exists() && original.exists()) {
                report.skipped.push(record.id);
                continue;
            }

            let seq = self.library.journal_begin(record.id, &current, &original)?;
            match relocate(&current, &original) {
                Ok(()) => {
                    self.library.journal_finish(seq, JournalStatus::Reverted)?;
                    tracing::info!(id = record.id, to = %original.display(), "Reverted");
                    report.reverted.push(record.id);
                }
                Err(error) => {
                    self.library.journal_finish(seq, JournalStatus::Failed)?;
                    tracing::warn!(id = record.id, from = %current.display(), %error, "Revert failed");
                    report.failures.push(MoveFailure {
                        record_id: record.id,
                        from: current,
                        to: original,
                        error,
                    });
                }
            }
        }
        progress.finish();

        let removed = self.library.remove_records(&report.reverted)?;
        tracing::info!(
            reverted = report.reverted.len(),
            removed_from_catalog = removed,
            failed = report.failures.len(),
            "Revert finished"
        );
        Ok(report)
    }

    /// Re-file the whole permanent catalog into the canonical layout
    ///
    /// New locations are stored in the catalog and the outcome is kept in
    /// the reorganize table. The staging table still holds the last intake
    /// batch, so `revert` keeps undoing that batch and nothing else.
    pub fn reorganize_library(&self, progress: &mut dyn Progress) -> Result<MoveReport> {
        let library = self.library.load_library()?;
        let report = self.move_files(&library, MoveMode::Execute, progress)?;
        let audit = &self.library.tables().reorganized;
        self.library.write_table(audit, &report.records, WriteMode::Replace)?;

        let failed: Vec<i64> = report.failures.iter().map(|f| f.record_id).collect();
        for (before, after) in library.iter().zip(&report.records) {
            if !failed.contains(&after.id) && before.path() != after.path() {
                self.library.update_location(after.id, &after.folder, &after.file)?;
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TableNames;
    use crate::fits::extract::hash_file;
    use crate::progress::Silent;
    use crate::state::data::testing::sample_record;

    struct Fixture {
        _dir: tempfile::TempDir,
        intake: PathBuf,
        config: Config,
        library: Library,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let intake = dir.path().join("intake");
        fs::create_dir_all(&intake).unwrap();
        let mut config = Config::default();
        config.image_dir = dir.path().join("library");
        let library = Library::open_in_memory(TableNames::default()).unwrap();
        Fixture { _dir: dir, intake, config, library }
    }

    fn staged(fx: &Fixture, id: i64, contents: &[u8]) -> ImageRecord {
        let mut record = sample_record(id, "");
        record.folder = fx.intake.clone();
        fs::write(record.path(), contents).unwrap();
        record.md5sum = Some(hash_file(&record.path()).unwrap());
        record
    }

    #[test]
    fn test_plan_only_leaves_files() {
        let fx = fixture();
        let record = staged(&fx, 1, b"one");
        let mover = Mover::new(&fx.library, &fx.config);

        let report = mover.move_files(&[record.clone()], MoveMode::PlanOnly, &mut Silent).unwrap();

        assert!(record.path().exists());
        assert_eq!(report.moved, 0);
        assert_eq!(report.records[0].orig_folder.as_deref(), Some(fx.intake.as_path()));
        assert!(report.records[0].folder.starts_with(&fx.config.image_dir));
        assert!(fx.library.journal_entries().unwrap().is_empty());
    }

    #[test]
    fn test_commit_after_preview() {
        let fx = fixture();
        let record = staged(&fx, 1, b"one");
        fx.library.write_staged(&[record.clone()]).unwrap();
        let mover = Mover::new(&fx.library, &fx.config);

        let preview = mover.preview(&mut Silent).unwrap();
        let planned = preview.records[0].path();
        assert_eq!(fx.library.read_staged().unwrap()[0].path(), planned);
        assert!(!planned.exists());

        let report = mover.commit(&mut Silent).unwrap();
        assert_eq!(report.moves.moved, 1);
        assert!(planned.exists());
        assert!(!record.path().exists());
    }

    #[test]
    fn test_commit_moves_and_merges() {
        let fx = fixture();
        let batch = vec![staged(&fx, 1, b"one"), staged(&fx, 2, b"two")];
        fx.library.write_staged(&batch).unwrap();
        let mover = Mover::new(&fx.library, &fx.config);

        let report = mover.commit(&mut Silent).unwrap();

        assert_eq!(report.moves.moved, 2);
        assert_eq!(report.merged, 2);
        for record in fx.library.load_library().unwrap() {
            assert!(record.path().exists());
            assert!(!record.original_path().unwrap().exists());
            assert!(record.file.starts_with(&format!("{:06}_", record.id)));
        }
        let staged_rows = fx.library.read_staged().unwrap();
        assert!(staged_rows.iter().all(|r| r.orig_folder.is_some()));
        assert!(fx.library.unfinished_moves().unwrap().is_empty());
    }

    #[test]
    fn test_conflict_is_not_overwritten() {
        let fx = fixture();
        let record = staged(&fx, 1, b"mine");
        let target = plan(&fx.config.image_dir, &record).path();
        fs::create_dir_all(target.parent().unwrap()).unwrap();
        fs::write(&target, b"someone else").unwrap();
        let other = staged(&fx, 2, b"two");
        fx.library.write_staged(&[record.clone(), other]).unwrap();

        let report = Mover::new(&fx.library, &fx.config).commit(&mut Silent).unwrap();

        assert_eq!(report.moves.failures.len(), 1);
        assert!(matches!(report.moves.failures[0].error, CatalogError::PlacementConflict { .. }));
        assert_eq!(report.moves.moved, 1);
        assert_eq!(report.merged, 0);
        assert_eq!(fs::read(&target).unwrap(), b"someone else");
        assert!(record.path().exists());

        // Staging reflects what actually happened
        let staged_rows = fx.library.read_staged().unwrap();
        assert_eq!(staged_rows[0].folder, fx.intake);
        assert!(staged_rows[1].folder.starts_with(&fx.config.image_dir));

        // Clearing the conflict and committing again finishes the batch
        fs::remove_file(&target).unwrap();
        let retry = Mover::new(&fx.library, &fx.config).commit(&mut Silent).unwrap();
        assert_eq!(retry.moves.moved, 1);
        assert_eq!(retry.merged, 2);
    }

    #[test]
    fn test_commit_then_revert_round_trip() {
        let fx = fixture();
        let batch = vec![staged(&fx, 1, b"one"), staged(&fx, 2, b"two")];
        fx.library.write_staged(&batch).unwrap();
        let mover = Mover::new(&fx.library, &fx.config);
        mover.commit(&mut Silent).unwrap();

        // Revert recreates a missing origin folder
        fs::remove_dir_all(&fx.intake).unwrap();
        let report = mover.revert(&mut Silent).unwrap();

        assert_eq!(report.reverted, vec![1, 2]);
        for record in &batch {
            assert!(record.path().exists());
            assert_eq!(hash_file(&record.path()).unwrap(), record.md5sum.clone().unwrap());
        }
        assert_eq!(fx.library.image_count().unwrap(), 0);
        assert_eq!(fx.library.read_staged().unwrap().len(), 2);

        // A second revert has nothing left to do
        let again = mover.revert(&mut Silent).unwrap();
        assert!(again.reverted.is_empty());
        assert_eq!(again.skipped, vec![1, 2]);
    }

    #[test]
    fn test_reorganize_updates_catalog() {
        let fx = fixture();
        let record = staged(&fx, 3, b"three");
        let table = fx.library.tables().library.clone();
        fx.library
            .write_table(&table, &[record.clone()], WriteMode::Append)
            .unwrap();

        let report = Mover::new(&fx.library, &fx.config).reorganize_library(&mut Silent).unwrap();

        assert_eq!(report.moved, 1);
        let catalogued = &fx.library.load_library().unwrap()[0];
        assert_eq!(catalogued.path(), report.records[0].path());
        assert!(catalogued.path().exists());

        let audit: Vec<ImageRecord> = fx.library.read_table(&fx.library.tables().reorganized).unwrap();
        assert_eq!(audit.len(), 1);
        let staging = fx.library.tables().staging.clone();
        assert!(!fx.library.table_exists(&staging).unwrap());
    }

    #[test]
    fn test_revert_after_reorganize_only_undoes_last_batch() {
        let fx = fixture();
        let mover = Mover::new(&fx.library, &fx.config);
        let earlier = staged(&fx, 1, b"one");
        fx.library.write_staged(&[earlier.clone()]).unwrap();
        mover.commit(&mut Silent).unwrap();
        let latest = staged(&fx, 2, b"two");
        fx.library.write_staged(&[latest.clone()]).unwrap();
        mover.commit(&mut Silent).unwrap();

        // Re-file everything under a new library root
        let mut moved_root = fx.config.clone();
        moved_root.image_dir = fx._dir.path().join("library2");
        let reorganized = Mover::new(&fx.library, &moved_root)
            .reorganize_library(&mut Silent)
            .unwrap();
        assert_eq!(reorganized.moved, 2);

        let report = mover.revert(&mut Silent).unwrap();

        assert_eq!(report.reverted, vec![2]);
        assert!(report.failures.is_empty());
        assert!(latest.path().exists());
        assert!(!earlier.path().exists());
        let catalog = fx.library.load_library().unwrap();
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog[0].id, 1);
        assert!(catalog[0].path().starts_with(&moved_root.image_dir));
        assert!(catalog[0].path().exists());
    }

    #[test]
    fn test_revert_after_partial_commit() {
        let fx = fixture();
        let table = fx.library.tables().library.clone();
        let mut unrelated = sample_record(9, "older");
        unrelated.folder = fx.config.image_dir.join("M42");
        fx.library.write_table(&table, &[unrelated], WriteMode::Append).unwrap();

        let blocked = staged(&fx, 1, b"mine");
        let target = plan(&fx.config.image_dir, &blocked).path();
        fs::create_dir_all(target.parent().unwrap()).unwrap();
        fs::write(&target, b"someone else").unwrap();
        let moving = staged(&fx, 2, b"two");
        fx.library.write_staged(&[blocked.clone(), moving.clone()]).unwrap();
        let mover = Mover::new(&fx.library, &fx.config);

        let commit = mover.commit(&mut Silent).unwrap();
        assert_eq!(commit.merged, 0);
        assert!(!moving.path().exists());

        let report = mover.revert(&mut Silent).unwrap();

        assert_eq!(report.reverted, vec![2]);
        assert_eq!(report.skipped, vec![1]);
        assert!(report.failures.is_empty());
        assert!(moving.path().exists());
        assert!(blocked.path().exists());
        assert_eq!(fs::read(&target).unwrap(), b"someone else");
        let catalog = fx.library.load_library().unwrap();
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog[0].id, 9);
    }
}
