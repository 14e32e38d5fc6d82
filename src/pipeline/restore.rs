//! Restore by content hash
//!
//! Files in the catalog that went bad are replaced with copies found in a
//! recovery folder. Matching is by md5; the recovered file is renamed over
//! the catalogued path so catalog rows stay valid.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use super::discover::Discovery;
use crate::config::{Config, DiscoveryOptions};
use crate::error::{CatalogError, Result};
use crate::progress::Progress;
use crate::state::data::{ImageRecord, JournalStatus};
use crate::state::library::Library;

/// A catalog record paired with the recovered file holding its content
#[derive(Debug, Clone, PartialEq)]
pub struct RestoreMatch {
    pub old_id: i64,
    /// Id assigned to the recovered file by the discovery pass
    pub new_id: i64,
    pub old_path: PathBuf,
    pub new_path: PathBuf,
}

/// A catalog record with several equally good recovery candidates
#[derive(Debug, Clone, PartialEq)]
pub struct AmbiguousMatch {
    pub old_id: i64,
    pub candidates: Vec<i64>,
}

impl AmbiguousMatch {
    pub fn to_error(&self) -> CatalogError {
        CatalogError::MatchAmbiguous {
            old_id: self.old_id,
            candidates: self.candidates.clone(),
        }
    }
}

#[derive(Debug, Default)]
pub struct MatchReport {
    pub matches: Vec<RestoreMatch>,
    pub ambiguous: Vec<AmbiguousMatch>,
}

#[derive(Debug)]
pub struct RestoreFailure {
    pub old_id: i64,
    pub old_path: PathBuf,
    pub new_path: PathBuf,
    pub error: CatalogError,
}

#[derive(Debug, Default)]
pub struct RestoreReport {
    pub restored: Vec<i64>,
    pub failures: Vec<RestoreFailure>,
}

/// Catalog file name without its library sequence prefix
fn unprefixed(file: &str) -> &str {
    let bytes = file.as_bytes();
    if bytes.len() > 7 && bytes[..6].iter().all(u8::is_ascii_digit) && bytes[6] == b'_' {
        &file[7..]
    } else {
        file
    }
}

/// Pair catalog records with recovered records of the same content
///
/// Several candidates for one record are narrowed by file name: the
/// recovered name must equal the catalogued name, with or without its
/// sequence prefix, or the name the file had before it was first moved.
/// What cannot be narrowed to a single candidate is reported, not guessed.
pub fn find_matches(old: &[ImageRecord], new: &[ImageRecord]) -> MatchReport {
    let mut by_hash: HashMap<&str, Vec<&ImageRecord>> = HashMap::new();
    for record in new {
        if let Some(hash) = record.md5sum.as_deref() {
            by_hash.entry(hash).or_default().push(record);
        }
    }

    let mut report = MatchReport::default();
    for record in old {
        let Some(candidates) = record.md5sum.as_deref().and_then(|h| by_hash.get(h)) else {
            continue;
        };

        let chosen = if candidates.len() == 1 {
            Some(candidates[0])
        } else {
            let names = [
                Some(record.file.as_str()),
                Some(unprefixed(&record.file)),
                record.orig_file.as_deref(),
            ];
            let named: Vec<&&ImageRecord> = candidates
                .iter()
                .filter(|c| names.contains(&Some(c.file.as_str())))
                .collect();
            match named.as_slice() {
                [only] => Some(**only),
                _ => None,
            }
        };

        match chosen {
            Some(found) => report.matches.push(RestoreMatch {
                old_id: record.id,
                new_id: found.id,
                old_path: record.path(),
                new_path: found.path(),
            }),
            None => {
                let ambiguous = AmbiguousMatch {
                    old_id: record.id,
                    candidates: candidates.iter().map(|c| c.id).collect(),
                };
                tracing::warn!(error = %ambiguous.to_error(), "Not restoring");
                report.ambiguous.push(ambiguous);
            }
        }
    }
    report
}

pub struct Restorer<'a> {
    config: &'a Config,
    library: &'a Library,
}

impl<'a> Restorer<'a> {
    pub fn new(library: &'a Library, config: &'a Config) -> Self {
        Self { config, library }
    }

    /// Scan the recovery folder and match it against the catalog
    pub fn find(&self, progress: &mut dyn Progress) -> Result<MatchReport> {
        let options = DiscoveryOptions {
            include_duplicates: true,
            purge_bad: false,
            error_policy: self.config.discovery.error_policy,
        };
        let recovered = Discovery::new(self.config)
            .with_options(options)
            .run(self.library, &self.config.restore_dir, progress)?;

        let catalog = self.library.load_library()?;
        let report = find_matches(&catalog, &recovered.records);
        tracing::info!(
            recovered = recovered.records.len(),
            matches = report.matches.len(),
            ambiguous = report.ambiguous.len(),
            "Matched recovery folder against catalog"
        );
        Ok(report)
    }

    /// Replace each catalogued file with its recovered copy
    ///
    /// Best effort: a failed match is collected and the rest go ahead.
    pub fn restore(&self, matches: &[RestoreMatch], progress: &mut dyn Progress) -> Result<RestoreReport> {
        let mut report = RestoreReport::default();
        progress.begin("Restoring files", matches.len());

        for m in matches {
            progress.advance();
            let seq = self.library.journal_begin(m.old_id, &m.new_path, &m.old_path)?;
            match replace(&m.new_path, &m.old_path) {
                Ok(()) => {
                    self.library.journal_finish(seq, JournalStatus::Done)?;
                    tracing::info!(
                        id = m.old_id,
                        from = %m.new_path.display(),
                        to = %m.old_path.display(),
                        "Restored"
                    );
                    report.restored.push(m.old_id);
                }
                Err(error) => {
                    self.library.journal_finish(seq, JournalStatus::Failed)?;
                    tracing::warn!(id = m.old_id, %error, "Restore failed");
                    report.failures.push(RestoreFailure {
                        old_id: m.old_id,
                        old_path: m.old_path.clone(),
                        new_path: m.new_path.clone(),
                        error,
                    });
                }
            }
        }
        progress.finish();
        Ok(report)
    }
}

/// Put `recovered` at `target`, discarding whatever is there
fn replace(recovered: &Path, target: &Path) -> Result<()> {
    if !recovered.is_file() {
        return Err(CatalogError::Io(io::Error::new(
            io::ErrorKind::NotFound,
            format!("recovered file missing: {}", recovered.display()),
        )));
    }
    match fs::remove_file(target) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::rename(recovered, target).map_err(|source| CatalogError::Move {
        from: recovered.to_path_buf(),
        to: target.to_path_buf(),
        source,
    })
}
