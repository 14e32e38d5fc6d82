//! Discovery and staging
//!
//! Walks an intake tree, extracts a record for every FITS file, drops content
//! already in the catalog (or already seen earlier in the same run) and hands
//! back the survivors for the staging table.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

use crate::config::{Config, DiscoveryOptions, ErrorPolicy};
use crate::error::{CatalogError, Result};
use crate::fits::extract::Extractor;
use crate::progress::Progress;
use crate::state::data::ImageRecord;
use crate::state::library::Library;

/// A file that could not be cataloged under `ErrorPolicy::Skip`
#[derive(Debug)]
pub struct ExtractionFailure {
    pub path: PathBuf,
    pub error: CatalogError,
}

/// A bad file that could not be deleted
#[derive(Debug)]
pub struct PurgeFailure {
    pub path: PathBuf,
    pub error: io::Error,
}

/// Outcome of one discovery run
#[derive(Debug, Default)]
pub struct DiscoveryReport {
    /// Records to stage, ids already assigned
    pub records: Vec<ImageRecord>,
    /// Files accepted into `records`
    pub new_files: usize,
    /// Files whose hash was already known, staged or not
    pub duplicates: usize,
    /// Files carrying the bad marker
    pub bad_files: Vec<PathBuf>,
    /// Bad files that were deleted from disk
    pub purged: Vec<PathBuf>,
    /// Bad files still on disk because deletion failed
    pub purge_failures: Vec<PurgeFailure>,
    pub failures: Vec<ExtractionFailure>,
}

pub struct Discovery<'a> {
    config: &'a Config,
    options: DiscoveryOptions,
}

impl<'a> Discovery<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self {
            config,
            options: config.discovery.clone(),
        }
    }

    pub fn with_options(mut self, options: DiscoveryOptions) -> Self {
        self.options = options;
        self
    }

    /// Catalog every FITS file under `root` against the current library
    ///
    /// With `purge_bad` set, files carrying the bad marker are deleted. That
    /// deletion cannot be undone; each removed path is logged and returned
    /// in `purged`; a file that could not be removed lands in
    /// `purge_failures`.
    pub fn run(&self, library: &Library, root: &Path, progress: &mut dyn Progress) -> Result<DiscoveryReport> {
        // Snapshot taken once; later catalog writes don't affect this run
        let snapshot = library.load_library()?;
        let mut seen: HashSet<String> = snapshot.iter().filter_map(|r| r.md5sum.clone()).collect();
        let mut next_id = snapshot.iter().map(|r| r.id).max().map_or(1, |id| id + 1);

        let files = self.list_images(root)?;
        let extractor = Extractor::new(self.config);
        let mut report = DiscoveryReport::default();

        tracing::info!(root = %root.display(), candidates = files.len(), "Scanning folder");
        progress.begin("Cataloging", files.len());

        let mut current_dir: Option<PathBuf> = None;
        for path in files {
            progress.advance();

            if path.parent() != current_dir.as_deref() {
                current_dir = path.parent().map(Path::to_path_buf);
                tracing::debug!(folder = ?current_dir, "Switching to folder");
            }

            if self.is_bad(&path) {
                report.bad_files.push(path);
                continue;
            }

            let record = match extractor.extract(&path, next_id) {
                Ok(record) => record,
                Err(error) => match self.options.error_policy {
                    ErrorPolicy::FailFast => {
                        tracing::error!(path = %path.display(), %error, "Error in file");
                        progress.finish();
                        return Err(error);
                    }
                    ErrorPolicy::Skip => {
                        tracing::warn!(path = %path.display(), %error, "Skipping unreadable file");
                        report.failures.push(ExtractionFailure { path, error });
                        continue;
                    }
                },
            };

            let hash = record.md5sum.clone().unwrap_or_default();
            let duplicate = seen.contains(&hash);
            if duplicate {
                report.duplicates += 1;
                tracing::debug!(path = %path.display(), md5sum = %hash, "Duplicate content");
                if !self.options.include_duplicates {
                    continue;
                }
            }

            seen.insert(hash);
            report.records.push(record);
            report.new_files += 1;
            next_id += 1;
        }
        progress.finish();

        tracing::info!(
            new_files = report.new_files,
            duplicates = report.duplicates,
            bad_files = report.bad_files.len(),
            failures = report.failures.len(),
            "Found {} new files and {} duplicates",
            report.new_files,
            report.duplicates
        );

        if self.options.purge_bad {
            let (purged, purge_failures) = purge(&report.bad_files);
            report.purged = purged;
            report.purge_failures = purge_failures;
        }

        Ok(report)
    }

    /// Every FITS file under `root`, in walk order
    ///
    /// Within a directory its files come first, by name, then its
    /// subdirectories, by name.
    pub fn list_images(&self, root: &Path) -> Result<Vec<PathBuf>> {
        if !root.is_dir() {
            return Err(CatalogError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("not a directory: {}", root.display()),
            )));
        }

        let walker = WalkDir::new(root)
            .follow_links(false)
            .sort_by(|a, b| {
                let a_dir = a.file_type().is_dir();
                let b_dir = b.file_type().is_dir();
                a_dir.cmp(&b_dir).then_with(|| a.file_name().cmp(b.file_name()))
            });

        let mut images = Vec::new();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) if self.options.error_policy == ErrorPolicy::Skip => {
                    tracing::warn!("Error accessing entry: {}", e);
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            if entry.file_type().is_file() && self.is_image(&entry) {
                images.push(entry.into_path());
            }
        }
        Ok(images)
    }

    /// Extension starts with the configured prefix, ignoring case
    fn is_image(&self, entry: &DirEntry) -> bool {
        let prefix = self.config.extension_prefix.to_ascii_lowercase();
        entry
            .path()
            .extension()
            .map(|ext| ext.to_string_lossy().to_ascii_lowercase().starts_with(&prefix))
            .unwrap_or(false)
    }

    fn is_bad(&self, path: &Path) -> bool {
        path.file_name()
            .map(|n| n.to_string_lossy().contains(&self.config.bad_marker))
            .unwrap_or(false)
    }
}

/// Delete every file in `paths`, returning what was removed and what wasn't
fn purge(paths: &[PathBuf]) -> (Vec<PathBuf>, Vec<PurgeFailure>) {
    let mut purged = Vec::new();
    let mut failures = Vec::new();
    for path in paths {
        tracing::warn!(path = %path.display(), "Removing image flagged as bad");
        match fs::remove_file(path) {
            Ok(()) => purged.push(path.clone()),
            Err(error) => {
                tracing::error!(path = %path.display(), %error, "Could not remove bad image");
                failures.push(PurgeFailure {
                    path: path.clone(),
                    error,
                });
            }
        }
    }
    (purged, failures)
}
