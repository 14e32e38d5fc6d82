//! Shared data structures for the catalog
//!
//! These structs represent the rows that flow between the pipeline stages
//! and the catalog database. Stages never edit a record in place; they build
//! a new value and hand the batch on.

use chrono::NaiveDateTime;
use std::fmt;
use std::path::PathBuf;

/// Timestamp format used for `obs_date` in every catalog table
pub const DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Acquisition frame type from the IMAGETYP header
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FrameType {
    Light,
    Dark,
    Bias,
    Flat,
    DarkFlat,
    /// Anything else, kept exactly as recorded
    Other(String),
}

impl FrameType {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "LIGHT" => FrameType::Light,
            "DARK" => FrameType::Dark,
            "BIAS" => FrameType::Bias,
            "FLAT" => FrameType::Flat,
            "DARK_FLAT" => FrameType::DarkFlat,
            _ => FrameType::Other(raw.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            FrameType::Light => "LIGHT",
            FrameType::Dark => "DARK",
            FrameType::Bias => "BIAS",
            FrameType::Flat => "FLAT",
            FrameType::DarkFlat => "DARK_FLAT",
            FrameType::Other(raw) => raw,
        }
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One cataloged or staged image file
#[derive(Debug, Clone, PartialEq)]
pub struct ImageRecord {
    /// Catalog identifier, reserved at staging time and never renumbered
    pub id: i64,
    /// File name only
    pub file: String,
    /// Directory holding the file
    pub folder: PathBuf,
    pub object: Option<String>,
    pub obs_date: Option<NaiveDateTime>,
    /// Sky coordinates as recorded by the capture software
    pub ra: Option<String>,
    pub dec: Option<String>,
    pub x: Option<i64>,
    pub y: Option<i64>,
    pub frame_type: Option<FrameType>,
    /// Normalized filter name, or "<none>"
    pub filter: String,
    pub focal_length: Option<f64>,
    /// Seconds
    pub exposure: Option<f64>,
    pub camera: String,
    /// `None` when the header had no focal length
    pub telescope: Option<String>,
    /// Hex MD5 of the whole file, the deduplication key
    pub md5sum: Option<String>,
    /// Location before the first move into the library
    pub orig_folder: Option<PathBuf>,
    pub orig_file: Option<String>,
}

impl ImageRecord {
    /// Full path of the file at its current location
    pub fn path(&self) -> PathBuf {
        self.folder.join(&self.file)
    }

    /// Full path the file had before it was moved, if it has been moved
    pub fn original_path(&self) -> Option<PathBuf> {
        match (&self.orig_folder, &self.orig_file) {
            (Some(folder), Some(file)) => Some(folder.join(file)),
            _ => None,
        }
    }

    /// Copy of this record living at a new location
    ///
    /// The pre-move location is captured the first time only.
    pub fn relocated(&self, folder: PathBuf, file: String) -> ImageRecord {
        let mut moved = self.clone();
        if moved.orig_folder.is_none() || moved.orig_file.is_none() {
            moved.orig_folder = Some(self.folder.clone());
            moved.orig_file = Some(self.file.clone());
        }
        moved.folder = folder;
        moved.file = file;
        moved
    }

    pub fn is_light(&self) -> bool {
        self.frame_type == Some(FrameType::Light)
    }
}

/// Astrometric solution for one catalog record
#[derive(Debug, Clone, PartialEq)]
pub struct PlateSolution {
    /// Catalog id of the solved image
    pub index: i64,
    pub ra_solved: f64,
    pub dec_solved: f64,
    pub angle_solved: f64,
    pub pixscale: f64,
}

/// A plate solve that failed
#[derive(Debug, Clone, PartialEq)]
pub struct SolveErrorRow {
    pub index: i64,
    pub file: String,
    pub folder: PathBuf,
    pub error: String,
}

/// Lifecycle of one journaled file move
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JournalStatus {
    /// Recorded, filesystem call not yet confirmed
    Pending,
    Done,
    Failed,
    Reverted,
}

impl JournalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JournalStatus::Pending => "pending",
            JournalStatus::Done => "done",
            JournalStatus::Failed => "failed",
            JournalStatus::Reverted => "reverted",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(JournalStatus::Pending),
            "done" => Some(JournalStatus::Done),
            "failed" => Some(JournalStatus::Failed),
            "reverted" => Some(JournalStatus::Reverted),
            _ => None,
        }
    }
}

/// A before/after pair written ahead of a file move
#[derive(Debug, Clone, PartialEq)]
pub struct JournalEntry {
    pub seq: i64,
    pub record_id: i64,
    pub from_path: PathBuf,
    pub to_path: PathBuf,
    pub status: JournalStatus,
}
