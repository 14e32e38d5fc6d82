//! Canonical library placement
//!
//! Computes where a record belongs in the library. The result depends only on
//! the record's attributes and the library root, so the same record always
//! lands on the same path whether it is being moved, re-planned or reverted.

use chrono::{Duration, NaiveDateTime};
use std::path::{Path, PathBuf};

use crate::fits::extract::NO_FILTER;
use crate::state::data::{FrameType, ImageRecord};

/// Path segment used for a missing value
pub const NONE_SEGMENT: &str = "_none_";

/// Sessions are dated by the evening they started
const SESSION_OFFSET_HOURS: i64 = 12;

/// Width of the zero-padded id in library file names
const SEQUENCE_WIDTH: usize = 6;

/// Destination of one record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub folder: PathBuf,
    pub file: String,
}

impl Placement {
    pub fn path(&self) -> PathBuf {
        self.folder.join(&self.file)
    }
}

/// Year and month of the night an observation belongs to
pub fn session_night(obs_date: NaiveDateTime) -> String {
    (obs_date - Duration::hours(SESSION_OFFSET_HOURS))
        .format("%Y-%m")
        .to_string()
}

/// Library file name: zero-padded id, underscore, original name
pub fn sequence_file_name(id: i64, original: &str) -> String {
    format!("{:0width$}_{}", id, original, width = SEQUENCE_WIDTH)
}

/// Original file name of a record, without any library sequence prefix
fn base_file_name(record: &ImageRecord) -> &str {
    if let Some(orig) = record.orig_file.as_deref() {
        return orig;
    }
    let prefix = sequence_file_name(record.id, "");
    record.file.strip_prefix(prefix.as_str()).unwrap_or(&record.file)
}

/// One directory level from a header value
///
/// Separators are replaced and dot-only names dropped so a header can never
/// steer a file outside the library root.
fn segment(value: Option<&str>) -> String {
    let value = value.map(str::trim).unwrap_or("");
    if value.is_empty() || value == "<none>" || value.chars().all(|c| c == '.') {
        return NONE_SEGMENT.to_string();
    }
    value.replace(['/', '\\'], "_")
}

/// Compute the canonical location of `record` under `root`
///
/// - DARK, BIAS, DARK_FLAT: `root/object/camera/frame_type/filter/night`
/// - FLAT: `root/object/camera/frame_type/telescope/filter/night`
/// - anything else: `root/object/camera/telescope/filter/night`
pub fn plan(root: &Path, record: &ImageRecord) -> Placement {
    let object = segment(record.object.as_deref());
    let camera = segment(Some(&record.camera));
    let telescope = segment(record.telescope.as_deref());
    let filter = if record.filter == NO_FILTER {
        NONE_SEGMENT.to_string()
    } else {
        segment(Some(&record.filter))
    };
    let night = record
        .obs_date
        .map(session_night)
        .unwrap_or_else(|| NONE_SEGMENT.to_string());

    let mut folder = root.join(object).join(camera);
    match &record.frame_type {
        Some(frame @ (FrameType::Dark | FrameType::Bias | FrameType::DarkFlat)) => {
            folder.push(frame.as_str());
        }
        Some(frame @ FrameType::Flat) => {
            folder.push(frame.as_str());
            folder.push(&telescope);
        }
        _ => folder.push(&telescope),
    }
    folder.push(filter);
    folder.push(night);

    Placement {
        folder,
        file: sequence_file_name(record.id, base_file_name(record)),
    }
}
