//! Catalog record extraction
//!
//! Turns one FITS file into an `ImageRecord`: selected header keys, the
//! inferred camera and telescope, and an MD5 of the whole file. A missing
//! header key leaves its field empty; an unreadable file or header fails the
//! whole record.

use chrono::{NaiveDate, NaiveDateTime, Timelike};
use md5::{Digest, Md5};
use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;

use super::instruments::{classify_camera, classify_telescope};
use super::PrimaryHeader;
use crate::config::{Config, FilterAlias};
use crate::error::{CatalogError, Result};
use crate::state::data::{FrameType, ImageRecord};

/// Filter name stored when the header has none
pub const NO_FILTER: &str = "<none>";

/// Accepted DATE-OBS layouts, most specific first
const DATE_OBS_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S"];

/// Builds catalog records from files using the configured lookup tables
pub struct Extractor<'a> {
    config: &'a Config,
}

impl<'a> Extractor<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self { config }
    }

    /// Extract the record for `path`, giving it catalog id `id`
    ///
    /// Any failure is wrapped with the offending path.
    pub fn extract(&self, path: &Path, id: i64) -> Result<ImageRecord> {
        self.extract_inner(path, id)
            .map_err(|e| CatalogError::extraction(path, e))
    }

    fn extract_inner(&self, path: &Path, id: i64) -> Result<ImageRecord> {
        let mut header = PrimaryHeader::open(path)?;

        let x = header.integer("NAXIS1");
        let focal_length = header.real("FOCALLEN");
        let binning = binning(&mut header);

        let obs_date = match header.text("DATE-OBS") {
            Some(raw) => Some(parse_obs_date(&raw).ok_or_else(|| {
                CatalogError::header(path, format!("unparseable DATE-OBS {raw:?}"))
            })?),
            None => None,
        };

        let filter = header
            .text("FILTER")
            .map(|f| normalize_filter(&f, &self.config.filter_aliases))
            .unwrap_or_else(|| NO_FILTER.to_string());

        let file = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| CatalogError::header(path, "path has no file name"))?;
        let folder = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();

        let md5sum = hash_file(path)?;

        Ok(ImageRecord {
            id,
            file,
            folder,
            object: header.text("OBJECT"),
            obs_date,
            ra: header.text("OBJCTRA"),
            dec: header.text("OBJCTDEC"),
            x,
            y: header.integer("NAXIS2"),
            frame_type: header.text("IMAGETYP").map(|t| FrameType::parse(&t)),
            filter,
            focal_length,
            exposure: header.real("EXPOSURE"),
            camera: classify_camera(&self.config.cameras, x, binning),
            telescope: classify_telescope(&self.config.telescopes, focal_length),
            md5sum: Some(md5sum),
            orig_folder: None,
            orig_file: None,
        })
    }
}

/// XBINNING, then BINNING, then 1
fn binning(header: &mut PrimaryHeader) -> i64 {
    ["XBINNING", "BINNING"]
        .iter()
        .find_map(|key| header.integer(key))
        .filter(|b| *b > 0)
        .unwrap_or(1)
}

/// Parse a DATE-OBS value; fractional seconds are dropped, a bare date is midnight
pub fn parse_obs_date(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    DATE_OBS_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .map(|dt| dt.with_nanosecond(0).unwrap_or(dt))
}

/// Map a recorded filter name through the alias table
pub fn normalize_filter(raw: &str, aliases: &[FilterAlias]) -> String {
    let raw = raw.trim();
    aliases
        .iter()
        .find(|a| a.from == raw)
        .map(|a| a.to.clone())
        .unwrap_or_else(|| raw.to_string())
}

/// MD5 of the full file contents, lowercase hex
pub fn hash_file(path: &Path) -> Result<String> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let mut hasher = Md5::new();
    io::copy(&mut reader, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}
