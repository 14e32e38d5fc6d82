//! FITS image handling
//!
//! This module handles:
//! - Reading keywords from the primary header of a FITS file (this file)
//! - Classifying camera and telescope from header values (instruments.rs)
//! - Building a catalog record and content hash for one file (extract.rs)
//!
//! Headers are read through cfitsio. Data units are never decoded, they are
//! only read whole for hashing.

pub mod extract;
pub mod instruments;

use fitsio::hdu::FitsHdu;
use fitsio::headers::ReadsKey;
use fitsio::FitsFile;
use std::ffi::CStr;
use std::os::raw::{c_char, c_int};
use std::path::{Path, PathBuf};

use crate::error::{CatalogError, Result};

/// Room for a keyword, value or comment string returned by cfitsio
const FIELD_BUFFER: usize = 81;

/// The primary header of an open FITS file
pub struct PrimaryHeader {
    path: PathBuf,
    fptr: FitsFile,
    hdu: FitsHdu,
}

impl PrimaryHeader {
    pub fn open(path: &Path) -> Result<Self> {
        let mut fptr =
            FitsFile::open(path).map_err(|e| CatalogError::header(path, e.to_string()))?;
        let hdu = fptr
            .primary_hdu()
            .map_err(|e| CatalogError::header(path, e.to_string()))?;

        Ok(Self {
            path: path.to_path_buf(),
            fptr,
            hdu,
        })
    }

    /// Helper to read an optional key of any readable type
    fn read_key_optional<T: ReadsKey>(&mut self, key: &str) -> Option<T> {
        self.hdu.read_key(&mut self.fptr, key).ok()
    }

    /// String value, or a numeric value rendered as text
    pub fn text(&mut self, key: &str) -> Option<String> {
        self.read_key_optional::<String>(key)
            .map(|s| s.trim_end().to_string())
            .or_else(|| self.real(key).map(|v| v.to_string()))
    }

    /// Integer value; a whole-number real is accepted when cfitsio refuses it
    pub fn integer(&mut self, key: &str) -> Option<i64> {
        self.read_key_optional::<i64>(key).or_else(|| {
            self.real(key)
                .filter(|v| v.fract() == 0.0)
                .map(|v| v as i64)
        })
    }

    pub fn real(&mut self, key: &str) -> Option<f64> {
        self.read_key_optional(key)
    }

    /// Every keyword in the header, in file order
    pub fn keys(&mut self) -> Result<Vec<String>> {
        let mut status: c_int = 0;
        let mut count: c_int = 0;
        let mut more: c_int = 0;

        // fitsio has no keyword iterator, so walk the cards through cfitsio
        let raw = unsafe { self.fptr.as_raw() };
        unsafe { fitsio::sys::ffghsp(raw, &mut count, &mut more, &mut status) };
        self.check_status(status)?;

        let mut keys = Vec::with_capacity(count.max(0) as usize);
        for n in 1..=count {
            let mut name = [0 as c_char; FIELD_BUFFER];
            let mut value = [0 as c_char; FIELD_BUFFER];
            let mut comment = [0 as c_char; FIELD_BUFFER];
            unsafe {
                fitsio::sys::ffgkyn(
                    raw,
                    n,
                    name.as_mut_ptr(),
                    value.as_mut_ptr(),
                    comment.as_mut_ptr(),
                    &mut status,
                )
            };
            self.check_status(status)?;

            let key = unsafe { CStr::from_ptr(name.as_ptr()) }.to_string_lossy();
            if !key.is_empty() {
                keys.push(key.into_owned());
            }
        }
        Ok(keys)
    }

    fn check_status(&self, status: c_int) -> Result<()> {
        if status == 0 {
            Ok(())
        } else {
            Err(CatalogError::header(
                &self.path,
                format!("cfitsio status {status} while listing keywords"),
            ))
        }
    }
}

/// List every keyword in the primary header of a FITS file
pub fn list_keys(path: &Path) -> Result<Vec<String>> {
    PrimaryHeader::open(path)?.keys()
}
