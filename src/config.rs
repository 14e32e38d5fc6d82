//! Catalog configuration
//!
//! Every path, table name and lookup table the pipeline consults lives here.
//! The struct is loaded once (usually from a JSON file) and then handed to each
//! component by reference; nothing reads process-wide state.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{CatalogError, Result};

/// A known camera, matched on sensor width in unbinned pixels
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CameraProfile {
    pub name: String,
    pub x_pixels: i64,
    pub y_pixels: i64,
}

/// A known telescope or lens, matched on exact focal length
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TelescopeProfile {
    pub name: String,
    pub focal_length_mm: f64,
}

/// Maps a filter name as written by capture software to the catalog name
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FilterAlias {
    pub from: String,
    pub to: String,
}

/// Names of the tables inside the catalog database
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct TableNames {
    /// Permanent catalog
    pub library: String,
    /// Default staging table written by each discovery run
    pub staging: String,
    /// Outcome of the last library reorganisation
    pub reorganized: String,
    /// Plate-solve results
    pub solved: String,
    /// Plate-solve failures
    pub solve_errors: String,
    /// Before/after pairs recorded ahead of every file move
    pub journal: String,
}

impl Default for TableNames {
    fn default() -> Self {
        Self {
            library: "fits_files".into(),
            staging: "fits_temp".into(),
            reorganized: "reorganize_temp".into(),
            solved: "plate_solve_temp".into(),
            solve_errors: "error_log_temp".into(),
            journal: "move_journal".into(),
        }
    }
}

/// What discovery does when one file cannot be read
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Abort the whole walk on the first bad file
    #[default]
    FailFast,
    /// Record the failure and keep walking
    Skip,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct DiscoveryOptions {
    /// Stage files whose hash is already catalogued
    pub include_duplicates: bool,
    /// Delete files carrying the bad marker (not reversible)
    pub purge_bad: bool,
    pub error_policy: ErrorPolicy,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            include_duplicates: false,
            purge_bad: true,
            error_policy: ErrorPolicy::FailFast,
        }
    }
}

/// External plate solver invocation: `program args... <image path>`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct SolverConfig {
    pub program: String,
    pub args: Vec<String>,
    /// Extension of the header file the solver writes next to the image
    pub sidecar_extension: String,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            program: "astap".into(),
            args: vec!["-wcs".into(), "-f".into()],
            sidecar_extension: "wcs".into(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Intake folder new captures are dropped into
    pub quarantine_dir: PathBuf,
    /// Root of the long-term library layout
    pub image_dir: PathBuf,
    /// Recovery copies used to repair the library
    pub restore_dir: PathBuf,
    /// SQLite catalog file
    pub library_db: PathBuf,
    pub tables: TableNames,
    pub cameras: Vec<CameraProfile>,
    pub telescopes: Vec<TelescopeProfile>,
    pub filter_aliases: Vec<FilterAlias>,
    /// Files whose name contains this marker are treated as rejected captures
    pub bad_marker: String,
    /// Image files are those whose extension starts with this (case-insensitive)
    pub extension_prefix: String,
    pub discovery: DiscoveryOptions,
    pub solver: SolverConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            quarantine_dir: PathBuf::from("quarantine"),
            image_dir: PathBuf::from("images"),
            restore_dir: PathBuf::from("restore"),
            library_db: default_db_path(),
            tables: TableNames::default(),
            cameras: vec![
                camera("ASI1600", 4656, 3520),
                camera("ASI183", 5496, 3672),
                camera("EOST4i", 5208, 3476),
                camera("EOSRP", 6264, 4180),
                camera("QSI683", 3326, 2504),
            ],
            telescopes: vec![
                telescope("ES127", 952.0),
                telescope("ES127", 666.0),
                telescope("ED80-T", 480.0),
                telescope("ROKINON_135", 135.0),
                telescope("ROKINON_FE14M", 14.0),
            ],
            filter_aliases: [
                ("Red", "R"),
                ("Green", "G"),
                ("Blue", "B"),
                ("Lum", "L"),
                ("Sii", "SII"),
                ("Oiii", "OIII"),
            ]
            .into_iter()
            .map(|(from, to)| FilterAlias {
                from: from.into(),
                to: to.into(),
            })
            .collect(),
            bad_marker: "BAD_".into(),
            extension_prefix: "fit".into(),
            discovery: DiscoveryOptions::default(),
            solver: SolverConfig::default(),
        }
    }
}

fn camera(name: &str, x_pixels: i64, y_pixels: i64) -> CameraProfile {
    CameraProfile {
        name: name.into(),
        x_pixels,
        y_pixels,
    }
}

fn telescope(name: &str, focal_length_mm: f64) -> TelescopeProfile {
    TelescopeProfile {
        name: name.into(),
        focal_length_mm,
    }
}

/// Default location of the catalog database:
/// - Linux: ~/.local/share/fits-catalog/fits_catalog.db
/// - macOS: ~/Library/Application Support/fits-catalog/fits_catalog.db
/// - Windows: %APPDATA%\fits-catalog\fits_catalog.db
pub fn default_db_path() -> PathBuf {
    let mut path = dirs::data_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."));

    path.push("fits-catalog");
    path.push("fits_catalog.db");
    path
}

impl Config {
    /// Load and validate a JSON configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let config = Self::from_json(&text)?;
        tracing::debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Parse from a JSON string; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Reject settings that would make the store or walker misbehave
    pub fn validate(&self) -> Result<()> {
        let tables = &self.tables;
        for name in [
            &tables.library,
            &tables.staging,
            &tables.reorganized,
            &tables.solved,
            &tables.solve_errors,
            &tables.journal,
        ] {
            check_table_name(name)?;
        }
        if tables.library == tables.staging {
            return Err(CatalogError::Config(
                "library and staging tables must differ".into(),
            ));
        }
        if tables.reorganized == tables.library || tables.reorganized == tables.staging {
            return Err(CatalogError::Config(
                "reorganize table must differ from library and staging".into(),
            ));
        }
        if self.extension_prefix.is_empty() {
            return Err(CatalogError::Config("extension_prefix is empty".into()));
        }
        if self.bad_marker.is_empty() {
            return Err(CatalogError::Config("bad_marker is empty".into()));
        }
        Ok(())
    }
}

/// Table names are spliced into SQL, so only plain identifiers are allowed
pub fn check_table_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(CatalogError::InvalidTableName(name.to_string()))
    }
}
