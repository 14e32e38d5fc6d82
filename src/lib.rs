//! Catalog, de-duplicate and file FITS astro images
//!
//! Files dropped into an intake folder are read, hashed and staged in an
//! SQLite catalog, then moved into a library laid out by object, camera,
//! optics, filter and session night.

pub mod config;
pub mod error;
pub mod fits;
pub mod pipeline;
pub mod progress;
pub mod state;

pub use config::Config;
pub use error::{CatalogError, Result};
pub use state::data::ImageRecord;
pub use state::library::Library;
