//! Catalog pipeline stages
//!
//! A normal intake runs discover, stage, move, then merge. Every stage takes
//! the configuration and catalog explicitly and hands a new batch of records
//! to the next one.

pub mod discover;
pub mod housekeeping;
pub mod intake;
pub mod mover;
pub mod placement;
pub mod restore;
pub mod solve;
