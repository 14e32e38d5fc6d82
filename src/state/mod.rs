//! State management module
//!
//! This module handles the persistent state of the catalog:
//! - Database connection, tables and the move journal (library.rs)
//! - Shared record structures (data.rs)

pub mod data;
pub mod library;
