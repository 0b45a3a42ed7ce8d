//! Local mirror of a curated subset of the Solar Orbiter Archive.
//!
//! The sync driver reconciles two dataset tables, one scanned from the
//! local tree and one converted from the archive's TAP listing, then
//! downloads, deletes and relocates files in that order so that an
//! interrupted run always leaves the tree recoverable.

pub mod archive;
pub mod config;
pub mod domain;
pub mod download;
pub mod error;
pub mod listing;
pub mod placement;
pub mod relocate;
pub mod remove;
pub mod scan;
pub mod select;
pub mod sync;
pub mod table;
