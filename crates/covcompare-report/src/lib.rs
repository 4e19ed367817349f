//! Coverage report model and storage.
//!
//! A [`report::CoverageReport`] maps file paths to per-line coverage records.
//! Records are read through the [`report::LineStore`] accessor regardless of
//! how a file's lines are laid out. Reports are loaded through a
//! [`store::CoverageReportStore`].

pub mod diff;
pub mod filter;
pub mod report;
pub mod store;
