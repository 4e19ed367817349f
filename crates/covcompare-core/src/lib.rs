//! Core types, configuration, and error handling for covcompare.
//!
//! This crate provides the shared foundation used by all other covcompare crates:
//! - [`CompareError`]: unified error type using `thiserror`
//! - [`CompareConfig`]: configuration loaded from `.covcompare.toml`
//! - Coverage types: [`LineRecord`], [`ReportTotals`], [`ChangeSummary`], [`LineComparison`]
//! - Diff types: [`FileDiff`], [`DiffSegment`], [`RepoDiff`], [`CompareResult`]

mod config;
mod coverage;
mod error;
mod types;

pub use config::{CodecovSettings, CompareConfig, RepoOverride, RepoSettings, MAX_DIFF_SIZE};
pub use coverage::{
    BranchCoverage, ChangeSummary, Coverage, CoverageType, LineComparison, LineRecord,
    LineSession, ReportTotals,
};
pub use error::CompareError;
pub use types::{
    Commit, CommitSummary, CompareResult, Component, DiffKind, DiffSegment, DiffStats, FileDiff,
    OutputFormat, PullRequest, RepoDiff, RepoRef, SegmentHeader, SourceFile,
};

/// A convenience `Result` type for covcompare operations.
pub type Result<T> = std::result::Result<T, CompareError>;
