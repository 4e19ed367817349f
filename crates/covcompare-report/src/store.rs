//! Loading coverage reports by commit.
//!
//! [`JsonReportStore`] reads `<commitid>.json` files from a directory;
//! [`MemoryReportStore`] holds reports registered up front.

use std::collections::HashMap;
use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use covcompare_core::{Commit, CompareError, RepoDiff, ReportTotals};

use crate::report::CoverageReport;

/// Source of the coverage report recorded for a commit.
pub trait CoverageReportStore: Send + Sync {
    /// Build the report uploaded for `commit`.
    ///
    /// Fails with [`CompareError::MissingComparisonReport`] when the commit has
    /// no report.
    fn build_report(
        &self,
        commit: &Commit,
    ) -> impl Future<Output = Result<CoverageReport, CompareError>> + Send;

    /// Annotate `diff` with patch totals from `report`.
    fn apply_diff(&self, report: &CoverageReport, diff: &mut RepoDiff) -> Option<ReportTotals> {
        crate::diff::apply_diff(report, diff)
    }
}

impl<T: CoverageReportStore> CoverageReportStore for Arc<T> {
    fn build_report(
        &self,
        commit: &Commit,
    ) -> impl Future<Output = Result<CoverageReport, CompareError>> + Send {
        (**self).build_report(commit)
    }

    fn apply_diff(&self, report: &CoverageReport, diff: &mut RepoDiff) -> Option<ReportTotals> {
        (**self).apply_diff(report, diff)
    }
}

/// Reports stored as JSON documents named after their commit.
///
/// # Examples
///
/// ```
/// use covcompare_report::store::JsonReportStore;
///
/// let store = JsonReportStore::new("coverage");
/// assert!(store.path_for("abc123").ends_with("abc123.json"));
/// ```
#[derive(Debug, Clone)]
pub struct JsonReportStore {
    root: PathBuf,
}

impl JsonReportStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, commitid: &str) -> PathBuf {
        self.root.join(format!("{commitid}.json"))
    }

    /// Write `report` as the report of `commitid`.
    pub async fn save(&self, commitid: &str, report: &CoverageReport) -> Result<(), CompareError> {
        tokio::fs::create_dir_all(&self.root).await?;
        let json = serde_json::to_string_pretty(report)?;
        tokio::fs::write(self.path_for(commitid), json).await?;
        Ok(())
    }
}

impl CoverageReportStore for JsonReportStore {
    async fn build_report(&self, commit: &Commit) -> Result<CoverageReport, CompareError> {
        let path = self.path_for(&commit.commitid);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no report on disk");
                return Err(CompareError::MissingComparisonReport {
                    commitid: commit.commitid.clone(),
                });
            }
            Err(e) => return Err(e.into()),
        };
        let report: CoverageReport = serde_json::from_str(&content).map_err(|e| {
            CompareError::Parse(format!("invalid report {}: {e}", path.display()))
        })?;
        tracing::debug!(
            commit = %commit.commitid,
            files = report.files.len(),
            "loaded report"
        );
        Ok(report)
    }
}

/// Reports held in memory, keyed by commit id.
#[derive(Debug, Clone, Default)]
pub struct MemoryReportStore {
    reports: HashMap<String, CoverageReport>,
}

impl MemoryReportStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, commitid: impl Into<String>, report: CoverageReport) {
        self.reports.insert(commitid.into(), report);
    }

    pub fn with_report(mut self, commitid: impl Into<String>, report: CoverageReport) -> Self {
        self.insert(commitid, report);
        self
    }
}

impl CoverageReportStore for MemoryReportStore {
    async fn build_report(&self, commit: &Commit) -> Result<CoverageReport, CompareError> {
        self.reports
            .get(&commit.commitid)
            .cloned()
            .ok_or_else(|| CompareError::MissingComparisonReport {
                commitid: commit.commitid.clone(),
            })
    }
}
