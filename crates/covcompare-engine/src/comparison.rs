//! Comparison of two commits: diffs, reports, and per-file views.

use std::collections::btree_map;

use covcompare_core::{
    Commit, CompareError, CompareResult, Component, RepoDiff, RepoRef, RepoSettings, ReportTotals,
};
use covcompare_report::filter::ReportFilter;
use covcompare_report::report::{CoverageReport, ReportFile};
use covcompare_report::store::CoverageReportStore;
use serde::Serialize;
use tokio::sync::OnceCell;

use crate::file::FileComparison;
use crate::provider::RepositoryProvider;

/// Provider compares in both directions between base and head.
#[derive(Debug, Clone)]
pub struct GitComparison {
    /// Base to head; drives traversal.
    pub forward: CompareResult,
    /// Head to base; only its commit list is used.
    pub reverse: CompareResult,
}

#[derive(Debug)]
struct HeadState {
    report: CoverageReport,
    // forward diff carrying per-file patch totals
    diff: RepoDiff,
    patch_totals: Option<ReportTotals>,
}

/// Report totals of both commits; head totals carry the patch totals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComparisonTotals {
    pub base: ReportTotals,
    pub head: ReportTotals,
}

/// Totals of a flag or component view of a comparison.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopedComparison {
    pub name: String,
    pub base_totals: ReportTotals,
    pub head_totals: ReportTotals,
    pub patch_totals: Option<ReportTotals>,
}

/// Coverage comparison between a base and a head commit.
///
/// Diffs and reports are fetched on first use and kept for the lifetime of
/// the comparison.
pub struct Comparison<S, P> {
    repository: RepoRef,
    base: Commit,
    head: Commit,
    settings: RepoSettings,
    store: S,
    provider: P,
    git: OnceCell<GitComparison>,
    head_state: OnceCell<HeadState>,
    base_report: OnceCell<CoverageReport>,
}

impl<S: CoverageReportStore, P: RepositoryProvider> Comparison<S, P> {
    pub fn new(
        repository: RepoRef,
        base: Commit,
        head: Commit,
        settings: RepoSettings,
        store: S,
        provider: P,
    ) -> Self {
        Self {
            repository,
            base,
            head,
            settings,
            store,
            provider,
            git: OnceCell::new(),
            head_state: OnceCell::new(),
            base_report: OnceCell::new(),
        }
    }

    pub fn repository(&self) -> &RepoRef {
        &self.repository
    }

    pub fn base_commit(&self) -> &Commit {
        &self.base
    }

    pub fn head_commit(&self) -> &Commit {
        &self.head
    }

    pub fn settings(&self) -> &RepoSettings {
        &self.settings
    }

    pub(crate) fn provider(&self) -> &P {
        &self.provider
    }

    /// Forward and reverse compares, fetched together on first use.
    pub async fn git_comparison(&self) -> Result<&GitComparison, CompareError> {
        self.git
            .get_or_try_init(|| async {
                let (forward, reverse) = tokio::try_join!(
                    self.provider
                        .get_compare(&self.base.commitid, &self.head.commitid),
                    self.provider
                        .get_compare(&self.head.commitid, &self.base.commitid),
                )?;
                tracing::debug!(
                    base = %self.base.commitid,
                    head = %self.head.commitid,
                    files = forward.diff.files.len(),
                    "fetched comparison diffs"
                );
                Ok::<_, CompareError>(GitComparison { forward, reverse })
            })
            .await
    }

    async fn head_state(&self) -> Result<&HeadState, CompareError> {
        self.head_state
            .get_or_try_init(|| async {
                let git = self.git_comparison().await?;
                let report = self.store.build_report(&self.head).await?;
                let mut diff = git.forward.diff.clone();
                let patch_totals = self.store.apply_diff(&report, &mut diff);
                Ok::<_, CompareError>(HeadState {
                    report,
                    diff,
                    patch_totals,
                })
            })
            .await
    }

    /// Head report; the forward diff is annotated with its patch totals.
    ///
    /// # Errors
    ///
    /// [`CompareError::MissingComparisonReport`] when the head commit has no
    /// report.
    pub async fn head_report(&self) -> Result<&CoverageReport, CompareError> {
        Ok(&self.head_state().await?.report)
    }

    /// # Errors
    ///
    /// [`CompareError::MissingComparisonReport`] when the base commit has no
    /// report.
    pub async fn base_report(&self) -> Result<&CoverageReport, CompareError> {
        self.base_report
            .get_or_try_init(|| self.store.build_report(&self.base))
            .await
    }

    pub(crate) fn base_report_mut(&mut self) -> Option<&mut CoverageReport> {
        self.base_report.get_mut()
    }

    /// Forward diff with per-file patch totals.
    pub async fn diff(&self) -> Result<&RepoDiff, CompareError> {
        Ok(&self.head_state().await?.diff)
    }

    /// Ensure both reports can be built.
    pub async fn validate(&self) -> Result<(), CompareError> {
        self.head_report().await?;
        self.base_report().await?;
        Ok(())
    }

    pub async fn totals(&self) -> Result<ComparisonTotals, CompareError> {
        let state = self.head_state().await?;
        let mut head = state.report.totals();
        head.diff = state.patch_totals.clone().map(Box::new);
        let base = self.base_report().await?.totals();
        Ok(ComparisonTotals { base, head })
    }

    /// Whether the base has commits the head does not contain.
    ///
    /// The reverse compare always lists the head commit itself, so more than
    /// one commit means the branches diverged.
    pub async fn has_unmerged_base_commits(&self) -> Result<bool, CompareError> {
        Ok(self.git_comparison().await?.reverse.commits.len() > 1)
    }

    async fn loaded(&self) -> Result<Loaded<'_>, CompareError> {
        let state = self.head_state().await?;
        let base = self.base_report().await?;
        Ok(Loaded {
            head: &state.report,
            base,
            diff: &state.diff,
            max_diff_size: self.settings.max_diff_size,
        })
    }

    /// Comparisons of every file in the head report, built on demand.
    pub async fn files(&self) -> Result<FileComparisons<'_>, CompareError> {
        let loaded = self.loaded().await?;
        Ok(FileComparisons {
            names: loaded.head.files.keys(),
            loaded,
        })
    }

    /// Comparison of a single head file.
    ///
    /// With `with_src`, the head source is fetched so lines outside the diff
    /// carry their text. `bypass_max_diff` renders lines of oversized diffs.
    pub async fn get_file_comparison(
        &self,
        file_name: &str,
        with_src: bool,
        bypass_max_diff: bool,
    ) -> Result<FileComparison<'_>, CompareError> {
        let loaded = self.loaded().await?;
        let mut comparison = loaded.file_comparison(file_name).bypass_max_diff(bypass_max_diff);
        if with_src {
            let source = self
                .provider
                .get_source(file_name, &self.head.commitid)
                .await?;
            comparison = comparison.with_source(source.lines());
        }
        Ok(comparison)
    }

    /// Totals restricted to the sessions uploaded with `flag`.
    pub async fn flag_comparison(&self, flag: &str) -> Result<ScopedComparison, CompareError> {
        self.scoped(flag.to_string(), &ReportFilter::for_flag(flag))
            .await
    }

    /// Totals restricted to a component's paths and flags.
    pub async fn component_comparison(
        &self,
        component: &Component,
    ) -> Result<ScopedComparison, CompareError> {
        let name = component
            .name
            .clone()
            .unwrap_or_else(|| component.component_id.clone());
        self.scoped(name, &ReportFilter::from_component(component))
            .await
    }

    async fn scoped(
        &self,
        name: String,
        filter: &ReportFilter,
    ) -> Result<ScopedComparison, CompareError> {
        let head = self.head_report().await?.filter(filter);
        let base = self.base_report().await?.filter(filter);
        let mut diff = self.git_comparison().await?.forward.diff.clone();
        let patch_totals = self.store.apply_diff(&head, &mut diff);
        Ok(ScopedComparison {
            name,
            base_totals: base.totals(),
            head_totals: head.totals(),
            patch_totals,
        })
    }
}

#[derive(Debug, Clone, Copy)]
struct Loaded<'a> {
    head: &'a CoverageReport,
    base: &'a CoverageReport,
    diff: &'a RepoDiff,
    max_diff_size: usize,
}

impl<'a> Loaded<'a> {
    fn file_comparison(&self, name: &str) -> FileComparison<'a> {
        let head_file = self.head.get(name);
        let diff = self.diff.get(name);
        let mut base_name = None;
        let mut base_file = self.base.get(name);
        if base_file.is_none() {
            if let Some(before) = diff.and_then(|d| d.before.as_deref()) {
                base_file = self.base.get(before);
                base_name = Some(before);
            }
        }

        let comparison = FileComparison::new(name, base_file, head_file, diff)
            .max_diff_size(self.max_diff_size);
        match base_name {
            Some(before) => comparison.with_base_name(before),
            None => comparison,
        }
    }
}

/// Lazy sequence of the file comparisons of a [`Comparison`].
///
/// Each item is built when requested; the sequence cannot be restarted.
pub struct FileComparisons<'a> {
    names: btree_map::Keys<'a, String, ReportFile>,
    loaded: Loaded<'a>,
}

impl<'a> Iterator for FileComparisons<'a> {
    type Item = FileComparison<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let name = self.names.next()?;
        Some(self.loaded.file_comparison(name))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.names.size_hint()
    }
}
