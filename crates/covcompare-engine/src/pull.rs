//! Pull request comparisons.
//!
//! A pull request can be compared against an older, already processed
//! commit (`compared_to`) instead of its real base: a pseudo-comparison.
//! Files found to carry unexpected coverage changes are remembered across
//! requests so later runs can skip traversing the others.

use std::collections::BTreeSet;
use std::sync::OnceLock;
use std::time::Duration;

use covcompare_core::{Commit, CompareError, PullRequest, RepoDiff, RepoSettings};
use covcompare_report::store::CoverageReportStore;
use tokio::sync::OnceCell;

use crate::cache::CrossRequestCache;
use crate::comparison::{Comparison, FileComparisons};
use crate::file::FileComparison;
use crate::provider::RepositoryProvider;

/// Lifetime of a changed-files cache entry.
pub const CHANGED_FILES_TTL: Duration = Duration::from_secs(86_400);

/// Comparison of a pull request's head against its (possibly substituted) base.
pub struct PullRequestComparison<S, P, C> {
    pull: PullRequest,
    is_pseudo_comparison: bool,
    comparison: Comparison<S, P>,
    cache: C,
    pseudo_diff: OnceCell<RepoDiff>,
    pseudo_diff_adjusts: OnceCell<bool>,
    base_shifted: bool,
    changed_files: OnceLock<Option<BTreeSet<String>>>,
}

impl<S, P, C> PullRequestComparison<S, P, C>
where
    S: CoverageReportStore,
    P: RepositoryProvider,
    C: CrossRequestCache,
{
    /// Build the comparison, resolving the pull's commits from `commits`.
    ///
    /// # Errors
    ///
    /// [`CompareError::MissingComparisonCommit`] when the head or the chosen
    /// base commit is not in `commits`.
    pub fn new(
        pull: PullRequest,
        commits: &[Commit],
        settings: RepoSettings,
        store: S,
        provider: P,
        cache: C,
    ) -> Result<Self, CompareError> {
        let is_pseudo_comparison = settings.allow_pseudo_compare
            && pull
                .compared_to
                .as_deref()
                .is_some_and(|compared_to| compared_to != pull.base);

        let find = |commitid: &str| {
            commits
                .iter()
                .find(|c| c.commitid == commitid)
                .cloned()
                .ok_or_else(|| CompareError::MissingComparisonCommit {
                    commitid: commitid.to_string(),
                })
        };
        let base_id = match (&pull.compared_to, is_pseudo_comparison) {
            (Some(compared_to), true) => compared_to.as_str(),
            _ => pull.base.as_str(),
        };
        let base = find(base_id)?;
        let head = find(&pull.head)?;
        tracing::debug!(
            pullid = pull.pullid,
            base = %base.commitid,
            head = %head.commitid,
            pseudo = is_pseudo_comparison,
            "pull request comparison"
        );

        let comparison = Comparison::new(
            pull.repository.clone(),
            base,
            head,
            settings,
            store,
            provider,
        );
        Ok(Self {
            pull,
            is_pseudo_comparison,
            comparison,
            cache,
            pseudo_diff: OnceCell::new(),
            pseudo_diff_adjusts: OnceCell::new(),
            base_shifted: false,
            changed_files: OnceLock::new(),
        })
    }

    pub fn pull(&self) -> &PullRequest {
        &self.pull
    }

    /// The underlying commit comparison (reports, totals, sub-views).
    pub fn comparison(&self) -> &Comparison<S, P> {
        &self.comparison
    }

    /// Whether the base report is taken from `compared_to` instead of the
    /// pull's real base.
    pub fn is_pseudo_comparison(&self) -> bool {
        self.is_pseudo_comparison
    }

    /// Diff from `compared_to` to the real base; `None` when not
    /// pseudo-comparing.
    pub async fn pseudo_diff(&self) -> Result<Option<&RepoDiff>, CompareError> {
        let Some(compared_to) = self.pull.compared_to.as_deref() else {
            return Ok(None);
        };
        if !self.is_pseudo_comparison {
            return Ok(None);
        }
        let diff = self
            .pseudo_diff
            .get_or_try_init(|| async {
                let result = self
                    .comparison
                    .provider()
                    .get_compare(compared_to, &self.pull.base)
                    .await?;
                Ok::<_, CompareError>(result.diff)
            })
            .await?;
        Ok(Some(diff))
    }

    /// Whether the substituted base report's line numbers are off with
    /// respect to the real base.
    ///
    /// Decided once, against the base report as loaded.
    pub async fn pseudo_diff_adjusts_tracked_lines(&self) -> Result<bool, CompareError> {
        let adjusts = self
            .pseudo_diff_adjusts
            .get_or_try_init(|| async {
                let Some(pseudo_diff) = self.pseudo_diff().await? else {
                    return Ok::<_, CompareError>(false);
                };
                let base = self.comparison.base_report().await?;
                let head = self.comparison.head_report().await?;
                let future_diff = &self.comparison.git_comparison().await?.forward.diff;
                Ok(base.does_diff_adjust_tracked_lines(pseudo_diff, head, future_diff))
            })
            .await?;
        Ok(*adjusts)
    }

    /// Shift the base report's lines onto the real base's numbering.
    ///
    /// The report is shifted at most once.
    pub async fn update_base_report_with_pseudo_diff(&mut self) -> Result<(), CompareError> {
        if self.base_shifted {
            return Ok(());
        }
        // the adjustment check must see the unshifted report
        self.pseudo_diff_adjusts_tracked_lines().await?;
        let Some(pseudo_diff) = self.pseudo_diff().await?.cloned() else {
            return Ok(());
        };
        self.comparison.base_report().await?;
        if let Some(base) = self.comparison.base_report_mut() {
            base.shift_lines_by_diff(&pseudo_diff);
            self.base_shifted = true;
            tracing::debug!(pullid = self.pull.pullid, "shifted base report by pseudo diff");
        }
        Ok(())
    }

    /// Shift the base report when coverage offsets are allowed and the
    /// pseudo diff moves tracked lines. Returns whether the report is
    /// aligned; repeated calls do not shift it again.
    pub async fn align_base_report(&mut self) -> Result<bool, CompareError> {
        if !self.comparison.settings().allow_coverage_offsets {
            return Ok(false);
        }
        if !self.pseudo_diff_adjusts_tracked_lines().await? {
            return Ok(false);
        }
        self.update_base_report_with_pseudo_diff().await?;
        Ok(true)
    }

    pub fn cache_key(&self) -> String {
        let repo = &self.pull.repository;
        format!(
            "compare-changed-files/{}/{}/{}/{}",
            repo.service, repo.owner, repo.name, self.pull.pullid
        )
    }

    /// Head files recorded with changes by a previous run, or `None` when no
    /// run has been recorded (or the cache could not be read).
    pub fn changed_files_in_cache(&self) -> Option<&BTreeSet<String>> {
        self.changed_files
            .get_or_init(|| read_changed_files(&self.cache, &self.cache_key()))
            .as_ref()
    }

    /// Comparisons of every head file. Exhausting the sequence records the
    /// files with changes in the cache.
    pub async fn files(&self) -> Result<PullRequestFiles<'_, C>, CompareError> {
        let inner = self.comparison.files().await?;
        Ok(PullRequestFiles {
            inner,
            cached: self.changed_files_in_cache(),
            cache: &self.cache,
            key: self.cache_key(),
            changed: Vec::new(),
            written: false,
        })
    }

    /// Like [`Comparison::get_file_comparison`], skipping the traversal when
    /// the cache records no changes for the file.
    pub async fn get_file_comparison(
        &self,
        file_name: &str,
        with_src: bool,
        bypass_max_diff: bool,
    ) -> Result<FileComparison<'_>, CompareError> {
        let mut comparison = self
            .comparison
            .get_file_comparison(file_name, with_src, bypass_max_diff)
            .await?;
        apply_cached(&mut comparison, self.changed_files_in_cache());
        Ok(comparison)
    }
}

fn apply_cached(comparison: &mut FileComparison<'_>, cached: Option<&BTreeSet<String>>) {
    if let Some(cached) = cached {
        let changed = comparison
            .name()
            .head
            .as_ref()
            .is_some_and(|head| cached.contains(head));
        comparison.set_should_search_for_changes(Some(changed));
    }
}

fn read_changed_files<C: CrossRequestCache>(cache: &C, key: &str) -> Option<BTreeSet<String>> {
    match cache.get(key) {
        Ok(Some(value)) => match serde_json::from_value(value) {
            Ok(files) => Some(files),
            Err(e) => {
                tracing::warn!(key, "ignoring malformed changed-files entry: {e}");
                None
            }
        },
        Ok(None) => None,
        Err(e) => {
            tracing::warn!(key, "failed to read changed-files cache: {e}");
            None
        }
    }
}

/// Lazy sequence of a pull request's file comparisons.
///
/// Once exhausted, the head names of the files with a non-empty change
/// summary replace the pull's cache entry.
pub struct PullRequestFiles<'a, C> {
    inner: FileComparisons<'a>,
    cached: Option<&'a BTreeSet<String>>,
    cache: &'a C,
    key: String,
    changed: Vec<String>,
    written: bool,
}

impl<C: CrossRequestCache> PullRequestFiles<'_, C> {
    fn write_cache(&mut self) {
        let value = serde_json::Value::from(std::mem::take(&mut self.changed));
        match self.cache.set(&self.key, &value, CHANGED_FILES_TTL) {
            Ok(()) => tracing::debug!(key = %self.key, "recorded changed files"),
            Err(e) => tracing::warn!(key = %self.key, "failed to write changed-files cache: {e}"),
        }
    }
}

impl<'a, C: CrossRequestCache> Iterator for PullRequestFiles<'a, C> {
    type Item = FileComparison<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.inner.next() {
            Some(mut comparison) => {
                apply_cached(&mut comparison, self.cached);
                if comparison.has_changes() {
                    if let Some(head) = &comparison.name().head {
                        self.changed.push(head.clone());
                    }
                }
                Some(comparison)
            }
            None => {
                if !self.written {
                    self.written = true;
                    self.write_cache();
                }
                None
            }
        }
    }
}
