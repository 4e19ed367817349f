mod common;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use common::{compare, hits, modified, repo, report, segment, FakeProvider};
use covcompare_core::{Commit, CompareError, CompareResult, PullRequest, RepoSettings};
use covcompare_engine::cache::{CrossRequestCache, MemoryCache};
use covcompare_engine::pull::PullRequestComparison;
use covcompare_report::report::LineStore;
use covcompare_report::store::MemoryReportStore;
use serde_json::json;

const CACHE_KEY: &str = "compare-changed-files/github/acme/widgets/7";

fn pull(compared_to: Option<&str>) -> PullRequest {
    PullRequest {
        repository: repo(),
        pullid: 7,
        base: "base1".into(),
        head: "head1".into(),
        compared_to: compared_to.map(str::to_string),
    }
}

fn commits() -> Vec<Commit> {
    ["old1", "base1", "head1"].into_iter().map(Commit::new).collect()
}

// a.rs and b.rs change coverage outside the diff, c.rs does not
fn store() -> MemoryReportStore {
    MemoryReportStore::new()
        .with_report(
            "base1",
            report(vec![
                ("a.rs", hits(&[Some(0), Some(1)])),
                ("b.rs", hits(&[Some(1)])),
                ("c.rs", hits(&[Some(1), Some(1)])),
            ]),
        )
        .with_report(
            "head1",
            report(vec![
                ("a.rs", hits(&[Some(4), Some(1)])),
                ("b.rs", hits(&[Some(0)])),
                ("c.rs", hits(&[Some(1), Some(1), Some(0)])),
            ]),
        )
}

fn provider() -> FakeProvider {
    FakeProvider::default()
        .with_compare(
            "base1",
            "head1",
            compare(
                &["base1", "head1"],
                vec![("c.rs", modified(vec![segment((2, 1, 2, 2), &[" y", "+z"])]))],
            ),
        )
        .with_compare("head1", "base1", compare(&["head1"], Vec::new()))
}

fn pr(
    cache: Arc<MemoryCache>,
) -> PullRequestComparison<MemoryReportStore, FakeProvider, Arc<MemoryCache>> {
    PullRequestComparison::new(
        pull(None),
        &commits(),
        RepoSettings::default(),
        store(),
        provider(),
        cache,
    )
    .unwrap()
}

fn cached_names(cache: &MemoryCache) -> Option<BTreeSet<String>> {
    cache
        .get(CACHE_KEY)
        .unwrap()
        .map(|v| serde_json::from_value(v).unwrap())
}

#[tokio::test]
async fn exhausting_files_records_changed_files() {
    let cache = Arc::new(MemoryCache::new());
    let comparison = pr(cache.clone());
    assert_eq!(comparison.cache_key(), CACHE_KEY);

    let mut files = comparison.files().await.unwrap();
    let first = files.next().unwrap();
    assert!(first.has_changes());
    // nothing is written until the sequence is exhausted
    assert_eq!(cached_names(&cache), None);
    assert_eq!(files.by_ref().count(), 2);

    let expected: BTreeSet<String> = ["a.rs", "b.rs"].into_iter().map(String::from).collect();
    assert_eq!(cached_names(&cache), Some(expected));
}

#[tokio::test]
async fn cached_unchanged_file_skips_traversal() {
    let cache = Arc::new(MemoryCache::new());
    let _ = pr(cache.clone()).files().await.unwrap().count();

    let comparison = pr(cache.clone());
    let unchanged = comparison.get_file_comparison("c.rs", false, false).await.unwrap();
    assert_eq!(unchanged.should_search_for_changes(), Some(false));
    assert_eq!(unchanged.lines(), Some(&[][..]));
    assert!(unchanged.change_summary().is_empty());
    assert_eq!(unchanged.traversal_count(), 0);

    let changed = comparison.get_file_comparison("a.rs", false, false).await.unwrap();
    assert_eq!(changed.should_search_for_changes(), Some(true));
    assert!(changed.has_changes());
    assert_eq!(changed.traversal_count(), 1);
}

#[tokio::test]
async fn cold_cache_leaves_search_undecided() {
    let comparison = pr(Arc::new(MemoryCache::new()));
    assert!(comparison.changed_files_in_cache().is_none());
    let file = comparison.get_file_comparison("c.rs", false, false).await.unwrap();
    assert_eq!(file.should_search_for_changes(), None);
    assert_eq!(file.lines().map(<[_]>::len), Some(2));
}

#[tokio::test]
async fn empty_cache_entry_differs_from_missing_entry() {
    let cache = Arc::new(MemoryCache::new());
    cache.set(CACHE_KEY, &json!([]), Duration::from_secs(60)).unwrap();
    let comparison = pr(cache);
    assert_eq!(comparison.changed_files_in_cache().map(BTreeSet::len), Some(0));
    let file = comparison.get_file_comparison("a.rs", false, false).await.unwrap();
    assert_eq!(file.should_search_for_changes(), Some(false));
    assert!(!file.has_changes());
}

#[tokio::test]
async fn malformed_cache_entry_is_ignored() {
    let cache = Arc::new(MemoryCache::new());
    cache.set(CACHE_KEY, &json!({"not": "a list"}), Duration::from_secs(60)).unwrap();
    let comparison = pr(cache);
    assert!(comparison.changed_files_in_cache().is_none());
    let file = comparison.get_file_comparison("a.rs", false, false).await.unwrap();
    assert!(file.has_changes());
}

#[test]
fn pseudo_comparison_substitutes_compared_to() {
    let comparison = PullRequestComparison::new(
        pull(Some("old1")),
        &commits(),
        RepoSettings::default(),
        store(),
        provider(),
        MemoryCache::new(),
    )
    .unwrap();
    assert!(comparison.is_pseudo_comparison());
    assert_eq!(comparison.comparison().base_commit().commitid, "old1");
}

#[test]
fn pseudo_comparison_requires_distinct_compared_to_and_permission() {
    let same = PullRequestComparison::new(
        pull(Some("base1")),
        &commits(),
        RepoSettings::default(),
        store(),
        provider(),
        MemoryCache::new(),
    )
    .unwrap();
    assert!(!same.is_pseudo_comparison());

    let none = pr(Arc::new(MemoryCache::new()));
    assert!(!none.is_pseudo_comparison());
    assert_eq!(none.comparison().base_commit().commitid, "base1");

    let disallowed = PullRequestComparison::new(
        pull(Some("old1")),
        &commits(),
        RepoSettings {
            allow_pseudo_compare: false,
            ..RepoSettings::default()
        },
        store(),
        provider(),
        MemoryCache::new(),
    )
    .unwrap();
    assert!(!disallowed.is_pseudo_comparison());
    assert_eq!(disallowed.comparison().base_commit().commitid, "base1");
}

#[test]
fn unknown_commit_fails_construction() {
    let result = PullRequestComparison::new(
        pull(Some("missing")),
        &commits(),
        RepoSettings::default(),
        store(),
        provider(),
        MemoryCache::new(),
    );
    assert!(matches!(
        result,
        Err(CompareError::MissingComparisonCommit { commitid }) if commitid == "missing"
    ));

    let result = PullRequestComparison::new(
        pull(None),
        &[Commit::new("base1")],
        RepoSettings::default(),
        store(),
        provider(),
        MemoryCache::new(),
    );
    assert!(matches!(
        result,
        Err(CompareError::MissingComparisonCommit { commitid }) if commitid == "head1"
    ));
}

fn pseudo_setup(
    allow_coverage_offsets: bool,
) -> PullRequestComparison<MemoryReportStore, FakeProvider, MemoryCache> {
    let store = MemoryReportStore::new()
        .with_report("old1", report(vec![("a.rs", hits(&[Some(1), Some(0)]))]))
        .with_report("head1", report(vec![("a.rs", hits(&[Some(5), Some(1), Some(0)]))]));
    // one line inserted at the top between old1 and base1
    let pseudo: CompareResult = compare(
        &["old1", "base1"],
        vec![("a.rs", modified(vec![segment((0, 0, 1, 1), &["+header"])]))],
    );
    let provider = FakeProvider::default()
        .with_compare("old1", "base1", pseudo)
        .with_compare(
            "old1",
            "head1",
            compare(
                &["old1", "base1", "head1"],
                vec![("a.rs", modified(vec![segment((0, 0, 1, 1), &["+header"])]))],
            ),
        )
        .with_compare("head1", "old1", compare(&["head1"], Vec::new()));
    PullRequestComparison::new(
        pull(Some("old1")),
        &commits(),
        RepoSettings {
            allow_coverage_offsets,
            ..RepoSettings::default()
        },
        store,
        provider,
        MemoryCache::new(),
    )
    .unwrap()
}

#[tokio::test]
async fn pseudo_diff_shifts_base_report_when_allowed() {
    let mut comparison = pseudo_setup(true);
    assert!(comparison.pseudo_diff().await.unwrap().is_some());
    assert!(comparison.pseudo_diff_adjusts_tracked_lines().await.unwrap());

    assert!(comparison.align_base_report().await.unwrap());
    let base = comparison.comparison().base_report().await.unwrap();
    let a = base.get("a.rs").unwrap();
    assert!(a.coverage_at(1).is_none());
    assert!(a.coverage_at(2).is_some());
    assert!(a.coverage_at(3).is_some());
}

#[tokio::test]
async fn base_report_is_aligned_only_once() {
    let mut comparison = pseudo_setup(true);
    assert!(comparison.align_base_report().await.unwrap());
    assert!(comparison.align_base_report().await.unwrap());
    comparison.update_base_report_with_pseudo_diff().await.unwrap();

    let base = comparison.comparison().base_report().await.unwrap();
    let tracked: Vec<u32> = base.get("a.rs").unwrap().tracked_lines().map(|(ln, _)| ln).collect();
    assert_eq!(tracked, vec![2, 3]);
}

#[tokio::test]
async fn pseudo_diff_left_alone_without_offsets() {
    let mut comparison = pseudo_setup(false);
    assert!(comparison.pseudo_diff_adjusts_tracked_lines().await.unwrap());
    assert!(!comparison.align_base_report().await.unwrap());
    let base = comparison.comparison().base_report().await.unwrap();
    assert!(base.get("a.rs").unwrap().coverage_at(1).is_some());
}

#[tokio::test]
async fn no_pseudo_diff_without_pseudo_comparison() {
    let comparison = pr(Arc::new(MemoryCache::new()));
    assert!(comparison.pseudo_diff().await.unwrap().is_none());
    assert!(!comparison.pseudo_diff_adjusts_tracked_lines().await.unwrap());
}

struct BrokenCache;

impl CrossRequestCache for BrokenCache {
    fn get(&self, _key: &str) -> Result<Option<serde_json::Value>, CompareError> {
        Err(CompareError::Cache("unavailable".into()))
    }

    fn set(&self, _key: &str, _value: &serde_json::Value, _ttl: Duration) -> Result<(), CompareError> {
        Err(CompareError::Cache("unavailable".into()))
    }
}

#[tokio::test]
async fn cache_failures_are_not_fatal() {
    let comparison = PullRequestComparison::new(
        pull(None),
        &commits(),
        RepoSettings::default(),
        store(),
        provider(),
        BrokenCache,
    )
    .unwrap();
    assert!(comparison.changed_files_in_cache().is_none());
    let changed = comparison
        .files()
        .await
        .unwrap()
        .filter(|f| f.has_changes())
        .count();
    assert_eq!(changed, 2);

    let file = comparison.get_file_comparison("a.rs", false, false).await.unwrap();
    assert_eq!(file.should_search_for_changes(), None);
}
