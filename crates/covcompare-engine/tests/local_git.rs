use std::path::Path;

use covcompare_core::{CompareError, DiffKind, SegmentHeader};
use covcompare_engine::git::LocalGitProvider;
use covcompare_engine::provider::RepositoryProvider;
use git2::{Repository, Signature};

fn commit(repo: &Repository, files: &[(&str, &str)], message: &str) -> String {
    let root = repo.workdir().unwrap();
    let mut index = repo.index().unwrap();
    for (path, content) in files {
        std::fs::write(root.join(path), content).unwrap();
        index.add_path(Path::new(path)).unwrap();
    }
    index.write().unwrap();
    let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
    let sig = Signature::now("Test", "test@example.com").unwrap();
    let parents: Vec<_> = repo
        .head()
        .ok()
        .and_then(|h| h.peel_to_commit().ok())
        .into_iter()
        .collect();
    let parents: Vec<_> = parents.iter().collect();
    repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
        .unwrap()
        .to_string()
}

fn setup() -> (tempfile::TempDir, String, String) {
    let dir = tempfile::tempdir().unwrap();
    let repo = Repository::init(dir.path()).unwrap();
    let base = commit(&repo, &[("a.rs", "a\nb\n")], "initial");
    let head = commit(&repo, &[("a.rs", "a\nb\nc\n"), ("new.rs", "x\n")], "grow a.rs\n\nbody");
    (dir, base, head)
}

#[tokio::test]
async fn compare_lists_commits_and_file_diffs() {
    let (dir, base, head) = setup();
    let provider = LocalGitProvider::open(dir.path()).unwrap();

    let result = provider.get_compare(&base, &head).await.unwrap();
    let ids: Vec<_> = result.commits.iter().map(|c| c.commitid.as_str()).collect();
    assert_eq!(ids, vec![base.as_str(), head.as_str()]);
    assert_eq!(result.commits[1].message.as_deref(), Some("grow a.rs"));

    let a = result.diff.get("a.rs").unwrap();
    assert_eq!(a.kind, DiffKind::Modified);
    assert_eq!(a.segments.len(), 1);
    assert_eq!(a.segments[0].header, SegmentHeader::new(1, 2, 1, 3));
    assert_eq!(a.segments[0].lines, vec![" a", " b", "+c"]);
    assert_eq!((a.stats.added, a.stats.removed), (1, 0));

    assert_eq!(result.diff.get("new.rs").unwrap().kind, DiffKind::New);
}

#[tokio::test]
async fn reverse_compare_holds_only_the_head() {
    let (dir, base, head) = setup();
    let provider = LocalGitProvider::open(dir.path()).unwrap();

    let result = provider.get_compare(&head, &base).await.unwrap();
    assert_eq!(result.commits.len(), 1);
    assert_eq!(result.commits[0].commitid, head);
    assert_eq!(result.diff.get("new.rs").unwrap().kind, DiffKind::Deleted);
}

#[tokio::test]
async fn source_is_read_at_the_requested_commit() {
    let (dir, base, head) = setup();
    let provider = LocalGitProvider::open(dir.path()).unwrap();

    let old = provider.get_source("a.rs", &base).await.unwrap();
    assert_eq!(old.lines(), vec!["a", "b"]);
    let new = provider.get_source("a.rs", &head).await.unwrap();
    assert_eq!(new.content, "a\nb\nc\n");

    let missing = provider.get_source("new.rs", &base).await;
    assert!(matches!(missing, Err(CompareError::FileNotFound(_))));
}

#[test]
fn resolve_commit_follows_revisions() {
    let (dir, base, head) = setup();
    let provider = LocalGitProvider::open(dir.path()).unwrap();

    let resolved = provider.resolve_commit("HEAD").unwrap();
    assert_eq!(resolved.commitid, head);
    assert_eq!(resolved.parent.as_deref(), Some(base.as_str()));

    let first = provider.resolve_commit("HEAD~1").unwrap();
    assert_eq!(first.commitid, base);
    assert_eq!(first.parent, None);

    assert!(matches!(
        provider.resolve_commit("no-such-rev"),
        Err(CompareError::Git(_))
    ));
}

#[test]
fn open_outside_a_repository_fails() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
        LocalGitProvider::open(dir.path()),
        Err(CompareError::Git(_))
    ));
}
