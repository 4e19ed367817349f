//! Local repository provider via git2.
//!
//! Compares two revisions of an on-disk repository by rendering the tree
//! diff as a unified patch and parsing it like a provider payload.

use std::path::{Path, PathBuf};

use covcompare_core::{Commit, CommitSummary, CompareError, CompareResult, SourceFile};
use covcompare_difflens::parser::parse_unified_diff;
use git2::{DiffFindOptions, DiffFormat, DiffOptions, Repository};

use crate::provider::RepositoryProvider;

/// Provider backed by a repository on disk.
///
/// All git2 work runs on the blocking thread pool.
#[derive(Debug, Clone)]
pub struct LocalGitProvider {
    path: PathBuf,
}

impl LocalGitProvider {
    /// # Errors
    ///
    /// Returns [`CompareError::Git`] if `path` is not inside a repository.
    pub fn open(path: &Path) -> Result<Self, CompareError> {
        let repo = Repository::discover(path)
            .map_err(|e| CompareError::Git(format!("failed to open repository: {e}")))?;
        let root = repo
            .workdir()
            .unwrap_or_else(|| repo.path())
            .to_path_buf();
        Ok(Self { path: root })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Resolve a revision (`HEAD~1`, a branch, a sha) to a [`Commit`].
    pub fn resolve_commit(&self, rev: &str) -> Result<Commit, CompareError> {
        let repo = self.repository()?;
        let commit = find_commit(&repo, rev)?;
        let parent = commit.parent_ids().next().map(|id| id.to_string());
        let branch = repo
            .find_branch(rev, git2::BranchType::Local)
            .ok()
            .map(|_| rev.to_string());
        Ok(Commit {
            commitid: commit.id().to_string(),
            branch,
            parent,
        })
    }

    fn repository(&self) -> Result<Repository, CompareError> {
        Repository::open(&self.path)
            .map_err(|e| CompareError::Git(format!("failed to open repository: {e}")))
    }

    async fn blocking<T, F>(&self, work: F) -> Result<T, CompareError>
    where
        T: Send + 'static,
        F: FnOnce(Repository) -> Result<T, CompareError> + Send + 'static,
    {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || {
            let repo = Repository::open(&path)
                .map_err(|e| CompareError::Git(format!("failed to open repository: {e}")))?;
            work(repo)
        })
        .await
        .map_err(|e| CompareError::Git(format!("git task failed: {e}")))?
    }
}

impl RepositoryProvider for LocalGitProvider {
    async fn get_compare(&self, base_ref: &str, head_ref: &str) -> Result<CompareResult, CompareError> {
        let (base_ref, head_ref) = (base_ref.to_string(), head_ref.to_string());
        self.blocking(move |repo| compare(&repo, &base_ref, &head_ref))
            .await
    }

    async fn get_source(&self, path: &str, commit_ref: &str) -> Result<SourceFile, CompareError> {
        let (path, commit_ref) = (path.to_string(), commit_ref.to_string());
        self.blocking(move |repo| read_source(&repo, &path, &commit_ref))
            .await
    }
}

fn find_commit<'r>(repo: &'r Repository, rev: &str) -> Result<git2::Commit<'r>, CompareError> {
    repo.revparse_single(rev)
        .and_then(|obj| obj.peel_to_commit())
        .map_err(|e| CompareError::Git(format!("failed to resolve '{rev}': {e}")))
}

fn compare(repo: &Repository, base_ref: &str, head_ref: &str) -> Result<CompareResult, CompareError> {
    let base = find_commit(repo, base_ref)?;
    let head = find_commit(repo, head_ref)?;

    let base_tree = base
        .tree()
        .map_err(|e| CompareError::Git(format!("failed to get base tree: {e}")))?;
    let head_tree = head
        .tree()
        .map_err(|e| CompareError::Git(format!("failed to get head tree: {e}")))?;

    let mut diff_opts = DiffOptions::new();
    let mut diff = repo
        .diff_tree_to_tree(Some(&base_tree), Some(&head_tree), Some(&mut diff_opts))
        .map_err(|e| CompareError::Git(format!("failed to compute diff: {e}")))?;

    let mut find_opts = DiffFindOptions::new();
    find_opts.renames(true);
    diff.find_similar(Some(&mut find_opts))
        .map_err(|e| CompareError::Git(format!("failed to find renames: {e}")))?;

    let mut patch = String::new();
    diff.print(DiffFormat::Patch, |_delta, _hunk, line| {
        let content = String::from_utf8_lossy(line.content());
        match line.origin() {
            '+' | '-' | ' ' => {
                patch.push(line.origin());
                patch.push_str(&content);
            }
            'F' | 'H' | 'B' => patch.push_str(&content),
            // "\ No newline at end of file" markers
            _ => {}
        }
        if !patch.is_empty() && !patch.ends_with('\n') {
            patch.push('\n');
        }
        true
    })
    .map_err(|e| CompareError::Git(format!("failed to render diff: {e}")))?;

    let diff = parse_unified_diff(&patch)?;
    let commits = commits_between(repo, &base, &head)?;
    tracing::debug!(
        base = base_ref,
        head = head_ref,
        commits = commits.len(),
        files = diff.files.len(),
        "compared local revisions"
    );
    Ok(CompareResult { commits, diff })
}

// The base commit followed by every commit reachable from head but not base.
fn commits_between(
    repo: &Repository,
    base: &git2::Commit<'_>,
    head: &git2::Commit<'_>,
) -> Result<Vec<CommitSummary>, CompareError> {
    let mut revwalk = repo
        .revwalk()
        .map_err(|e| CompareError::Git(format!("failed to create revwalk: {e}")))?;
    revwalk
        .push(head.id())
        .map_err(|e| CompareError::Git(format!("failed to push head: {e}")))?;
    revwalk
        .hide(base.id())
        .map_err(|e| CompareError::Git(format!("failed to hide base: {e}")))?;

    let mut commits = vec![summary(base)];
    for oid in revwalk {
        let oid = oid.map_err(|e| CompareError::Git(format!("revwalk error: {e}")))?;
        let commit = repo
            .find_commit(oid)
            .map_err(|e| CompareError::Git(format!("failed to find commit: {e}")))?;
        commits.push(summary(&commit));
    }
    Ok(commits)
}

fn summary(commit: &git2::Commit<'_>) -> CommitSummary {
    CommitSummary {
        commitid: commit.id().to_string(),
        message: commit
            .message()
            .and_then(|m| m.lines().next())
            .map(str::to_string),
    }
}

fn read_source(repo: &Repository, path: &str, commit_ref: &str) -> Result<SourceFile, CompareError> {
    let commit = find_commit(repo, commit_ref)?;
    let tree = commit
        .tree()
        .map_err(|e| CompareError::Git(format!("failed to get tree: {e}")))?;
    let entry = tree
        .get_path(Path::new(path))
        .map_err(|_| CompareError::FileNotFound(PathBuf::from(path)))?;
    let blob = entry
        .to_object(repo)
        .and_then(|obj| obj.peel_to_blob())
        .map_err(|e| CompareError::Git(format!("failed to read {path}: {e}")))?;
    Ok(SourceFile {
        content: String::from_utf8_lossy(blob.content()).into_owned(),
    })
}
