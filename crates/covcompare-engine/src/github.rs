use covcompare_core::{
    CommitSummary, CompareError, CompareResult, DiffKind, DiffStats, FileDiff, RepoDiff,
    SourceFile,
};
use covcompare_difflens::parser::parse_patch;
use serde::Deserialize;

use crate::provider::RepositoryProvider;

/// GitHub REST provider for compares and file contents.
///
/// # Examples
///
/// ```
/// use covcompare_engine::github::parse_repo_slug;
///
/// let (owner, repo) = parse_repo_slug("rust-lang/rust").unwrap();
/// assert_eq!(owner, "rust-lang");
/// assert_eq!(repo, "rust");
/// ```
pub struct GitHubProvider {
    octocrab: octocrab::Octocrab,
    http: reqwest::Client,
    token: String,
    owner: String,
    repo: String,
}

#[derive(Debug, Deserialize)]
struct CompareResponse {
    #[serde(default)]
    commits: Vec<CompareCommit>,
    #[serde(default)]
    files: Vec<CompareFile>,
}

#[derive(Debug, Deserialize)]
struct CompareCommit {
    sha: String,
    commit: CommitDetail,
}

#[derive(Debug, Deserialize)]
struct CommitDetail {
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompareFile {
    filename: String,
    status: String,
    #[serde(default)]
    previous_filename: Option<String>,
    #[serde(default)]
    patch: Option<String>,
    #[serde(default)]
    additions: u32,
    #[serde(default)]
    deletions: u32,
}

impl GitHubProvider {
    /// Create a provider for `owner/repo` from an explicit token or the
    /// `GITHUB_TOKEN` environment variable.
    ///
    /// # Errors
    ///
    /// Returns [`CompareError::Config`] if no token is available, or
    /// [`CompareError::Provider`] if the client cannot be built.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use covcompare_engine::github::GitHubProvider;
    ///
    /// let provider = GitHubProvider::new("octocat", "hello-world", Some("ghp_xxxx")).unwrap();
    /// ```
    pub fn new(owner: &str, repo: &str, token: Option<&str>) -> Result<Self, CompareError> {
        let token = match token {
            Some(t) => t.to_string(),
            None => std::env::var("GITHUB_TOKEN").map_err(|_| {
                CompareError::Config(
                    "GITHUB_TOKEN not set. Pass --github-token or set GITHUB_TOKEN env var".into(),
                )
            })?,
        };

        let octocrab = octocrab::Octocrab::builder()
            .personal_token(token.clone())
            .build()
            .map_err(|e| CompareError::Provider(format!("failed to create GitHub client: {e}")))?;

        Ok(Self {
            octocrab,
            http: reqwest::Client::new(),
            token,
            owner: owner.to_string(),
            repo: repo.to_string(),
        })
    }
}

impl RepositoryProvider for GitHubProvider {
    async fn get_compare(&self, base_ref: &str, head_ref: &str) -> Result<CompareResult, CompareError> {
        let route = format!(
            "/repos/{}/{}/compare/{base_ref}...{head_ref}",
            self.owner, self.repo
        );
        let response: CompareResponse = self
            .octocrab
            .get(route, None::<&()>)
            .await
            .map_err(|e| CompareError::Provider(format!("failed to fetch compare: {e}")))?;

        tracing::debug!(
            base = base_ref,
            head = head_ref,
            commits = response.commits.len(),
            files = response.files.len(),
            "fetched compare"
        );
        compare_result(base_ref, response)
    }

    async fn get_source(&self, path: &str, commit_ref: &str) -> Result<SourceFile, CompareError> {
        let url = contents_url(&self.owner, &self.repo, path)?;

        let response = self
            .http
            .get(url)
            .query(&[("ref", commit_ref)])
            .header("Accept", "application/vnd.github.raw")
            .header("Authorization", format!("Bearer {}", self.token))
            .header("User-Agent", "covcompare")
            .send()
            .await
            .map_err(|e| CompareError::Provider(format!("failed to fetch {path}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CompareError::Provider(format!(
                "GitHub API error {status}: {body}"
            )));
        }

        let content = response
            .text()
            .await
            .map_err(|e| CompareError::Provider(format!("failed to read {path}: {e}")))?;
        Ok(SourceFile { content })
    }
}

fn contents_url(owner: &str, repo: &str, path: &str) -> Result<reqwest::Url, CompareError> {
    let mut url = reqwest::Url::parse("https://api.github.com")
        .map_err(|e| CompareError::Provider(format!("invalid API url: {e}")))?;
    url.path_segments_mut()
        .map_err(|()| CompareError::Provider("API url cannot take a path".into()))?
        .clear()
        .extend(["repos", owner, repo, "contents"])
        .extend(path.split('/'));
    Ok(url)
}

fn compare_result(base_ref: &str, response: CompareResponse) -> Result<CompareResult, CompareError> {
    // GitHub lists only the commits after the base.
    let mut commits = vec![CommitSummary {
        commitid: base_ref.to_string(),
        message: None,
    }];
    commits.extend(response.commits.into_iter().map(|c| CommitSummary {
        commitid: c.sha,
        message: c.commit.message,
    }));

    let mut diff = RepoDiff::default();
    for file in response.files {
        let kind = match file.status.as_str() {
            "added" => DiffKind::New,
            "removed" => DiffKind::Deleted,
            _ if file.patch.is_none() && file.additions + file.deletions > 0 => DiffKind::Binary,
            _ => DiffKind::Modified,
        };
        let (segments, stats) = match &file.patch {
            Some(patch) => parse_patch(patch)?,
            None => (Vec::new(), DiffStats::default()),
        };
        let before = file
            .previous_filename
            .filter(|prev| *prev != file.filename && kind == DiffKind::Modified);
        diff.files.insert(
            file.filename,
            FileDiff {
                before,
                segments,
                stats: DiffStats {
                    added: file.additions.max(stats.added),
                    removed: file.deletions.max(stats.removed),
                },
                ..FileDiff::new(kind)
            },
        );
    }
    Ok(CompareResult { commits, diff })
}

/// Parse a repository slug (`owner/repo`) into its components.
///
/// # Errors
///
/// Returns [`CompareError::Config`] if the format is invalid.
///
/// # Examples
///
/// ```
/// use covcompare_engine::github::parse_repo_slug;
///
/// assert!(parse_repo_slug("octocat").is_err());
/// assert!(parse_repo_slug("octocat/").is_err());
/// ```
pub fn parse_repo_slug(slug: &str) -> Result<(String, String), CompareError> {
    match slug.split_once('/') {
        Some((owner, repo)) if !owner.is_empty() && !repo.is_empty() && !repo.contains('/') => {
            Ok((owner.to_string(), repo.to_string()))
        }
        _ => Err(CompareError::Config(format!(
            "invalid repository '{slug}', expected owner/repo"
        ))),
    }
}
