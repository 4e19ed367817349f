use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::coverage::ReportTotals;

/// A repository on a source-control service.
///
/// # Examples
///
/// ```
/// use covcompare_core::RepoRef;
///
/// let repo = RepoRef::new("github", "acme", "widgets");
/// assert_eq!(repo.slug(), "github/acme/widgets");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoRef {
    /// Service name, e.g. `github`.
    pub service: String,
    /// Owner (user or organization) login.
    pub owner: String,
    /// Repository name.
    pub name: String,
}

impl RepoRef {
    pub fn new(service: impl Into<String>, owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            owner: owner.into(),
            name: name.into(),
        }
    }

    /// `service/owner/name`, the key used for per-repository config.
    pub fn slug(&self) -> String {
        format!("{}/{}/{}", self.service, self.owner, self.name)
    }
}

/// A commit known to the system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    /// Full commit SHA.
    pub commitid: String,
    /// Branch the commit was reported on, if known.
    #[serde(default)]
    pub branch: Option<String>,
    /// Parent commit SHA, if known.
    #[serde(default)]
    pub parent: Option<String>,
}

impl Commit {
    pub fn new(commitid: impl Into<String>) -> Self {
        Self {
            commitid: commitid.into(),
            branch: None,
            parent: None,
        }
    }
}

/// A pull request and the commits it compares.
///
/// `compared_to` is the most recent ancestor of `base` that already has a
/// processed coverage report, when that differs from `base`.
///
/// # Examples
///
/// ```
/// use covcompare_core::{PullRequest, RepoRef};
///
/// let pull = PullRequest {
///     repository: RepoRef::new("github", "acme", "widgets"),
///     pullid: 7,
///     base: "b1".into(),
///     head: "h1".into(),
///     compared_to: Some("a0".into()),
/// };
/// assert_eq!(pull.pullid, 7);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    pub repository: RepoRef,
    pub pullid: u64,
    /// Literal base commit SHA.
    pub base: String,
    /// Head commit SHA.
    pub head: String,
    /// Substitute base commit SHA for pseudo-comparisons.
    #[serde(default)]
    pub compared_to: Option<String>,
}

/// A named path/flag partition of a coverage report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Component {
    pub component_id: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Glob patterns matched against report file paths. Empty matches all.
    #[serde(default)]
    pub paths: Vec<String>,
    /// Session flags to keep. Empty keeps all sessions.
    #[serde(default)]
    pub flags: Vec<String>,
}

/// Offsets of a diff segment in both revisions: `@@ -base_start,base_len +head_start,head_len @@`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentHeader {
    pub base_start: u32,
    pub base_len: u32,
    pub head_start: u32,
    pub head_len: u32,
}

impl SegmentHeader {
    pub fn new(base_start: u32, base_len: u32, head_start: u32, head_len: u32) -> Self {
        Self {
            base_start,
            base_len,
            head_start,
            head_len,
        }
    }
}

/// A contiguous diff region (hunk).
///
/// Lines keep their diff prefix: `+` for added, `-` for removed, anything
/// else is context.
///
/// # Examples
///
/// ```
/// use covcompare_core::{DiffSegment, SegmentHeader};
///
/// let segment = DiffSegment {
///     header: SegmentHeader::new(1, 2, 1, 3),
///     lines: vec![" a".into(), "+b".into(), " c".into()],
/// };
/// assert_eq!(segment.lines.len(), 3);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSegment {
    pub header: SegmentHeader,
    pub lines: Vec<String>,
}

/// How a file changed between two revisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffKind {
    /// File did not exist in the base revision.
    New,
    /// File exists in both revisions.
    Modified,
    /// File does not exist in the head revision.
    Deleted,
    /// Binary content; carries no segments.
    Binary,
}

impl fmt::Display for DiffKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiffKind::New => write!(f, "new"),
            DiffKind::Modified => write!(f, "modified"),
            DiffKind::Deleted => write!(f, "deleted"),
            DiffKind::Binary => write!(f, "binary"),
        }
    }
}

/// Added/removed line counts of a file diff.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffStats {
    pub added: u32,
    pub removed: u32,
}

/// The diff of a single file between two revisions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileDiff {
    #[serde(rename = "type")]
    pub kind: DiffKind,
    /// Previous path when the file was renamed.
    #[serde(default)]
    pub before: Option<String>,
    pub segments: Vec<DiffSegment>,
    pub stats: DiffStats,
    /// Patch totals, filled in when the diff is applied to a head report.
    #[serde(default)]
    pub totals: Option<ReportTotals>,
}

impl FileDiff {
    pub fn new(kind: DiffKind) -> Self {
        Self {
            kind,
            before: None,
            segments: Vec::new(),
            stats: DiffStats::default(),
            totals: None,
        }
    }

    /// Number of diff lines across all segments.
    ///
    /// # Examples
    ///
    /// ```
    /// use covcompare_core::{DiffKind, DiffSegment, FileDiff, SegmentHeader};
    ///
    /// let mut diff = FileDiff::new(DiffKind::Modified);
    /// diff.segments.push(DiffSegment {
    ///     header: SegmentHeader::new(1, 1, 1, 2),
    ///     lines: vec![" a".into(), "+b".into()],
    /// });
    /// assert_eq!(diff.total_diff_length(), 2);
    /// ```
    pub fn total_diff_length(&self) -> usize {
        self.segments.iter().map(|s| s.lines.len()).sum()
    }
}

/// Per-file diffs of a comparison, keyed by path (head path, or base path for deletions).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepoDiff {
    pub files: BTreeMap<String, FileDiff>,
}

impl RepoDiff {
    pub fn get(&self, path: &str) -> Option<&FileDiff> {
        self.files.get(path)
    }
}

/// A commit listed by a provider compare.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitSummary {
    pub commitid: String,
    #[serde(default)]
    pub message: Option<String>,
}

/// Result of a provider compare between two refs.
///
/// Providers include the base commit itself in `commits`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompareResult {
    pub commits: Vec<CommitSummary>,
    pub diff: RepoDiff,
}

/// Full content of a file at a revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    pub content: String,
}

impl SourceFile {
    /// Content split into lines, without terminators.
    pub fn lines(&self) -> Vec<String> {
        self.content.lines().map(str::to_string).collect()
    }
}

/// Output format for CLI subcommands.
///
/// # Examples
///
/// ```
/// use covcompare_core::OutputFormat;
///
/// let fmt: OutputFormat = "json".parse().unwrap();
/// assert_eq!(fmt, OutputFormat::Json);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable summaries.
    #[default]
    Text,
    /// Machine-readable JSON with camelCase keys.
    Json,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            other => Err(format!("unknown output format: {other}")),
        }
    }
}
