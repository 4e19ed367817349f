use std::path::PathBuf;

/// Errors that can occur while building or comparing coverage reports.
///
/// Library crates return this type directly; the binary crate renders it
/// through `miette` at the boundary.
///
/// # Examples
///
/// ```
/// use covcompare_core::CompareError;
///
/// let err = CompareError::MissingComparisonReport { commitid: "abc123".into() };
/// assert!(err.to_string().contains("abc123"));
/// ```
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum CompareError {
    /// The coverage artifact for a commit is absent from storage.
    #[error("missing coverage report for commit {commitid}")]
    #[diagnostic(code(covcompare::missing_report))]
    MissingComparisonReport { commitid: String },

    /// A pull request references a commit id with no matching commit.
    #[error("missing commit {commitid} for comparison")]
    #[diagnostic(code(covcompare::missing_commit))]
    MissingComparisonCommit { commitid: String },

    /// Repository provider (API or local git) failure.
    #[error("provider error: {0}")]
    Provider(String),

    /// Cross-request cache failure.
    #[error("cache error: {0}")]
    Cache(String),

    /// Filesystem I/O failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid or missing configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Git operation failure.
    #[error("git error: {0}")]
    Git(String),

    /// Diff or report parsing failure.
    #[error("parse error: {0}")]
    Parse(String),

    /// JSON serialization / deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML deserialization failure.
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// A required file was not found.
    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),
}
