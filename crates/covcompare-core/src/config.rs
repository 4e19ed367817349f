use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::CompareError;
use crate::types::{Component, RepoRef};

/// Lines of diff above which a file comparison withholds its line view.
pub const MAX_DIFF_SIZE: usize = 170;

/// Top-level configuration loaded from `.covcompare.toml`.
///
/// The `[codecov]` table holds the site-wide settings; `[repos."<service>/<owner>/<name>".codecov]`
/// overrides them per repository.
///
/// # Examples
///
/// ```
/// use covcompare_core::CompareConfig;
///
/// let config = CompareConfig::default();
/// assert_eq!(config.codecov.allow_pseudo_compare, Some(true));
/// assert!(config.repos.is_empty());
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompareConfig {
    /// Site-wide comparison settings.
    #[serde(default)]
    pub codecov: CodecovSettings,
    /// Per-repository overrides keyed by `service/owner/name`.
    #[serde(default)]
    pub repos: HashMap<String, RepoOverride>,
}

impl CompareConfig {
    /// Load configuration from a TOML file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`CompareError::Io`] if the file cannot be read, or
    /// [`CompareError::Toml`] if the content is not valid TOML.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use covcompare_core::CompareConfig;
    /// use std::path::Path;
    ///
    /// let config = CompareConfig::from_file(Path::new(".covcompare.toml")).unwrap();
    /// ```
    pub fn from_file(path: &Path) -> Result<Self, CompareError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`CompareError::Toml`] if parsing fails.
    ///
    /// # Examples
    ///
    /// ```
    /// use covcompare_core::CompareConfig;
    ///
    /// let toml = r#"
    /// [codecov]
    /// allow_coverage_offsets = true
    /// "#;
    /// let config = CompareConfig::from_toml(toml).unwrap();
    /// assert_eq!(config.codecov.allow_coverage_offsets, Some(true));
    /// ```
    pub fn from_toml(content: &str) -> Result<Self, CompareError> {
        let config: Self = toml::from_str(content)?;
        Ok(config)
    }

    /// Resolve the effective settings for a repository.
    ///
    /// Each flag comes from the repository override when present, then the
    /// site-wide value, then the built-in default.
    ///
    /// # Examples
    ///
    /// ```
    /// use covcompare_core::{CompareConfig, RepoRef};
    ///
    /// let toml = r#"
    /// [codecov]
    /// allow_coverage_offsets = true
    ///
    /// [repos."github/acme/widgets".codecov]
    /// allow_pseudo_compare = false
    /// "#;
    /// let config = CompareConfig::from_toml(toml).unwrap();
    /// let settings = config.settings_for(&RepoRef::new("github", "acme", "widgets"));
    /// assert!(!settings.allow_pseudo_compare);
    /// assert!(settings.allow_coverage_offsets);
    /// ```
    pub fn settings_for(&self, repo: &RepoRef) -> RepoSettings {
        let site = &self.codecov;
        let repo_settings = self.repos.get(&repo.slug()).map(|r| &r.codecov);

        let pick = |f: fn(&CodecovSettings) -> Option<bool>, default: bool| {
            repo_settings
                .and_then(f)
                .or_else(|| f(site))
                .unwrap_or(default)
        };

        let components = match repo_settings {
            Some(r) if !r.components.is_empty() => r.components.clone(),
            _ => site.components.clone(),
        };

        RepoSettings {
            allow_pseudo_compare: pick(|s| s.allow_pseudo_compare, true),
            allow_coverage_offsets: pick(|s| s.allow_coverage_offsets, false),
            max_diff_size: repo_settings
                .and_then(|r| r.max_diff_size)
                .or(site.max_diff_size)
                .unwrap_or(MAX_DIFF_SIZE),
            components,
        }
    }
}

/// The `codecov` settings table. Unset values fall through to the next layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodecovSettings {
    /// Allow substituting an already-processed ancestor for a pull's base.
    pub allow_pseudo_compare: Option<bool>,
    /// Allow shifting a substituted base report's line numbers.
    pub allow_coverage_offsets: Option<bool>,
    /// Diff length above which line views are withheld.
    pub max_diff_size: Option<usize>,
    /// Named path/flag partitions of the report.
    #[serde(default)]
    pub components: Vec<Component>,
}

impl Default for CodecovSettings {
    fn default() -> Self {
        Self {
            allow_pseudo_compare: Some(true),
            allow_coverage_offsets: Some(false),
            max_diff_size: Some(MAX_DIFF_SIZE),
            components: Vec::new(),
        }
    }
}

/// Per-repository override block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoOverride {
    /// Settings that replace the site-wide ones for this repository.
    pub codecov: CodecovSettings,
}

/// Effective, fully-resolved settings for one repository.
///
/// # Examples
///
/// ```
/// use covcompare_core::RepoSettings;
///
/// let settings = RepoSettings::default();
/// assert!(settings.allow_pseudo_compare);
/// assert!(!settings.allow_coverage_offsets);
/// assert_eq!(settings.max_diff_size, 170);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoSettings {
    /// `codecov.allow_pseudo_compare` (default: true).
    pub allow_pseudo_compare: bool,
    /// `codecov.allow_coverage_offsets` (default: false).
    pub allow_coverage_offsets: bool,
    /// Diff length guard for line views (default: 170).
    pub max_diff_size: usize,
    /// Components declared for the repository.
    pub components: Vec<Component>,
}

impl Default for RepoSettings {
    fn default() -> Self {
        Self {
            allow_pseudo_compare: true,
            allow_coverage_offsets: false,
            max_diff_size: MAX_DIFF_SIZE,
            components: Vec::new(),
        }
    }
}
