//! Flag and path selection for report views.
//!
//! Components and flags narrow a report to the sessions uploaded with a
//! given flag and to the files matching a set of glob patterns.

use std::collections::BTreeMap;

use covcompare_core::Component;

use crate::report::Session;

/// Sessions and paths to keep when filtering a report.
///
/// An empty flag list keeps every session; an empty path list keeps every
/// file. A path list whose patterns are all invalid keeps no file.
///
/// # Examples
///
/// ```
/// use covcompare_core::Component;
/// use covcompare_report::filter::ReportFilter;
///
/// let component = Component {
///     component_id: "api".into(),
///     name: None,
///     paths: vec!["src/api/**".into()],
///     flags: Vec::new(),
/// };
/// let filter = ReportFilter::from_component(&component);
/// assert!(filter.matches_path("src/api/routes.rs"));
/// assert!(!filter.matches_path("src/db/pool.rs"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct ReportFilter {
    flags: Vec<String>,
    paths: Vec<glob::Pattern>,
    restrict_paths: bool,
}

impl ReportFilter {
    pub fn for_flag(flag: impl Into<String>) -> Self {
        Self {
            flags: vec![flag.into()],
            ..Self::default()
        }
    }

    pub fn from_component(component: &Component) -> Self {
        let mut paths = Vec::new();
        for pat in &component.paths {
            match glob::Pattern::new(pat) {
                Ok(p) => paths.push(p),
                Err(e) => tracing::warn!(
                    component = %component.component_id,
                    pattern = %pat,
                    "ignoring invalid path pattern: {e}"
                ),
            }
        }
        Self {
            flags: component.flags.clone(),
            paths,
            restrict_paths: !component.paths.is_empty(),
        }
    }

    pub fn matches_path(&self, path: &str) -> bool {
        !self.restrict_paths || self.paths.iter().any(|p| p.matches(path))
    }

    /// Ids of the sessions carrying one of the filter's flags, or `None`
    /// when the filter does not restrict sessions.
    pub fn session_ids(&self, sessions: &BTreeMap<u32, Session>) -> Option<Vec<u32>> {
        if self.flags.is_empty() {
            return None;
        }
        Some(
            sessions
                .iter()
                .filter(|(_, s)| s.flags.iter().any(|f| self.flags.contains(f)))
                .map(|(id, _)| *id)
                .collect(),
        )
    }
}
