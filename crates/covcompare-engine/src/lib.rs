//! Coverage comparison between two commits.
//!
//! Combines a base and a head coverage report with the provider diff between
//! the two commits:
//! - [`traverse`] walks a file's diff segments and line numbering together
//! - [`visitors`] render line comparisons and tally unexpected changes
//! - [`file::FileComparison`] is the per-file view
//! - [`comparison::Comparison`] fetches diffs and reports for a commit pair
//! - [`pull::PullRequestComparison`] adds pseudo-comparison and the
//!   changed-files cache
//!
//! Collaborators are injected: [`provider::RepositoryProvider`] (with
//! [`github`] and [`git`] adapters) and [`cache::CrossRequestCache`].

pub mod cache;
pub mod comparison;
pub mod file;
pub mod git;
pub mod github;
pub mod provider;
pub mod pull;
pub mod traverse;
pub mod visitors;
