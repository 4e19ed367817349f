//! Unified diff parsing and line-offset mapping.
//!
//! Turns `git diff` output (or a provider's per-file patch) into the
//! segment model used by comparisons, and maps line numbers of one revision
//! onto another through a diff.

pub mod parser;
pub mod shift;
