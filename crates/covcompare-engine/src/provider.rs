//! Source-control provider seam.

use std::future::Future;
use std::sync::Arc;

use covcompare_core::{CompareError, CompareResult, SourceFile};

/// Access to the diffs and file contents of a repository.
///
/// Implementations report their failures as [`CompareError::Provider`] (or
/// [`CompareError::Git`] for local repositories); callers own retry policy.
pub trait RepositoryProvider: Send + Sync {
    /// Compare two refs. `commits` lists the commits between them, starting
    /// with `base_ref` itself.
    fn get_compare(
        &self,
        base_ref: &str,
        head_ref: &str,
    ) -> impl Future<Output = Result<CompareResult, CompareError>> + Send;

    /// Full content of `path` at `commit_ref`.
    fn get_source(
        &self,
        path: &str,
        commit_ref: &str,
    ) -> impl Future<Output = Result<SourceFile, CompareError>> + Send;
}

impl<T: RepositoryProvider> RepositoryProvider for Arc<T> {
    fn get_compare(
        &self,
        base_ref: &str,
        head_ref: &str,
    ) -> impl Future<Output = Result<CompareResult, CompareError>> + Send {
        (**self).get_compare(base_ref, head_ref)
    }

    fn get_source(
        &self,
        path: &str,
        commit_ref: &str,
    ) -> impl Future<Output = Result<SourceFile, CompareError>> + Send {
        (**self).get_source(path, commit_ref)
    }
}
