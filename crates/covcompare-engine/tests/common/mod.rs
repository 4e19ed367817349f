#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use covcompare_core::{
    CommitSummary, CompareError, CompareResult, Coverage, DiffKind, DiffSegment, FileDiff,
    LineRecord, RepoDiff, RepoRef, SegmentHeader, SourceFile,
};
use covcompare_engine::provider::RepositoryProvider;
use covcompare_report::report::{CoverageReport, ReportFile};

/// Provider serving canned compares and sources.
#[derive(Default, Clone)]
pub struct FakeProvider {
    compares: HashMap<(String, String), CompareResult>,
    sources: HashMap<(String, String), String>,
    compare_calls: Arc<AtomicUsize>,
}

impl FakeProvider {
    pub fn with_compare(mut self, base: &str, head: &str, result: CompareResult) -> Self {
        self.compares.insert((base.into(), head.into()), result);
        self
    }

    pub fn with_source(mut self, path: &str, commit: &str, content: &str) -> Self {
        self.sources.insert((path.into(), commit.into()), content.into());
        self
    }

    pub fn compare_calls(&self) -> usize {
        self.compare_calls.load(Ordering::SeqCst)
    }
}

impl RepositoryProvider for FakeProvider {
    async fn get_compare(&self, base_ref: &str, head_ref: &str) -> Result<CompareResult, CompareError> {
        self.compare_calls.fetch_add(1, Ordering::SeqCst);
        self.compares
            .get(&(base_ref.to_string(), head_ref.to_string()))
            .cloned()
            .ok_or_else(|| CompareError::Provider(format!("no compare {base_ref}...{head_ref}")))
    }

    async fn get_source(&self, path: &str, commit_ref: &str) -> Result<SourceFile, CompareError> {
        self.sources
            .get(&(path.to_string(), commit_ref.to_string()))
            .map(|content| SourceFile { content: content.clone() })
            .ok_or_else(|| CompareError::Provider(format!("no source {path}@{commit_ref}")))
    }
}

pub fn repo() -> RepoRef {
    RepoRef::new("github", "acme", "widgets")
}

pub fn hits(lines: &[Option<u64>]) -> ReportFile {
    ReportFile::dense(
        lines
            .iter()
            .map(|l| l.map(|n| LineRecord::new(Coverage::Hits(n))))
            .collect(),
    )
}

pub fn report(files: Vec<(&str, ReportFile)>) -> CoverageReport {
    let mut report = CoverageReport::default();
    for (name, file) in files {
        report.insert(name, file);
    }
    report
}

pub fn segment(header: (u32, u32, u32, u32), lines: &[&str]) -> DiffSegment {
    DiffSegment {
        header: SegmentHeader::new(header.0, header.1, header.2, header.3),
        lines: lines.iter().map(|l| l.to_string()).collect(),
    }
}

pub fn modified(segments: Vec<DiffSegment>) -> FileDiff {
    FileDiff {
        segments,
        ..FileDiff::new(DiffKind::Modified)
    }
}

pub fn compare(commits: &[&str], files: Vec<(&str, FileDiff)>) -> CompareResult {
    let mut diff = RepoDiff::default();
    for (name, file) in files {
        diff.files.insert(name.to_string(), file);
    }
    CompareResult {
        commits: commits
            .iter()
            .map(|c| CommitSummary { commitid: c.to_string(), message: None })
            .collect(),
        diff,
    }
}
