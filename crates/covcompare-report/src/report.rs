use std::collections::BTreeMap;

use covcompare_core::{DiffKind, DiffSegment, LineRecord, RepoDiff, ReportTotals};
use covcompare_difflens::shift::{adjusts_line, shift_line};
use serde::{Deserialize, Serialize};

use crate::filter::ReportFilter;

/// Indexed access to the coverage records of one file.
///
/// Line numbers are 1-based. Lookups outside the stored range return `None`.
pub trait LineStore {
    /// Coverage record of `line`, if the line is tracked.
    fn coverage_at(&self, line: u32) -> Option<&LineRecord>;

    /// One past the last stored line.
    fn eof(&self) -> u32;

    /// Tracked lines in ascending order.
    fn tracked_lines(&self) -> Box<dyn Iterator<Item = (u32, &LineRecord)> + '_>;
}

/// Layout of a file's line records.
///
/// `dense` stores one slot per line (index 0 is line 1); `sparse` stores
/// only tracked lines as `[line, record]` pairs.
///
/// # Examples
///
/// ```
/// use covcompare_report::report::{LineData, LineStore};
///
/// let dense: LineData = serde_json::from_str(
///     r#"{"format": "dense", "lines": [null, {"coverage": 1}]}"#,
/// ).unwrap();
/// assert!(dense.coverage_at(1).is_none());
/// assert!(dense.coverage_at(2).is_some());
/// assert_eq!(dense.eof(), 3);
///
/// let sparse: LineData = serde_json::from_str(
///     r#"{"format": "sparse", "lines": [[7, {"coverage": "1/2"}]]}"#,
/// ).unwrap();
/// assert!(sparse.coverage_at(7).is_some());
/// assert_eq!(sparse.eof(), 8);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "format", content = "lines", rename_all = "lowercase")]
pub enum LineData {
    Dense(Vec<Option<LineRecord>>),
    #[serde(with = "sparse_lines")]
    Sparse(BTreeMap<u32, LineRecord>),
}

impl LineStore for LineData {
    fn coverage_at(&self, line: u32) -> Option<&LineRecord> {
        match self {
            LineData::Dense(lines) => {
                let idx = usize::try_from(line).ok()?.checked_sub(1)?;
                lines.get(idx)?.as_ref()
            }
            LineData::Sparse(lines) => lines.get(&line),
        }
    }

    fn eof(&self) -> u32 {
        match self {
            LineData::Dense(lines) => u32::try_from(lines.len()).unwrap_or(u32::MAX - 1) + 1,
            LineData::Sparse(lines) => lines.keys().next_back().map_or(1, |last| last + 1),
        }
    }

    fn tracked_lines(&self) -> Box<dyn Iterator<Item = (u32, &LineRecord)> + '_> {
        match self {
            LineData::Dense(lines) => Box::new(
                lines
                    .iter()
                    .zip(1u32..)
                    .filter_map(|(record, ln)| record.as_ref().map(|r| (ln, r))),
            ),
            LineData::Sparse(lines) => Box::new(lines.iter().map(|(ln, r)| (*ln, r))),
        }
    }
}

impl LineData {
    /// Rebuild data of the same layout from `(line, record)` pairs.
    fn with_same_layout(&self, pairs: BTreeMap<u32, LineRecord>) -> LineData {
        match self {
            LineData::Sparse(_) => LineData::Sparse(pairs),
            LineData::Dense(_) => {
                let len = pairs.keys().next_back().copied().unwrap_or(0) as usize;
                let mut lines = vec![None; len];
                for (ln, record) in pairs {
                    if ln > 0 {
                        lines[ln as usize - 1] = Some(record);
                    }
                }
                LineData::Dense(lines)
            }
        }
    }
}

mod sparse_lines {
    use std::collections::BTreeMap;

    use covcompare_core::LineRecord;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(
        lines: &BTreeMap<u32, LineRecord>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let pairs: Vec<(&u32, &LineRecord)> = lines.iter().collect();
        pairs.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<u32, LineRecord>, D::Error> {
        let pairs: Vec<(u32, LineRecord)> = Vec::deserialize(deserializer)?;
        Ok(pairs.into_iter().collect())
    }
}

/// Coverage of a single file in a report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportFile {
    pub lines: LineData,
}

impl ReportFile {
    /// A file whose records are given per line, starting at line 1.
    ///
    /// # Examples
    ///
    /// ```
    /// use covcompare_core::{Coverage, LineRecord};
    /// use covcompare_report::report::{LineStore, ReportFile};
    ///
    /// let file = ReportFile::dense(vec![Some(LineRecord::new(Coverage::Hits(1))), None]);
    /// assert!(file.coverage_at(1).is_some());
    /// assert!(file.coverage_at(2).is_none());
    /// assert!(file.coverage_at(99).is_none());
    /// ```
    pub fn dense(lines: Vec<Option<LineRecord>>) -> Self {
        Self {
            lines: LineData::Dense(lines),
        }
    }

    pub fn sparse(lines: impl IntoIterator<Item = (u32, LineRecord)>) -> Self {
        Self {
            lines: LineData::Sparse(lines.into_iter().collect()),
        }
    }

    pub fn totals(&self) -> ReportTotals {
        let mut totals = ReportTotals::default();
        for (_, record) in self.tracked_lines() {
            totals.add_line(record);
        }
        totals.files = 1;
        totals.finish()
    }

    /// Move the file's records onto the head numbering of `segments`.
    /// Records on removed lines are dropped.
    pub fn shift_lines(&self, segments: &[DiffSegment]) -> ReportFile {
        let pairs = self
            .tracked_lines()
            .filter_map(|(ln, record)| shift_line(segments, ln).map(|n| (n, record.clone())))
            .collect();
        ReportFile {
            lines: self.lines.with_same_layout(pairs),
        }
    }

    fn filtered(&self, sessions: Option<&[u32]>) -> Option<ReportFile> {
        let Some(ids) = sessions else {
            return Some(self.clone());
        };
        let pairs: BTreeMap<u32, LineRecord> = self
            .tracked_lines()
            .filter_map(|(ln, record)| {
                let kept: Vec<_> = record
                    .sessions
                    .iter()
                    .filter(|s| ids.contains(&s.id))
                    .copied()
                    .collect();
                let coverage = kept
                    .iter()
                    .map(|s| s.coverage)
                    .reduce(|a, b| a.merge(b))?;
                Some((
                    ln,
                    LineRecord {
                        coverage,
                        sessions: kept,
                        complexity: record.complexity,
                    },
                ))
            })
            .collect();
        if pairs.is_empty() {
            return None;
        }
        Some(ReportFile {
            lines: self.lines.with_same_layout(pairs),
        })
    }
}

impl LineStore for ReportFile {
    fn coverage_at(&self, line: u32) -> Option<&LineRecord> {
        self.lines.coverage_at(line)
    }

    fn eof(&self) -> u32 {
        self.lines.eof()
    }

    fn tracked_lines(&self) -> Box<dyn Iterator<Item = (u32, &LineRecord)> + '_> {
        self.lines.tracked_lines()
    }
}

/// An upload session contributing to a report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    #[serde(default)]
    pub flags: Vec<String>,
}

/// Per-line coverage of every file of one commit.
///
/// # Examples
///
/// ```
/// use covcompare_report::report::CoverageReport;
///
/// let report: CoverageReport = serde_json::from_str(r#"{
///     "sessions": {"0": {"flags": ["unit"]}},
///     "files": {
///         "src/lib.rs": {"lines": {"format": "dense", "lines": [{"coverage": 1}, {"coverage": 0}]}}
///     }
/// }"#).unwrap();
/// let totals = report.totals();
/// assert_eq!(totals.files, 1);
/// assert_eq!(totals.hits, 1);
/// assert_eq!(totals.misses, 1);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoverageReport {
    #[serde(default)]
    pub sessions: BTreeMap<u32, Session>,
    #[serde(default)]
    pub files: BTreeMap<String, ReportFile>,
}

impl CoverageReport {
    pub fn get(&self, path: &str) -> Option<&ReportFile> {
        self.files.get(path)
    }

    pub fn insert(&mut self, path: impl Into<String>, file: ReportFile) {
        self.files.insert(path.into(), file);
    }

    pub fn file_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.files.keys().map(String::as_str)
    }

    pub fn totals(&self) -> ReportTotals {
        let mut totals = ReportTotals::default();
        for file in self.files.values() {
            totals.merge(&file.totals());
        }
        totals.sessions = u32::try_from(self.sessions.len()).unwrap_or(u32::MAX);
        totals.finish()
    }

    /// A new report restricted to the files and sessions selected by `filter`.
    ///
    /// Line coverage is recomputed from the kept sessions; lines without a
    /// kept session are dropped, and files left without lines are omitted.
    pub fn filter(&self, filter: &ReportFilter) -> CoverageReport {
        let session_ids = filter.session_ids(&self.sessions);
        let sessions = match &session_ids {
            Some(ids) => self
                .sessions
                .iter()
                .filter(|(id, _)| ids.contains(*id))
                .map(|(id, s)| (*id, s.clone()))
                .collect(),
            None => self.sessions.clone(),
        };
        let files = self
            .files
            .iter()
            .filter(|(path, _)| filter.matches_path(path))
            .filter_map(|(path, file)| {
                file.filtered(session_ids.as_deref())
                    .map(|f| (path.clone(), f))
            })
            .collect();
        CoverageReport { sessions, files }
    }

    /// Move line numbers onto the head revision of `diff`, in place.
    ///
    /// Deleted files are dropped, renamed files move to their new path.
    pub fn shift_lines_by_diff(&mut self, diff: &RepoDiff) {
        for (path, file_diff) in &diff.files {
            match file_diff.kind {
                DiffKind::Deleted => {
                    self.files.remove(path);
                }
                DiffKind::Modified => {
                    let source = file_diff.before.as_deref().unwrap_or(path);
                    if let Some(file) = self.files.remove(source) {
                        let shifted = file.shift_lines(&file_diff.segments);
                        self.files.insert(path.clone(), shifted);
                    }
                }
                DiffKind::New | DiffKind::Binary => {}
            }
        }
    }

    /// Whether `diff` (from this report's commit to another) would misalign
    /// line numbers tracked by this report, given `future_report` and the
    /// diff `future_diff` it is about to be compared through.
    ///
    /// A file deleted by `diff` and re-added by `future_diff` always counts;
    /// a file modified by both counts when `diff` moves or removes any line
    /// this report tracks for it.
    pub fn does_diff_adjust_tracked_lines(
        &self,
        diff: &RepoDiff,
        future_report: &CoverageReport,
        future_diff: &RepoDiff,
    ) -> bool {
        for (path, file_diff) in &diff.files {
            let future_kind = future_diff.get(path).map(|f| f.kind);
            match (file_diff.kind, future_kind) {
                (DiffKind::Deleted, Some(DiffKind::New)) => return true,
                (DiffKind::Modified, Some(DiffKind::Modified)) => {
                    let past_path = file_diff.before.as_deref().unwrap_or(path);
                    let (Some(past), Some(_)) = (self.get(past_path), future_report.get(path))
                    else {
                        continue;
                    };
                    if past
                        .tracked_lines()
                        .any(|(ln, _)| adjusts_line(&file_diff.segments, ln))
                    {
                        return true;
                    }
                }
                _ => {}
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use covcompare_core::{Coverage, FileDiff, LineSession, SegmentHeader};

    fn hits(n: u64) -> LineRecord {
        LineRecord::new(Coverage::Hits(n))
    }

    fn with_sessions(sessions: &[(u32, u64)]) -> LineRecord {
        let sessions: Vec<LineSession> = sessions
            .iter()
            .map(|(id, n)| LineSession {
                id: *id,
                coverage: Coverage::Hits(*n),
            })
            .collect();
        let coverage = sessions
            .iter()
            .map(|s| s.coverage)
            .reduce(|a, b| a.merge(b))
            .unwrap();
        LineRecord {
            coverage,
            sessions,
            complexity: None,
        }
    }

    fn modified(segments: Vec<DiffSegment>) -> FileDiff {
        FileDiff {
            segments,
            ..FileDiff::new(DiffKind::Modified)
        }
    }

    fn insertion_at_top() -> DiffSegment {
        DiffSegment {
            header: SegmentHeader::new(1, 1, 1, 2),
            lines: vec!["+new".into(), " first".into()],
        }
    }

    #[test]
    fn lookup_outside_range_is_none() {
        let file = ReportFile::dense(vec![Some(hits(1))]);
        assert!(file.coverage_at(0).is_none());
        assert!(file.coverage_at(2).is_none());
        assert_eq!(file.eof(), 2);
    }

    #[test]
    fn empty_sparse_file_eof_is_one() {
        let file = ReportFile::sparse(Vec::new());
        assert_eq!(file.eof(), 1);
    }

    #[test]
    fn dense_and_sparse_agree() {
        let dense = ReportFile::dense(vec![None, Some(hits(2)), None, Some(hits(0))]);
        let sparse = ReportFile::sparse(vec![(2, hits(2)), (4, hits(0))]);
        let a: Vec<_> = dense.tracked_lines().map(|(ln, r)| (ln, r.clone())).collect();
        let b: Vec<_> = sparse.tracked_lines().map(|(ln, r)| (ln, r.clone())).collect();
        assert_eq!(a, b);
        assert_eq!(dense.totals(), sparse.totals());
    }

    #[test]
    fn sparse_serializes_as_pairs() {
        let file = ReportFile::sparse(vec![(3, hits(1))]);
        let json = serde_json::to_value(&file).unwrap();
        assert_eq!(json["lines"]["format"], "sparse");
        assert_eq!(json["lines"]["lines"][0][0], 3);
        let back: ReportFile = serde_json::from_value(json).unwrap();
        assert_eq!(back, file);
    }

    #[test]
    fn shift_keeps_layout_and_moves_lines() {
        let file = ReportFile::dense(vec![Some(hits(1)), Some(hits(0))]);
        let shifted = file.shift_lines(&[insertion_at_top()]);
        assert!(matches!(shifted.lines, LineData::Dense(_)));
        assert!(shifted.coverage_at(1).is_none());
        assert_eq!(shifted.coverage_at(2), Some(&hits(1)));
        assert_eq!(shifted.coverage_at(3), Some(&hits(0)));
    }

    #[test]
    fn shift_report_handles_renames_and_deletions() {
        let mut report = CoverageReport::default();
        report.insert("old.rs", ReportFile::dense(vec![Some(hits(1))]));
        report.insert("gone.rs", ReportFile::dense(vec![Some(hits(1))]));

        let mut diff = RepoDiff::default();
        let mut renamed = modified(vec![insertion_at_top()]);
        renamed.before = Some("old.rs".into());
        diff.files.insert("new.rs".into(), renamed);
        diff.files.insert("gone.rs".into(), FileDiff::new(DiffKind::Deleted));

        report.shift_lines_by_diff(&diff);
        assert!(report.get("old.rs").is_none());
        assert!(report.get("gone.rs").is_none());
        assert_eq!(report.get("new.rs").unwrap().coverage_at(2), Some(&hits(1)));
    }

    #[test]
    fn diff_adjusting_tracked_lines_is_detected() {
        let mut past = CoverageReport::default();
        past.insert("a.rs", ReportFile::dense(vec![Some(hits(1))]));
        let mut future = CoverageReport::default();
        future.insert("a.rs", ReportFile::dense(vec![Some(hits(1))]));

        let mut diff = RepoDiff::default();
        diff.files.insert("a.rs".into(), modified(vec![insertion_at_top()]));
        let mut future_diff = RepoDiff::default();
        future_diff.files.insert("a.rs".into(), modified(Vec::new()));

        assert!(past.does_diff_adjust_tracked_lines(&diff, &future, &future_diff));
        assert!(!past.does_diff_adjust_tracked_lines(&diff, &future, &RepoDiff::default()));
    }

    #[test]
    fn diff_below_tracked_lines_does_not_adjust() {
        let mut past = CoverageReport::default();
        past.insert("a.rs", ReportFile::dense(vec![Some(hits(1))]));
        let future = past.clone();

        let mut diff = RepoDiff::default();
        diff.files.insert(
            "a.rs".into(),
            modified(vec![DiffSegment {
                header: SegmentHeader::new(5, 0, 6, 1),
                lines: vec!["+tail".into()],
            }]),
        );
        let mut future_diff = RepoDiff::default();
        future_diff.files.insert("a.rs".into(), modified(Vec::new()));

        assert!(!past.does_diff_adjust_tracked_lines(&diff, &future, &future_diff));
    }

    #[test]
    fn delete_then_readd_adjusts() {
        let past = CoverageReport::default();
        let mut diff = RepoDiff::default();
        diff.files.insert("a.rs".into(), FileDiff::new(DiffKind::Deleted));
        let mut future_diff = RepoDiff::default();
        future_diff.files.insert("a.rs".into(), FileDiff::new(DiffKind::New));
        assert!(past.does_diff_adjust_tracked_lines(&diff, &CoverageReport::default(), &future_diff));
    }

    #[test]
    fn filter_by_flag_recomputes_coverage() {
        let mut report = CoverageReport::default();
        report.sessions.insert(0, Session { flags: vec!["unit".into()] });
        report.sessions.insert(1, Session { flags: vec!["integration".into()] });
        report.insert(
            "a.rs",
            ReportFile::dense(vec![
                Some(with_sessions(&[(0, 0), (1, 3)])),
                Some(with_sessions(&[(1, 1)])),
            ]),
        );

        let unit = report.filter(&ReportFilter::for_flag("unit"));
        assert_eq!(unit.sessions.len(), 1);
        let file = unit.get("a.rs").unwrap();
        assert_eq!(file.coverage_at(1).unwrap().coverage, Coverage::Hits(0));
        assert!(file.coverage_at(2).is_none());
        assert_eq!(unit.totals().misses, 1);
    }

    #[test]
    fn filter_by_unknown_flag_empties_report() {
        let mut report = CoverageReport::default();
        report.sessions.insert(0, Session { flags: vec!["unit".into()] });
        report.insert("a.rs", ReportFile::dense(vec![Some(with_sessions(&[(0, 1)]))]));
        let filtered = report.filter(&ReportFilter::for_flag("ui"));
        assert!(filtered.files.is_empty());
    }
}
