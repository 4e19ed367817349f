//! Patch totals: coverage of the lines a diff adds.

use covcompare_core::{DiffKind, RepoDiff, ReportTotals};

use crate::report::{CoverageReport, LineStore};

/// Record on every diffed file the totals of its added lines in `report`,
/// and return the totals over the whole diff.
///
/// Returns `None` when no diffed file appears in the report.
///
/// # Examples
///
/// ```
/// use covcompare_core::{Coverage, DiffKind, DiffSegment, FileDiff, LineRecord, RepoDiff, SegmentHeader};
/// use covcompare_report::diff::apply_diff;
/// use covcompare_report::report::{CoverageReport, ReportFile};
///
/// let mut report = CoverageReport::default();
/// report.insert("a.rs", ReportFile::dense(vec![
///     Some(LineRecord::new(Coverage::Hits(1))),
///     Some(LineRecord::new(Coverage::Hits(0))),
/// ]));
/// let mut diff = RepoDiff::default();
/// diff.files.insert("a.rs".into(), FileDiff {
///     segments: vec![DiffSegment {
///         header: SegmentHeader::new(1, 1, 1, 2),
///         lines: vec![" a".into(), "+b".into()],
///     }],
///     ..FileDiff::new(DiffKind::Modified)
/// });
///
/// let totals = apply_diff(&report, &mut diff).unwrap();
/// assert_eq!(totals.lines, 1);
/// assert_eq!(totals.misses, 1);
/// assert_eq!(diff.files["a.rs"].totals.as_ref().unwrap().lines, 1);
/// ```
pub fn apply_diff(report: &CoverageReport, diff: &mut RepoDiff) -> Option<ReportTotals> {
    let mut overall = ReportTotals::default();
    let mut seen = false;

    for (path, file_diff) in diff.files.iter_mut() {
        if !matches!(file_diff.kind, DiffKind::New | DiffKind::Modified) {
            continue;
        }
        let Some(file) = report.get(path) else {
            continue;
        };
        seen = true;

        let mut totals = ReportTotals::default();
        for segment in &file_diff.segments {
            let mut head_ln = segment.header.head_start;
            for line in &segment.lines {
                match line.as_bytes().first() {
                    Some(b'-') => {}
                    Some(b'+') => {
                        if let Some(record) = file.coverage_at(head_ln) {
                            totals.add_line(record);
                        }
                        head_ln += 1;
                    }
                    _ => head_ln += 1,
                }
            }
        }
        if totals.lines > 0 {
            totals.files = 1;
        }
        overall.merge(&totals);
        file_diff.totals = Some(totals.finish());
    }

    seen.then(|| overall.finish())
}
