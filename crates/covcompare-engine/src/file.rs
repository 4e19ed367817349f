//! Per-file comparison of a base and head report through a file diff.

use std::cell::{Cell, OnceCell};

use covcompare_core::{
    ChangeSummary, DiffStats, FileDiff, LineComparison, ReportTotals, MAX_DIFF_SIZE,
};
use covcompare_report::report::{LineStore, ReportFile};
use serde::Serialize;

use crate::traverse::{TraverseManager, Visitor};
use crate::visitors::{ChangeSummaryAccumulator, LineComparisonBuilder};

/// Names of a compared file on each side.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FileName {
    pub base: Option<String>,
    pub head: Option<String>,
}

/// Report totals of a compared file on each side.
///
/// Head totals carry the patch totals of the file diff in `diff`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FileTotals {
    pub base: Option<ReportTotals>,
    pub head: Option<ReportTotals>,
}

#[derive(Debug)]
struct Traversal {
    lines: Option<Vec<LineComparison>>,
    change_summary: ChangeSummary,
}

/// Comparison of one file between a base and a head report.
///
/// Lines and change summary are computed together by a single traversal, run
/// on first access and kept for the lifetime of the value.
///
/// # Examples
///
/// ```
/// use covcompare_core::{Coverage, CoverageType, LineRecord};
/// use covcompare_engine::file::FileComparison;
/// use covcompare_report::report::ReportFile;
///
/// let base = ReportFile::dense(vec![Some(LineRecord::new(Coverage::Hits(0)))]);
/// let head = ReportFile::dense(vec![Some(LineRecord::new(Coverage::Hits(2)))]);
/// let cmp = FileComparison::new("lib.rs", Some(&base), Some(&head), None)
///     .with_source(vec!["pub fn f() {}".into()]);
///
/// assert_eq!(cmp.lines().unwrap().len(), 1);
/// assert_eq!(cmp.change_summary().get(CoverageType::Hit), Some(1));
/// assert_eq!(cmp.traversal_count(), 1);
/// ```
#[derive(Debug)]
pub struct FileComparison<'a> {
    name: FileName,
    base_file: Option<&'a ReportFile>,
    head_file: Option<&'a ReportFile>,
    diff: Option<&'a FileDiff>,
    src: Option<Vec<String>>,
    bypass_max_diff: bool,
    max_diff_size: usize,
    should_search_for_changes: Option<bool>,
    result: OnceCell<Traversal>,
    traversals: Cell<u32>,
}

impl<'a> FileComparison<'a> {
    /// Compare `head_file` (stored under `head_name`) against `base_file`.
    ///
    /// The base name defaults to the head name; use [`with_base_name`] for
    /// renamed files.
    ///
    /// [`with_base_name`]: FileComparison::with_base_name
    pub fn new(
        head_name: impl Into<String>,
        base_file: Option<&'a ReportFile>,
        head_file: Option<&'a ReportFile>,
        diff: Option<&'a FileDiff>,
    ) -> Self {
        let head_name = head_name.into();
        Self {
            name: FileName {
                base: base_file.map(|_| head_name.clone()),
                head: head_file.map(|_| head_name),
            },
            base_file,
            head_file,
            diff,
            src: None,
            bypass_max_diff: false,
            max_diff_size: MAX_DIFF_SIZE,
            should_search_for_changes: None,
            result: OnceCell::new(),
            traversals: Cell::new(0),
        }
    }

    pub fn with_base_name(mut self, base_name: impl Into<String>) -> Self {
        if self.base_file.is_some() {
            self.name.base = Some(base_name.into());
        }
        self
    }

    /// Full head source, used for the text of lines outside the diff.
    pub fn with_source(mut self, src: Vec<String>) -> Self {
        self.src = Some(src);
        self
    }

    pub fn bypass_max_diff(mut self, bypass: bool) -> Self {
        self.bypass_max_diff = bypass;
        self
    }

    pub fn max_diff_size(mut self, size: usize) -> Self {
        self.max_diff_size = size;
        self
    }

    /// Whether a previous run recorded changes for this file; `None` when
    /// nothing is known. `Some(false)` skips the traversal entirely.
    pub fn set_should_search_for_changes(&mut self, value: Option<bool>) {
        self.should_search_for_changes = value;
    }

    pub fn should_search_for_changes(&self) -> Option<bool> {
        self.should_search_for_changes
    }

    pub fn name(&self) -> &FileName {
        &self.name
    }

    pub fn base_file(&self) -> Option<&'a ReportFile> {
        self.base_file
    }

    pub fn head_file(&self) -> Option<&'a ReportFile> {
        self.head_file
    }

    pub fn totals(&self) -> FileTotals {
        let head = self.head_file.map(|f| {
            let mut totals = f.totals();
            if let Some(diff) = self.diff {
                totals.diff = diff.totals.clone().map(Box::new);
            }
            totals
        });
        FileTotals {
            base: self.base_file.map(ReportFile::totals),
            head,
        }
    }

    pub fn has_diff(&self) -> bool {
        self.diff.is_some()
    }

    pub fn stats(&self) -> Option<DiffStats> {
        self.diff.map(|d| d.stats)
    }

    fn oversized(&self) -> bool {
        !self.bypass_max_diff
            && self
                .diff
                .is_some_and(|d| d.total_diff_length() > self.max_diff_size)
    }

    /// Line-by-line view, or `None` when the diff is too large to render
    /// and no bypass was requested.
    pub fn lines(&self) -> Option<&[LineComparison]> {
        self.traversal().lines.as_deref()
    }

    /// Coverage changes on lines the diff did not touch.
    pub fn change_summary(&self) -> &ChangeSummary {
        &self.traversal().change_summary
    }

    pub fn has_changes(&self) -> bool {
        !self.change_summary().is_empty()
    }

    /// Number of traversals run for this comparison; never more than one.
    pub fn traversal_count(&self) -> u32 {
        self.traversals.get()
    }

    fn traversal(&self) -> &Traversal {
        self.result.get_or_init(|| self.traverse())
    }

    fn traverse(&self) -> Traversal {
        let oversized = self.oversized();
        if self.should_search_for_changes == Some(false) {
            tracing::debug!(file = ?self.name.head, "no recorded changes, skipping traversal");
            return Traversal {
                lines: if oversized { None } else { Some(Vec::new()) },
                change_summary: ChangeSummary::default(),
            };
        }

        self.traversals.set(self.traversals.get() + 1);
        let base = self.base_file.map(|f| f as &dyn LineStore);
        let head = self.head_file.map(|f| f as &dyn LineStore);
        let mut builder = LineComparisonBuilder::new(base, head);
        let mut accumulator = ChangeSummaryAccumulator::new(base, head);

        let segments = self.diff.map(|d| d.segments.as_slice()).unwrap_or_default();
        let manager = TraverseManager::new(
            self.head_file.map_or(0, |f| f.eof()),
            self.base_file.map_or(0, |f| f.eof()),
            segments,
            self.src.as_deref(),
        );
        if oversized {
            tracing::debug!(file = ?self.name.head, "diff exceeds render limit, lines omitted");
            manager.apply(&mut [&mut accumulator as &mut dyn Visitor]);
            Traversal {
                lines: None,
                change_summary: accumulator.into_summary(),
            }
        } else {
            manager.apply(&mut [&mut builder as &mut dyn Visitor, &mut accumulator]);
            Traversal {
                lines: Some(builder.into_lines()),
                change_summary: accumulator.into_summary(),
            }
        }
    }
}
