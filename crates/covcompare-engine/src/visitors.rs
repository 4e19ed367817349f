//! Traversal visitors: line rendering and unexpected-change tallying.

use covcompare_core::{ChangeSummary, LineComparison, LineRecord};
use covcompare_report::report::LineStore;

use crate::traverse::{LineEvent, Visitor};

fn record_at(store: Option<&dyn LineStore>, line: Option<u32>) -> Option<&LineRecord> {
    store?.coverage_at(line?)
}

/// Builds a [`LineComparison`] for every event that carries line text.
pub struct LineComparisonBuilder<'a> {
    base: Option<&'a dyn LineStore>,
    head: Option<&'a dyn LineStore>,
    lines: Vec<LineComparison>,
}

impl<'a> LineComparisonBuilder<'a> {
    pub fn new(base: Option<&'a dyn LineStore>, head: Option<&'a dyn LineStore>) -> Self {
        Self {
            base,
            head,
            lines: Vec::new(),
        }
    }

    pub fn into_lines(self) -> Vec<LineComparison> {
        self.lines
    }
}

impl Visitor for LineComparisonBuilder<'_> {
    fn visit(&mut self, event: &LineEvent<'_>) {
        let Some(value) = event.value else {
            return;
        };
        let base = record_at(self.base, event.base_ln);
        let head = record_at(self.head, event.head_ln);
        self.lines.push(LineComparison {
            base_ln: event.base_ln,
            head_ln: event.head_ln,
            base_coverage: base.map(LineRecord::coverage_type),
            head_coverage: head.map(LineRecord::coverage_type),
            hit_count: head.and_then(|r| r.coverage.hit_count()),
            hit_session_count: head.map(LineRecord::hit_session_count),
            value: Some(value.to_string()),
            is_diff: event.is_diff,
            added: event.is_added(),
            removed: event.is_removed(),
        });
    }
}

/// Tallies coverage-type changes on lines the diff did not touch.
pub struct ChangeSummaryAccumulator<'a> {
    base: Option<&'a dyn LineStore>,
    head: Option<&'a dyn LineStore>,
    summary: ChangeSummary,
}

impl<'a> ChangeSummaryAccumulator<'a> {
    pub fn new(base: Option<&'a dyn LineStore>, head: Option<&'a dyn LineStore>) -> Self {
        Self {
            base,
            head,
            summary: ChangeSummary::default(),
        }
    }

    pub fn into_summary(self) -> ChangeSummary {
        self.summary
    }
}

impl Visitor for ChangeSummaryAccumulator<'_> {
    fn visit(&mut self, event: &LineEvent<'_>) {
        if event.is_added() || event.is_removed() {
            return;
        }
        let (Some(base), Some(head)) = (
            record_at(self.base, event.base_ln),
            record_at(self.head, event.head_ln),
        ) else {
            return;
        };
        let (from, to) = (base.coverage_type(), head.coverage_type());
        if from != to {
            self.summary.record_transition(from, to);
        }
    }
}
