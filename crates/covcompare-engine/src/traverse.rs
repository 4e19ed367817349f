//! Co-traversal of a file's diff segments and its base/head line numbering.
//!
//! [`TraverseManager`] walks both revisions of a file line by line, taking
//! line text from the diff while inside a segment and from the head source
//! (when provided) outside of it. Every step is reported to a set of
//! [`Visitor`]s.

use covcompare_core::{DiffSegment, SegmentHeader};

/// One step of a traversal.
///
/// `base_ln` is `None` for an added line, `head_ln` is `None` for a removed
/// line. `value` is `None` outside the diff when no source is available.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineEvent<'s> {
    pub base_ln: Option<u32>,
    pub head_ln: Option<u32>,
    pub value: Option<&'s str>,
    pub is_diff: bool,
}

impl LineEvent<'_> {
    pub fn is_added(&self) -> bool {
        self.base_ln.is_none()
    }

    pub fn is_removed(&self) -> bool {
        self.head_ln.is_none()
    }
}

/// Receives the line events of a traversal in order.
pub trait Visitor {
    fn visit(&mut self, event: &LineEvent<'_>);
}

/// Cursor over the segments of one file diff and the two line numberings.
///
/// Segments are read through indices and are never consumed, so the same
/// slice can be traversed any number of times.
///
/// # Examples
///
/// ```
/// use covcompare_core::{DiffSegment, SegmentHeader};
/// use covcompare_engine::traverse::{LineEvent, TraverseManager, Visitor};
///
/// struct Collect(Vec<(Option<u32>, Option<u32>)>);
/// impl Visitor for Collect {
///     fn visit(&mut self, event: &LineEvent<'_>) {
///         self.0.push((event.base_ln, event.head_ln));
///     }
/// }
///
/// let segments = vec![DiffSegment {
///     header: SegmentHeader::new(1, 1, 1, 1),
///     lines: vec!["-old".into(), "+new".into()],
/// }];
/// let mut collect = Collect(Vec::new());
/// TraverseManager::new(2, 2, &segments, None).apply(&mut [&mut collect]);
/// assert_eq!(collect.0, vec![(Some(1), None), (None, Some(1))]);
/// ```
#[derive(Debug, Clone)]
pub struct TraverseManager<'a> {
    segments: &'a [DiffSegment],
    seg_idx: usize,
    line_idx: usize,
    base_ln: u32,
    head_ln: u32,
    base_eof: u32,
    head_eof: u32,
    src: Option<&'a [String]>,
}

impl<'a> TraverseManager<'a> {
    /// `head_eof`/`base_eof` are one past the last line of each side's
    /// report file, or 0 when that side has no file.
    pub fn new(
        head_eof: u32,
        base_eof: u32,
        segments: &'a [DiffSegment],
        src: Option<&'a [String]>,
    ) -> Self {
        let first = segments.iter().position(|s| !s.lines.is_empty());
        let (base_ln, head_ln) = match first {
            Some(idx) => {
                let header = &segments[idx].header;
                (header.base_start.min(1), header.head_start.min(1))
            }
            None => (1, 1),
        };
        let mut manager = Self {
            segments,
            seg_idx: first.unwrap_or(segments.len()),
            line_idx: 0,
            base_ln,
            head_ln,
            base_eof,
            head_eof,
            src,
        };
        manager.settle();
        manager
    }

    fn current(&self) -> Option<&'a DiffSegment> {
        self.segments.get(self.seg_idx)
    }

    pub fn traverse_finished(&self) -> bool {
        if self.current().is_some() {
            return false;
        }
        match self.src {
            Some(src) => self.head_ln as usize > src.len(),
            None => self.head_ln >= self.head_eof && self.base_ln >= self.base_eof,
        }
    }

    /// Whether either cursor lies inside the current segment's ranges.
    pub fn traversing_diff(&self) -> bool {
        let Some(segment) = self.current() else {
            return false;
        };
        let (base, head) = ranges(&segment.header);
        base.contains(&self.base_ln) || head.contains(&self.head_ln)
    }

    /// Run the traversal to completion, reporting every step to `visitors`.
    pub fn apply(mut self, visitors: &mut [&mut dyn Visitor]) {
        while !self.traverse_finished() {
            let is_diff = self.traversing_diff();
            let (value, from_diff) = self.pop_line(is_diff);

            let marker = if from_diff {
                value.and_then(|v| v.as_bytes().first().copied())
            } else {
                None
            };
            let added = marker == Some(b'+');
            let removed = marker == Some(b'-');

            let event = LineEvent {
                base_ln: (!added).then_some(self.base_ln),
                head_ln: (!removed).then_some(self.head_ln),
                value,
                is_diff,
            };
            for visitor in visitors.iter_mut() {
                visitor.visit(&event);
            }

            if added {
                self.head_ln += 1;
            } else if removed {
                self.base_ln += 1;
            } else {
                self.base_ln += 1;
                self.head_ln += 1;
            }
            self.settle();
        }
    }

    fn pop_line(&mut self, is_diff: bool) -> (Option<&'a str>, bool) {
        if is_diff {
            if let Some(segment) = self.current() {
                let value = segment.lines.get(self.line_idx).map(String::as_str);
                self.line_idx += 1;
                return (value, true);
            }
        }
        let value = self.src.and_then(|src| {
            let idx = usize::try_from(self.head_ln.checked_sub(1)?).ok()?;
            src.get(idx).map(String::as_str)
        });
        (value, false)
    }

    // Move past consumed or empty segments, and past segments that lie
    // entirely behind both cursors and so can never be entered again.
    fn settle(&mut self) {
        while let Some(segment) = self.current() {
            if self.line_idx >= segment.lines.len() {
                self.seg_idx += 1;
                self.line_idx = 0;
                continue;
            }
            let (base, head) = ranges(&segment.header);
            if self.base_ln >= base.end && self.head_ln >= head.end {
                tracing::warn!(
                    base_ln = self.base_ln,
                    head_ln = self.head_ln,
                    header = ?segment.header,
                    remaining = segment.lines.len() - self.line_idx,
                    "skipping diff segment behind traversal cursors"
                );
                self.seg_idx += 1;
                self.line_idx = 0;
                continue;
            }
            break;
        }
    }
}

// A zero-length range covers the single line after its anchor, so pure
// insertions and deletions still have a non-empty range.
fn ranges(header: &SegmentHeader) -> (std::ops::Range<u32>, std::ops::Range<u32>) {
    (
        range(header.base_start, header.base_len),
        range(header.head_start, header.head_len),
    )
}

fn range(start: u32, len: u32) -> std::ops::Range<u32> {
    if len == 0 {
        start + 1..start + 2
    } else {
        start..start + len
    }
}
