//! Line-number mapping through a diff.
//!
//! Used to move a report recorded against one revision onto the numbering of
//! another revision.

use covcompare_core::{DiffSegment, SegmentHeader};

/// Map `line` of the base revision of `segments` onto the head revision.
///
/// Returns `None` when the line is removed by the diff. Lines outside any
/// segment move by the net offset of the segments before them.
///
/// # Examples
///
/// ```
/// use covcompare_core::{DiffSegment, SegmentHeader};
/// use covcompare_difflens::shift::shift_line;
///
/// let segments = vec![DiffSegment {
///     header: SegmentHeader::new(2, 2, 2, 3),
///     lines: vec![" b".into(), "-c".into(), "+c2".into(), "+c3".into()],
/// }];
/// assert_eq!(shift_line(&segments, 1), Some(1));
/// assert_eq!(shift_line(&segments, 2), Some(2));
/// assert_eq!(shift_line(&segments, 3), None);
/// assert_eq!(shift_line(&segments, 10), Some(11));
/// ```
pub fn shift_line(segments: &[DiffSegment], line: u32) -> Option<u32> {
    let mut offset: i64 = 0;

    for segment in segments {
        let (mut base, mut head) = first_lines(&segment.header);
        if line < base {
            break;
        }

        for text in &segment.lines {
            match text.as_bytes().first() {
                Some(b'-') => {
                    if base == line {
                        return None;
                    }
                    base += 1;
                }
                Some(b'+') => head += 1,
                _ => {
                    if base == line {
                        return Some(head);
                    }
                    base += 1;
                    head += 1;
                }
            }
        }

        offset = i64::from(head) - i64::from(base);
    }

    u32::try_from(i64::from(line) + offset).ok()
}

/// Whether the diff moves or removes `line`.
pub fn adjusts_line(segments: &[DiffSegment], line: u32) -> bool {
    shift_line(segments, line) != Some(line)
}

// A zero-length range names the line *before* the change.
fn first_lines(header: &SegmentHeader) -> (u32, u32) {
    let base = if header.base_len == 0 {
        header.base_start + 1
    } else {
        header.base_start
    };
    let head = if header.head_len == 0 {
        header.head_start + 1
    } else {
        header.head_start
    };
    (base, head)
}
