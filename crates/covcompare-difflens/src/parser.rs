use covcompare_core::{
    CompareError, DiffKind, DiffSegment, DiffStats, FileDiff, RepoDiff, SegmentHeader,
};

/// Parse a unified diff string (as produced by `git diff`) into a [`RepoDiff`].
///
/// Handles new, deleted, renamed and binary files. Files are keyed by their
/// head path, or by their base path when deleted. Hunk bodies are read by
/// the line counts declared in their headers, so content lines that look
/// like `---`/`+++` headers are kept as content.
///
/// # Errors
///
/// Returns [`CompareError::Parse`] if a hunk header is malformed.
///
/// # Examples
///
/// ```
/// use covcompare_difflens::parser::parse_unified_diff;
///
/// let diff = "diff --git a/hello.rs b/hello.rs\n\
///             --- a/hello.rs\n\
///             +++ b/hello.rs\n\
///             @@ -1,2 +1,3 @@\n \
///             fn main() {\n\
///             +    println!(\"hello\");\n \
///             }\n";
/// let parsed = parse_unified_diff(diff).unwrap();
/// let file = parsed.get("hello.rs").unwrap();
/// assert_eq!(file.segments.len(), 1);
/// assert_eq!(file.stats.added, 1);
/// ```
pub fn parse_unified_diff(input: &str) -> Result<RepoDiff, CompareError> {
    let mut diff = RepoDiff::default();
    let mut current: Option<PendingFile> = None;
    let mut hunk = HunkReader::default();

    for line in input.lines() {
        if hunk.is_open() {
            if let Some(file) = current.as_mut() {
                hunk.feed(line, &mut file.diff);
                continue;
            }
        }

        if let Some(rest) = line.strip_prefix("diff --git ") {
            finish_file(&mut diff, current.take());
            current = Some(PendingFile::from_git_header(rest));
            continue;
        }

        // Patches without the "diff --git" command line start at "---"
        if line.starts_with("--- ") && current.is_none() {
            current = Some(PendingFile::default());
        }

        let Some(file) = current.as_mut() else {
            continue;
        };

        if line.starts_with("Binary files ") && line.ends_with(" differ") {
            file.diff.kind = DiffKind::Binary;
            continue;
        }

        if line.starts_with("new file mode") {
            file.diff.kind = DiffKind::New;
            continue;
        }

        if line.starts_with("deleted file mode") {
            file.diff.kind = DiffKind::Deleted;
            continue;
        }

        if let Some(path) = line.strip_prefix("rename from ") {
            file.old_path = Some(path.to_string());
            continue;
        }

        if let Some(path) = line.strip_prefix("rename to ") {
            file.new_path = Some(path.to_string());
            continue;
        }

        if let Some(path) = line.strip_prefix("--- ") {
            match parse_path(path) {
                Some(p) => file.old_path = Some(p),
                None => file.diff.kind = DiffKind::New,
            }
            continue;
        }

        if let Some(path) = line.strip_prefix("+++ ") {
            match parse_path(path) {
                Some(p) => file.new_path = Some(p),
                None => file.diff.kind = DiffKind::Deleted,
            }
            continue;
        }

        if line.starts_with("@@ ") {
            hunk.open(line, &mut file.diff)?;
        }
    }

    finish_file(&mut diff, current.take());
    Ok(diff)
}

/// Parse the body of a single-file patch (hunks only, as returned by
/// provider compare APIs) into segments and stats.
///
/// # Errors
///
/// Returns [`CompareError::Parse`] if a hunk header is malformed.
///
/// # Examples
///
/// ```
/// use covcompare_difflens::parser::parse_patch;
///
/// let (segments, stats) = parse_patch("@@ -1,2 +1,2 @@\n a\n-b\n+c").unwrap();
/// assert_eq!(segments.len(), 1);
/// assert_eq!((stats.added, stats.removed), (1, 1));
/// ```
pub fn parse_patch(patch: &str) -> Result<(Vec<DiffSegment>, DiffStats), CompareError> {
    let mut file = FileDiff::new(DiffKind::Modified);
    let mut hunk = HunkReader::default();

    for line in patch.lines() {
        if hunk.is_open() {
            hunk.feed(line, &mut file);
        } else if line.starts_with("@@ ") {
            hunk.open(line, &mut file)?;
        }
    }

    Ok((file.segments, file.stats))
}

struct PendingFile {
    old_path: Option<String>,
    new_path: Option<String>,
    diff: FileDiff,
}

impl Default for PendingFile {
    fn default() -> Self {
        Self {
            old_path: None,
            new_path: None,
            diff: FileDiff::new(DiffKind::Modified),
        }
    }
}

impl PendingFile {
    fn from_git_header(rest: &str) -> Self {
        let mut file = Self::default();
        // "a/<old> b/<new>"; the "---"/"+++" lines override these when present
        if let Some(idx) = rest.rfind(" b/") {
            file.old_path = parse_path(&rest[..idx]);
            file.new_path = parse_path(&rest[idx + 1..]);
        }
        file
    }
}

fn finish_file(diff: &mut RepoDiff, pending: Option<PendingFile>) {
    let Some(PendingFile {
        old_path,
        new_path,
        diff: mut file,
    }) = pending
    else {
        return;
    };

    let key = match file.kind {
        DiffKind::Deleted => old_path.clone().or_else(|| new_path.clone()),
        _ => new_path.clone().or_else(|| old_path.clone()),
    };
    let Some(key) = key else {
        tracing::debug!("skipping diff entry without a path");
        return;
    };

    if file.kind != DiffKind::New && file.kind != DiffKind::Deleted {
        if let (Some(old), Some(new)) = (&old_path, &new_path) {
            if old != new {
                file.before = Some(old.clone());
            }
        }
    }

    diff.files.insert(key, file);
}

/// Reads hunk bodies by the line counts declared in their headers.
#[derive(Default)]
struct HunkReader {
    base_remaining: u32,
    head_remaining: u32,
}

impl HunkReader {
    fn is_open(&self) -> bool {
        self.base_remaining > 0 || self.head_remaining > 0
    }

    fn open(&mut self, line: &str, file: &mut FileDiff) -> Result<(), CompareError> {
        let header = parse_hunk_header(line)?;
        self.base_remaining = header.base_len;
        self.head_remaining = header.head_len;
        file.segments.push(DiffSegment {
            header,
            lines: Vec::new(),
        });
        Ok(())
    }

    fn feed(&mut self, line: &str, file: &mut FileDiff) {
        if line.starts_with('\\') {
            // "\ No newline at end of file"
            return;
        }
        let Some(segment) = file.segments.last_mut() else {
            return;
        };
        match line.as_bytes().first() {
            Some(b'+') => {
                self.head_remaining = self.head_remaining.saturating_sub(1);
                file.stats.added += 1;
            }
            Some(b'-') => {
                self.base_remaining = self.base_remaining.saturating_sub(1);
                file.stats.removed += 1;
            }
            _ => {
                self.base_remaining = self.base_remaining.saturating_sub(1);
                self.head_remaining = self.head_remaining.saturating_sub(1);
            }
        }
        segment.lines.push(line.to_string());
    }
}

/// Strip quoting and the `a/` / `b/` prefixes; `None` for `/dev/null`.
fn parse_path(raw: &str) -> Option<String> {
    let normalized = raw.trim_matches('"');

    if normalized == "/dev/null" {
        return None;
    }

    let stripped = normalized
        .strip_prefix("a/")
        .or_else(|| normalized.strip_prefix("b/"))
        .unwrap_or(normalized);

    Some(stripped.to_string())
}

fn parse_hunk_header(line: &str) -> Result<SegmentHeader, CompareError> {
    let inner = line
        .strip_prefix("@@ ")
        .and_then(|s| {
            let end = s.find(" @@")?;
            Some(&s[..end])
        })
        .ok_or_else(|| CompareError::Parse(format!("invalid hunk header: {line}")))?;

    let parts: Vec<&str> = inner.split(' ').collect();
    if parts.len() != 2 {
        return Err(CompareError::Parse(format!("invalid hunk header: {line}")));
    }

    let old = parts[0]
        .strip_prefix('-')
        .ok_or_else(|| CompareError::Parse(format!("invalid old range in hunk: {line}")))?;
    let new = parts[1]
        .strip_prefix('+')
        .ok_or_else(|| CompareError::Parse(format!("invalid new range in hunk: {line}")))?;

    let (base_start, base_len) = parse_range(old, line)?;
    let (head_start, head_len) = parse_range(new, line)?;

    Ok(SegmentHeader::new(base_start, base_len, head_start, head_len))
}

fn parse_range(range: &str, context: &str) -> Result<(u32, u32), CompareError> {
    if let Some((start, count)) = range.split_once(',') {
        let s = start
            .parse()
            .map_err(|_| CompareError::Parse(format!("invalid range number in: {context}")))?;
        let c = count
            .parse()
            .map_err(|_| CompareError::Parse(format!("invalid range count in: {context}")))?;
        Ok((s, c))
    } else {
        let s = range
            .parse()
            .map_err(|_| CompareError::Parse(format!("invalid range number in: {context}")))?;
        Ok((s, 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_diff_returns_empty_map() {
        let diff = parse_unified_diff("").unwrap();
        assert!(diff.files.is_empty());
    }

    #[test]
    fn single_file_single_hunk() {
        let diff = "\
diff --git a/src/main.rs b/src/main.rs
index abc1234..def5678 100644
--- a/src/main.rs
+++ b/src/main.rs
@@ -1,3 +1,4 @@
 fn main() {
+    println!(\"hello\");
     let x = 1;
 }
";
        let parsed = parse_unified_diff(diff).unwrap();
        let file = parsed.get("src/main.rs").unwrap();
        assert_eq!(file.kind, DiffKind::Modified);
        assert_eq!(file.segments.len(), 1);
        assert_eq!(file.segments[0].header, SegmentHeader::new(1, 3, 1, 4));
        assert_eq!(file.segments[0].lines.len(), 4);
        assert_eq!(file.segments[0].lines[1], "+    println!(\"hello\");");
        assert_eq!(file.stats, DiffStats { added: 1, removed: 0 });
        assert!(file.before.is_none());
    }

    #[test]
    fn single_file_multiple_hunks() {
        let diff = "\
diff --git a/lib.rs b/lib.rs
--- a/lib.rs
+++ b/lib.rs
@@ -1,2 +1,3 @@
 fn foo() {
+    bar();
 }
@@ -10,2 +11,3 @@
 fn baz() {
+    qux();
 }
";
        let parsed = parse_unified_diff(diff).unwrap();
        let file = parsed.get("lib.rs").unwrap();
        assert_eq!(file.segments.len(), 2);
        assert_eq!(file.segments[0].header.base_start, 1);
        assert_eq!(file.segments[1].header.base_start, 10);
        assert_eq!(file.stats.added, 2);
    }

    #[test]
    fn multiple_files() {
        let diff = "\
diff --git a/a.rs b/a.rs
--- a/a.rs
+++ b/a.rs
@@ -1 +1,2 @@
 line1
+line2
diff --git a/b.rs b/b.rs
--- a/b.rs
+++ b/b.rs
@@ -1 +1,2 @@
 line1
+line2
";
        let parsed = parse_unified_diff(diff).unwrap();
        assert_eq!(parsed.files.len(), 2);
        assert!(parsed.get("a.rs").is_some());
        assert!(parsed.get("b.rs").is_some());
    }

    #[test]
    fn new_file() {
        let diff = "\
diff --git a/new.rs b/new.rs
new file mode 100644
--- /dev/null
+++ b/new.rs
@@ -0,0 +1,3 @@
+fn hello() {
+    println!(\"new\");
+}
";
        let parsed = parse_unified_diff(diff).unwrap();
        let file = parsed.get("new.rs").unwrap();
        assert_eq!(file.kind, DiffKind::New);
        assert_eq!(file.segments[0].header, SegmentHeader::new(0, 0, 1, 3));
        assert!(file.before.is_none());
    }

    #[test]
    fn deleted_file_keyed_by_old_path() {
        let diff = "\
diff --git a/old.rs b/old.rs
deleted file mode 100644
--- a/old.rs
+++ /dev/null
@@ -1,3 +0,0 @@
-fn goodbye() {
-    println!(\"old\");
-}
";
        let parsed = parse_unified_diff(diff).unwrap();
        let file = parsed.get("old.rs").unwrap();
        assert_eq!(file.kind, DiffKind::Deleted);
        assert_eq!(file.stats.removed, 3);
    }

    #[test]
    fn renamed_file_records_before() {
        let diff = "\
diff --git a/old_name.rs b/new_name.rs
similarity index 100%
rename from old_name.rs
rename to new_name.rs
";
        let parsed = parse_unified_diff(diff).unwrap();
        let file = parsed.get("new_name.rs").unwrap();
        assert_eq!(file.before.as_deref(), Some("old_name.rs"));
        assert!(file.segments.is_empty());
    }

    #[test]
    fn content_lines_resembling_headers_stay_in_hunk() {
        let diff = "\
diff --git a/notes.md b/notes.md
--- a/notes.md
+++ b/notes.md
@@ -1,2 +1,2 @@
--- old rule
+++ new rule
 tail
";
        let parsed = parse_unified_diff(diff).unwrap();
        let file = parsed.get("notes.md").unwrap();
        assert_eq!(file.segments[0].lines, vec!["--- old rule", "+++ new rule", " tail"]);
        assert_eq!(file.stats, DiffStats { added: 1, removed: 1 });
    }

    #[test]
    fn binary_files_are_kept_without_segments() {
        let diff = "\
diff --git a/image.png b/image.png
Binary files a/image.png and b/image.png differ
diff --git a/code.rs b/code.rs
--- a/code.rs
+++ b/code.rs
@@ -1 +1,2 @@
 line1
+line2
";
        let parsed = parse_unified_diff(diff).unwrap();
        assert_eq!(parsed.get("image.png").unwrap().kind, DiffKind::Binary);
        assert_eq!(parsed.get("code.rs").unwrap().segments.len(), 1);
    }

    #[test]
    fn no_newline_at_eof_handled() {
        let diff = "\
diff --git a/f.rs b/f.rs
--- a/f.rs
+++ b/f.rs
@@ -1 +1 @@
-old
\\ No newline at end of file
+new
\\ No newline at end of file
";
        let parsed = parse_unified_diff(diff).unwrap();
        let lines = &parsed.get("f.rs").unwrap().segments[0].lines;
        assert_eq!(lines, &vec!["-old".to_string(), "+new".to_string()]);
    }

    #[test]
    fn malformed_header_is_an_error() {
        let diff = "\
--- a/f.rs
+++ b/f.rs
@@ -x +1 @@
";
        assert!(parse_unified_diff(diff).is_err());
    }

    #[test]
    fn parse_path_handles_quoted_and_null_paths() {
        assert_eq!(parse_path("\"a/src/my file.rs\"").as_deref(), Some("src/my file.rs"));
        assert_eq!(parse_path("b/src/lib.rs").as_deref(), Some("src/lib.rs"));
        assert_eq!(parse_path("/dev/null"), None);
    }

    #[test]
    fn patch_body_parses_multiple_hunks() {
        let patch = "@@ -1,2 +1,2 @@\n a\n-b\n+c\n@@ -20,1 +20,2 @@\n x\n+y";
        let (segments, stats) = parse_patch(patch).unwrap();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[1].header, SegmentHeader::new(20, 1, 20, 2));
        assert_eq!(stats, DiffStats { added: 2, removed: 1 });
    }
}
