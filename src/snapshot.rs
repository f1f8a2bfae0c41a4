use std::fmt;

/// Immutable, versioned view of a document's text. Lines are addressable by
/// 0-based index; every line records its start offset, its length excluding
/// the line break, and the break length (zero only on the last line). An
/// empty document is one empty line.
#[derive(Debug, Clone)]
pub struct Snapshot {
    text: String,
    lines: Vec<LineSpan>,
    version: u64,
}

#[derive(Debug, Clone, Copy)]
struct LineSpan {
    start: usize,
    len: usize,
    break_len: usize,
}

/// One line of a snapshot, borrowed.
#[derive(Debug, Clone, Copy)]
pub struct Line<'a> {
    snapshot: &'a Snapshot,
    span: LineSpan,
}

impl<'a> Line<'a> {
    pub fn start(&self) -> usize {
        self.span.start
    }

    /// Length excluding the line break.
    pub fn len(&self) -> usize {
        self.span.len
    }

    pub fn is_empty(&self) -> bool {
        self.span.len == 0
    }

    /// Offset one past the last text character, where the break begins.
    pub fn end(&self) -> usize {
        self.span.start + self.span.len
    }

    pub fn break_len(&self) -> usize {
        self.span.break_len
    }

    pub fn text(&self) -> &'a str {
        &self.snapshot.text[self.span.start..self.end()]
    }

    /// The line's break text; empty on a final line without one.
    pub fn break_text(&self) -> &'a str {
        &self.snapshot.text[self.end()..self.end() + self.span.break_len]
    }
}

impl Snapshot {
    pub fn new(text: impl Into<String>) -> Self {
        Self::with_version(text, 0)
    }

    pub fn with_version(text: impl Into<String>, version: u64) -> Self {
        let text = text.into();
        let lines = scan_lines(&text);
        Self {
            text,
            lines,
            version,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    pub fn line(&self, index: usize) -> Option<Line<'_>> {
        self.lines.get(index).map(|span| Line {
            snapshot: self,
            span: *span,
        })
    }

    pub fn lines(&self) -> impl Iterator<Item = Line<'_>> {
        self.lines.iter().map(|span| Line {
            snapshot: self,
            span: *span,
        })
    }

    /// Applies a validated edit batch, yielding the next snapshot version.
    /// The batch must be sorted and pairwise non-overlapping; order of
    /// application cannot change the result.
    pub fn apply(&self, edits: &[Edit]) -> Result<Snapshot, EditError> {
        validate_edits(edits, self.text.len())?;

        let grow: usize = edits.iter().map(|e| e.replacement.len()).sum();
        let mut next = String::with_capacity(self.text.len() + grow);
        let mut cursor = 0usize;
        for edit in edits {
            next.push_str(&self.text[cursor..edit.start]);
            next.push_str(&edit.replacement);
            cursor = edit.start + edit.len;
        }
        next.push_str(&self.text[cursor..]);

        Ok(Snapshot::with_version(next, self.version + 1))
    }
}

/// A single range replacement against one snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edit {
    pub start: usize,
    pub len: usize,
    pub replacement: String,
}

impl Edit {
    pub fn replace(start: usize, len: usize, replacement: impl Into<String>) -> Self {
        Self {
            start,
            len,
            replacement: replacement.into(),
        }
    }

    pub fn delete(start: usize, len: usize) -> Self {
        Self::replace(start, len, "")
    }

    pub fn insert(at: usize, text: impl Into<String>) -> Self {
        Self::replace(at, 0, text)
    }

    pub fn end(&self) -> usize {
        self.start + self.len
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditError {
    Unsorted,
    Overlap,
    OutOfBounds,
}

impl fmt::Display for EditError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            EditError::Unsorted => "edit batch is not sorted by start offset",
            EditError::Overlap => "edit batch contains overlapping ranges",
            EditError::OutOfBounds => "edit range exceeds the snapshot length",
        };
        f.write_str(label)
    }
}

impl std::error::Error for EditError {}

/// A batch is valid when sorted by start, pairwise non-overlapping (two
/// insertions at the same offset conflict: their order would matter), and
/// within bounds.
pub fn validate_edits(edits: &[Edit], text_len: usize) -> Result<(), EditError> {
    let mut prev_end: Option<usize> = None;
    let mut prev_start = 0usize;
    for edit in edits {
        if edit.end() > text_len {
            return Err(EditError::OutOfBounds);
        }
        if let Some(end) = prev_end {
            if edit.start < prev_start {
                return Err(EditError::Unsorted);
            }
            if edit.start < end || edit.start == prev_start {
                return Err(EditError::Overlap);
            }
        }
        prev_start = edit.start;
        prev_end = Some(edit.end());
    }
    Ok(())
}

fn scan_lines(text: &str) -> Vec<LineSpan> {
    let bytes = text.as_bytes();
    let mut lines = Vec::new();
    let mut start = 0usize;
    let mut i = 0usize;
    while i < bytes.len() {
        match bytes[i] {
            b'\n' => {
                lines.push(LineSpan {
                    start,
                    len: i - start,
                    break_len: 1,
                });
                i += 1;
                start = i;
            }
            b'\r' => {
                let break_len = if bytes.get(i + 1) == Some(&b'\n') { 2 } else { 1 };
                lines.push(LineSpan {
                    start,
                    len: i - start,
                    break_len,
                });
                i += break_len;
                start = i;
            }
            _ => i += 1,
        }
    }
    lines.push(LineSpan {
        start,
        len: bytes.len() - start,
        break_len: 0,
    });
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_is_one_empty_line() {
        let snap = Snapshot::new("");
        assert_eq!(snap.line_count(), 1);
        let line = snap.line(0).unwrap();
        assert_eq!(line.len(), 0);
        assert_eq!(line.break_len(), 0);
    }

    #[test]
    fn mixed_line_endings_scan() {
        let snap = Snapshot::new("a\r\nb\rc\nd");
        let breaks: Vec<&str> = snap.lines().map(|l| l.break_text()).collect();
        assert_eq!(breaks, vec!["\r\n", "\r", "\n", ""]);
        let texts: Vec<&str> = snap.lines().map(|l| l.text()).collect();
        assert_eq!(texts, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn trailing_break_yields_final_empty_line() {
        let snap = Snapshot::new("a\n");
        assert_eq!(snap.line_count(), 2);
        assert_eq!(snap.line(1).unwrap().len(), 0);
    }

    #[test]
    fn apply_replaces_and_bumps_version() {
        let snap = Snapshot::new("foo bar");
        let next = snap
            .apply(&[Edit::replace(0, 3, "qux"), Edit::delete(3, 4)])
            .unwrap();
        assert_eq!(next.text(), "qux");
        assert_eq!(next.version(), 1);
    }

    #[test]
    fn apply_insert_at_end() {
        let snap = Snapshot::new("foo");
        let next = snap.apply(&[Edit::insert(3, "\n")]).unwrap();
        assert_eq!(next.text(), "foo\n");
    }

    #[test]
    fn overlapping_edits_rejected() {
        let snap = Snapshot::new("abcdef");
        let err = snap
            .apply(&[Edit::delete(0, 3), Edit::delete(2, 2)])
            .unwrap_err();
        assert_eq!(err, EditError::Overlap);
    }

    #[test]
    fn duplicate_inserts_at_same_offset_rejected() {
        let err = validate_edits(&[Edit::insert(2, "x"), Edit::insert(2, "y")], 10).unwrap_err();
        assert_eq!(err, EditError::Overlap);
    }

    #[test]
    fn unsorted_batch_rejected() {
        let err = validate_edits(&[Edit::delete(4, 1), Edit::delete(0, 1)], 10).unwrap_err();
        assert_eq!(err, EditError::Unsorted);
    }

    #[test]
    fn out_of_bounds_rejected() {
        let err = validate_edits(&[Edit::delete(8, 4)], 10).unwrap_err();
        assert_eq!(err, EditError::OutOfBounds);
    }

    #[test]
    fn adjacent_edits_allowed() {
        let snap = Snapshot::new("abcd");
        let next = snap
            .apply(&[Edit::delete(0, 2), Edit::replace(2, 2, "zz")])
            .unwrap();
        assert_eq!(next.text(), "zz");
    }
}
