use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::policy::{EndOfLineKind, IndentStyle, Policy};
use crate::snapshot::{Edit, Snapshot};
use crate::trend;

// Form feed and vertical tab count as trailing whitespace too.
static TRAILING_WS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t\x0B\x0C]+$").expect("trailing whitespace pattern"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransformationKind {
    Charset,
    TrimTrailingWhitespace,
    EnsureFinalNewline,
    EnforceLineEnding,
    ConvertIndentStyle,
}

impl TransformationKind {
    pub fn label(self) -> &'static str {
        match self {
            TransformationKind::Charset => "charset",
            TransformationKind::TrimTrailingWhitespace => "trim-trailing-whitespace",
            TransformationKind::EnsureFinalNewline => "ensure-final-newline",
            TransformationKind::EnforceLineEnding => "enforce-line-ending",
            TransformationKind::ConvertIndentStyle => "convert-indent-style",
        }
    }
}

/// Deletes each line's trailing run of space/tab/form-feed/vertical-tab.
/// Line breaks are never part of the deleted range.
pub fn trim_trailing_whitespace(snapshot: &Snapshot) -> Vec<Edit> {
    let mut edits = Vec::new();
    for line in snapshot.lines() {
        if let Some(found) = TRAILING_WS.find(line.text()) {
            edits.push(Edit::delete(line.start() + found.start(), found.len()));
        }
    }
    edits
}

/// Replaces every non-empty line break that differs from the target
/// sequence. The break-less final line is the final-newline pass's concern.
pub fn enforce_line_ending(snapshot: &Snapshot, target: EndOfLineKind) -> Vec<Edit> {
    let wanted = target.as_str();
    let mut edits = Vec::new();
    for line in snapshot.lines() {
        if line.break_len() > 0 && line.break_text() != wanted {
            edits.push(Edit::replace(line.end(), line.break_len(), wanted));
        }
    }
    edits
}

/// With `insert` set, drops the run of wholly-empty trailing lines beyond
/// the first document line and appends `eol` when the last non-empty line
/// lacks a break. Otherwise strips the document's trailing break run
/// entirely. Idempotent in both directions.
pub fn ensure_final_newline(snapshot: &Snapshot, insert: bool, eol: &str) -> Vec<Edit> {
    if insert {
        insert_final_newline(snapshot, eol)
    } else {
        strip_final_newline(snapshot)
    }
}

fn insert_final_newline(snapshot: &Snapshot, eol: &str) -> Vec<Edit> {
    let last_non_empty = (0..snapshot.line_count())
        .rev()
        .map(|index| snapshot.line(index).expect("line index in range"))
        .find(|line| !line.is_empty());

    let Some(line) = last_non_empty else {
        // Nothing but blank lines: keep the first line's break, if any.
        if snapshot.line_count() < 2 {
            return Vec::new();
        }
        let first = snapshot.line(0).expect("line index in range");
        let keep = first.end() + first.break_len();
        if keep < snapshot.len() {
            return vec![Edit::delete(keep, snapshot.len() - keep)];
        }
        return Vec::new();
    };

    let after_break = line.end() + line.break_len();
    if after_break < snapshot.len() {
        return vec![Edit::delete(after_break, snapshot.len() - after_break)];
    }
    if line.break_len() == 0 {
        return vec![Edit::insert(snapshot.len(), eol)];
    }
    Vec::new()
}

fn strip_final_newline(snapshot: &Snapshot) -> Vec<Edit> {
    let bytes = snapshot.text().as_bytes();
    let mut cut = bytes.len();
    while cut > 0 && matches!(bytes[cut - 1], b'\r' | b'\n') {
        cut -= 1;
    }
    if cut < bytes.len() {
        vec![Edit::delete(cut, bytes.len() - cut)]
    } else {
        Vec::new()
    }
}

/// Converts leading whitespace toward the policy's indent style. With a Tab
/// target, each maximal leading space run becomes full tabs plus leftover
/// literal spaces. With a Space target, each maximal leading tab run becomes
/// `tab_width` spaces per tab; additionally, when an explicit indent_size
/// disagrees with the width the document already uses, pure-space indent
/// runs are rescaled to preserve visual nesting depth, rounding up. Lines
/// whose indentation cannot be computed are skipped.
pub fn convert_indent_style(snapshot: &Snapshot, policy: &Policy, host_tab_width: usize) -> Vec<Edit> {
    let tab_width = policy.resolved_tab_width(host_tab_width).max(1);
    match policy.indent_style {
        IndentStyle::Tab => tabify(snapshot, tab_width),
        IndentStyle::Space => {
            // The analyzer's fallback is the tab width, so a document with
            // no space evidence still rescales tab expansions onto the
            // requested indent size; anything else breaks idempotence once
            // the expanded spaces become next run's evidence.
            let rescale = policy.indent_size.and_then(|size| {
                let inferred = trend::analyze_indent_width(snapshot, tab_width);
                (inferred != size).then_some((inferred, size))
            });
            untabify(snapshot, tab_width, rescale)
        }
        IndentStyle::Unset => Vec::new(),
    }
}

fn tabify(snapshot: &Snapshot, tab_width: usize) -> Vec<Edit> {
    let mut edits = Vec::new();
    for line in snapshot.lines() {
        let spaces = prefix_len(line.text(), ' ');
        let tabs = spaces / tab_width;
        if tabs == 0 {
            continue;
        }
        let rest = spaces % tab_width;
        let mut replacement = "\t".repeat(tabs);
        replacement.push_str(&" ".repeat(rest));
        edits.push(Edit::replace(line.start(), spaces, replacement));
    }
    edits
}

fn untabify(
    snapshot: &Snapshot,
    tab_width: usize,
    rescale: Option<(usize, usize)>,
) -> Vec<Edit> {
    let mut edits = Vec::new();
    for line in snapshot.lines() {
        let tabs = prefix_len(line.text(), '\t');
        if tabs > 0 {
            let columns = match rescale {
                Some((inferred, size)) => (tabs * tab_width * size).div_ceil(inferred),
                None => tabs * tab_width,
            };
            edits.push(Edit::replace(line.start(), tabs, " ".repeat(columns)));
            continue;
        }
        let Some((inferred, size)) = rescale else {
            continue;
        };
        // Same evidence rule as the trend analyzer: a pure-space run
        // followed by a non-space non-tab character. Anything else is
        // ambiguous and left alone.
        let Some(spaces) = trend::leading_space_run(line.text()) else {
            continue;
        };
        let columns = (spaces * size).div_ceil(inferred);
        if columns != spaces {
            edits.push(Edit::replace(line.start(), spaces, " ".repeat(columns)));
        }
    }
    edits
}

fn prefix_len(text: &str, ch: char) -> usize {
    text.chars().take_while(|c| *c == ch).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(snapshot: &Snapshot, edits: &[Edit]) -> String {
        snapshot.apply(edits).expect("valid batch").text().to_string()
    }

    #[test]
    fn trim_covers_all_trailing_whitespace_kinds() {
        let snap = Snapshot::new("foo \t\x0C\x0B\nbar\n  \nbaz");
        let next = apply(&snap, &trim_trailing_whitespace(&snap));
        assert_eq!(next, "foo\nbar\n\nbaz");
    }

    #[test]
    fn trim_leaves_breaks_untouched() {
        let snap = Snapshot::new("foo  \r\n");
        let edits = trim_trailing_whitespace(&snap);
        assert_eq!(edits, vec![Edit::delete(3, 2)]);
    }

    #[test]
    fn trim_is_a_no_op_on_clean_lines() {
        let snap = Snapshot::new("foo\nbar");
        assert!(trim_trailing_whitespace(&snap).is_empty());
    }

    #[test]
    fn line_endings_are_rewritten_to_target() {
        let snap = Snapshot::new("a\r\nb\rc\nd");
        let next = apply(&snap, &enforce_line_ending(&snap, EndOfLineKind::Lf));
        assert_eq!(next, "a\nb\nc\nd");
    }

    #[test]
    fn final_line_without_break_is_left_alone() {
        let snap = Snapshot::new("a\nb");
        let edits = enforce_line_ending(&snap, EndOfLineKind::CrLf);
        assert_eq!(edits, vec![Edit::replace(1, 1, "\r\n")]);
    }

    #[test]
    fn final_newline_inserted_when_missing() {
        let snap = Snapshot::new("foo");
        let next = apply(&snap, &ensure_final_newline(&snap, true, "\n"));
        assert_eq!(next, "foo\n");
    }

    #[test]
    fn trailing_blank_lines_collapse() {
        let snap = Snapshot::new("foo\n\n\n");
        let next = apply(&snap, &ensure_final_newline(&snap, true, "\n"));
        assert_eq!(next, "foo\n");
    }

    #[test]
    fn insert_final_newline_is_idempotent() {
        let snap = Snapshot::new("foo\n");
        assert!(ensure_final_newline(&snap, true, "\n").is_empty());
    }

    #[test]
    fn interior_blank_lines_survive() {
        let snap = Snapshot::new("foo\n\nbar");
        let next = apply(&snap, &ensure_final_newline(&snap, true, "\n"));
        assert_eq!(next, "foo\n\nbar\n");
    }

    #[test]
    fn all_blank_document_keeps_one_break() {
        let snap = Snapshot::new("\n\n\n");
        let next = apply(&snap, &ensure_final_newline(&snap, true, "\n"));
        assert_eq!(next, "\n");
    }

    #[test]
    fn empty_document_stays_empty() {
        let snap = Snapshot::new("");
        assert!(ensure_final_newline(&snap, true, "\n").is_empty());
    }

    #[test]
    fn strip_final_newline_removes_whole_run() {
        let snap = Snapshot::new("foo\r\n\n");
        let next = apply(&snap, &ensure_final_newline(&snap, false, "\n"));
        assert_eq!(next, "foo");
    }

    #[test]
    fn strip_final_newline_is_idempotent() {
        let snap = Snapshot::new("foo");
        assert!(ensure_final_newline(&snap, false, "\n").is_empty());
    }

    fn space_policy(indent_size: Option<usize>, tab_width: Option<usize>) -> Policy {
        Policy {
            indent_style: IndentStyle::Space,
            indent_size,
            tab_width,
            ..Policy::default()
        }
    }

    #[test]
    fn tabify_folds_spaces_into_tabs() {
        let policy = Policy {
            indent_style: IndentStyle::Tab,
            tab_width: Some(4),
            ..Policy::default()
        };
        let snap = Snapshot::new("    a\n      b\n  c\n\td");
        let next = apply(&snap, &convert_indent_style(&snap, &policy, 4));
        // 6 spaces become one tab plus two leftover spaces; 2 spaces are
        // below one tab stop and stay.
        assert_eq!(next, "\ta\n\t  b\n  c\n\td");
    }

    #[test]
    fn untabify_expands_leading_tabs() {
        let policy = space_policy(None, Some(2));
        let snap = Snapshot::new("\t\ta\n\tb\nc");
        let next = apply(&snap, &convert_indent_style(&snap, &policy, 4));
        assert_eq!(next, "    a\n  b\nc");
    }

    #[test]
    fn rescale_halves_four_space_indents() {
        // Uniform 4-per-level document converted to indent_size 2.
        let policy = space_policy(Some(2), None);
        let snap = Snapshot::new("a\n    b\n        c\n    d");
        let next = apply(&snap, &convert_indent_style(&snap, &policy, 4));
        assert_eq!(next, "a\n  b\n    c\n  d");
    }

    #[test]
    fn rescale_rounds_columns_up() {
        // Runs {4, 4, 8, 5} infer width 4; the 5-run lands on a fractional
        // column count and rounds up: ceil(5 * 2 / 4) = 3.
        let policy = space_policy(Some(2), None);
        let snap = Snapshot::new("    a\n    b\n        c\n     d");
        let next = apply(&snap, &convert_indent_style(&snap, &policy, 4));
        assert_eq!(next, "  a\n  b\n    c\n   d");
    }

    #[test]
    fn tab_expansion_joins_the_rescale() {
        // A tab line and a 4-space line sit at the same depth; both must
        // land on the 2-space target or a second run would keep shrinking.
        let policy = space_policy(Some(2), Some(4));
        let snap = Snapshot::new("\ta\n    b");
        let next = apply(&snap, &convert_indent_style(&snap, &policy, 4));
        assert_eq!(next, "  a\n  b");
    }

    #[test]
    fn rescale_skips_when_sizes_agree() {
        let policy = space_policy(Some(4), None);
        let snap = Snapshot::new("    a\n        b");
        assert!(convert_indent_style(&snap, &policy, 4).is_empty());
    }

    #[test]
    fn mixed_indentation_lines_are_skipped() {
        let policy = space_policy(Some(2), None);
        let snap = Snapshot::new("    a\n  \tb");
        let edits = convert_indent_style(&snap, &policy, 4);
        assert_eq!(edits, vec![Edit::replace(0, 4, "  ")]);
    }

    #[test]
    fn unset_style_produces_nothing() {
        let snap = Snapshot::new("    a");
        assert!(convert_indent_style(&snap, &Policy::default(), 4).is_empty());
    }
}
