use crate::snapshot::Snapshot;

const MIN_WIDTH: usize = 2;
const MAX_WIDTH: usize = 8;

/// Infers the indent width already in use by scoring candidate widths 2..8
/// against the document's leading-space runs. Each line whose leading run is
/// spaces only, followed by a non-space non-tab character, adds its run
/// length to every candidate width that evenly divides it. The highest
/// cumulative score wins; ties go to the larger width. Returns `default`
/// when no line yields evidence.
pub fn analyze_indent_width(snapshot: &Snapshot, default: usize) -> usize {
    let mut scores = [0usize; MAX_WIDTH + 1];

    for line in snapshot.lines() {
        let Some(spaces) = leading_space_run(line.text()) else {
            continue;
        };
        for width in MIN_WIDTH..=MAX_WIDTH {
            if width > spaces {
                break;
            }
            if spaces % width == 0 {
                scores[width] += spaces;
            }
        }
    }

    let max = scores[MIN_WIDTH..=MAX_WIDTH]
        .iter()
        .copied()
        .max()
        .unwrap_or(0);
    if max == 0 {
        return default;
    }

    for width in (MIN_WIDTH..=MAX_WIDTH).rev() {
        if scores[width] == max {
            return width;
        }
    }

    default
}

/// Length of the line's leading space run, if the run consists solely of
/// spaces and the first character after it is neither space nor tab. Lines
/// with tab or mixed indentation contribute no evidence.
pub(crate) fn leading_space_run(text: &str) -> Option<usize> {
    let mut chars = text.chars();
    let mut run = 0usize;
    for ch in chars.by_ref() {
        match ch {
            ' ' => run += 1,
            '\t' => return None,
            _ => return (run > 0).then_some(run),
        }
    }
    // Blank or whitespace-only line: no character follows the run.
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(lines: &[&str]) -> Snapshot {
        Snapshot::new(lines.join("\n"))
    }

    #[test]
    fn tie_prefers_larger_width() {
        // Runs of {4, 4, 8}: widths 2 and 4 both score 16; 4 wins.
        let snapshot = snap(&["    a", "    b", "        c"]);
        assert_eq!(analyze_indent_width(&snapshot, 2), 4);
    }

    #[test]
    fn non_dividing_run_feeds_only_smaller_widths() {
        // Adding a 6-run breaks the tie: width 2 scores 22 against 16.
        let snapshot = snap(&["    a", "    b", "        c", "      d"]);
        assert_eq!(analyze_indent_width(&snapshot, 4), 2);
    }

    #[test]
    fn clear_winner() {
        let snapshot = snap(&["   a", "   b", "      c"]);
        assert_eq!(analyze_indent_width(&snapshot, 4), 3);
    }

    #[test]
    fn no_evidence_returns_default() {
        let snapshot = snap(&["plain", "lines", "only"]);
        assert_eq!(analyze_indent_width(&snapshot, 7), 7);
    }

    #[test]
    fn empty_document_returns_default() {
        assert_eq!(analyze_indent_width(&Snapshot::new(""), 4), 4);
    }

    #[test]
    fn tab_and_mixed_lines_are_excluded() {
        let snapshot = snap(&["\t\ta", "  \tb", "\t c"]);
        assert_eq!(analyze_indent_width(&snapshot, 4), 4);
    }

    #[test]
    fn whitespace_only_lines_are_excluded() {
        let snapshot = snap(&["    ", "  x"]);
        assert_eq!(analyze_indent_width(&snapshot, 4), 2);
    }

    #[test]
    fn single_space_run_scores_nothing() {
        // Width candidates start at 2, so a 1-space run is silent.
        let snapshot = snap(&[" a"]);
        assert_eq!(analyze_indent_width(&snapshot, 4), 4);
    }
}
