use serde::{Deserialize, Serialize};

const CORRECT_OPEN: &str = "<span class=\"c\">";
const INCORRECT_OPEN: &str = "<span class=\"i\">";
const CLOSE: &str = "</span>";

/// One aligned (or unaligned) word of a graded submission.
///
/// On the wire this is a three element array `[text, start, flag]`. `start`
/// counts characters, not bytes. A non-negative `flag` marks text that lines
/// up with the reference translation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(String, usize, i64)", into = "(String, usize, i64)")]
pub struct MatchSpan {
    pub text: String,
    pub start: usize,
    pub flag: i64,
}

impl MatchSpan {
    pub fn new(text: impl Into<String>, start: usize, flag: i64) -> Self {
        Self {
            text: text.into(),
            start,
            flag,
        }
    }

    pub fn is_correct(&self) -> bool {
        self.flag >= 0
    }

    /// Character offset one past the matched text.
    pub fn end(&self) -> usize {
        self.start.saturating_add(self.text.chars().count())
    }
}

impl From<(String, usize, i64)> for MatchSpan {
    fn from((text, start, flag): (String, usize, i64)) -> Self {
        Self { text, start, flag }
    }
}

impl From<MatchSpan> for (String, usize, i64) {
    fn from(span: MatchSpan) -> Self {
        (span.text, span.start, span.flag)
    }
}

/// Annotates `source` with correct/incorrect markers for each span.
///
/// Spans must be ascending and non-overlapping. Offsets past the end of
/// `source` are clamped and a span starting before the cursor copies no gap,
/// so inconsistent input yields odd markup but never panics.
pub fn format_matches(spans: &[MatchSpan], source: &str) -> String {
    let bounds = char_boundaries(source);
    let chars = bounds.len() - 1;
    let slice = |from: usize, to: usize| char_slice(source, &bounds, from, to);

    let mut out = String::with_capacity(source.len() + spans.len() * 24);
    let mut cursor = 0usize;
    for span in spans {
        out.push_str(slice(cursor, span.start));
        out.push_str(if span.is_correct() {
            CORRECT_OPEN
        } else {
            INCORRECT_OPEN
        });
        let end = span.end();
        out.push_str(slice(span.start, end));
        out.push_str(CLOSE);
        cursor = end;
    }
    out.push_str(slice(cursor, chars));
    out
}

fn char_slice<'a>(source: &'a str, bounds: &[usize], from: usize, to: usize) -> &'a str {
    let chars = bounds.len() - 1;
    let from = from.min(chars);
    let to = to.min(chars);
    if from >= to {
        ""
    } else {
        &source[bounds[from]..bounds[to]]
    }
}

// Byte offset of every char start, plus the total length as a sentinel.
fn char_boundaries(source: &str) -> Vec<usize> {
    let mut bounds: Vec<usize> = source.char_indices().map(|(idx, _)| idx).collect();
    bounds.push(source.len());
    bounds
}
