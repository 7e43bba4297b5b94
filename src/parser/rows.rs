use std::iter::Peekable;

use regex::{Matches, Regex};

use crate::error::Result;

/// Start of a course row: `PREFIX-NNN-SSS`.
pub const DEFAULT_ANCHOR_PATTERN: &str = r"\b[A-Z]+-\d{3}-\d{3}\b";

/// Applied to one anchor-delimited segment. `I S U`, `X` and the repeated
/// total are positional only; `Q` may be missing from a row.
pub const DEFAULT_ROW_PATTERN: &str = r"(?x)
    ^(?P<course>[A-Z]+-\d{3})-\d{3}\s+
    (?P<A>\d+)\s+(?P<B>\d+)\s+(?P<C>\d+)\s+
    (?P<D>\d+)\s+(?P<F>\d+)\s+
    (?P<total>\d+)\s+(?P<gpa>\d\.\d{3})\s+
    (?:\d+\s+){3}
    (?:(?P<Q>\d+)\s+)?
    \d+\s+
    \d+\s+
    (?P<instructor>[A-Za-z.,\s'\-]+)
";

const GROUPS: [&str; 10] = [
    "course", "A", "B", "C", "D", "F", "total", "gpa", "Q", "instructor",
];

/// One course row's captured fields, still as text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawRow<'t> {
    pub course: &'t str,
    pub a: &'t str,
    pub b: &'t str,
    pub c: &'t str,
    pub d: &'t str,
    pub f: &'t str,
    pub total: &'t str,
    pub gpa: &'t str,
    pub q_drop: Option<&'t str>,
    pub instructor: &'t str,
}

#[derive(Debug, Clone)]
pub struct RowMatcher {
    anchor: Regex,
    row: Regex,
}

impl RowMatcher {
    pub fn new(row_pattern: &str) -> Result<Self> {
        let row = Regex::new(row_pattern)?;
        super::require_groups(&row, &GROUPS)?;
        Ok(Self {
            anchor: Regex::new(DEFAULT_ANCHOR_PATTERN)?,
            row,
        })
    }

    /// Lazily yields every row on the page in document order. Calling it
    /// again starts a fresh scan.
    pub fn rows<'r, 't>(&'r self, text: &'t str) -> Rows<'r, 't> {
        Rows {
            matcher: self,
            text,
            anchors: self.anchor.find_iter(text).peekable(),
        }
    }

    fn parse_segment<'t>(&self, segment: &'t str) -> Option<RawRow<'t>> {
        let caps = self.row.captures(segment)?;
        let get = |name| caps.name(name).map_or("", |m| m.as_str());
        let instructor = get("instructor").trim();
        if instructor.is_empty() {
            return None;
        }
        Some(RawRow {
            course: get("course"),
            a: get("A"),
            b: get("B"),
            c: get("C"),
            d: get("D"),
            f: get("F"),
            total: get("total"),
            gpa: get("gpa"),
            q_drop: caps.name("Q").map(|m| m.as_str()),
            instructor,
        })
    }
}

impl Default for RowMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_ROW_PATTERN).expect("built-in row pattern")
    }
}

pub struct Rows<'r, 't> {
    matcher: &'r RowMatcher,
    text: &'t str,
    anchors: Peekable<Matches<'r, 't>>,
}

impl<'r, 't> Iterator for Rows<'r, 't> {
    type Item = RawRow<'t>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let start = self.anchors.next()?.start();
            // The instructor name stops where the next row begins.
            let end = self
                .anchors
                .peek()
                .map_or(self.text.len(), |m| m.start());
            if let Some(row) = self.matcher.parse_segment(&self.text[start..end]) {
                return Some(row);
            }
        }
    }
}
