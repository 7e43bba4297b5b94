pub mod header;
pub mod rows;

use std::path::Path;

use regex::Regex;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use header::{HeaderMatcher, PageHeader};
use rows::{RawRow, RowMatcher};

/// Compiled header + row matchers for one report layout.
#[derive(Debug, Clone, Default)]
pub struct ReportPatterns {
    pub header: HeaderMatcher,
    pub rows: RowMatcher,
}

impl ReportPatterns {
    /// Built-in layout, with either pattern optionally replaced.
    pub fn new(header: Option<&str>, rows: Option<&str>) -> Result<Self> {
        Ok(Self {
            header: match header {
                Some(p) => HeaderMatcher::new(p)?,
                None => HeaderMatcher::default(),
            },
            rows: match rows {
                Some(p) => RowMatcher::new(p)?,
                None => RowMatcher::default(),
            },
        })
    }
}

fn require_groups(re: &Regex, groups: &[&str]) -> Result<()> {
    let names: Vec<&str> = re.capture_names().flatten().collect();
    let missing: Vec<&str> = groups
        .iter()
        .copied()
        .filter(|g| !names.contains(g))
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(Error::Pattern(format!(
            "missing named groups: {}",
            missing.join(", ")
        )))
    }
}

/// What to do with a page that has no header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PagePolicy {
    /// Abort the whole document.
    #[default]
    Fail,
    /// Drop the page and keep going.
    Skip,
}

/// Plain text of one report, one entry per page.
#[derive(Debug, Clone)]
pub struct Document {
    pub name: String,
    pub pages: Vec<String>,
}

impl Document {
    /// Pages are separated by form feeds; blank chunks are dropped.
    pub fn from_text(name: impl Into<String>, text: &str) -> Self {
        let pages = text
            .split('\x0c')
            .filter(|p| !p.trim().is_empty())
            .map(str::to_string)
            .collect();
        Self {
            name: name.into(),
            pages,
        }
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(Self::from_text(path.display().to_string(), &text))
    }
}

/// Line breaks become spaces so multi-line rows match as one run.
pub fn flatten_page(text: &str) -> String {
    text.replace(&['\r', '\n'][..], " ").trim().to_string()
}

/// One course row with its page header attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRecord {
    pub page: usize,
    pub semester: String,
    pub year: String,
    pub college: String,
    pub department: String,
    pub course: String,
    pub a: String,
    pub b: String,
    pub c: String,
    pub d: String,
    pub f: String,
    pub total: String,
    pub gpa: String,
    pub q_drop: Option<String>,
    pub instructor: String,
}

impl PageRecord {
    fn merge(page: usize, header: &PageHeader<'_>, row: &RawRow<'_>) -> Self {
        Self {
            page,
            semester: header.semester.to_string(),
            year: header.year.to_string(),
            college: header.college.to_string(),
            department: header.department.to_string(),
            course: row.course.to_string(),
            a: row.a.to_string(),
            b: row.b.to_string(),
            c: row.c.to_string(),
            d: row.d.to_string(),
            f: row.f.to_string(),
            total: row.total.to_string(),
            gpa: row.gpa.to_string(),
            q_drop: row.q_drop.map(str::to_string),
            instructor: row.instructor.to_string(),
        }
    }
}

/// Records for a single page (1-based `page`). The header must be present.
pub fn extract_page(patterns: &ReportPatterns, page: usize, text: &str) -> Result<Vec<PageRecord>> {
    let flat = flatten_page(text);
    let header = patterns.header.find(&flat, page)?;
    let records: Vec<PageRecord> = patterns
        .rows
        .rows(&flat)
        .map(|row| PageRecord::merge(page, &header, &row))
        .collect();
    debug!(page, rows = records.len(), department = header.department, "page extracted");
    Ok(records)
}

/// All records of a document in page order.
pub fn extract_document(
    patterns: &ReportPatterns,
    doc: &Document,
    policy: PagePolicy,
) -> Result<Vec<PageRecord>> {
    let mut records = Vec::new();
    for (i, text) in doc.pages.iter().enumerate() {
        match extract_page(patterns, i + 1, text) {
            Ok(page_records) => records.extend(page_records),
            Err(Error::HeaderNotFound { page }) if policy == PagePolicy::Skip => {
                warn!(document = %doc.name, page, "no header, page skipped");
            }
            Err(e) => return Err(e),
        }
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture(name: &str) -> Document {
        let text = std::fs::read_to_string(format!("tests/fixtures/{}.txt", name)).unwrap();
        Document::from_text(name, &text)
    }

    const PAGE: &str = "GRADE DISTRIBUTION REPORT FOR FALL 2024\nCOLLEGE: COLLEGE OF SCIENCE\n\
        DEPARTMENT: MATHEMATICS\nTOTAL SECTION A B C D F TOTAL GPA I S U Q X TOTAL INSTRUCTOR\n\
        MATH-151-501 10 5 2 1 0 18 3.210 0 0 0 2 0 18 SMITH, JOHN A\n";

    #[test]
    fn scenario_row() {
        let records = extract_page(&ReportPatterns::default(), 1, PAGE).unwrap();
        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.course, "MATH-151");
        assert_eq!(r.semester, "FALL");
        assert_eq!(r.year, "2024");
        assert_eq!(r.college, "COLLEGE OF SCIENCE");
        assert_eq!(r.department, "MATHEMATICS");
        assert_eq!(r.q_drop.as_deref(), Some("2"));
        assert_eq!(r.instructor, "SMITH, JOHN A");
    }

    #[test]
    fn header_only_page_is_empty() {
        let page = "REPORT FOR SPRING 2025 COLLEGE: ENGINEERING DEPARTMENT: AEROSPACE TOTAL SECTIONS";
        let records = extract_page(&ReportPatterns::default(), 1, page).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn every_row_gets_the_page_header() {
        let doc = fixture("engr_fall");
        assert_eq!(doc.pages.len(), 3);
        let records = extract_document(&ReportPatterns::default(), &doc, PagePolicy::Fail).unwrap();
        assert_eq!(records.len(), 6);

        let page1: Vec<_> = records.iter().filter(|r| r.page == 1).collect();
        assert_eq!(page1.len(), 4);
        assert!(page1.iter().all(|r| r.department == "AEROSPACE ENGINEERING"));
        let page3: Vec<_> = records.iter().filter(|r| r.page == 3).collect();
        assert_eq!(page3.len(), 2);
        assert!(page3.iter().all(|r| r.department == "COMPUTER SCIENCE & ENGINEERING"));

        let courses: Vec<&str> = records.iter().map(|r| r.course.as_str()).collect();
        assert_eq!(
            courses,
            ["AERO-201", "AERO-201", "AERO-301", "AERO-302", "CSCE-121", "CSCE-221"]
        );
    }

    #[test]
    fn missing_header_fails_document() {
        let doc = Document::from_text("bad", "FOR FALL 2024 COLLEGE: A DEPARTMENT: B TOTAL S\x0cno header here");
        let err = extract_document(&ReportPatterns::default(), &doc, PagePolicy::Fail).unwrap_err();
        assert!(matches!(err, Error::HeaderNotFound { page: 2 }));
    }

    #[test]
    fn dotted_college_does_not_fail_document() {
        let doc = Document::from_text(
            "bush",
            "GRADE DISTRIBUTION REPORT FOR FALL 2024\nCOLLEGE: BUSH SCHOOL OF GOVT. & PUBLIC SVC\n\
             DEPARTMENT: PUBLIC SERVICE & ADMIN.\nTOTAL SECTION A B C D F TOTAL GPA I S U Q X TOTAL INSTRUCTOR\n\
             PSAA-601-600 12 3 0 0 0 15 3.800 0 0 0 0 0 15 DOE, JANE\n",
        );
        let records = extract_document(&ReportPatterns::default(), &doc, PagePolicy::Fail).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].college, "BUSH SCHOOL OF GOVT. & PUBLIC SVC");
        assert_eq!(records[0].department, "PUBLIC SERVICE & ADMIN.");
        assert_eq!(records[0].instructor, "DOE, JANE");
    }

    #[test]
    fn missing_header_skipped_by_policy() {
        let doc = Document::from_text(
            "skip",
            "no header MATH-151-501 1 1 1 1 1 5 2.000 0 0 0 0 0 5 X, Y\x0c\
             FOR FALL 2024 COLLEGE: A DEPARTMENT: B TOTAL S MATH-152-501 1 1 1 1 1 5 2.000 0 0 0 0 0 5 Z, W",
        );
        let records = extract_document(&ReportPatterns::default(), &doc, PagePolicy::Skip).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].page, 2);
        assert_eq!(records[0].instructor, "Z, W");
    }

    #[test]
    fn trailing_form_feed_is_not_a_page() {
        let doc = Document::from_text("d", "page one\x0cpage two\x0c\n");
        assert_eq!(doc.pages.len(), 2);
    }

    #[test]
    fn flatten_joins_lines() {
        assert_eq!(flatten_page("a\r\nb\nc\n"), "a  b c");
    }
}
