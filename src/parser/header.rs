use regex::Regex;

use crate::error::{Error, Result};

/// Semester/year, college and department of a report page.
pub const DEFAULT_HEADER_PATTERN: &str = concat!(
    r"(?is)\bFOR\s*(?P<semester>[A-Z]+)\s*(?P<year>\d{4})\s*.*?\s*",
    r"COLLEGE:\s*(?P<college>[A-Z &,./-]+?)\s+",
    r"DEPARTMENT:\s*(?P<department>[A-Z &,./-]+?)\s+TOTAL S",
);

const GROUPS: [&str; 4] = ["semester", "year", "college", "department"];

/// Header fields exactly as they appear on the page, trimmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageHeader<'t> {
    pub semester: &'t str,
    pub year: &'t str,
    pub college: &'t str,
    pub department: &'t str,
}

#[derive(Debug, Clone)]
pub struct HeaderMatcher {
    re: Regex,
}

impl HeaderMatcher {
    pub fn new(pattern: &str) -> Result<Self> {
        let re = Regex::new(pattern)?;
        super::require_groups(&re, &GROUPS)?;
        Ok(Self { re })
    }

    /// First header block on the page. `page` is only used for the error.
    pub fn find<'t>(&self, text: &'t str, page: usize) -> Result<PageHeader<'t>> {
        let caps = self
            .re
            .captures(text)
            .ok_or(Error::HeaderNotFound { page })?;
        let get = |name| caps.name(name).map_or("", |m| m.as_str().trim());
        Ok(PageHeader {
            semester: get("semester"),
            year: get("year"),
            college: get("college"),
            department: get("department"),
        })
    }
}

impl Default for HeaderMatcher {
    fn default() -> Self {
        Self {
            re: Regex::new(DEFAULT_HEADER_PATTERN).expect("built-in header pattern"),
        }
    }
}
