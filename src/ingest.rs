use std::thread;
use std::time::Duration;

use rusqlite::Connection;
use tracing::{info, warn};

use crate::db::{self, ConflictKey};
use crate::error::Result;
use crate::normalize::{self, IngestRecord};
use crate::parser::{self, Document, PagePolicy, ReportPatterns};

/// Retries for a whole batch when SQLite reports busy/locked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_millis(250),
        }
    }
}

pub fn with_retry<T>(policy: RetryPolicy, mut op: impl FnMut() -> Result<T>) -> Result<T> {
    let mut attempt = 1;
    loop {
        match op() {
            Err(e) if e.is_transient() && attempt < policy.attempts => {
                let wait = policy.backoff * attempt;
                warn!(attempt, ?wait, error = %e, "transient storage error, retrying");
                thread::sleep(wait);
                attempt += 1;
            }
            other => return other,
        }
    }
}

/// Extraction + normalization. Touches nothing but its inputs.
pub fn prepare_document(
    patterns: &ReportPatterns,
    doc: &Document,
    policy: PagePolicy,
) -> Result<Vec<IngestRecord>> {
    let records = parser::extract_document(patterns, doc, policy)?;
    normalize::normalize_all(&records)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentReport {
    pub name: String,
    pub records: usize,
    pub inserted: usize,
}

/// Stores one document's records as a single batch.
pub fn store_document(
    conn: &Connection,
    name: &str,
    records: &[IngestRecord],
    key: &ConflictKey,
    retry: RetryPolicy,
) -> Result<DocumentReport> {
    if records.is_empty() {
        info!(document = name, "no course rows, nothing to store");
    }
    let inserted = with_retry(retry, || db::upsert_courses(conn, records, key))?;
    Ok(DocumentReport {
        name: name.to_string(),
        records: records.len(),
        inserted,
    })
}

pub struct Ingestor<'a> {
    pub patterns: &'a ReportPatterns,
    pub page_policy: PagePolicy,
    pub key: &'a ConflictKey,
    pub retry: RetryPolicy,
}

impl Ingestor<'_> {
    pub fn ingest(&self, conn: &Connection, doc: &Document) -> Result<DocumentReport> {
        let records = prepare_document(self.patterns, doc, self.page_policy)?;
        store_document(conn, &doc.name, &records, self.key, self.retry)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::error::Error;

    const DOC: &str = "GRADE DISTRIBUTION REPORT FOR FALL 2024\nCOLLEGE: COLLEGE OF SCIENCE\n\
        DEPARTMENT: MATHEMATICS\nTOTAL SECTION A B C D F TOTAL GPA I S U Q X TOTAL INSTRUCTOR\n\
        MATH-151-501 10 5 2 1 0 18 3.210 0 0 0 2 0 18 SMITH, JOHN A\n";

    fn busy() -> Error {
        Error::Storage(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        ))
    }

    fn fast() -> RetryPolicy {
        RetryPolicy {
            attempts: 3,
            backoff: Duration::from_millis(1),
        }
    }

    #[test]
    fn retries_transient_errors() {
        let calls = Cell::new(0);
        let out = with_retry(fast(), || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(busy())
            } else {
                Ok(7)
            }
        })
        .unwrap();
        assert_eq!(out, 7);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn gives_up_after_attempts() {
        let calls = Cell::new(0);
        let err = with_retry(fast(), || -> Result<()> {
            calls.set(calls.get() + 1);
            Err(busy())
        })
        .unwrap_err();
        assert!(err.is_transient());
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn does_not_retry_other_errors() {
        let calls = Cell::new(0);
        let _ = with_retry(fast(), || -> Result<()> {
            calls.set(calls.get() + 1);
            Err(Error::HeaderNotFound { page: 1 })
        });
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn same_record_in_two_documents_is_stored_once() {
        let conn = db::memory();
        let patterns = ReportPatterns::default();
        let key = ConflictKey::default();
        let ingestor = Ingestor {
            patterns: &patterns,
            page_policy: PagePolicy::Fail,
            key: &key,
            retry: fast(),
        };

        let first = ingestor.ingest(&conn, &Document::from_text("a.txt", DOC)).unwrap();
        let second = ingestor.ingest(&conn, &Document::from_text("b.txt", DOC)).unwrap();
        assert_eq!((first.records, first.inserted), (1, 1));
        assert_eq!((second.records, second.inserted), (1, 0));
        assert_eq!(db::course_count(&conn).unwrap(), 1);
        assert_eq!(db::professor_count(&conn).unwrap(), 1);
    }

    #[test]
    fn fixture_document_end_to_end() {
        let conn = db::memory();
        let text = std::fs::read_to_string("tests/fixtures/engr_fall.txt").unwrap();
        let doc = Document::from_text("engr_fall", &text);
        let patterns = ReportPatterns::default();
        let key = ConflictKey::default();
        let ingestor = Ingestor {
            patterns: &patterns,
            page_policy: PagePolicy::Fail,
            key: &key,
            retry: fast(),
        };

        let report = ingestor.ingest(&conn, &doc).unwrap();
        assert_eq!(report.records, 6);
        assert_eq!(report.inserted, 6);
        // SMITH, JOHN A teaches on two pages
        assert_eq!(db::professor_count(&conn).unwrap(), 5);

        let drops: u32 = conn
            .query_row(
                "SELECT q_drop FROM courses WHERE course = 'AERO-302'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(drops, 0);

        let again = ingestor.ingest(&conn, &doc).unwrap();
        assert_eq!(again.inserted, 0);
    }

    #[test]
    fn extraction_errors_store_nothing() {
        let conn = db::memory();
        let bad = DOC.replace("3.210", "3.2100");
        let patterns = ReportPatterns::default();
        // "3.2100" no longer matches the GPA column, so the row is not a row
        let records = prepare_document(&patterns, &Document::from_text("x", &bad), PagePolicy::Fail).unwrap();
        assert!(records.is_empty());

        let headerless = Document::from_text("y", "MATH-151-501 10 5 2 1 0 18 3.210 0 0 0 2 0 18 SMITH, JOHN A");
        let key = ConflictKey::default();
        let ingestor = Ingestor {
            patterns: &patterns,
            page_policy: PagePolicy::Fail,
            key: &key,
            retry: fast(),
        };
        assert!(matches!(
            ingestor.ingest(&conn, &headerless).unwrap_err(),
            Error::HeaderNotFound { page: 1 }
        ));
        assert_eq!(db::course_count(&conn).unwrap(), 0);
    }

    #[test]
    fn concurrent_workers_share_one_store() {
        let path = std::env::temp_dir().join(format!("grade_loader_{}.sqlite", std::process::id()));
        let _ = std::fs::remove_file(&path);
        db::init_schema(&db::connect(&path).unwrap()).unwrap();

        let text = std::fs::read_to_string("tests/fixtures/engr_fall.txt").unwrap();
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let path = path.clone();
                let text = text.clone();
                thread::spawn(move || {
                    let conn = db::connect(&path).unwrap();
                    let patterns = ReportPatterns::default();
                    let key = ConflictKey::default();
                    let ingestor = Ingestor {
                        patterns: &patterns,
                        page_policy: PagePolicy::Fail,
                        key: &key,
                        retry: RetryPolicy::default(),
                    };
                    let doc = Document::from_text(format!("worker-{}", i), &text);
                    ingestor.ingest(&conn, &doc).unwrap().inserted
                })
            })
            .collect();
        let inserted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

        let conn = db::connect(&path).unwrap();
        assert_eq!(inserted, 6);
        assert_eq!(db::course_count(&conn).unwrap(), 6);
        assert_eq!(db::professor_count(&conn).unwrap(), 5);
        drop(conn);
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{}", path.display(), suffix));
        }
    }
}
