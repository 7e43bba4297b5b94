use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use itertools::Itertools;
use rusqlite::{params, Connection, Transaction, TransactionBehavior};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::normalize::IngestRecord;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub fn connect(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS professors (
            id              INTEGER PRIMARY KEY,
            name            TEXT UNIQUE NOT NULL,
            avg_rating      REAL,
            avg_difficulty  REAL,
            num_ratings     INTEGER,
            rmp_link        TEXT,
            rmp_updated_at  TEXT,
            rmp_checked_at  TEXT,
            created_at      TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS courses (
            id            INTEGER PRIMARY KEY,
            course        TEXT NOT NULL,
            professor_id  INTEGER NOT NULL REFERENCES professors(id),
            semester      TEXT NOT NULL CHECK(semester IN ('SPRING','SUMMER','FALL','WINTER')),
            year          INTEGER NOT NULL,
            college       TEXT NOT NULL,
            department    TEXT NOT NULL,
            a_count       INTEGER NOT NULL,
            b_count       INTEGER NOT NULL,
            c_count       INTEGER NOT NULL,
            d_count       INTEGER NOT NULL,
            f_count       INTEGER NOT NULL,
            total_count   INTEGER NOT NULL,
            q_drop        INTEGER NOT NULL DEFAULT 0,
            gpa           REAL NOT NULL,
            UNIQUE(course, semester, year, professor_id)
        );
        CREATE INDEX IF NOT EXISTS idx_courses_professor ON courses(professor_id);
        CREATE INDEX IF NOT EXISTS idx_courses_department ON courses(department);
        ",
    )?;
    // databases created before lookup attempts were tracked
    add_missing_column(conn, "professors", "rmp_checked_at", "TEXT")?;
    Ok(())
}

fn add_missing_column(conn: &Connection, table: &str, column: &str, decl: &str) -> Result<()> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<Vec<_>, _>>()?;
    if !columns.iter().any(|c| c == column) {
        conn.execute_batch(&format!("ALTER TABLE {} ADD COLUMN {} {}", table, column, decl))?;
        info!(table, column, "column added");
    }
    Ok(())
}

pub fn course_count(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row("SELECT COUNT(*) FROM courses", [], |row| row.get(0))?)
}

pub fn professor_count(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row("SELECT COUNT(*) FROM professors", [], |row| row.get(0))?)
}

// ── Conflict key ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyColumn {
    Course,
    Semester,
    Year,
    Professor,
}

/// Columns of the `UNIQUE(..)` constraint on `courses`.
const UNIQUE_COLUMNS: [KeyColumn; 4] = [
    KeyColumn::Course,
    KeyColumn::Semester,
    KeyColumn::Year,
    KeyColumn::Professor,
];

impl KeyColumn {
    fn column(self) -> &'static str {
        match self {
            KeyColumn::Course => "course",
            KeyColumn::Semester => "semester",
            KeyColumn::Year => "year",
            KeyColumn::Professor => "professor_id",
        }
    }
}

fn config_error(msg: String) -> Error {
    Error::Config(config::ConfigError::Message(msg))
}

impl FromStr for KeyColumn {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "course" => Ok(KeyColumn::Course),
            "semester" => Ok(KeyColumn::Semester),
            "year" => Ok(KeyColumn::Year),
            "professor" | "professor_id" => Ok(KeyColumn::Professor),
            other => Err(config_error(format!("invalid conflict column {:?}", other))),
        }
    }
}

/// Columns that identify an already-stored course fact. SQLite only accepts
/// an `ON CONFLICT` target that names a unique constraint, so the key must
/// cover exactly the columns of `UNIQUE_COLUMNS`, in any order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictKey(Vec<KeyColumn>);

impl ConflictKey {
    pub fn new(columns: impl IntoIterator<Item = KeyColumn>) -> Result<Self> {
        let columns: Vec<KeyColumn> = columns.into_iter().unique().collect();
        let missing: Vec<&str> = UNIQUE_COLUMNS
            .iter()
            .filter(|c| !columns.contains(c))
            .map(|c| c.column())
            .collect();
        if !missing.is_empty() {
            return Err(config_error(format!(
                "conflict key must match the courses unique constraint, missing {}",
                missing.join(", ")
            )));
        }
        Ok(Self(columns))
    }

    pub fn parse<S: AsRef<str>>(names: &[S]) -> Result<Self> {
        let columns = names
            .iter()
            .map(|n| n.as_ref().parse())
            .collect::<Result<Vec<KeyColumn>>>()?;
        Self::new(columns)
    }

    fn insert_sql(&self) -> String {
        format!(
            "INSERT INTO courses
             (course, professor_id, semester, year, college, department,
              a_count, b_count, c_count, d_count, f_count, total_count, q_drop, gpa)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14)
             ON CONFLICT({}) DO NOTHING",
            self.0.iter().map(|c| c.column()).join(", ")
        )
    }
}

impl Default for ConflictKey {
    fn default() -> Self {
        Self(UNIQUE_COLUMNS.to_vec())
    }
}

// ── Professors ──

/// Maps each distinct display name to its professor id, creating rows for
/// names not seen before. Safe to call repeatedly with overlapping names.
pub fn resolve_professors<'a>(
    conn: &Connection,
    names: impl IntoIterator<Item = &'a str>,
) -> Result<HashMap<String, i64>> {
    let mut insert = conn.prepare_cached("INSERT OR IGNORE INTO professors (name) VALUES (?1)")?;
    let mut lookup = conn.prepare_cached("SELECT id FROM professors WHERE name = ?1")?;
    let mut ids = HashMap::new();
    let mut created = 0;
    for name in names.into_iter().unique() {
        created += insert.execute([name])?;
        let id: i64 = lookup.query_row([name], |row| row.get(0))?;
        ids.insert(name.to_string(), id);
    }
    debug!(names = ids.len(), created, "professors resolved");
    Ok(ids)
}

pub struct ProfessorRow {
    pub id: i64,
    pub name: String,
}

/// Professors without rating data. Never-looked-up names come first, then the
/// least recently tried, so a limited run moves past names that found no match.
pub fn professors_missing_rating(conn: &Connection, limit: Option<usize>) -> Result<Vec<ProfessorRow>> {
    let sql = format!(
        "SELECT id, name FROM professors
         WHERE rmp_updated_at IS NULL
         ORDER BY rmp_checked_at IS NOT NULL, rmp_checked_at, id{}",
        match limit {
            Some(n) => format!(" LIMIT {}", n),
            None => String::new(),
        }
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], |row| {
            Ok(ProfessorRow {
                id: row.get(0)?,
                name: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rating {
    pub avg_rating: Option<f64>,
    pub avg_difficulty: Option<f64>,
    pub num_ratings: i64,
    pub link: String,
}

pub fn update_professor_rating(conn: &Connection, professor_id: i64, rating: &Rating) -> Result<bool> {
    let n = conn.execute(
        "UPDATE professors
         SET avg_rating = ?1, avg_difficulty = ?2, num_ratings = ?3, rmp_link = ?4,
             rmp_updated_at = datetime('now'), rmp_checked_at = datetime('now')
         WHERE id = ?5",
        params![
            rating.avg_rating,
            rating.avg_difficulty,
            rating.num_ratings,
            rating.link,
            professor_id
        ],
    )?;
    Ok(n == 1)
}

/// Records a lookup that stored nothing.
pub fn mark_rating_checked(conn: &Connection, professor_id: i64) -> Result<bool> {
    let n = conn.execute(
        "UPDATE professors SET rmp_checked_at = datetime('now') WHERE id = ?1",
        [professor_id],
    )?;
    Ok(n == 1)
}

// ── Courses ──

fn validate(records: &[IngestRecord]) -> Result<()> {
    for (index, r) in records.iter().enumerate() {
        let missing: Vec<&'static str> = [
            ("course", &r.course),
            ("professor", &r.professor),
            ("college", &r.college),
            ("department", &r.department),
        ]
        .into_iter()
        .filter(|(_, v)| v.trim().is_empty())
        .map(|(name, _)| name)
        .collect();
        if !missing.is_empty() {
            return Err(Error::Validation { index, missing });
        }
    }
    Ok(())
}

/// Inserts the batch in one transaction, skipping records whose conflict key
/// is already stored. Returns how many course rows the batch added.
pub fn upsert_courses(conn: &Connection, records: &[IngestRecord], key: &ConflictKey) -> Result<usize> {
    validate(records)?;
    if records.is_empty() {
        return Ok(0);
    }

    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
    let before = course_count(&tx)?;
    let ids = resolve_professors(&tx, records.iter().map(|r| r.professor.as_str()))?;

    let mut attempted = 0;
    {
        let mut stmt = tx.prepare(&key.insert_sql())?;
        for r in records {
            // every name was resolved above
            let professor_id = ids[&r.professor];
            attempted += stmt.execute(params![
                r.course, professor_id, r.semester, r.year, r.college, r.department,
                r.a_count, r.b_count, r.c_count, r.d_count, r.f_count, r.total_count,
                r.q_drop, r.gpa,
            ])?;
        }
    }

    let after = course_count(&tx)?;
    tx.commit()?;

    let inserted = usize::try_from(after - before).unwrap_or(0);
    if inserted != attempted {
        warn!(inserted, attempted, "course count moved differently than the batch inserts");
    }
    info!(
        records = records.len(),
        inserted,
        skipped = records.len().saturating_sub(inserted),
        "course batch stored"
    );
    Ok(inserted)
}

#[cfg(test)]
pub(crate) fn memory() -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    conn.execute_batch("PRAGMA foreign_keys=ON;").unwrap();
    init_schema(&conn).unwrap();
    conn
}
