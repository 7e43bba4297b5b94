use std::fmt;
use std::str::FromStr;

use itertools::Itertools;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Serialize, Serializer};

use crate::error::{Error, Result};
use crate::parser::PageRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Semester {
    Spring,
    Summer,
    Fall,
    Winter,
}

impl Semester {
    pub fn as_str(self) -> &'static str {
        match self {
            Semester::Spring => "SPRING",
            Semester::Summer => "SUMMER",
            Semester::Fall => "FALL",
            Semester::Winter => "WINTER",
        }
    }
}

impl FromStr for Semester {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_uppercase().as_str() {
            "SPRING" => Ok(Semester::Spring),
            "SUMMER" => Ok(Semester::Summer),
            "FALL" => Ok(Semester::Fall),
            "WINTER" => Ok(Semester::Winter),
            _ => Err(coercion("semester", s)),
        }
    }
}

impl fmt::Display for Semester {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ToSql for Semester {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for Semester {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: Error| FromSqlError::Other(Box::new(e)))
    }
}

/// GPA with exactly three decimals, held as thousandths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Gpa(u32);

impl Gpa {
    pub fn from_thousandths(milli: u32) -> Self {
        Gpa(milli)
    }

    pub fn thousandths(self) -> u32 {
        self.0
    }

    pub fn as_f64(self) -> f64 {
        f64::from(self.0) / 1000.0
    }
}

impl FromStr for Gpa {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (int, frac) = s.split_once('.').ok_or_else(|| coercion("gpa", s))?;
        let digits = |p: &str| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit());
        if !digits(int) || frac.len() != 3 || !digits(frac) {
            return Err(coercion("gpa", s));
        }
        let int: u32 = int.parse().map_err(|_| coercion("gpa", s))?;
        let frac: u32 = frac.parse().map_err(|_| coercion("gpa", s))?;
        int.checked_mul(1000)
            .and_then(|v| v.checked_add(frac))
            .map(Gpa)
            .ok_or_else(|| coercion("gpa", s))
    }
}

impl fmt::Display for Gpa {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:03}", self.0 / 1000, self.0 % 1000)
    }
}

impl Serialize for Gpa {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl ToSql for Gpa {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_f64()))
    }
}

impl FromSql for Gpa {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let v = match value {
            ValueRef::Integer(i) => i as f64,
            _ => value.as_f64()?,
        };
        if !(0.0..=f64::from(u32::MAX) / 1000.0).contains(&v) {
            return Err(FromSqlError::OutOfRange(v as i64));
        }
        Ok(Gpa((v * 1000.0).round() as u32))
    }
}

/// A course fact ready for storage; field names are the `courses` columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestRecord {
    pub course: String,
    pub professor: String,
    pub semester: Semester,
    pub year: u16,
    pub college: String,
    pub department: String,
    pub a_count: u32,
    pub b_count: u32,
    pub c_count: u32,
    pub d_count: u32,
    pub f_count: u32,
    pub total_count: u32,
    /// A row printed without a Q column counts as zero drops.
    pub q_drop: u32,
    pub gpa: Gpa,
}

fn coercion(field: &'static str, value: &str) -> Error {
    Error::TypeCoercion {
        field,
        value: value.to_string(),
    }
}

fn count(field: &'static str, value: &str) -> Result<u32> {
    value.trim().parse().map_err(|_| coercion(field, value))
}

/// Uppercase with whitespace runs collapsed, so names compare exactly.
fn upper(value: &str) -> String {
    value.split_whitespace().join(" ").to_uppercase()
}

pub fn normalize(record: &PageRecord) -> Result<IngestRecord> {
    Ok(IngestRecord {
        course: upper(&record.course),
        professor: upper(&record.instructor),
        semester: record.semester.parse()?,
        year: record
            .year
            .trim()
            .parse()
            .map_err(|_| coercion("year", &record.year))?,
        college: upper(&record.college),
        department: upper(&record.department),
        a_count: count("a_count", &record.a)?,
        b_count: count("b_count", &record.b)?,
        c_count: count("c_count", &record.c)?,
        d_count: count("d_count", &record.d)?,
        f_count: count("f_count", &record.f)?,
        total_count: count("total_count", &record.total)?,
        q_drop: match &record.q_drop {
            Some(q) => count("q_drop", q)?,
            None => 0,
        },
        gpa: record.gpa.trim().parse()?,
    })
}

/// Normalizes a whole document; the first bad field fails the lot.
pub fn normalize_all(records: &[PageRecord]) -> Result<Vec<IngestRecord>> {
    records.iter().map(normalize).collect()
}
