use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    /// No report header on a page; rows there cannot be attributed to a department.
    #[error("header metadata not found on page {page}")]
    HeaderNotFound { page: usize },

    /// A captured numeric field failed to parse. Points at a pattern/column misalignment.
    #[error("cannot coerce {field} from {value:?}")]
    TypeCoercion { field: &'static str, value: String },

    #[error("record {index} is missing required fields: {}", .missing.join(", "))]
    Validation {
        index: usize,
        missing: Vec<&'static str>,
    },

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("invalid pattern: {0}")]
    Pattern(String),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("rating lookup failed: {0}")]
    Rating(String),
}

impl Error {
    /// SQLite busy/locked: worth retrying the whole batch.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Storage(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

impl From<regex::Error> for Error {
    fn from(e: regex::Error) -> Self {
        Error::Pattern(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Rating(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_message_names_fields() {
        let e = Error::Validation {
            index: 3,
            missing: vec!["course", "professor"],
        };
        assert_eq!(
            e.to_string(),
            "record 3 is missing required fields: course, professor"
        );
    }

    #[test]
    fn busy_is_transient() {
        let busy = Error::Storage(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        ));
        assert!(busy.is_transient());
        let other = Error::Storage(rusqlite::Error::QueryReturnedNoRows);
        assert!(!other.is_transient());
        assert!(!Error::HeaderNotFound { page: 1 }.is_transient());
    }
}
