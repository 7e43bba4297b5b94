use std::path::PathBuf;
use std::time::Duration;

use config::{Config, ConfigBuilder, Environment, File};
use serde::Deserialize;

use crate::db::ConflictKey;
use crate::error::Result;
use crate::ingest::RetryPolicy;
use crate::parser::{PagePolicy, ReportPatterns};

const ENV_PREFIX: &str = "GRADES";
const FILE_NAME: &str = "grade_loader";

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub db_path: PathBuf,
    pub page_policy: PagePolicy,
    pub conflict_key: Vec<String>,
    pub retry_attempts: u32,
    pub retry_backoff_ms: u64,
    pub header_pattern: Option<String>,
    pub row_pattern: Option<String>,
    pub rmp_school_id: Option<String>,
    pub rmp_pick_first: bool,
}

impl Settings {
    /// Defaults, then `grade_loader.toml` if present, then `GRADES_*` variables.
    pub fn load() -> Result<Self> {
        Self::from_builder(
            Self::defaults()?
                .add_source(File::with_name(FILE_NAME).required(false))
                .add_source(
                    Environment::with_prefix(ENV_PREFIX)
                        .try_parsing(true)
                        .list_separator(",")
                        .with_list_parse_key("conflict_key"),
                ),
        )
    }

    fn defaults() -> Result<ConfigBuilder<config::builder::DefaultState>> {
        Ok(Config::builder()
            .set_default("db_path", "data/grades.sqlite")?
            .set_default("page_policy", "fail")?
            .set_default(
                "conflict_key",
                vec!["course", "semester", "year", "professor"],
            )?
            .set_default("retry_attempts", 3)?
            .set_default("retry_backoff_ms", 250)?
            .set_default("rmp_pick_first", false)?)
    }

    fn from_builder(builder: ConfigBuilder<config::builder::DefaultState>) -> Result<Self> {
        Ok(builder.build()?.try_deserialize()?)
    }

    pub fn patterns(&self) -> Result<ReportPatterns> {
        ReportPatterns::new(self.header_pattern.as_deref(), self.row_pattern.as_deref())
    }

    pub fn conflict_key(&self) -> Result<ConflictKey> {
        ConflictKey::parse(self.conflict_key.as_slice())
    }

    pub fn retry(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.retry_attempts.max(1),
            backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }
}
