//! RateMyProfessors lookup used to fill professor rating columns.

use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, ORIGIN, REFERER};
use rusqlite::Connection;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::db::{self, Rating};
use crate::error::{Error, Result};

const API: &str = "https://www.ratemyprofessors.com/graphql";
const PROFILE_BASE: &str = "https://www.ratemyprofessors.com/professor/";
// The public GraphQL endpoint expects this fixed basic-auth pair.
const BASIC_AUTH: &str = "Basic dGVzdDp0ZXN0";
const TIMEOUT: Duration = Duration::from_secs(15);

const SCHOOL_QUERY: &str = r#"
query ($text: String!) {
  newSearch {
    schools(query: { text: $text }) {
      edges { node { id name city state } }
    }
  }
}"#;

const TEACHER_QUERY: &str = r#"
query ($text: String!, $sid: ID!) {
  newSearch {
    teachers(query: { text: $text, schoolID: $sid }) {
      edges {
        node { id legacyId firstName lastName avgRating avgDifficulty numRatings }
      }
    }
  }
}"#;

#[derive(Debug, Clone, Deserialize)]
pub struct School {
    pub id: String,
    pub name: String,
    pub city: Option<String>,
    pub state: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeacherCandidate {
    pub id: String,
    pub legacy_id: i64,
    pub first_name: String,
    pub last_name: String,
    pub avg_rating: Option<f64>,
    pub avg_difficulty: Option<f64>,
    #[serde(default)]
    pub num_ratings: i64,
}

impl TeacherCandidate {
    pub fn rating(&self) -> Rating {
        Rating {
            avg_rating: self.avg_rating,
            avg_difficulty: self.avg_difficulty,
            num_ratings: self.num_ratings,
            link: format!("{}{}", PROFILE_BASE, self.legacy_id),
        }
    }
}

#[derive(Deserialize)]
struct GqlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchData<T> {
    new_search: T,
}

#[derive(Debug, Deserialize)]
struct Teachers {
    teachers: Edges<TeacherCandidate>,
}

#[derive(Debug, Deserialize)]
struct Schools {
    schools: Edges<School>,
}

#[derive(Debug, Deserialize)]
struct Edges<T> {
    edges: Vec<Edge<T>>,
}

#[derive(Debug, Deserialize)]
struct Edge<T> {
    node: T,
}

fn decode<T: DeserializeOwned>(body: &str) -> Result<T> {
    let resp: GqlResponse<T> =
        serde_json::from_str(body).map_err(|e| Error::Rating(format!("bad response: {}", e)))?;
    if !resp.errors.is_empty() {
        return Err(Error::Rating(serde_json::Value::Array(resp.errors).to_string()));
    }
    resp.data
        .ok_or_else(|| Error::Rating("response without data".into()))
}

/// Candidate search, scoped to one school.
pub trait TeacherSearch {
    fn search_teachers(&self, name: &str, school_id: &str) -> Result<Vec<TeacherCandidate>>;
}

pub struct RmpClient {
    http: Client,
}

impl RmpClient {
    pub fn new() -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static(BASIC_AUTH));
        headers.insert(ORIGIN, HeaderValue::from_static("https://www.ratemyprofessors.com"));
        headers.insert(REFERER, HeaderValue::from_static("https://www.ratemyprofessors.com/"));
        let http = Client::builder()
            .default_headers(headers)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .timeout(TIMEOUT)
            .build()?;
        Ok(Self { http })
    }

    fn query<T: DeserializeOwned>(&self, doc: &str, variables: serde_json::Value) -> Result<T> {
        let body = self
            .http
            .post(API)
            .json(&json!({ "query": doc, "variables": variables }))
            .send()?
            .error_for_status()?
            .text()?;
        decode(&body)
    }

    pub fn search_schools(&self, text: &str) -> Result<Vec<School>> {
        let data: SearchData<Schools> = self.query(SCHOOL_QUERY, json!({ "text": text }))?;
        Ok(data.new_search.schools.edges.into_iter().map(|e| e.node).collect())
    }
}

impl TeacherSearch for RmpClient {
    fn search_teachers(&self, name: &str, school_id: &str) -> Result<Vec<TeacherCandidate>> {
        let data: SearchData<Teachers> =
            self.query(TEACHER_QUERY, json!({ "text": name, "sid": school_id }))?;
        Ok(data.new_search.teachers.edges.into_iter().map(|e| e.node).collect())
    }
}

/// `SMITH, JOHN A` → `JOHN SMITH`. Names without a comma pass through.
pub fn search_text(display_name: &str) -> String {
    match display_name.split_once(',') {
        Some((last, rest)) => match rest.split_whitespace().next() {
            Some(first) => format!("{} {}", first, last.trim()),
            None => last.trim().to_string(),
        },
        None => display_name.trim().to_string(),
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct RefreshStats {
    pub updated: usize,
    pub not_found: usize,
    pub ambiguous: usize,
    /// Rows that disappeared between listing and writing.
    pub vanished: usize,
}

/// Looks up professors without rating data and stores the match.
/// Several candidates only resolve when `pick_first` is set. Lookups that
/// store nothing are stamped so later limited runs reach other names first.
pub fn refresh_ratings(
    conn: &Connection,
    search: &impl TeacherSearch,
    school_id: &str,
    limit: Option<usize>,
    pick_first: bool,
) -> Result<RefreshStats> {
    let mut stats = RefreshStats::default();
    for prof in db::professors_missing_rating(conn, limit)? {
        let candidates = search.search_teachers(&search_text(&prof.name), school_id)?;
        let stored = match candidates.as_slice() {
            [] => {
                debug!(name = %prof.name, "no rating entry");
                stats.not_found += 1;
                db::mark_rating_checked(conn, prof.id)?;
                continue;
            }
            [only] => db::update_professor_rating(conn, prof.id, &only.rating())?,
            [first, ..] if pick_first => db::update_professor_rating(conn, prof.id, &first.rating())?,
            many => {
                warn!(name = %prof.name, candidates = many.len(), "ambiguous rating match, skipped");
                stats.ambiguous += 1;
                db::mark_rating_checked(conn, prof.id)?;
                continue;
            }
        };
        if stored {
            stats.updated += 1;
        } else {
            warn!(name = %prof.name, id = prof.id, "professor row gone, rating not stored");
            stats.vanished += 1;
        }
    }
    info!(?stats, "ratings refreshed");
    Ok(stats)
}
