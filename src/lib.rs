//! Grade-distribution report loader.
//!
//! Page text → header + course rows → normalized records → SQLite, with
//! professors resolved to stable ids and re-ingestion skipping stored facts.

pub mod db;
pub mod error;
pub mod ingest;
pub mod normalize;
pub mod parser;
pub mod rmp;
pub mod settings;

pub use error::{Error, Result};
