//! Crate-wide error type.
//!
//! Mirrors the kinds from the error handling design: `NotFound`, `Validation`,
//! `Parse`, `Transport`, `Persistence`, `Transient`. Kept as a hand-rolled enum
//! in the style of the storage/api error types this crate grew out of, rather
//! than a derive-macro error crate.

use std::fmt;

pub type NanoResult<T> = Result<T, NanoError>;

#[derive(Debug)]
pub enum NanoError {
    NotFound(String),
    Validation(String),
    Parse(String),
    Transport(String),
    Persistence(String),
    Transient(String),
}

impl fmt::Display for NanoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NanoError::NotFound(msg) => write!(f, "not found: {msg}"),
            NanoError::Validation(msg) => write!(f, "invalid input: {msg}"),
            NanoError::Parse(msg) => write!(f, "parse error: {msg}"),
            NanoError::Transport(msg) => write!(f, "transport error: {msg}"),
            NanoError::Persistence(msg) => write!(f, "storage error: {msg}"),
            NanoError::Transient(msg) => write!(f, "transient error: {msg}"),
        }
    }
}

impl std::error::Error for NanoError {}

impl From<sqlx::Error> for NanoError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => NanoError::NotFound("no matching row".to_string()),
            other => NanoError::Persistence(other.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for NanoError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        NanoError::Persistence(format!("migration failed: {err}"))
    }
}

impl From<serde_yaml::Error> for NanoError {
    fn from(err: serde_yaml::Error) -> Self {
        NanoError::Parse(format!("invalid yaml: {err}"))
    }
}

impl From<url::ParseError> for NanoError {
    fn from(err: url::ParseError) -> Self {
        NanoError::Parse(format!("invalid url: {err}"))
    }
}
