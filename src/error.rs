use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid page url for {path}: {source}")]
    Url {
        path: String,
        source: url::ParseError,
    },
    #[error("request for {path} failed: {source}")]
    Request {
        path: String,
        source: reqwest::Error,
    },
    #[error("{path} returned {status}")]
    Status { path: String, status: StatusCode },
}

/// A structured-data block whose body isn't a product document.
#[derive(Debug, Error)]
#[error("block {index} is not a product document: {source}")]
pub struct DecodeError {
    pub index: usize,
    pub source: serde_json::Error,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{op} on {table} failed: {source}")]
    Request {
        op: &'static str,
        table: &'static str,
        source: reqwest::Error,
    },
    #[error("invalid endpoint for {table}: {source}")]
    Url {
        table: &'static str,
        source: url::ParseError,
    },
    #[error("{op} on {table} returned {status}: {body}")]
    Status {
        op: &'static str,
        table: &'static str,
        status: StatusCode,
        body: String,
    },
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("telegram request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("telegram rejected the call: {0}")]
    Rejected(String),
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("none of the {0} category pages could be fetched")]
    NoPages(usize),
    #[error(transparent)]
    Store(#[from] StoreError),
}
