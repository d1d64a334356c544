use std::time::Duration;

use reqwest::StatusCode;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("OPENAI_API_KEY not found in environment variables")]
    MissingApiKey,
    #[error("Authentication failed: {status}")]
    AuthRejected { status: StatusCode },
    #[error("Failed to retrieve token from response")]
    MissingToken,
    #[error("Request error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Assistant API returned {status}: {body}")]
    Api { status: StatusCode, body: String },
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("File read error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid file path: {0}")]
    InvalidPath(String),
    #[error("File batch {batch_id} ended with status {status}")]
    IndexingFailed { batch_id: String, status: String },
    #[error("Timed out after {waited:?} waiting for {what}")]
    Timeout { what: String, waited: Duration },
    #[error("Thread {thread_id} has no text reply")]
    NoReply { thread_id: String },
}
