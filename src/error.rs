//! Error types for the Deta client

use std::io;
use thiserror::Error;

use crate::drive::UploadState;

/// Errors that can occur when talking to Deta Base or Deta Drive.
///
/// Every fallible operation returns this enum; compare errors by variant
/// (for example with `matches!`), never by identity.
#[derive(Error, Debug)]
pub enum Error {
    /// Project key is missing or not of the form `{project_id}_{secret}`
    #[error("bad project key")]
    BadProjectKey,

    /// Base name is empty
    #[error("bad base name: base name is empty")]
    BadBaseName,

    /// Drive name is empty
    #[error("bad drive name: drive name is empty")]
    BadDriveName,

    /// Value cannot be represented as a keyed mapping
    #[error("bad item: {0}")]
    BadItem(String),

    /// Malformed query condition
    #[error("bad query: {0}")]
    BadQuery(String),

    /// Fetched items do not fit the requested destination type
    #[error("bad destination: {0}")]
    BadDestination(String),

    /// Item key is empty
    #[error("key is empty")]
    EmptyKey,

    /// File name is empty
    #[error("name is empty")]
    EmptyName,

    /// No file names given
    #[error("names is empty")]
    EmptyNames,

    /// Upload source produced no data
    #[error("no data provided")]
    EmptyData,

    /// Too many items for a single put request
    #[error("too many items: got {count}, at most {max} per request")]
    TooManyItems {
        /// Number of items passed in
        count: usize,
        /// Per-request ceiling
        max: usize,
    },

    /// Too many names for a single delete request
    #[error("too many names: got {count}, at most {max} per request")]
    TooManyNames {
        /// Number of names passed in
        count: usize,
        /// Per-request ceiling
        max: usize,
    },

    /// Operation attempted on an upload session that already finished or aborted
    #[error("upload session for {name} is already {state}")]
    UploadClosed {
        /// File name of the session
        name: String,
        /// Terminal state the session reached
        state: UploadState,
    },

    /// Server rejected the request (400)
    #[error("bad request{}", detail(.0))]
    BadRequest(Option<String>),

    /// Project key was rejected (401)
    #[error("unauthorized")]
    Unauthorized,

    /// Item or file does not exist (404)
    #[error("not found")]
    NotFound,

    /// Conflicting write, e.g. inserting an existing key (409)
    #[error("conflict{}", detail(.0))]
    Conflict(Option<String>),

    /// Any other non-2xx status
    #[error("internal server error (status {0})")]
    InternalServerError(u16),

    /// A single-file delete was reported as failed by the server
    #[error("failed to delete {name}: {reason}")]
    DeleteFailed {
        /// File name
        name: String,
        /// Reason reported by the server
        reason: String,
    },

    /// The server listed an item of a put request as failed
    #[error("item rejected by the server: {0}")]
    ItemRejected(String),

    /// Response did not have the expected shape
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    /// Network or connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Request could not be built
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// I/O error, e.g. while reading an upload source
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TLS/SSL error
    #[error("TLS error: {0}")]
    Tls(String),

    /// URL parsing error
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

fn detail(message: &Option<String>) -> String {
    match message {
        Some(msg) if !msg.is_empty() => format!(": {}", msg),
        _ => String::new(),
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, Error>;
