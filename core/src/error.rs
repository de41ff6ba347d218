//! Error types for the constituent-service client.
//!
//! # Design
//! The remote service reuses HTTP 200 for several structured failures, so the
//! variants here describe what went wrong with the call rather than mirroring
//! status codes. Every variant that came from the wire keeps the raw status,
//! body or per-item messages so callers never need to re-parse transport
//! internals. `Http` and `Transport` together are the transport-failure
//! family: the first carries a response, the second means none arrived.

use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

/// Errors returned by `Connection`, the collection fetcher and the resource
/// mappers built on them.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The service rejected the call shape, e.g. a body that is not the JSON
    /// array the method expects. Holds the service's diagnostic verbatim.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// One or more submitted items failed validation.
    #[error("{0}")]
    ValidationErrors(ValidationErrors),

    /// Items were submitted without the external id the method requires.
    #[error("{0} item(s) missing a required external id")]
    MissingIdentifier(u64),

    /// A collection response had no recognizable envelope.
    #[error("collection fetch failed: {0}")]
    FetchFailure(String),

    /// The service answered with a non-2xx status.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// No response was received (DNS, connect or I/O failure).
    #[error("transport failure: {0}")]
    Transport(String),

    /// The request exceeded the configured timeout.
    #[error("request timed out")]
    Timeout,

    /// A deferred result was still pending after every poll attempt.
    #[error("deferred result {deferred_id} not ready after {attempts} attempt(s)")]
    DeferredNotReady { deferred_id: String, attempts: u32 },

    /// A resource failed local validation before any request was sent.
    #[error("invalid resource: {0}")]
    Invalid(String),

    /// A request payload could not be serialized.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// A response payload could not be deserialized.
    #[error("deserialization failed: {0}")]
    Deserialization(String),
}

impl ApiError {
    /// HTTP status of the response behind this error, if one was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ApiError::Timeout)
    }
}

/// Per-item validation messages keyed by the item's external identifier.
///
/// Message order within an item is preserved exactly as the service sent it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors(pub BTreeMap<String, Vec<String>>);

impl ValidationErrors {
    pub fn get(&self, identifier: &str) -> Option<&[String]> {
        self.0.get(identifier).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> BTreeMap<String, Vec<String>> {
        self.0
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (identifier, messages) in &self.0 {
            if !first {
                write!(f, "; ")?;
            }
            first = false;
            write!(f, "Error for item (ID: {identifier}): {}", messages.join(", "))?;
        }
        Ok(())
    }
}
