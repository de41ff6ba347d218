//! Response classification.
//!
//! # Design
//! The service answers HTTP 200 for successes and for several structured
//! failures, so a status check alone is not enough. For calls that accepted
//! JSON, the body is inspected for the bulk-write summary envelope:
//!
//! ```json
//! {"summary":{"sucesses":1,"failures":0,"missing_ids":0},"errors":{}}
//! ```
//!
//! `sucesses` is spelled that way on the wire. Rules, first match wins:
//!
//! 1. non-2xx: `ApiError::Http` with the raw status and body.
//! 2. 2xx plain-text "Method ... expects a JSON array/object": `BadRequest`.
//! 3. 2xx, JSON expected, summary envelope present: `MissingIdentifier` if
//!    `missing_ids > 0`, else `ValidationErrors` if `failures > 0` and
//!    `errors` is a non-empty map, else success.
//! 4. 2xx otherwise: the raw body, untouched, for the caller to parse.
//!
//! Counters may arrive as numbers or numeric strings. A JSON object with a
//! `summary` key that still does not parse is logged and passed through.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer};
use tracing::warn;

use crate::error::{ApiError, ValidationErrors};

/// Body format the caller asked the service for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseShape {
    Xml,
    Json,
}

impl ResponseShape {
    /// `Json` if the `Accept` header value mentions json, otherwise `Xml`.
    pub fn from_accept(accept: &str) -> Self {
        if accept.to_ascii_lowercase().contains("json") {
            ResponseShape::Json
        } else {
            ResponseShape::Xml
        }
    }
}

/// Response-handling stage injected into a `Connection`.
pub trait ResponseClassifier: Send + Sync {
    fn classify(&self, status: u16, body: &str, shape: ResponseShape) -> Result<String, ApiError>;
}

/// The service's own failure conventions.
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorClassifier;

impl ResponseClassifier for ErrorClassifier {
    fn classify(&self, status: u16, body: &str, shape: ResponseShape) -> Result<String, ApiError> {
        classify(status, body, shape)
    }
}

#[derive(Debug, Deserialize)]
struct SummaryEnvelope {
    summary: Summary,
    #[serde(default)]
    errors: serde_json::Value,
}

#[derive(Debug, Default, Deserialize)]
struct Summary {
    #[serde(default, rename = "sucesses", deserialize_with = "counter")]
    #[allow(dead_code)]
    successes: u64,
    #[serde(default, deserialize_with = "counter")]
    failures: u64,
    #[serde(default, deserialize_with = "counter")]
    missing_ids: u64,
}

fn counter<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Counter {
        Number(u64),
        Text(String),
    }

    match Counter::deserialize(deserializer)? {
        Counter::Number(n) => Ok(n),
        Counter::Text(s) if s.trim().is_empty() => Ok(0),
        Counter::Text(s) => s
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("counter is not a number: {s:?}"))),
    }
}

pub fn classify(status: u16, body: &str, shape: ResponseShape) -> Result<String, ApiError> {
    if !(200..300).contains(&status) {
        return Err(ApiError::Http {
            status,
            body: body.to_string(),
        });
    }

    if is_bad_request_diagnostic(body) {
        return Err(ApiError::BadRequest(body.trim().to_string()));
    }

    if shape == ResponseShape::Json {
        match serde_json::from_str::<SummaryEnvelope>(body) {
            Ok(envelope) => {
                if envelope.summary.missing_ids > 0 {
                    return Err(ApiError::MissingIdentifier(envelope.summary.missing_ids));
                }
                if envelope.summary.failures > 0 {
                    let errors = validation_errors(&envelope.errors)?;
                    if !errors.is_empty() {
                        return Err(ApiError::ValidationErrors(errors));
                    }
                }
            }
            Err(err) if has_summary_key(body) => {
                warn!(error = %err, "unreadable summary envelope, passing body through");
            }
            Err(_) => {}
        }
    }

    Ok(body.to_string())
}

fn has_summary_key(body: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(body)
        .is_ok_and(|v| v.get("summary").is_some())
}

fn is_bad_request_diagnostic(body: &str) -> bool {
    let text = body.trim();
    text.starts_with("Method ")
        && (text.contains("expects a JSON array") || text.contains("expects a JSON object"))
}

/// `{"ID": ["msg", ...]}`; a bare string message is treated as a one-item list.
fn validation_errors(errors: &serde_json::Value) -> Result<ValidationErrors, ApiError> {
    let Some(map) = errors.as_object() else {
        return Ok(ValidationErrors::default());
    };
    let mut out = BTreeMap::new();
    for (identifier, messages) in map {
        let messages = match messages {
            serde_json::Value::Array(items) => items
                .iter()
                .map(|m| match m {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect(),
            serde_json::Value::String(s) => vec![s.clone()],
            other => {
                return Err(ApiError::Deserialization(format!(
                    "unexpected validation messages for {identifier}: {other}"
                )))
            }
        };
        out.insert(identifier.clone(), messages);
    }
    Ok(ValidationErrors(out))
}
