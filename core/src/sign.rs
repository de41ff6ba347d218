//! Request signing.
//!
//! The string to sign is four newline-joined lines with no trailing newline:
//!
//! ```text
//! {api_id}
//! {api_ts}
//! {full path, e.g. /page/api/circle/list_circles}
//! {canonical query}
//! ```
//!
//! The canonical query is every parameter (including the injected `api_ver`,
//! `api_id` and `api_ts`, excluding `api_mac`) sorted by key, each key and
//! value percent-encoded except for spaces, joined as `k=v` with `&`. The
//! service's verifier does not escape spaces inside values, so neither do we.
//! The signature is the lowercase hex HMAC-SHA1 of that string keyed by the
//! API secret.

use std::collections::BTreeMap;
use std::fmt;

use hmac::{Hmac, Mac};
use sha1::Sha1;

use crate::config::Credentials;
use crate::error::ApiError;

type HmacSha1 = Hmac<Sha1>;

/// Query parameters. `BTreeMap` keeps keys in ascending byte order, which is
/// the canonical order the signature is computed over.
pub type Params = BTreeMap<String, String>;

/// Computes per-request signatures for one set of credentials. No I/O.
#[derive(Clone)]
pub struct Signer {
    api_id: String,
    mac: HmacSha1,
}

impl Signer {
    pub fn new(credentials: &Credentials) -> Result<Self, ApiError> {
        let mac = HmacSha1::new_from_slice(credentials.api_secret().as_bytes())
            .map_err(|e| ApiError::Invalid(format!("api secret rejected: {e}")))?;
        Ok(Self {
            api_id: credentials.api_id.clone(),
            mac,
        })
    }

    /// Signature for `full_path` at `timestamp` over `params`.
    ///
    /// `params` must already contain `api_ver`, `api_id` and `api_ts`.
    pub fn compute_signature(&self, full_path: &str, timestamp: &str, params: &Params) -> String {
        let mut mac = self.mac.clone();
        mac.update(string_to_sign(&self.api_id, full_path, timestamp, params).as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}

impl fmt::Debug for Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signer").field("api_id", &self.api_id).finish_non_exhaustive()
    }
}

pub fn string_to_sign(api_id: &str, full_path: &str, timestamp: &str, params: &Params) -> String {
    format!("{api_id}\n{timestamp}\n{full_path}\n{}", canonical_query(params))
}

pub fn canonical_query(params: &Params) -> String {
    params
        .iter()
        .map(|(key, value)| format!("{}={}", encode_component(key), encode_component(value)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Percent-encodes everything outside the unreserved set, leaving spaces as
/// literal spaces.
fn encode_component(raw: &str) -> String {
    raw.split(' ')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}
