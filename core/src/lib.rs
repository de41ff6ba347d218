//! Synchronous client core for the constituent-management service API.
//!
//! # Overview
//! Every call to `/page/api` is signed with the caller's API id, the current
//! UTC second and an HMAC-SHA1 over the sorted parameters, then dispatched
//! and classified. The service reuses HTTP 200 for several structured
//! failures, so classification inspects bodies, not only status codes.
//!
//! # Design
//! - `sign` is pure; `Connection::build_request` is pure given a timestamp.
//! - `Transport` is the I/O seam (`UreqTransport` by default) and
//!   `ResponseClassifier` the response-handling stage; both are injected at
//!   construction, never registered globally.
//! - `collection` turns enveloped list responses (JSON `{"data":[...]}` or
//!   XML sibling elements) into typed items through `ApiRecord`.
//! - `resources` holds the per-resource mappers. They describe their wire
//!   fields with static tables and only talk to `Connection`.
//! - The crate logs through `tracing` and never installs a subscriber.

pub mod classify;
pub mod collection;
pub mod config;
pub mod connection;
pub mod deferred;
pub mod error;
pub mod http;
pub mod request;
pub mod resources;
pub mod sign;
pub mod transport;
pub mod xml;

#[cfg(test)]
pub(crate) mod testing;

pub use classify::{classify, ErrorClassifier, ResponseClassifier, ResponseShape};
pub use collection::{fetch_collection, fetch_records, parse_collection, ApiRecord, CollectionPage};
pub use config::{ConnectionConfig, Credentials};
pub use connection::Connection;
pub use deferred::{poll_deferred_results, PollPolicy};
pub use error::{ApiError, ValidationErrors};
pub use http::{HttpMethod, HttpRequest, HttpResponse, Transport};
pub use request::{ApiRequest, RequestOptions, SignedRequest};
pub use sign::{Params, Signer};
pub use transport::UreqTransport;
