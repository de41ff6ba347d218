//! Test doubles shared by the unit-test modules.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::config::{ConnectionConfig, Credentials};
use crate::connection::Connection;
use crate::error::ApiError;
use crate::http::{HttpRequest, HttpResponse, Transport};

pub const API_HOST: &str = "enoch.bluestatedigital.com";
pub const API_ID: &str = "sfrazer";
pub const API_SECRET: &str = "7405d35963605dc36702c06314df85db7349613f";

/// Records every request and answers from a queue of canned responses.
/// An empty queue answers `200` with an empty body.
#[derive(Default)]
pub struct MockTransport {
    pub requests: Mutex<Vec<HttpRequest>>,
    responses: Mutex<VecDeque<Result<HttpResponse, ApiError>>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn respond(&self, status: u16, body: &str) {
        self.responses.lock().unwrap().push_back(Ok(HttpResponse {
            status,
            headers: Vec::new(),
            body: body.to_string(),
        }));
    }

    pub fn fail(&self, err: ApiError) {
        self.responses.lock().unwrap().push_back(Err(err));
    }

    pub fn last_request(&self) -> HttpRequest {
        self.requests.lock().unwrap().last().cloned().expect("no request recorded")
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl Transport for MockTransport {
    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, ApiError> {
        self.requests.lock().unwrap().push(request.clone());
        self.responses.lock().unwrap().pop_front().unwrap_or_else(|| {
            Ok(HttpResponse {
                status: 200,
                headers: Vec::new(),
                body: String::new(),
            })
        })
    }
}

pub fn config() -> ConnectionConfig {
    ConnectionConfig::new(Credentials::new(API_HOST, API_ID, API_SECRET))
}

pub fn connection(transport: &Arc<MockTransport>) -> Connection {
    Connection::with_transport(config(), Arc::clone(transport)).unwrap()
}

/// Decoded query pairs of a recorded request URL, in wire order.
pub fn query_pairs(request: &HttpRequest) -> Vec<(String, String)> {
    let query = request.url.split_once('?').map(|(_, q)| q).unwrap_or("");
    url::form_urlencoded::parse(query.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

pub fn url_path(request: &HttpRequest) -> String {
    let without_query = request.url.split_once('?').map(|(u, _)| u).unwrap_or(&request.url);
    let after_scheme = without_query.split_once("://").map(|(_, rest)| rest).unwrap_or(without_query);
    after_scheme
        .find('/')
        .map(|i| after_scheme[i..].to_string())
        .unwrap_or_default()
}
