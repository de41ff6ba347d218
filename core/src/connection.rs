//! Signed request dispatch.
//!
//! # Design
//! `Connection` owns the credentials, a `Transport` and a
//! `ResponseClassifier`; all three are fixed at construction and never
//! mutated, so one connection can be shared across threads. Each call is
//! signed at dispatch time with the current UTC second, so the service can
//! reject stale requests.
//!
//! Building and dispatching are split: `build_request` is pure given a
//! timestamp, which is what the unit tests inspect.

use chrono::Utc;
use tracing::{debug, warn};

use crate::classify::{ErrorClassifier, ResponseClassifier, ResponseShape};
use crate::config::{ConnectionConfig, Credentials, API_BASE, API_VERSION, GRAPH_API_BASE};
use crate::error::ApiError;
use crate::http::{HttpMethod, HttpRequest, HttpResponse, Transport};
use crate::request::{ApiRequest, SignedRequest, DEFAULT_ACCEPT, DEFAULT_CONTENT_TYPE};
use crate::sign::{Params, Signer};
use crate::transport::UreqTransport;

/// Path polled for deferred results, relative to `/page/api`.
pub const DEFERRED_RESULTS_PATH: &str = "/get_deferred_results";

pub struct Connection {
    config: ConnectionConfig,
    signer: Signer,
    transport: Box<dyn Transport>,
    classifier: Box<dyn ResponseClassifier>,
}

const _: () = {
    const fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<Connection>();
};

impl Connection {
    /// Connection over the default blocking transport.
    pub fn new(config: ConnectionConfig) -> Result<Self, ApiError> {
        let transport = UreqTransport::new(config.timeout());
        Self::with_transport(config, transport)
    }

    pub fn with_transport(
        config: ConnectionConfig,
        transport: impl Transport + 'static,
    ) -> Result<Self, ApiError> {
        let signer = Signer::new(&config.credentials)?;
        Ok(Self {
            config,
            signer,
            transport: Box::new(transport),
            classifier: Box::new(ErrorClassifier),
        })
    }

    /// Replaces the response-handling stage.
    pub fn with_classifier(mut self, classifier: impl ResponseClassifier + 'static) -> Self {
        self.classifier = Box::new(classifier);
        self
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn credentials(&self) -> &Credentials {
        &self.config.credentials
    }

    /// Injects `api_ver`, `api_id` and `api_ts` into `params` and signs the
    /// result for `/page/api{path}`.
    pub fn sign(&self, path: &str, params: &Params, timestamp: i64) -> SignedRequest {
        let full_path = format!("{API_BASE}{path}");
        let api_ts = timestamp.to_string();

        let mut query_params = params.clone();
        query_params.remove("api_mac");
        query_params.insert("api_ver".to_string(), API_VERSION.to_string());
        query_params.insert("api_id".to_string(), self.config.credentials.api_id.clone());
        query_params.insert("api_ts".to_string(), api_ts.clone());

        let signature = self.signer.compute_signature(&full_path, &api_ts, &query_params);
        SignedRequest {
            path: full_path,
            timestamp,
            query_params,
            signature,
        }
    }

    pub fn build_request(&self, request: &ApiRequest, timestamp: i64) -> HttpRequest {
        let signed = self.sign(&request.path, &request.params, timestamp);
        let body = match request.method {
            HttpMethod::Get => None,
            HttpMethod::Post | HttpMethod::Put => request.body.clone(),
        };
        HttpRequest {
            method: request.method,
            url: format!(
                "{}{}?{}",
                self.config.base_url(),
                signed.path,
                signed.query_string()
            ),
            headers: vec![
                (
                    "Content-Type".to_string(),
                    request.options.content_type().to_string(),
                ),
                ("Accept".to_string(), request.options.accept().to_string()),
            ],
            body,
        }
    }

    /// Signs, dispatches and classifies `request`, returning the raw body on
    /// success. Every classified failure comes back as a typed `ApiError`.
    pub fn perform_request(&self, request: &ApiRequest) -> Result<String, ApiError> {
        let response = self.perform_request_raw(request)?;
        let shape = ResponseShape::from_accept(request.options.accept());
        self.classifier
            .classify(response.status, &response.body, shape)
            .inspect_err(|e| warn!(path = %request.path, error = %e, "request failed"))
    }

    /// Like `perform_request` but returns the status and body as data for
    /// every HTTP status. Only transport faults become errors.
    pub fn perform_request_raw(&self, request: &ApiRequest) -> Result<HttpResponse, ApiError> {
        let timestamp = Utc::now().timestamp();
        let http = self.build_request(request, timestamp);
        debug!(
            method = %request.method,
            path = %request.path,
            timestamp,
            "dispatching signed request"
        );
        let response = self.transport.execute(&http)?;
        debug!(path = %request.path, status = response.status, "received response");
        Ok(response)
    }

    /// Unsigned request against `/page/graph{path}`. GET sends `params` as
    /// the query string; POST and PUT send them as a form-encoded body.
    pub fn build_graph_request(&self, path: &str, params: &Params, method: HttpMethod) -> HttpRequest {
        let url = format!("{}{GRAPH_API_BASE}{path}", self.config.base_url());
        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        for (key, value) in params {
            serializer.append_pair(key, value);
        }
        let encoded = serializer.finish();

        match method {
            HttpMethod::Get => HttpRequest {
                method,
                url: if encoded.is_empty() {
                    url
                } else {
                    format!("{url}?{encoded}")
                },
                headers: vec![("Accept".to_string(), DEFAULT_ACCEPT.to_string())],
                body: None,
            },
            HttpMethod::Post | HttpMethod::Put => HttpRequest {
                method,
                url,
                headers: vec![
                    ("Content-Type".to_string(), DEFAULT_CONTENT_TYPE.to_string()),
                    ("Accept".to_string(), DEFAULT_ACCEPT.to_string()),
                ],
                body: Some(encoded),
            },
        }
    }

    pub fn perform_graph_request(
        &self,
        path: &str,
        params: &Params,
        method: HttpMethod,
    ) -> Result<String, ApiError> {
        let http = self.build_graph_request(path, params, method);
        debug!(method = %method, path, "dispatching graph request");
        let response = self.transport.execute(&http)?;
        self.classifier
            .classify(response.status, &response.body, ResponseShape::Xml)
            .inspect_err(|e| warn!(path, error = %e, "graph request failed"))
    }

    /// One poll of a deferred job. Never loops; see
    /// `deferred::poll_deferred_results` for a retrying caller.
    pub fn get_deferred_results(&self, deferred_id: &str) -> Result<String, ApiError> {
        self.perform_request(&ApiRequest::get(DEFERRED_RESULTS_PATH).param("deferred_id", deferred_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{self, query_pairs, url_path, MockTransport, API_ID};

    const TS: i64 = 1_272_659_462;

    #[test]
    fn signing_injects_api_params() {
        let transport = MockTransport::new();
        let conn = testing::connection(&transport);
        let signed = conn.sign("/circle/list_circles", &Params::new(), TS);
        assert_eq!(signed.path, "/page/api/circle/list_circles");
        assert_eq!(signed.query_params["api_ver"], "2");
        assert_eq!(signed.query_params["api_id"], API_ID);
        assert_eq!(signed.query_params["api_ts"], "1272659462");
        assert_eq!(signed.signature, "c4a31bdaabef52d609cbb5b01213fb267af4e808");
    }

    #[test]
    fn stale_api_mac_param_is_not_signed() {
        let transport = MockTransport::new();
        let conn = testing::connection(&transport);
        let mut params = Params::new();
        params.insert("api_mac".to_string(), "old".to_string());
        let signed = conn.sign("/circle/list_circles", &params, TS);
        assert!(!signed.query_params.contains_key("api_mac"));
        assert_eq!(signed.signature, "c4a31bdaabef52d609cbb5b01213fb267af4e808");
    }

    #[test]
    fn built_request_has_sorted_signed_query_and_default_headers() {
        let transport = MockTransport::new();
        let conn = testing::connection(&transport);
        let req = conn.build_request(&ApiRequest::get("/circle/list_circles"), TS);
        assert_eq!(req.method, HttpMethod::Get);
        assert_eq!(
            req.url,
            "https://enoch.bluestatedigital.com/page/api/circle/list_circles\
             ?api_id=sfrazer&api_mac=c4a31bdaabef52d609cbb5b01213fb267af4e808\
             &api_ts=1272659462&api_ver=2"
        );
        assert_eq!(req.header("Content-Type"), Some(DEFAULT_CONTENT_TYPE));
        assert_eq!(req.header("Accept"), Some(DEFAULT_ACCEPT));
        assert!(req.body.is_none());
    }

    #[test]
    fn content_type_override_changes_only_that_header() {
        let transport = MockTransport::new();
        let conn = testing::connection(&transport);
        let base = ApiRequest::post("/somemethod").body("a=b");
        let plain = conn.build_request(&base, TS);
        let overridden = conn.build_request(&base.clone().content_type("application/json"), TS);

        assert_eq!(overridden.header("Content-Type"), Some("application/json"));
        assert_eq!(overridden.header("Accept"), plain.header("Accept"));
        assert_eq!(overridden.url, plain.url);
        assert_eq!(overridden.body, plain.body);
        assert_eq!(overridden.method, plain.method);
    }

    #[test]
    fn accept_override_is_applied() {
        let transport = MockTransport::new();
        let conn = testing::connection(&transport);
        let req = conn.build_request(&ApiRequest::post("/somemethod").accept("application/json"), TS);
        assert_eq!(req.header("Accept"), Some("application/json"));
        assert_eq!(req.header("Content-Type"), Some(DEFAULT_CONTENT_TYPE));
    }

    #[test]
    fn post_and_put_carry_the_raw_body() {
        let transport = MockTransport::new();
        transport.respond(200, "body");
        transport.respond(200, "body");
        let conn = testing::connection(&transport);

        let out = conn.perform_request(&ApiRequest::post("/somemethod").body("a=b")).unwrap();
        assert_eq!(out, "body");
        let sent = transport.last_request();
        assert_eq!(sent.method, HttpMethod::Post);
        assert_eq!(sent.body.as_deref(), Some("a=b"));

        conn.perform_request(&ApiRequest::put("/somemethod").body("a=b")).unwrap();
        let sent = transport.last_request();
        assert_eq!(sent.method, HttpMethod::Put);
        assert_eq!(sent.body.as_deref(), Some("a=b"));
        assert_eq!(url_path(&sent), "/page/api/somemethod");
    }

    #[test]
    fn dispatch_signs_with_a_fresh_timestamp() {
        let transport = MockTransport::new();
        let conn = testing::connection(&transport);
        let before = Utc::now().timestamp();
        conn.perform_request(&ApiRequest::get("/somemethod")).unwrap();
        let after = Utc::now().timestamp();

        let pairs = query_pairs(&transport.last_request());
        let ts: i64 = pairs
            .iter()
            .find(|(k, _)| k == "api_ts")
            .map(|(_, v)| v.parse().unwrap())
            .unwrap();
        assert!(ts >= before && ts <= after);
        let keys: Vec<&str> = pairs.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, ["api_id", "api_mac", "api_ts", "api_ver"]);
    }

    #[test]
    fn perform_request_raises_classified_failures() {
        let transport = MockTransport::new();
        transport.respond(500, "boom");
        let conn = testing::connection(&transport);
        let err = conn.perform_request(&ApiRequest::get("/somemethod")).unwrap_err();
        assert!(matches!(err, ApiError::Http { status: 500, .. }));
    }

    #[test]
    fn json_accepting_calls_are_classified_as_json() {
        let transport = MockTransport::new();
        transport.respond(
            200,
            r#"{"summary":{"sucesses":0,"failures":0,"missing_ids":2},"errors":{}}"#,
        );
        let conn = testing::connection(&transport);
        let err = conn
            .perform_request(&ApiRequest::post("/contribution/add_external_contribution").accept("application/json"))
            .unwrap_err();
        assert!(matches!(err, ApiError::MissingIdentifier(2)));
    }

    #[test]
    fn raw_requests_return_failures_as_data() {
        let transport = MockTransport::new();
        transport.respond(404, "Something bad happened");
        let conn = testing::connection(&transport);
        let response = conn.perform_request_raw(&ApiRequest::post("/cons/delete_dataset_map")).unwrap();
        assert_eq!(response.status, 404);
        assert_eq!(response.body, "Something bad happened");
    }

    #[test]
    fn transport_faults_surface_from_raw_requests() {
        let transport = MockTransport::new();
        transport.fail(ApiError::Timeout);
        let conn = testing::connection(&transport);
        let err = conn.perform_request_raw(&ApiRequest::get("/slow")).unwrap_err();
        assert!(err.is_timeout());
    }

    #[test]
    fn graph_post_sends_form_body_without_signature() {
        let transport = MockTransport::new();
        let conn = testing::connection(&transport);
        let mut params = Params::new();
        params.insert("param1".to_string(), "my_param".to_string());
        params.insert("param2".to_string(), "my other param".to_string());
        conn.perform_graph_request("/rsvp/add", &params, HttpMethod::Post).unwrap();

        let sent = transport.last_request();
        assert_eq!(sent.url, "https://enoch.bluestatedigital.com/page/graph/rsvp/add");
        assert_eq!(sent.body.as_deref(), Some("param1=my_param&param2=my+other+param"));
        assert_eq!(sent.header("Content-Type"), Some(DEFAULT_CONTENT_TYPE));
    }

    #[test]
    fn graph_get_sends_query() {
        let transport = MockTransport::new();
        let conn = testing::connection(&transport);
        let mut params = Params::new();
        params.insert("event_id".to_string(), "7".to_string());
        let req = conn.build_graph_request("/event/get", &params, HttpMethod::Get);
        assert_eq!(req.url, "https://enoch.bluestatedigital.com/page/graph/event/get?event_id=7");
        assert!(req.body.is_none());
        assert!(!req.url.contains("api_mac"));
    }

    #[test]
    fn deferred_results_poll_once() {
        let transport = MockTransport::new();
        transport.respond(200, "foo");
        let conn = testing::connection(&transport);
        assert_eq!(conn.get_deferred_results("deferred_id").unwrap(), "foo");
        assert_eq!(transport.request_count(), 1);

        let sent = transport.last_request();
        assert_eq!(url_path(&sent), "/page/api/get_deferred_results");
        assert!(query_pairs(&sent).contains(&("deferred_id".to_string(), "deferred_id".to_string())));
    }

    #[test]
    fn custom_classifier_replaces_default_stage() {
        struct Strict;
        impl ResponseClassifier for Strict {
            fn classify(&self, status: u16, body: &str, _: ResponseShape) -> Result<String, ApiError> {
                if status == 200 {
                    Ok(body.to_string())
                } else {
                    Err(ApiError::Http { status, body: body.to_string() })
                }
            }
        }

        let transport = MockTransport::new();
        transport.respond(202, "accepted");
        let conn = testing::connection(&transport).with_classifier(Strict);
        let err = conn.perform_request(&ApiRequest::get("/x")).unwrap_err();
        assert_eq!(err.status(), Some(202));
    }
}
