//! In-memory stand-in for the constituent-management service.
//!
//! Every `/page/api` route sits behind a middleware that re-derives the HMAC
//! signature from the decoded query string and rejects mismatches with 403,
//! so client tests exercise signing end to end. `/page/graph` routes are
//! unsigned. Signing and XML handling are implemented here independently of
//! the client crate; integration tests catch drift between the two.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::sync::Arc;

use axum::extract::{Query, Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Form, Router};
use hmac::{Hmac, Mac};
use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha1::Sha1;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tracing::warn;

pub const DEFAULT_API_ID: &str = "sfrazer";
pub const DEFAULT_API_SECRET: &str = "7405d35963605dc36702c06314df85db7349613f";

pub const BAD_CONTRIBUTION_BODY: &str = "Method add_external_contribution expects a JSON array.";

/// Event types answered by `list_event_types`.
pub const EVENT_TYPES: &[(u64, &str, &str)] = &[
    (1, "Canvass", "Door to door"),
    (2, "Phone bank", "Calls from home"),
];

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DatasetMap {
    pub map_id: u64,
    #[serde(rename = "type")]
    pub map_type: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Group {
    pub id: u64,
    pub name: String,
    pub slug: String,
    pub description: String,
    pub group_type: String,
    pub members: Vec<String>,
}

/// A parsed XML element. Attribute values and text are unescaped.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct XmlElement {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub text: String,
    pub children: Vec<XmlElement>,
}

impl XmlElement {
    fn open(start: &BytesStart<'_>) -> Option<Self> {
        let mut element = Self {
            name: String::from_utf8_lossy(start.name().as_ref()).into_owned(),
            ..Self::default()
        };
        for attr in start.attributes() {
            let attr = attr.ok()?;
            element.attributes.push((
                String::from_utf8_lossy(attr.key.as_ref()).into_owned(),
                attr.unescape_value().ok()?.into_owned(),
            ));
        }
        Some(element)
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    fn set_attribute(&mut self, name: &str, value: String) {
        match self.attributes.iter_mut().find(|(k, _)| k == name) {
            Some((_, existing)) => *existing = value,
            None => self.attributes.insert(0, (name.to_string(), value)),
        }
    }

    pub fn children_named<'a, 'b>(&'a self, name: &'b str) -> impl Iterator<Item = &'a XmlElement> + use<'a, 'b> {
        self.children.iter().filter(move |c| c.name == name)
    }

    pub fn child_text<'a>(&'a self, name: &str) -> Option<&'a str> {
        self.children_named(name).next().map(|c| c.text.as_str())
    }

    /// Serializes the element with escaped attributes and text.
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.render_into(&mut out);
        out
    }

    fn render_into(&self, out: &mut String) {
        let _ = write!(out, "<{}", self.name);
        for (key, value) in &self.attributes {
            let _ = write!(out, " {key}=\"{}\"", escape(value.as_str()));
        }
        if self.text.is_empty() && self.children.is_empty() {
            out.push_str("/>");
            return;
        }
        out.push('>');
        out.push_str(&escape(self.text.as_str()));
        for child in &self.children {
            child.render_into(out);
        }
        let _ = write!(out, "</{}>", self.name);
    }
}

/// Parses `xml` into its root element, or `None` if it is not well formed.
pub fn parse_xml(xml: &str) -> Option<XmlElement> {
    let mut reader = Reader::from_str(xml.trim());
    reader.config_mut().trim_text(true);
    let mut stack: Vec<XmlElement> = Vec::new();
    loop {
        let finished = match reader.read_event().ok()? {
            Event::Start(start) => {
                stack.push(XmlElement::open(&start)?);
                None
            }
            Event::Empty(start) => Some(XmlElement::open(&start)?),
            Event::End(_) => Some(stack.pop()?),
            Event::Text(text) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&text.unescape().ok()?);
                }
                None
            }
            Event::Eof => return None,
            _ => None,
        };
        if let Some(element) = finished {
            match stack.last_mut() {
                Some(parent) => parent.children.push(element),
                None => return Some(element),
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Unsubscribe {
    pub email: String,
    pub reason: String,
}

#[derive(Clone, Debug)]
struct Deferred {
    pending_polls: u32,
    result: String,
}

#[derive(Debug, Default)]
pub struct Store {
    pub dataset_maps: Vec<DatasetMap>,
    pub groups: Vec<Group>,
    pub contributions: Vec<Value>,
    pub rsvps: Vec<HashMap<String, String>>,
    pub unsubscribed: Vec<Unsubscribe>,
    /// Stored `<cons>` elements, each carrying its `id` attribute.
    pub constituents: Vec<XmlElement>,
    /// Saved event `values` documents, each with its `event_id_obfuscated`.
    pub events: Vec<Value>,
    deferred: HashMap<String, Deferred>,
    next_id: u64,
}

impl Store {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn constituent_emails(cons: &XmlElement) -> impl Iterator<Item = &str> + '_ {
        cons.children_named("cons_email").filter_map(|e| e.child_text("email"))
    }

    fn constituents_document<'a>(matching: impl Iterator<Item = &'a XmlElement>) -> String {
        api_document(&matching.map(XmlElement::render).collect::<String>())
    }
}

pub type Db = Arc<RwLock<Store>>;

#[derive(Clone)]
pub struct AppState {
    api_id: String,
    api_secret: String,
    pub db: Db,
}

impl AppState {
    pub fn new(api_id: &str, api_secret: &str) -> Self {
        Self {
            api_id: api_id.to_string(),
            api_secret: api_secret.to_string(),
            db: Db::default(),
        }
    }

    /// Registers a deferred job that answers 503 for `pending_polls` polls
    /// and then returns `result`.
    pub async fn seed_deferred(&self, deferred_id: &str, pending_polls: u32, result: &str) {
        self.db.write().await.deferred.insert(
            deferred_id.to_string(),
            Deferred {
                pending_polls,
                result: result.to_string(),
            },
        );
    }

    pub async fn seed_dataset_map(&self, map_type: &str) -> u64 {
        let mut db = self.db.write().await;
        let map_id = db.next_id();
        db.dataset_maps.push(DatasetMap {
            map_id,
            map_type: map_type.to_string(),
        });
        map_id
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(DEFAULT_API_ID, DEFAULT_API_SECRET)
    }
}

pub fn app(state: AppState) -> Router {
    let api = Router::new()
        .route("/page/api/cons/list_dataset_maps", get(list_dataset_maps))
        .route("/page/api/cons/upload_dataset_map", put(upload_dataset_map))
        .route("/page/api/cons/delete_dataset_map", post(delete_dataset_map))
        .route("/page/api/cons/set_constituent_data", post(set_constituent_data))
        .route("/page/api/cons/email_unsubscribe", post(email_unsubscribe))
        .route("/page/api/cons/get_constituents", get(get_constituents))
        .route("/page/api/cons/get_constituents_by_id", get(get_constituents_by_id))
        .route("/page/api/cons/get_constituents_by_email", get(get_constituents_by_email))
        .route("/page/api/cons/delete_constituents_by_id", post(delete_constituents_by_id))
        .route("/page/api/event/create_event", post(create_event))
        .route("/page/api/event/update_event", post(update_event))
        .route("/page/api/event/list_event_types", get(list_event_types))
        .route(
            "/page/api/contribution/add_external_contribution",
            post(add_external_contribution),
        )
        .route(
            "/page/api/cons_group/get_constituent_group_by_slug",
            get(get_group_by_slug),
        )
        .route("/page/api/cons_group/add_constituent_groups", post(add_groups))
        .route("/page/api/cons_group/list_constituent_groups", get(list_groups))
        .route("/page/api/cons_group/add_cons_ids_to_group", post(add_cons_ids))
        .route("/page/api/get_deferred_results", get(get_deferred_results))
        .route_layer(middleware::from_fn_with_state(state.clone(), verify_signature));

    let graph = Router::new().route("/page/graph/rsvp/add", post(add_rsvp));

    api.merge(graph).with_state(state)
}

pub async fn run(listener: TcpListener, state: AppState) -> Result<(), std::io::Error> {
    axum::serve(listener, app(state)).await
}

// ---------------------------------------------------------------------------
// Signing
// ---------------------------------------------------------------------------

fn encode_component(raw: &str) -> String {
    raw.split(' ')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Expected `api_mac` for a request to `path` carrying `params` (without `api_mac`).
pub fn expected_signature(
    api_id: &str,
    api_secret: &str,
    path: &str,
    params: &BTreeMap<String, String>,
) -> Option<String> {
    let api_ts = params.get("api_ts")?;
    let canonical = params
        .iter()
        .map(|(k, v)| format!("{}={}", encode_component(k), encode_component(v)))
        .collect::<Vec<_>>()
        .join("&");
    let signing_string = format!("{api_id}\n{api_ts}\n{path}\n{canonical}");
    let mut mac = Hmac::<Sha1>::new_from_slice(api_secret.as_bytes()).ok()?;
    mac.update(signing_string.as_bytes());
    Some(hex::encode(mac.finalize().into_bytes()))
}

async fn verify_signature(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let path = request.uri().path().to_string();
    let mut params: BTreeMap<String, String> =
        url::form_urlencoded::parse(request.uri().query().unwrap_or("").as_bytes())
            .into_owned()
            .collect();

    let Some(api_mac) = params.remove("api_mac") else {
        return (StatusCode::FORBIDDEN, "missing api_mac").into_response();
    };
    if params.get("api_id") != Some(&state.api_id) || params.get("api_ver").map(String::as_str) != Some("2") {
        return (StatusCode::FORBIDDEN, "unknown api_id or api_ver").into_response();
    }
    let expected = expected_signature(&state.api_id, &state.api_secret, &path, &params);
    if expected.as_deref() != Some(api_mac.as_str()) {
        warn!(path, "rejected request with invalid signature");
        return (StatusCode::FORBIDDEN, "invalid signature").into_response();
    }
    next.run(request).await
}

// ---------------------------------------------------------------------------
// Dataset maps
// ---------------------------------------------------------------------------

async fn list_dataset_maps(State(state): State<AppState>) -> String {
    let db = state.db.read().await;
    json!({ "data": db.dataset_maps }).to_string()
}

async fn upload_dataset_map(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> (StatusCode, String) {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if content_type != "text/csv" {
        return (StatusCode::BAD_REQUEST, "expected text/csv".to_string());
    }
    let Some(map_type) = body.lines().next().and_then(|h| h.split(',').next()) else {
        return (StatusCode::BAD_REQUEST, "empty upload".to_string());
    };
    let mut db = state.db.write().await;
    let map_id = db.next_id();
    db.dataset_maps.push(DatasetMap {
        map_id,
        map_type: map_type.to_string(),
    });
    (StatusCode::ACCEPTED, "accepted".to_string())
}

#[derive(Deserialize)]
struct DeleteDatasetMap {
    map_id: u64,
}

async fn delete_dataset_map(State(state): State<AppState>, body: String) -> (StatusCode, String) {
    let Ok(input) = serde_json::from_str::<DeleteDatasetMap>(&body) else {
        return (StatusCode::BAD_REQUEST, "expected {\"map_id\": n}".to_string());
    };
    let mut db = state.db.write().await;
    let before = db.dataset_maps.len();
    db.dataset_maps.retain(|m| m.map_id != input.map_id);
    if db.dataset_maps.len() == before {
        return (StatusCode::NOT_FOUND, "Something bad happened".to_string());
    }
    (StatusCode::OK, String::new())
}

// ---------------------------------------------------------------------------
// Constituents
// ---------------------------------------------------------------------------

fn id_list(params: &HashMap<String, String>, key: &str) -> Vec<String> {
    params
        .get(key)
        .map(|ids| ids.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect())
        .unwrap_or_default()
}

async fn set_constituent_data(State(state): State<AppState>, body: String) -> (StatusCode, String) {
    let Some(root) = parse_xml(&body).filter(|root| root.name == "api") else {
        return (StatusCode::BAD_REQUEST, "expected <api><cons> document".to_string());
    };
    let records: Vec<&XmlElement> = root.children_named("cons").collect();
    if records.is_empty() {
        return (StatusCode::BAD_REQUEST, "expected <api><cons> document".to_string());
    }

    let mut db = state.db.write().await;
    let mut results = String::new();
    for record in records {
        let mut cons = record.clone();
        let (id, is_new) = match cons.attribute("id") {
            Some(id) => (id.to_string(), 0),
            None => (db.next_id().to_string(), 1),
        };
        cons.set_attribute("id", id.clone());
        match db.constituents.iter_mut().find(|c| c.attribute("id") == Some(id.as_str())) {
            Some(existing) => *existing = cons,
            None => db.constituents.push(cons),
        }
        let _ = write!(results, r#"<cons id="{}" is_new="{is_new}"/>"#, escape(id.as_str()));
    }
    (
        StatusCode::OK,
        format!(r#"<?xml version="1.0" encoding="utf-8"?><api>{results}</api>"#),
    )
}

async fn get_constituents_by_id(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> String {
    let ids = id_list(&params, "cons_ids");
    let db = state.db.read().await;
    Store::constituents_document(
        db.constituents
            .iter()
            .filter(|c| c.attribute("id").is_some_and(|id| ids.iter().any(|wanted| wanted == id))),
    )
}

async fn get_constituents_by_email(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> String {
    let emails = id_list(&params, "emails");
    let db = state.db.read().await;
    Store::constituents_document(
        db.constituents
            .iter()
            .filter(|c| Store::constituent_emails(c).any(|e| emails.iter().any(|wanted| wanted == e))),
    )
}

/// Answers with a deferred id; the matching document is ready on the second poll.
async fn get_constituents(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> (StatusCode, String) {
    let filter = params.get("filter").map(String::as_str).unwrap_or_default();
    let (key, value) = filter.split_once('=').unwrap_or((filter, ""));
    if !matches!(key, "" | "email" | "cons_id") {
        return (StatusCode::BAD_REQUEST, format!("unsupported filter: {key}"));
    }
    let wanted = |c: &&XmlElement| match key {
        "email" => Store::constituent_emails(c).any(|e| e == value),
        "cons_id" => c.attribute("id") == Some(value),
        _ => true,
    };

    let mut db = state.db.write().await;
    let document = Store::constituents_document(db.constituents.iter().filter(wanted));
    let deferred_id = format!("deferred-{}", db.next_id());
    db.deferred.insert(
        deferred_id.clone(),
        Deferred {
            pending_polls: 1,
            result: document,
        },
    );
    (StatusCode::OK, deferred_id)
}

async fn delete_constituents_by_id(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> (StatusCode, String) {
    let ids = id_list(&params, "cons_ids");
    if ids.is_empty() {
        return (StatusCode::BAD_REQUEST, "cons_ids is required".to_string());
    }
    state
        .db
        .write()
        .await
        .constituents
        .retain(|c| !c.attribute("id").is_some_and(|id| ids.iter().any(|gone| gone == id)));
    (StatusCode::OK, String::new())
}

async fn email_unsubscribe(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> (StatusCode, String) {
    let Some(email) = params.get("email") else {
        return (StatusCode::BAD_REQUEST, "email is required".to_string());
    };
    state.db.write().await.unsubscribed.push(Unsubscribe {
        email: email.clone(),
        reason: params.get("reason").cloned().unwrap_or_default(),
    });
    (StatusCode::OK, String::new())
}

// ---------------------------------------------------------------------------
// Contributions
// ---------------------------------------------------------------------------

async fn add_external_contribution(State(state): State<AppState>, body: String) -> String {
    let Ok(Value::Array(items)) = serde_json::from_str::<Value>(&body) else {
        return BAD_CONTRIBUTION_BODY.to_string();
    };

    let mut successes = 0;
    let mut missing_ids = 0;
    let mut errors = serde_json::Map::new();
    let mut db = state.db.write().await;
    for item in items {
        let Some(external_id) = item.get("external_id").and_then(Value::as_str).map(str::to_string) else {
            missing_ids += 1;
            continue;
        };
        let mut messages = Vec::new();
        if item.get("source").is_some_and(|s| !s.is_array()) {
            messages.push("Parameter source is expected to be a list of strings");
        }
        if item
            .get("email")
            .and_then(Value::as_str)
            .is_some_and(|e| !e.contains('@'))
        {
            messages.push("Parameter email does not appear to be a valid email address.");
        }
        if messages.is_empty() {
            successes += 1;
            db.contributions.push(item);
        } else {
            errors.insert(external_id, json!(messages));
        }
    }

    json!({
        "summary": {
            "sucesses": successes,
            "failures": errors.len(),
            "missing_ids": missing_ids,
        },
        "errors": errors,
    })
    .to_string()
}

// ---------------------------------------------------------------------------
// Constituent groups
// ---------------------------------------------------------------------------

fn group_xml(group: &Group) -> String {
    format!(
        "<cons_group id=\"{}\"><name>{}</name><slug>{}</slug><description>{}</description>\
         <group_type>{}</group_type><members>{}</members></cons_group>",
        group.id,
        escape(group.name.as_str()),
        escape(group.slug.as_str()),
        escape(group.description.as_str()),
        escape(group.group_type.as_str()),
        group.members.len()
    )
}

fn api_document(inner: &str) -> String {
    format!("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<api>\n{inner}</api>")
}

async fn get_group_by_slug(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> String {
    let db = state.db.read().await;
    let slug = params.get("slug").map(String::as_str).unwrap_or_default();
    let inner = db
        .groups
        .iter()
        .find(|g| g.slug == slug)
        .map(group_xml)
        .unwrap_or_default();
    api_document(&inner)
}

async fn add_groups(State(state): State<AppState>, body: String) -> (StatusCode, String) {
    let Some(group) = parse_xml(&body).and_then(|root| root.children_named("cons_group").next().cloned()) else {
        return (StatusCode::BAD_REQUEST, "expected <api><cons_group> document".to_string());
    };
    let text = |name: &str| group.child_text(name).unwrap_or_default().to_string();
    let slug = text("slug");
    if slug.is_empty() {
        return (StatusCode::BAD_REQUEST, "slug is required".to_string());
    }
    let mut db = state.db.write().await;
    if let Some(existing) = db.groups.iter().find(|g| g.slug == slug) {
        return (
            StatusCode::OK,
            api_document(&format!("<cons_group id='{}'>\n</cons_group>\n", existing.id)),
        );
    }
    let id = db.next_id();
    db.groups.push(Group {
        id,
        name: text("name"),
        slug,
        description: text("description"),
        group_type: text("group_type"),
        members: Vec::new(),
    });
    (
        StatusCode::OK,
        api_document(&format!("<cons_group id='{id}'>\n</cons_group>\n")),
    )
}

async fn list_groups(State(state): State<AppState>) -> String {
    let db = state.db.read().await;
    let inner: String = db.groups.iter().map(group_xml).collect();
    api_document(&inner)
}

async fn add_cons_ids(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> (StatusCode, String) {
    let group_id = params.get("cons_group_id").and_then(|id| id.parse::<u64>().ok());
    let ids: Vec<String> = params
        .get("cons_ids")
        .map(|ids| ids.split(',').filter(|s| !s.is_empty()).map(str::to_string).collect())
        .unwrap_or_default();
    let mut db = state.db.write().await;
    let Some(group) = db.groups.iter_mut().find(|g| Some(g.id) == group_id) else {
        return (StatusCode::NOT_FOUND, "no such group".to_string());
    };
    group.members.extend(ids);
    (StatusCode::OK, String::new())
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

fn event_values(params: &HashMap<String, String>) -> Result<serde_json::Map<String, Value>, String> {
    if params.get("event_api_version").map(String::as_str) != Some("2") {
        return Err("event_api_version must be 2".to_string());
    }
    match params.get("values").map(|v| serde_json::from_str::<Value>(v)) {
        Some(Ok(Value::Object(values))) => Ok(values),
        _ => Err("values must be a JSON object".to_string()),
    }
}

fn event_validation_errors(values: &serde_json::Map<String, Value>) -> serde_json::Map<String, Value> {
    let mut errors = serde_json::Map::new();
    for field in ["name", "creator_cons_id"] {
        if values.get(field).and_then(Value::as_str).map_or(true, str::is_empty) {
            errors.insert(field.to_string(), json!(["required"]));
        }
    }
    if values.get("event_type_id").and_then(Value::as_u64).is_none() {
        errors.insert("event_type_id".to_string(), json!(["required"]));
    }
    errors
}

fn event_response(id: Option<&str>, errors: serde_json::Map<String, Value>) -> String {
    json!({ "event_id_obfuscated": id, "validation_errors": errors }).to_string()
}

async fn create_event(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> (StatusCode, String) {
    let mut values = match event_values(&params) {
        Ok(values) => values,
        Err(message) => return (StatusCode::BAD_REQUEST, message),
    };
    let errors = event_validation_errors(&values);
    if !errors.is_empty() {
        return (StatusCode::OK, event_response(None, errors));
    }
    let mut db = state.db.write().await;
    let id = format!("ev{}", db.next_id());
    values.insert("event_id_obfuscated".to_string(), json!(id));
    db.events.push(Value::Object(values));
    (StatusCode::OK, event_response(Some(&id), errors))
}

async fn update_event(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> (StatusCode, String) {
    let values = match event_values(&params) {
        Ok(values) => values,
        Err(message) => return (StatusCode::BAD_REQUEST, message),
    };
    let mut errors = event_validation_errors(&values);
    let id = values
        .get("event_id_obfuscated")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let mut db = state.db.write().await;
    let existing = db.events.iter_mut().find(|e| e["event_id_obfuscated"] == id.as_str());
    match existing {
        Some(event) if errors.is_empty() => *event = Value::Object(values),
        Some(_) => {}
        None => {
            errors.insert("event_id_obfuscated".to_string(), json!("unknown event"));
        }
    }
    (StatusCode::OK, event_response(Some(&id), errors))
}

async fn list_event_types() -> String {
    let types: Vec<Value> = EVENT_TYPES
        .iter()
        .map(|(id, name, description)| json!({ "event_type_id": id, "name": name, "description": description }))
        .collect();
    Value::Array(types).to_string()
}

// ---------------------------------------------------------------------------
// Deferred results
// ---------------------------------------------------------------------------

async fn get_deferred_results(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> (StatusCode, String) {
    let id = params.get("deferred_id").cloned().unwrap_or_default();
    let mut db = state.db.write().await;
    let Some(job) = db.deferred.get_mut(&id) else {
        return (StatusCode::GONE, "unknown deferred_id".to_string());
    };
    if job.pending_polls > 0 {
        job.pending_polls -= 1;
        return (StatusCode::SERVICE_UNAVAILABLE, "not ready".to_string());
    }
    (StatusCode::OK, job.result.clone())
}

// ---------------------------------------------------------------------------
// Graph API
// ---------------------------------------------------------------------------

async fn add_rsvp(
    State(state): State<AppState>,
    Form(fields): Form<HashMap<String, String>>,
) -> (StatusCode, String) {
    if !fields.contains_key("event_id_obfuscated") {
        return (StatusCode::BAD_REQUEST, "event_id_obfuscated is required".to_string());
    }
    state.db.write().await.rsvps.push(fields);
    (StatusCode::OK, "ok".to_string())
}
