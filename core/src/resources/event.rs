//! Events and their RSVPs.
//!
//! Events are created and updated through the signed API with a JSON
//! `values` document. RSVPs go through the unsigned graph API.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::{field_params, flag, FieldTable};
use crate::classify::ResponseShape;
use crate::collection::fetch_records;
use crate::connection::Connection;
use crate::error::{ApiError, ValidationErrors};
use crate::http::HttpMethod;
use crate::request::ApiRequest;
use crate::sign::Params;

pub const RSVP_ADD_PATH: &str = "/rsvp/add";
pub const CREATE_EVENT_PATH: &str = "/event/create_event";
pub const UPDATE_EVENT_PATH: &str = "/event/update_event";
pub const LIST_EVENT_TYPES_PATH: &str = "/event/list_event_types";

pub const EVENT_API_VERSION: &str = "2";
const SYSTEM_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// An event. `event_id_obfuscated` is assigned by the service on create.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Event {
    pub event_id_obfuscated: Option<String>,
    pub event_type_id: u64,
    pub creator_cons_id: String,
    pub name: String,
    pub description: Option<String>,
    pub venue_name: Option<String>,
    pub venue_addr1: Option<String>,
    pub venue_addr2: Option<String>,
    pub venue_city: Option<String>,
    pub venue_state_cd: Option<String>,
    pub venue_zip: Option<String>,
    pub venue_country: Option<String>,
    pub venue_directions: Option<String>,
    /// Start and end in the service's system time zone.
    pub start_date: Option<NaiveDateTime>,
    pub end_date: Option<NaiveDateTime>,
    pub local_timezone: Option<String>,
    pub attendee_volunteer_message: Option<String>,
    pub contact_phone: Option<String>,
    pub is_searchable: Option<bool>,
    pub public_phone: Option<bool>,
    pub host_receive_rsvp_emails: Option<bool>,
    pub rsvp_use_reminder_email: Option<bool>,
    pub rsvp_email_reminder_hours: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct EventSaveResponse {
    #[serde(default)]
    event_id_obfuscated: Option<String>,
    #[serde(default)]
    validation_errors: Option<Value>,
}

impl Event {
    const TEXT_FIELDS: FieldTable<Self> = &[
        ("event_id_obfuscated", |e: &Self| e.event_id_obfuscated.clone()),
        ("creator_cons_id", |e: &Self| Some(e.creator_cons_id.clone())),
        ("name", |e: &Self| Some(e.name.clone())),
        ("description", |e: &Self| e.description.clone()),
        ("venue_name", |e: &Self| e.venue_name.clone()),
        ("venue_addr1", |e: &Self| e.venue_addr1.clone()),
        ("venue_addr2", |e: &Self| e.venue_addr2.clone()),
        ("venue_city", |e: &Self| e.venue_city.clone()),
        ("venue_state_cd", |e: &Self| e.venue_state_cd.clone()),
        ("venue_zip", |e: &Self| e.venue_zip.clone()),
        ("venue_country", |e: &Self| e.venue_country.clone()),
        ("venue_directions", |e: &Self| e.venue_directions.clone()),
        ("local_timezone", |e: &Self| e.local_timezone.clone()),
        ("attendee_volunteer_message", |e: &Self| e.attendee_volunteer_message.clone()),
        ("contact_phone", |e: &Self| e.contact_phone.clone()),
    ];

    const FLAGS: &'static [(&'static str, fn(&Self) -> Option<bool>)] = &[
        ("is_searchable", |e: &Self| e.is_searchable),
        ("public_phone", |e: &Self| e.public_phone),
        ("host_receive_rsvp_emails", |e: &Self| e.host_receive_rsvp_emails),
        ("rsvp_use_reminder_email", |e: &Self| e.rsvp_use_reminder_email),
    ];

    pub fn validate(&self) -> Result<(), ApiError> {
        if self.name.is_empty() {
            return Err(ApiError::Invalid("event name is missing".to_string()));
        }
        match (self.start_date, self.end_date) {
            (None, Some(_)) => Err(ApiError::Invalid("end_date requires start_date".to_string())),
            (Some(start), Some(end)) if end < start => {
                Err(ApiError::Invalid("end_date is before start_date".to_string()))
            }
            _ => Ok(()),
        }
    }

    /// The `values` document sent to create and update calls.
    pub fn to_values(&self) -> Result<Value, ApiError> {
        self.validate()?;
        let mut values = Map::new();
        values.insert("event_type_id".to_string(), json!(self.event_type_id));
        for (name, get) in Self::TEXT_FIELDS {
            if let Some(value) = get(self) {
                values.insert(name.to_string(), Value::String(value));
            }
        }
        for (name, get) in Self::FLAGS {
            if let Some(value) = get(self) {
                values.insert(name.to_string(), json!(u8::from(value)));
            }
        }
        if let Some(hours) = self.rsvp_email_reminder_hours {
            values.insert("rsvp_email_reminder_hours".to_string(), json!(hours));
        }
        if let Some(start) = self.start_date {
            let mut day = Map::new();
            day.insert(
                "start_datetime_system".to_string(),
                Value::String(start.format(SYSTEM_DATETIME_FORMAT).to_string()),
            );
            if let Some(end) = self.end_date {
                day.insert("duration".to_string(), json!((end - start).num_minutes()));
            }
            values.insert("days".to_string(), Value::Array(vec![Value::Object(day)]));
        }
        Ok(Value::Object(values))
    }

    /// Creates the event, or updates it when it already has an id. On create
    /// the assigned id is stored on `self`.
    pub fn save(&mut self, connection: &Connection) -> Result<(), ApiError> {
        let values = serde_json::to_string(&self.to_values()?)
            .map_err(|e| ApiError::Serialization(e.to_string()))?;
        let path = if self.event_id_obfuscated.is_some() {
            UPDATE_EVENT_PATH
        } else {
            CREATE_EVENT_PATH
        };
        let request = ApiRequest::post(path)
            .param("event_api_version", EVENT_API_VERSION)
            .param("values", values)
            .accept("application/json");
        let body = connection.perform_request(&request)?;
        let response = parse_save_response(&body)?;
        if let Some(id) = response.event_id_obfuscated.filter(|id| !id.is_empty()) {
            self.event_id_obfuscated = Some(id);
        }
        Ok(())
    }
}

/// Reads `{event_id_obfuscated, validation_errors}`. Each validation entry
/// may be a single message or a list of them.
fn parse_save_response(body: &str) -> Result<EventSaveResponse, ApiError> {
    if body.trim().is_empty() {
        return Ok(EventSaveResponse::default());
    }
    let response: EventSaveResponse =
        serde_json::from_str(body).map_err(|e| ApiError::Deserialization(e.to_string()))?;

    let mut errors = ValidationErrors::default();
    if let Some(Value::Object(fields)) = &response.validation_errors {
        for (field, messages) in fields {
            let messages = match messages {
                Value::Array(items) => items.iter().map(message_text).collect(),
                other => vec![message_text(other)],
            };
            if !messages.is_empty() {
                errors.0.insert(field.clone(), messages);
            }
        }
    }
    if errors.0.is_empty() {
        Ok(response)
    } else {
        Err(ApiError::ValidationErrors(errors))
    }
}

fn message_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventType {
    pub event_type_id: u64,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl EventType {
    pub fn list(connection: &Connection) -> Result<Vec<Self>, ApiError> {
        fetch_records(connection, LIST_EVENT_TYPES_PATH, &Params::new(), ResponseShape::Json)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRsvp {
    pub event_id_obfuscated: String,
    pub will_attend: bool,
    pub email: Option<String>,
    pub zip: Option<String>,
    pub country: Option<String>,
    pub firstname: Option<String>,
    pub lastname: Option<String>,
    pub phone: Option<String>,
    pub guests: Option<u32>,
}

impl EventRsvp {
    const FIELDS: FieldTable<Self> = &[
        ("event_id_obfuscated", |r: &Self| Some(r.event_id_obfuscated.clone())),
        ("will_attend", |r: &Self| flag(Some(r.will_attend))),
        ("email", |r: &Self| r.email.clone()),
        ("zip", |r: &Self| r.zip.clone()),
        ("country", |r: &Self| r.country.clone()),
        ("firstname", |r: &Self| r.firstname.clone()),
        ("lastname", |r: &Self| r.lastname.clone()),
        ("phone", |r: &Self| r.phone.clone()),
        ("guests", |r: &Self| r.guests.map(|g| g.to_string())),
    ];

    pub fn save(&self, connection: &Connection) -> Result<String, ApiError> {
        if self.event_id_obfuscated.is_empty() {
            return Err(ApiError::Invalid("event_id_obfuscated is missing".to_string()));
        }
        connection.perform_graph_request(RSVP_ADD_PATH, &field_params(self, Self::FIELDS), HttpMethod::Post)
    }
}
