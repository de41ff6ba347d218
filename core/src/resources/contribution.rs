//! External contributions, written in bulk as a JSON array.
//!
//! The service answers 200 for every outcome; `Connection` classifies the
//! body, so a bad payload, missing external ids and per-item validation
//! messages all come back from `save` as their own `ApiError` variants.

use serde::{Deserialize, Serialize};

use crate::connection::Connection;
use crate::error::ApiError;
use crate::request::ApiRequest;

pub const ADD_EXTERNAL_CONTRIBUTION_PATH: &str = "/contribution/add_external_contribution";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Contribution {
    /// Caller-assigned id; validation errors are keyed by it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub firstname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub middlename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lastname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suffix: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_dt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_amt: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cc_type_cd: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway_transaction_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub contribution_page_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stg_contribution_recurring_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contribution_page_slug: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outreach_page_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opt_compliance: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub addr1: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub addr2: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_cd: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub employer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub occupation: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_fields: Option<serde_json::Map<String, serde_json::Value>>,
}

impl Contribution {
    pub fn save(&self, connection: &Connection) -> Result<(), ApiError> {
        save_all(connection, std::slice::from_ref(self))
    }
}

/// Submits `contributions` in one call.
pub fn save_all(connection: &Connection, contributions: &[Contribution]) -> Result<(), ApiError> {
    let body = serde_json::to_string(contributions).map_err(|e| ApiError::Serialization(e.to_string()))?;
    connection.perform_request(
        &ApiRequest::post(ADD_EXTERNAL_CONTRIBUTION_PATH)
            .accept("application/json")
            .body(body),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{self, url_path, MockTransport};

    fn contribution() -> Contribution {
        Contribution {
            external_id: Some("GUID_1234".to_string()),
            firstname: Some("carlos".to_string()),
            lastname: Some("the jackal".to_string()),
            transaction_amt: Some(1.0),
            transaction_dt: Some("2012-12-31 23:59:59".to_string()),
            cc_type_cd: Some("vs".to_string()),
            ..Contribution::default()
        }
    }

    #[test]
    fn unset_page_fields_are_omitted() {
        let json = serde_json::to_value(contribution()).unwrap();
        assert!(json.get("contribution_page_id").is_none());
        assert!(json.get("contribution_page_slug").is_none());

        let with_page = Contribution {
            contribution_page_id: Some(4),
            contribution_page_slug: Some("donate-here-12".to_string()),
            ..contribution()
        };
        let json = serde_json::to_value(with_page).unwrap();
        assert_eq!(json["contribution_page_id"], 4);
        assert_eq!(json["contribution_page_slug"], "donate-here-12");
    }

    #[test]
    fn save_posts_json_array_accepting_json() {
        let transport = MockTransport::new();
        transport.respond(
            200,
            r#"{"summary":{"sucesses":1,"failures":0,"missing_ids":0},"errors":{}}"#,
        );
        let conn = testing::connection(&transport);
        contribution().save(&conn).unwrap();

        let sent = transport.last_request();
        assert_eq!(url_path(&sent), "/page/api/contribution/add_external_contribution");
        assert_eq!(sent.header("Accept"), Some("application/json"));
        let body: serde_json::Value = serde_json::from_str(sent.body.as_deref().unwrap()).unwrap();
        assert_eq!(body[0]["external_id"], "GUID_1234");
        assert!(body.as_array().is_some_and(|a| a.len() == 1));
    }

    #[test]
    fn bad_request_surfaces_diagnostic() {
        let transport = MockTransport::new();
        transport.respond(200, "Method add_external_contribution expects a JSON array.");
        let conn = testing::connection(&transport);
        let err = contribution().save(&conn).unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(ref msg) if msg.contains("expects a JSON array")));
    }

    #[test]
    fn missing_id_is_reported() {
        let transport = MockTransport::new();
        transport.respond(
            200,
            r#"{"summary":{"sucesses":0,"failures":0,"missing_ids":1},"errors":{}}"#,
        );
        let conn = testing::connection(&transport);
        assert!(matches!(contribution().save(&conn), Err(ApiError::MissingIdentifier(1))));
    }

    #[test]
    fn validation_messages_are_reported_per_item() {
        let transport = MockTransport::new();
        transport.respond(
            200,
            r#"{"summary":{"sucesses":0,"failures":1,"missing_ids":0},
                "errors":{"UNIQUE_ID_1234567890":[
                    "Parameter source is expected to be a list of strings",
                    "Parameter email does not appear to be a valid email address."]}}"#,
        );
        let conn = testing::connection(&transport);
        let err = contribution().save(&conn).unwrap_err();
        assert!(err
            .to_string()
            .contains("UNIQUE_ID_1234567890): Parameter source is expected to be a list of strings, Parameter email"));
    }
}
