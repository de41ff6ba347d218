//! Constituent records and their nested contact details.
//!
//! Writes go through `ConstituentData::set`. Reads come back as
//! `Constituent`: lookups by id or email answer directly, while a filtered
//! search answers with a deferred id that is polled until the result is
//! ready.

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{flag, lenient_f64, lenient_flag, one_or_many, write_fields, FieldTable};
use crate::classify::ResponseShape;
use crate::collection::{fetch_records, parse_collection, ApiRecord};
use crate::connection::Connection;
use crate::deferred::{poll_deferred_results, PollPolicy};
use crate::error::ApiError;
use crate::request::ApiRequest;
use crate::sign::Params;
use crate::xml::{self, XmlWriter};

pub const SET_CONSTITUENT_DATA_PATH: &str = "/cons/set_constituent_data";
pub const EMAIL_UNSUBSCRIBE_PATH: &str = "/cons/email_unsubscribe";
pub const GET_CONSTITUENTS_PATH: &str = "/cons/get_constituents";
pub const GET_CONSTITUENTS_BY_ID_PATH: &str = "/cons/get_constituents_by_id";
pub const GET_CONSTITUENTS_BY_EMAIL_PATH: &str = "/cons/get_constituents_by_email";
pub const DELETE_CONSTITUENTS_BY_ID_PATH: &str = "/cons/delete_constituents_by_id";

/// Bundles requested when the caller does not name any.
pub const DEFAULT_BUNDLES: &[&str] = &["cons_group"];

/// Identifier of a constituent in an external system.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalId {
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConstituentAddress {
    pub addr1: Option<String>,
    pub addr2: Option<String>,
    pub city: Option<String>,
    pub state_cd: Option<String>,
    pub zip: Option<String>,
    pub zip_4: Option<String>,
    pub country: Option<String>,
    #[serde(default, deserialize_with = "lenient_flag")]
    pub is_primary: Option<bool>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub latitude: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub longitude: Option<f64>,
}

impl ConstituentAddress {
    pub const FIELDS: FieldTable<Self> = &[
        ("addr1", |a: &Self| a.addr1.clone()),
        ("addr2", |a: &Self| a.addr2.clone()),
        ("city", |a: &Self| a.city.clone()),
        ("state_cd", |a: &Self| a.state_cd.clone()),
        ("zip", |a: &Self| a.zip.clone()),
        ("zip_4", |a: &Self| a.zip_4.clone()),
        ("country", |a: &Self| a.country.clone()),
        ("is_primary", |a: &Self| flag(a.is_primary)),
        ("latitude", |a: &Self| a.latitude.map(|v| v.to_string())),
        ("longitude", |a: &Self| a.longitude.map(|v| v.to_string())),
    ];
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstituentEmail {
    pub email: Option<String>,
    pub email_type: Option<String>,
    #[serde(default, deserialize_with = "lenient_flag")]
    pub is_subscribed: Option<bool>,
    #[serde(default, deserialize_with = "lenient_flag")]
    pub is_primary: Option<bool>,
}

impl ConstituentEmail {
    pub const FIELDS: FieldTable<Self> = &[
        ("email", |e: &Self| e.email.clone()),
        ("email_type", |e: &Self| e.email_type.clone()),
        ("is_subscribed", |e: &Self| flag(e.is_subscribed)),
        ("is_primary", |e: &Self| flag(e.is_primary)),
    ];
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstituentPhone {
    pub phone: Option<String>,
    pub phone_type: Option<String>,
    #[serde(default, deserialize_with = "lenient_flag")]
    pub is_subscribed: Option<bool>,
    #[serde(default, deserialize_with = "lenient_flag")]
    pub is_primary: Option<bool>,
}

impl ConstituentPhone {
    pub const FIELDS: FieldTable<Self> = &[
        ("phone", |p: &Self| p.phone.clone()),
        ("phone_type", |p: &Self| p.phone_type.clone()),
        ("is_subscribed", |p: &Self| flag(p.is_subscribed)),
        ("is_primary", |p: &Self| flag(p.is_primary)),
    ];
}

/// Payload for `set_constituent_data`, which creates or updates a
/// constituent matched by `id` or `ext_id`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConstituentData {
    pub id: Option<String>,
    pub firstname: Option<String>,
    pub lastname: Option<String>,
    pub is_banned: Option<bool>,
    pub create_dt: Option<String>,
    pub ext_id: Option<ExternalId>,
    #[serde(default)]
    pub emails: Vec<ConstituentEmail>,
    #[serde(default)]
    pub addresses: Vec<ConstituentAddress>,
    #[serde(default)]
    pub phones: Vec<ConstituentPhone>,
    /// Ids of the groups the constituent belongs to.
    #[serde(default)]
    pub groups: Vec<String>,
}

/// One `<cons>` entry of a `set_constituent_data` response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetConstituentResult {
    pub id: String,
    pub is_new: bool,
}

impl ConstituentData {
    const FIELDS: FieldTable<Self> = &[
        ("firstname", |c: &Self| c.firstname.clone()),
        ("lastname", |c: &Self| c.lastname.clone()),
        ("is_banned", |c: &Self| flag(c.is_banned)),
        ("create_dt", |c: &Self| c.create_dt.clone()),
    ];

    pub fn to_xml(&self) -> Result<String, ApiError> {
        let mut attributes = Vec::new();
        if let Some(id) = &self.id {
            attributes.push(("id", id.clone()));
        }
        if let Some(ext) = &self.ext_id {
            if let Some(id) = &ext.id {
                attributes.push(("ext_id", id.clone()));
            }
            if let Some(kind) = &ext.kind {
                attributes.push(("ext_type", kind.clone()));
            }
        }

        let mut w = XmlWriter::new();
        w.open("api", &[]).open("cons", &attributes);
        write_fields(&mut w, self, Self::FIELDS);
        for email in &self.emails {
            w.open("cons_email", &[]);
            write_fields(&mut w, email, ConstituentEmail::FIELDS);
            w.close("cons_email");
        }
        for address in &self.addresses {
            w.open("cons_addr", &[]);
            write_fields(&mut w, address, ConstituentAddress::FIELDS);
            w.close("cons_addr");
        }
        for phone in &self.phones {
            w.open("cons_phone", &[]);
            write_fields(&mut w, phone, ConstituentPhone::FIELDS);
            w.close("cons_phone");
        }
        for group in &self.groups {
            w.empty("cons_group", &[("id", group.clone())]);
        }
        w.close("cons").close("api");
        w.finish()
    }

    /// Creates or updates the constituent.
    pub fn set(&self, connection: &Connection) -> Result<Vec<SetConstituentResult>, ApiError> {
        let body = connection
            .perform_request(&ApiRequest::post(SET_CONSTITUENT_DATA_PATH).body(self.to_xml()?))?;
        parse_set_response(&body)
    }
}

fn parse_set_response(body: &str) -> Result<Vec<SetConstituentResult>, ApiError> {
    if body.trim().is_empty() {
        return Ok(Vec::new());
    }
    let root = xml::parse(body)?;
    root.children_named("cons")
        .map(|cons| -> Result<SetConstituentResult, ApiError> {
            let id = cons
                .attribute("id")
                .ok_or_else(|| ApiError::Deserialization("cons element without id".to_string()))?;
            Ok(SetConstituentResult {
                id: id.to_string(),
                is_new: cons.attribute("is_new") == Some("1"),
            })
        })
        .collect()
}

/// Group reference inside a `<cons>` record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMembership {
    pub id: String,
}

/// A constituent as returned by the lookup calls.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Constituent {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firstname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub middlename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lastname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suffix: Option<String>,
    #[serde(default, deserialize_with = "lenient_flag", skip_serializing_if = "Option::is_none")]
    pub is_banned: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_dt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_dt: Option<String>,
    #[serde(default, rename = "cons_email", deserialize_with = "one_or_many")]
    pub emails: Vec<ConstituentEmail>,
    #[serde(default, rename = "cons_addr", deserialize_with = "one_or_many")]
    pub addresses: Vec<ConstituentAddress>,
    #[serde(default, rename = "cons_phone", deserialize_with = "one_or_many")]
    pub phones: Vec<ConstituentPhone>,
    #[serde(default, rename = "cons_group", deserialize_with = "one_or_many")]
    pub groups: Vec<GroupMembership>,
}

fn lookup_params(key: &str, value: String, bundles: &[&str]) -> Params {
    let mut params = Params::new();
    params.insert(key.to_string(), value);
    if !bundles.is_empty() {
        params.insert("bundles".to_string(), bundles.join(","));
    }
    params
}

pub fn get_constituents_by_id(
    connection: &Connection,
    cons_ids: &[&str],
    bundles: &[&str],
) -> Result<Vec<Constituent>, ApiError> {
    let params = lookup_params("cons_ids", cons_ids.join(","), bundles);
    fetch_records(connection, GET_CONSTITUENTS_BY_ID_PATH, &params, ResponseShape::Xml)
}

pub fn get_constituents_by_email(
    connection: &Connection,
    emails: &[&str],
    bundles: &[&str],
) -> Result<Vec<Constituent>, ApiError> {
    let params = lookup_params("emails", emails.join(","), bundles);
    fetch_records(connection, GET_CONSTITUENTS_BY_EMAIL_PATH, &params, ResponseShape::Xml)
}

/// Runs a filtered search. The service answers with a deferred id, which is
/// polled under `policy` until the matching constituents are ready.
pub fn get_constituents(
    connection: &Connection,
    filter: &str,
    bundles: &[&str],
    policy: &PollPolicy,
) -> Result<Vec<Constituent>, ApiError> {
    let params = lookup_params("filter", filter.to_string(), bundles);
    let response = connection.perform_request(&ApiRequest::get(GET_CONSTITUENTS_PATH).params(params))?;
    let deferred_id = response.trim();
    if deferred_id.is_empty() {
        return Err(ApiError::Deserialization("no deferred_id in response".to_string()));
    }

    let body = poll_deferred_results(connection, deferred_id, policy)?;
    let page = parse_collection(&body, ResponseShape::Xml, Constituent::from_record)?;
    if page.malformed > 0 {
        warn!(deferred_id, dropped = page.malformed, "dropped malformed constituent records");
    }
    Ok(page.items)
}

pub fn delete_constituents_by_id(connection: &Connection, cons_ids: &[&str]) -> Result<(), ApiError> {
    if cons_ids.is_empty() {
        return Err(ApiError::Invalid("cons_ids is empty".to_string()));
    }
    connection.perform_request(
        &ApiRequest::post(DELETE_CONSTITUENTS_BY_ID_PATH).param("cons_ids", cons_ids.join(",")),
    )?;
    Ok(())
}

/// Unsubscribes `email` from mailings, recording `reason`.
pub fn unsubscribe_email(connection: &Connection, email: &str, reason: &str) -> Result<(), ApiError> {
    connection.perform_request(
        &ApiRequest::post(EMAIL_UNSUBSCRIBE_PATH)
            .param("email", email)
            .param("reason", reason),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{self, query_pairs, url_path, MockTransport};

    fn sample() -> ConstituentData {
        ConstituentData {
            id: Some("23".to_string()),
            firstname: Some("George".to_string()),
            lastname: Some("Washington".to_string()),
            is_banned: Some(false),
            ext_id: Some(ExternalId {
                id: Some("ext-1".to_string()),
                kind: Some("crm".to_string()),
            }),
            emails: vec![ConstituentEmail {
                email: Some("george@example.org".to_string()),
                email_type: Some("work".to_string()),
                is_subscribed: Some(true),
                is_primary: None,
            }],
            addresses: vec![ConstituentAddress {
                city: Some("Mount Vernon".to_string()),
                state_cd: Some("VA".to_string()),
                ..ConstituentAddress::default()
            }],
            phones: vec![ConstituentPhone {
                phone: Some("555-0100".to_string()),
                ..ConstituentPhone::default()
            }],
            groups: vec!["17".to_string()],
            ..ConstituentData::default()
        }
    }

    #[test]
    fn xml_follows_field_tables() {
        let expected = concat!(
            r#"<?xml version="1.0" encoding="utf-8"?>"#,
            r#"<api><cons id="23" ext_id="ext-1" ext_type="crm">"#,
            "<firstname>George</firstname><lastname>Washington</lastname><is_banned>0</is_banned>",
            "<cons_email><email>george@example.org</email><email_type>work</email_type>",
            "<is_subscribed>1</is_subscribed></cons_email>",
            "<cons_addr><city>Mount Vernon</city><state_cd>VA</state_cd></cons_addr>",
            "<cons_phone><phone>555-0100</phone></cons_phone>",
            r#"<cons_group id="17"/>"#,
            "</cons></api>"
        );
        assert_eq!(sample().to_xml().unwrap(), expected);
    }

    #[test]
    fn set_posts_xml_and_reads_ids() {
        let transport = MockTransport::new();
        transport.respond(200, r#"<?xml version="1.0"?><api><cons id="23" is_new="0"/></api>"#);
        let conn = testing::connection(&transport);

        let results = sample().set(&conn).unwrap();
        assert_eq!(
            results,
            vec![SetConstituentResult {
                id: "23".to_string(),
                is_new: false
            }]
        );
        let sent = transport.last_request();
        assert_eq!(url_path(&sent), "/page/api/cons/set_constituent_data");
        assert_eq!(sent.body.as_deref(), Some(sample().to_xml().unwrap().as_str()));
    }

    #[test]
    fn unsubscribe_sends_email_and_reason() {
        let transport = MockTransport::new();
        let conn = testing::connection(&transport);
        unsubscribe_email(&conn, "george@example.org", "moved").unwrap();
        let pairs = query_pairs(&transport.last_request());
        assert!(pairs.contains(&("email".to_string(), "george@example.org".to_string())));
        assert!(pairs.contains(&("reason".to_string(), "moved".to_string())));
    }

    const LOOKUP: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<api>
  <cons id="4382" modified_dt="1171861200">
    <firstname>Bob</firstname>
    <lastname>Smith</lastname>
    <is_banned>0</is_banned>
    <cons_email>
      <email>bob@example.com</email>
      <is_subscribed>1</is_subscribed>
    </cons_email>
    <cons_addr>
      <city>Washington</city>
      <latitude>38.9</latitude>
    </cons_addr>
    <cons_group id="17"/>
    <cons_group id="18"/>
  </cons>
</api>"#;

    #[test]
    fn lookup_by_email_maps_nested_records() {
        let transport = MockTransport::new();
        transport.respond(200, LOOKUP);
        let conn = testing::connection(&transport);

        let found = get_constituents_by_email(&conn, &["bob@example.com"], DEFAULT_BUNDLES).unwrap();
        assert_eq!(found.len(), 1);
        let bob = &found[0];
        assert_eq!(bob.id, "4382");
        assert_eq!(bob.modified_dt.as_deref(), Some("1171861200"));
        assert_eq!(bob.is_banned, Some(false));
        assert_eq!(bob.emails[0].email.as_deref(), Some("bob@example.com"));
        assert_eq!(bob.emails[0].is_subscribed, Some(true));
        assert_eq!(bob.addresses[0].latitude, Some(38.9));
        let groups: Vec<&str> = bob.groups.iter().map(|g| g.id.as_str()).collect();
        assert_eq!(groups, ["17", "18"]);

        let sent = transport.last_request();
        assert_eq!(url_path(&sent), "/page/api/cons/get_constituents_by_email");
        let pairs = query_pairs(&sent);
        assert!(pairs.contains(&("emails".to_string(), "bob@example.com".to_string())));
        assert!(pairs.contains(&("bundles".to_string(), "cons_group".to_string())));
    }

    #[test]
    fn lookup_by_id_joins_ids_and_handles_empty_result() {
        let transport = MockTransport::new();
        transport.respond(200, "<api></api>");
        let conn = testing::connection(&transport);

        assert!(get_constituents_by_id(&conn, &["1", "2"], &[]).unwrap().is_empty());
        let pairs = query_pairs(&transport.last_request());
        assert!(pairs.contains(&("cons_ids".to_string(), "1,2".to_string())));
        assert!(!pairs.iter().any(|(k, _)| k == "bundles"));
    }

    #[test]
    fn filtered_search_polls_deferred_result() {
        let transport = MockTransport::new();
        transport.respond(200, "abc123\n");
        transport.respond(503, "not ready");
        transport.respond(200, LOOKUP);
        let conn = testing::connection(&transport);
        let policy = PollPolicy {
            attempts: 3,
            interval: std::time::Duration::from_millis(1),
        };

        let found = get_constituents(&conn, "email=bob@example.com", DEFAULT_BUNDLES, &policy).unwrap();
        assert_eq!(found[0].firstname.as_deref(), Some("Bob"));

        let requests = transport.requests.lock().unwrap();
        assert_eq!(requests.len(), 3);
        assert_eq!(url_path(&requests[0]), "/page/api/cons/get_constituents");
        assert_eq!(url_path(&requests[2]), "/page/api/get_deferred_results");
        assert!(query_pairs(&requests[2]).contains(&("deferred_id".to_string(), "abc123".to_string())));
    }

    #[test]
    fn filtered_search_needs_a_deferred_id() {
        let transport = MockTransport::new();
        transport.respond(200, "  ");
        let conn = testing::connection(&transport);
        let err = get_constituents(&conn, "x", &[], &PollPolicy::default()).unwrap_err();
        assert!(matches!(err, ApiError::Deserialization(_)));
        assert_eq!(transport.request_count(), 1);
    }

    #[test]
    fn delete_by_id_posts_joined_ids() {
        let transport = MockTransport::new();
        let conn = testing::connection(&transport);
        delete_constituents_by_id(&conn, &["5", "6"]).unwrap();
        let sent = transport.last_request();
        assert_eq!(url_path(&sent), "/page/api/cons/delete_constituents_by_id");
        assert!(query_pairs(&sent).contains(&("cons_ids".to_string(), "5,6".to_string())));

        assert!(matches!(delete_constituents_by_id(&conn, &[]), Err(ApiError::Invalid(_))));
    }
}
