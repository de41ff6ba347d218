//! Constituent groups.

use serde::{Deserialize, Serialize};

use super::{write_fields, FieldTable};
use crate::classify::ResponseShape;
use crate::collection::{fetch_records, ApiRecord};
use crate::connection::Connection;
use crate::error::ApiError;
use crate::request::ApiRequest;
use crate::sign::Params;
use crate::xml::{self, XmlWriter};

pub const GET_BY_SLUG_PATH: &str = "/cons_group/get_constituent_group_by_slug";
pub const ADD_GROUPS_PATH: &str = "/cons_group/add_constituent_groups";
pub const LIST_GROUPS_PATH: &str = "/cons_group/list_constituent_groups";
pub const ADD_CONS_IDS_PATH: &str = "/cons_group/add_cons_ids_to_group";
pub const REMOVE_CONS_IDS_PATH: &str = "/cons_group/remove_cons_ids_from_group";

/// A constituent group. Every field is a string because that is how the
/// service's XML carries them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstituentGroup {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub create_dt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified_dt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_banned: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub members: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unique_emails: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unique_emails_subscribed: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count_dt: Option<String>,
}

impl ConstituentGroup {
    /// Fields sent when creating a group, in wire order.
    const FIELDS: FieldTable<Self> = &[
        ("name", |g: &Self| g.name.clone()),
        ("slug", |g: &Self| g.slug.clone()),
        ("description", |g: &Self| g.description.clone()),
        ("group_type", |g: &Self| g.group_type.clone()),
        ("create_dt", |g: &Self| g.create_dt.clone()),
    ];

    pub fn to_xml(&self) -> Result<String, ApiError> {
        let mut w = XmlWriter::new();
        w.open("api", &[]).open("cons_group", &[]);
        write_fields(&mut w, self, Self::FIELDS);
        w.close("cons_group").close("api");
        w.finish()
    }

    /// First `<cons_group>` in `xml`, or `None` when the response is empty.
    pub fn from_response(xml: &str) -> Result<Option<Self>, ApiError> {
        let root = xml::parse(xml)?;
        root.child("cons_group")
            .map(|node| Self::from_record(&node.to_record()))
            .transpose()
    }

    /// Returns the group with `attrs.slug`, creating it from `attrs` first if
    /// the service has none.
    pub fn find_or_create(connection: &Connection, attrs: &Self) -> Result<Self, ApiError> {
        let slug = attrs
            .slug
            .as_deref()
            .ok_or_else(|| ApiError::Invalid("slug is missing".to_string()))?;

        let existing = connection.perform_request(&ApiRequest::get(GET_BY_SLUG_PATH).param("slug", slug))?;
        if let Some(group) = Self::from_response(&existing)? {
            return Ok(group);
        }

        let created =
            connection.perform_request(&ApiRequest::post(ADD_GROUPS_PATH).body(attrs.to_xml()?))?;
        let group = Self::from_response(&created)?
            .ok_or_else(|| ApiError::Deserialization("no cons_group in create response".to_string()))?;
        Ok(Self {
            id: group.id,
            ..attrs.clone()
        })
    }

    pub fn list(connection: &Connection) -> Result<Vec<Self>, ApiError> {
        fetch_records(connection, LIST_GROUPS_PATH, &Params::new(), ResponseShape::Xml)
    }
}

pub fn add_cons_ids_to_group(
    connection: &Connection,
    cons_group_id: &str,
    cons_ids: &[&str],
) -> Result<String, ApiError> {
    connection.perform_request(
        &ApiRequest::post(ADD_CONS_IDS_PATH)
            .param("cons_group_id", cons_group_id)
            .param("cons_ids", cons_ids.join(",")),
    )
}

pub fn remove_cons_ids_from_group(
    connection: &Connection,
    cons_group_id: &str,
    cons_ids: &[&str],
) -> Result<String, ApiError> {
    connection.perform_request(
        &ApiRequest::post(REMOVE_CONS_IDS_PATH)
            .param("cons_group_id", cons_group_id)
            .param("cons_ids", cons_ids.join(",")),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HttpMethod;
    use crate::testing::{self, query_pairs, url_path, MockTransport};

    const EMPTY: &str = "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<api>\n</api>";
    const EXISTS: &str = "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<api>\n<cons_group id='12'>\n</cons_group>\n</api>";

    fn environment() -> ConstituentGroup {
        ConstituentGroup {
            name: Some("Environment".to_string()),
            slug: Some("environment".to_string()),
            description: Some("Environment Group".to_string()),
            group_type: Some("manual".to_string()),
            create_dt: Some("1388534400".to_string()),
            ..ConstituentGroup::default()
        }
    }

    #[test]
    fn to_xml_matches_wire_layout() {
        assert_eq!(
            environment().to_xml().unwrap(),
            "<?xml version=\"1.0\" encoding=\"utf-8\"?><api><cons_group><name>Environment</name>\
             <slug>environment</slug><description>Environment Group</description>\
             <group_type>manual</group_type><create_dt>1388534400</create_dt></cons_group></api>"
        );
    }

    #[test]
    fn creates_group_when_slug_is_unknown() {
        let transport = MockTransport::new();
        transport.respond(200, EMPTY);
        transport.respond(200, EXISTS);
        let conn = testing::connection(&transport);

        let group = ConstituentGroup::find_or_create(&conn, &environment()).unwrap();
        assert_eq!(group.id.as_deref(), Some("12"));
        assert_eq!(group.slug.as_deref(), Some("environment"));

        let requests = transport.requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(url_path(&requests[0]), "/page/api/cons_group/get_constituent_group_by_slug");
        assert!(query_pairs(&requests[0]).contains(&("slug".to_string(), "environment".to_string())));
        assert_eq!(requests[1].method, HttpMethod::Post);
        assert_eq!(requests[1].body.as_deref(), Some(environment().to_xml().unwrap().as_str()));
    }

    #[test]
    fn existing_group_is_not_recreated() {
        let transport = MockTransport::new();
        transport.respond(200, EXISTS);
        let conn = testing::connection(&transport);

        let group = ConstituentGroup::find_or_create(&conn, &environment()).unwrap();
        assert_eq!(group.id.as_deref(), Some("12"));
        assert_eq!(transport.request_count(), 1);
    }

    #[test]
    fn from_response_reads_attributes_and_children() {
        let xml = r#"
  <?xml version="1.0" encoding="utf-8"?>
  <api>
  <cons_group id='12' modified_dt="1171861200">
      <name>First Quarter Donors</name>
      <slug>q1donors</slug>
      <description>People who donated in Q1 2007</description>
      <is_banned>0</is_banned>
      <create_dt>1168146000</create_dt>
      <group_type>manual</group_type>
      <members>162</members>
      <unique_emails>164</unique_emails>
      <unique_emails_subscribed>109</unique_emails_subscribed>
      <count_dt>1213861583</count_dt>
  </cons_group>
  </api>
  "#;
        let group = ConstituentGroup::from_response(xml).unwrap().unwrap();
        assert_eq!(group.id.as_deref(), Some("12"));
        assert_eq!(group.slug.as_deref(), Some("q1donors"));
        assert_eq!(group.members.as_deref(), Some("162"));
        assert_eq!(group.modified_dt.as_deref(), Some("1171861200"));
    }

    #[test]
    fn add_cons_ids_joins_ids() {
        let transport = MockTransport::new();
        let conn = testing::connection(&transport);
        add_cons_ids_to_group(&conn, "12", &["1", "2"]).unwrap();

        let sent = transport.last_request();
        assert_eq!(sent.method, HttpMethod::Post);
        assert_eq!(url_path(&sent), "/page/api/cons_group/add_cons_ids_to_group");
        let pairs = query_pairs(&sent);
        assert!(pairs.contains(&("cons_group_id".to_string(), "12".to_string())));
        assert!(pairs.contains(&("cons_ids".to_string(), "1,2".to_string())));
    }

    #[test]
    fn missing_slug_is_rejected_locally() {
        let transport = MockTransport::new();
        let conn = testing::connection(&transport);
        let err = ConstituentGroup::find_or_create(&conn, &ConstituentGroup::default()).unwrap_err();
        assert!(matches!(err, ApiError::Invalid(_)));
        assert_eq!(transport.request_count(), 0);
    }

    #[test]
    fn list_reads_xml_collection() {
        let transport = MockTransport::new();
        transport.respond(
            200,
            "<api><cons_group id=\"1\"><slug>a</slug></cons_group><cons_group id=\"2\"><slug>b</slug></cons_group></api>",
        );
        let conn = testing::connection(&transport);
        let groups = ConstituentGroup::list(&conn).unwrap();
        let slugs: Vec<_> = groups.iter().filter_map(|g| g.slug.as_deref()).collect();
        assert_eq!(slugs, ["a", "b"]);
    }
}
