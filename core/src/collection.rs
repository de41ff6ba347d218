//! Collection fetches shared by every list endpoint.
//!
//! # Design
//! A collection response is an envelope around an ordered list of records:
//! `{"data":[...]}` (or a bare top-level array) for JSON endpoints, or the
//! direct children of the root element for XML endpoints. A missing or
//! unparseable envelope fails the whole fetch with `FetchFailure`. A single
//! record that does not map onto the target type is dropped and counted; it
//! never turns into a half-filled item.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::classify::ResponseShape;
use crate::connection::Connection;
use crate::error::ApiError;
use crate::request::ApiRequest;
use crate::sign::Params;
use crate::xml;

/// Conversion between a resource and its wire record.
///
/// Types that are already `Serialize + DeserializeOwned` get this for free.
pub trait ApiRecord: Sized {
    fn to_record(&self) -> Result<Value, ApiError>;
    fn from_record(record: &Value) -> Result<Self, ApiError>;
}

impl<T: Serialize + DeserializeOwned> ApiRecord for T {
    fn to_record(&self) -> Result<Value, ApiError> {
        serde_json::to_value(self).map_err(|e| ApiError::Serialization(e.to_string()))
    }

    fn from_record(record: &Value) -> Result<Self, ApiError> {
        T::deserialize(record).map_err(|e| ApiError::Deserialization(e.to_string()))
    }
}

/// Items that parsed, in envelope order, plus how many records were dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionPage<T> {
    pub items: Vec<T>,
    pub malformed: usize,
}

/// Raw records of a collection body, in envelope order.
pub fn envelope_records(body: &str, shape: ResponseShape) -> Result<Vec<Value>, ApiError> {
    match shape {
        ResponseShape::Json => {
            let value: Value = serde_json::from_str(body)
                .map_err(|e| ApiError::FetchFailure(format!("response is not JSON: {e}")))?;
            match value {
                Value::Array(items) => Ok(items),
                Value::Object(mut map) => match map.remove("data") {
                    Some(Value::Array(items)) => Ok(items),
                    Some(other) => Err(ApiError::FetchFailure(format!(
                        "`data` is not an array: {other}"
                    ))),
                    None => Err(ApiError::FetchFailure("envelope has no `data` array".to_string())),
                },
                other => Err(ApiError::FetchFailure(format!("unexpected envelope: {other}"))),
            }
        }
        ResponseShape::Xml => {
            let root = xml::parse(body).map_err(|e| ApiError::FetchFailure(e.to_string()))?;
            Ok(root.children.iter().map(xml::XmlNode::to_record).collect())
        }
    }
}

pub fn parse_collection<T, F>(
    body: &str,
    shape: ResponseShape,
    item_from_record: F,
) -> Result<CollectionPage<T>, ApiError>
where
    F: Fn(&Value) -> Result<T, ApiError>,
{
    let records = envelope_records(body, shape)?;
    let mut items = Vec::with_capacity(records.len());
    let mut malformed = 0;
    for record in &records {
        match item_from_record(record) {
            Ok(item) => items.push(item),
            Err(_) => malformed += 1,
        }
    }
    Ok(CollectionPage { items, malformed })
}

/// GETs `path` and maps every record through `item_from_record`.
///
/// Transport and classification failures propagate unchanged; envelope
/// problems become `FetchFailure`.
pub fn fetch_collection<T, F>(
    connection: &Connection,
    path: &str,
    params: &Params,
    shape: ResponseShape,
    item_from_record: F,
) -> Result<Vec<T>, ApiError>
where
    F: Fn(&Value) -> Result<T, ApiError>,
{
    let body = connection.perform_request(&ApiRequest::get(path).params(params.clone()))?;
    let page = parse_collection(&body, shape, item_from_record)?;
    if page.malformed > 0 {
        warn!(path, dropped = page.malformed, "dropped malformed collection records");
    }
    Ok(page.items)
}

/// `fetch_collection` for any `ApiRecord`.
pub fn fetch_records<T: ApiRecord>(
    connection: &Connection,
    path: &str,
    params: &Params,
    shape: ResponseShape,
) -> Result<Vec<T>, ApiError> {
    fetch_collection(connection, path, params, shape, T::from_record)
}
