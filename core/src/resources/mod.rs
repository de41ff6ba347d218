//! Resource mappers built on `Connection` and the collection fetcher.
//!
//! Each resource lists its wire fields in a static, ordered `FieldTable`
//! instead of walking attributes at runtime; the table order is the element
//! order of the XML the service receives.
//!
//! Records parsed from XML carry every scalar as a string and a repeated
//! child only becomes an array once it repeats; the `lenient_*` and
//! `one_or_many` deserializers accept both forms.

pub mod constituent;
pub mod contribution;
pub mod dataset;
pub mod event;
pub mod group;

use serde::de::{self, Deserialize, Deserializer};
use serde_json::Value;

use crate::error::ApiError;
use crate::http::HttpResponse;
use crate::sign::Params;
use crate::xml::XmlWriter;

/// Ordered `(wire name, getter)` pairs. A getter returning `None` omits the field.
pub type FieldTable<T> = &'static [(&'static str, fn(&T) -> Option<String>)];

pub(crate) fn write_fields<T>(writer: &mut XmlWriter, item: &T, fields: FieldTable<T>) {
    for (name, get) in fields {
        if let Some(value) = get(item) {
            writer.leaf(name, &value);
        }
    }
}

pub(crate) fn field_params<T>(item: &T, fields: FieldTable<T>) -> Params {
    fields
        .iter()
        .filter_map(|(name, get)| get(item).map(|value| (name.to_string(), value)))
        .collect()
}

pub(crate) fn flag(value: Option<bool>) -> Option<String> {
    value.map(|v| if v { "1" } else { "0" }.to_string())
}

/// `true`/`false`, `1`/`0` or their string forms; empty is `None`.
pub(crate) fn lenient_flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<bool>, D::Error> {
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(b)),
        Some(Value::Number(n)) => Ok(Some(n.as_f64() != Some(0.0))),
        Some(Value::String(s)) => match s.trim() {
            "" => Ok(None),
            "1" | "true" => Ok(Some(true)),
            "0" | "false" => Ok(Some(false)),
            other => Err(de::Error::custom(format!("not a flag: {other:?}"))),
        },
        Some(other) => Err(de::Error::custom(format!("not a flag: {other}"))),
    }
}

/// A number or its string form; empty is `None`.
pub(crate) fn lenient_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => Ok(n.as_f64()),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| de::Error::custom(format!("not a number: {s:?}"))),
        Some(other) => Err(de::Error::custom(format!("not a number: {other}"))),
    }
}

/// A single record or an array of them.
pub(crate) fn one_or_many<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    #[derive(serde::Deserialize)]
    #[serde(untagged)]
    enum OneOrMany<T> {
        Many(Vec<T>),
        One(T),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::Many(items) => items,
        OneOrMany::One(item) => vec![item],
    })
}

/// Accepts exactly `expected`; anything else is returned as `ApiError::Http`.
pub(crate) fn expect_status(response: HttpResponse, expected: u16) -> Result<(), ApiError> {
    if response.status == expected {
        return Ok(());
    }
    Err(ApiError::Http {
        status: response.status,
        body: response.body,
    })
}
