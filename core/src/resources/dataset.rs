//! Datasets and dataset maps: CSV bulk uploads keyed by geography.
//!
//! Uploads answer 202 when accepted and deletes answer 200, and callers need
//! the exact status, so both go through `perform_request_raw`.

use serde::{Deserialize, Serialize};
use serde_json::json;

use super::expect_status;
use crate::classify::ResponseShape;
use crate::collection::fetch_records;
use crate::connection::Connection;
use crate::error::ApiError;
use crate::request::ApiRequest;
use crate::sign::Params;

pub const UPLOAD_DATASET_MAP_PATH: &str = "/cons/upload_dataset_map";
pub const DELETE_DATASET_MAP_PATH: &str = "/cons/delete_dataset_map";
pub const LIST_DATASET_MAPS_PATH: &str = "/cons/list_dataset_maps";
pub const UPLOAD_DATASET_PATH: &str = "/cons/upload_dataset";
pub const DELETE_DATASET_PATH: &str = "/cons/delete_dataset";
pub const LIST_DATASETS_PATH: &str = "/cons/list_datasets";

/// CSV rows held until `save` uploads them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CsvData {
    pub header: Option<Vec<String>>,
    pub rows: Vec<Vec<String>>,
}

impl CsvData {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn validate(&self) -> Result<(), ApiError> {
        if !self.rows.is_empty() && self.header.is_none() {
            return Err(ApiError::Invalid("data_header is missing".to_string()));
        }
        Ok(())
    }

    pub fn to_csv(&self) -> Result<String, ApiError> {
        let mut writer = csv::WriterBuilder::new().flexible(true).from_writer(Vec::new());
        if let Some(header) = &self.header {
            writer.write_record(header).map_err(csv_error)?;
        }
        for row in &self.rows {
            writer.write_record(row).map_err(csv_error)?;
        }
        let bytes = writer.into_inner().map_err(csv_error)?;
        String::from_utf8(bytes).map_err(csv_error)
    }
}

fn csv_error(err: impl std::fmt::Display) -> ApiError {
    ApiError::Serialization(format!("csv: {err}"))
}

fn upload(connection: &Connection, path: &str, params: Params, csv: String) -> Result<(), ApiError> {
    let response = connection.perform_request_raw(
        &ApiRequest::put(path)
            .params(params)
            .content_type("text/csv")
            .accept("application/json")
            .body(csv),
    )?;
    expect_status(response, 202)
}

fn delete(connection: &Connection, path: &str, payload: serde_json::Value) -> Result<(), ApiError> {
    let response = connection.perform_request_raw(&ApiRequest::post(path).body(payload.to_string()))?;
    expect_status(response, 200)
}

/// Maps a geography column to district types.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetMap {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub map_id: Option<u64>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub map_type: Option<String>,
    #[serde(skip)]
    pub data: CsvData,
}

impl DatasetMap {
    pub fn add_data_header(&mut self, header: Vec<String>) {
        self.data.header = Some(header);
    }

    pub fn add_data_row(&mut self, row: Vec<String>) {
        self.data.rows.push(row);
    }

    pub fn validate(&self) -> Result<(), ApiError> {
        self.data.validate()
    }

    pub fn save(&self, connection: &Connection) -> Result<(), ApiError> {
        self.validate()?;
        upload(connection, UPLOAD_DATASET_MAP_PATH, Params::new(), self.data.to_csv()?)
    }

    pub fn delete(&self, connection: &Connection) -> Result<(), ApiError> {
        let map_id = self
            .map_id
            .ok_or_else(|| ApiError::Invalid("map_id is missing".to_string()))?;
        delete(connection, DELETE_DATASET_MAP_PATH, json!({ "map_id": map_id }))
    }

    pub fn list(connection: &Connection) -> Result<Vec<Self>, ApiError> {
        fetch_records(connection, LIST_DATASET_MAPS_PATH, &Params::new(), ResponseShape::Json)
    }
}

/// Per-district values keyed by a dataset map's geography.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dataset {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dataset_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub map_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows: Option<u64>,
    #[serde(skip)]
    pub data: CsvData,
}

impl Dataset {
    pub fn add_data_header(&mut self, header: Vec<String>) {
        self.data.header = Some(header);
    }

    pub fn add_data_row(&mut self, row: Vec<String>) {
        self.data.rows.push(row);
    }

    pub fn validate(&self) -> Result<(), ApiError> {
        if self.slug.is_none() {
            return Err(ApiError::Invalid("slug is missing".to_string()));
        }
        if self.map_type.is_none() {
            return Err(ApiError::Invalid("map_type is missing".to_string()));
        }
        self.data.validate()
    }

    pub fn save(&self, connection: &Connection) -> Result<(), ApiError> {
        self.validate()?;
        let mut params = Params::new();
        if let Some(slug) = &self.slug {
            params.insert("slug".to_string(), slug.clone());
        }
        if let Some(map_type) = &self.map_type {
            params.insert("map_type".to_string(), map_type.clone());
        }
        upload(connection, UPLOAD_DATASET_PATH, params, self.data.to_csv()?)
    }

    pub fn delete(&self, connection: &Connection) -> Result<(), ApiError> {
        let dataset_id = self
            .dataset_id
            .ok_or_else(|| ApiError::Invalid("dataset_id is missing".to_string()))?;
        delete(connection, DELETE_DATASET_PATH, json!({ "dataset_id": dataset_id }))
    }

    pub fn list(connection: &Connection) -> Result<Vec<Self>, ApiError> {
        fetch_records(connection, LIST_DATASETS_PATH, &Params::new(), ResponseShape::Json)
    }
}
