use crate::aggregate::ChartDataPoint;
use crate::filter::FilterGroup;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::skip_serializing_none;

/// Version written into every persisted record.
pub const SCHEMA_VERSION: u32 = 1;

const fn initial_schema_version() -> u32 {
    SCHEMA_VERSION
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotMode {
    #[default]
    Dynamic,
}

/// The persisted dynamic snapshot record.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuerySnapshot {
    #[serde(default = "initial_schema_version")]
    pub schema_version: u32,
    pub id: String,
    pub database_id: String,
    pub encrypted_token: String,
    pub x_property: String,
    pub y_property: String,
    #[serde(default)]
    pub label_property: Option<String>,
    pub chart_type: String,
    pub aggregate_function: String,
    pub title: String,
    #[serde(default)]
    pub snapshot_mode: SnapshotMode,
    #[serde(default)]
    pub is_demo: bool,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub created_at: String,
    #[serde(default)]
    pub last_updated: Option<String>,
    #[serde(default)]
    pub filters: Vec<FilterGroup>,
}

impl QuerySnapshot {
    /// Everything except the encrypted credential.
    pub fn redacted(&self) -> SnapshotConfig {
        SnapshotConfig {
            schema_version: self.schema_version,
            id: self.id.clone(),
            database_id: self.database_id.clone(),
            x_property: self.x_property.clone(),
            y_property: self.y_property.clone(),
            label_property: self.label_property.clone(),
            chart_type: self.chart_type.clone(),
            aggregate_function: self.aggregate_function.clone(),
            title: self.title.clone(),
            snapshot_mode: self.snapshot_mode,
            is_demo: self.is_demo,
            timestamp: self.timestamp,
            created_at: self.created_at.clone(),
            last_updated: self.last_updated.clone(),
            filters: self.filters.clone(),
        }
    }
}

/// A snapshot as exposed to clients. Carries no credential field at all.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotConfig {
    pub schema_version: u32,
    pub id: String,
    pub database_id: String,
    pub x_property: String,
    pub y_property: String,
    pub label_property: Option<String>,
    pub chart_type: String,
    pub aggregate_function: String,
    pub title: String,
    pub snapshot_mode: SnapshotMode,
    pub is_demo: bool,
    pub timestamp: i64,
    pub created_at: String,
    pub last_updated: Option<String>,
    pub filters: Vec<FilterGroup>,
}

/// Save request. The token arrives in plaintext and is encrypted before storage.
#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateQuerySnapshot {
    pub database_id: String,
    pub notion_token: String,
    pub x_property: String,
    pub y_property: String,
    #[serde(default)]
    pub label_property: Option<String>,
    pub chart_type: String,
    pub aggregate_function: String,
    pub title: String,
    #[serde(default)]
    pub is_demo: Option<bool>,
    #[serde(default)]
    pub filters: Option<Vec<FilterGroup>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveReceipt {
    pub id: String,
    pub message: String,
    pub timestamp: i64,
    pub snapshot_mode: SnapshotMode,
}

/// Result of re-running a snapshot against the remote source.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotExecution {
    pub id: String,
    pub data: Vec<ChartDataPoint>,
    pub chart_type: String,
    pub aggregate_function: String,
    pub title: String,
    pub is_demo: bool,
    pub timestamp: i64,
    pub created_at: String,
    pub raw_data: Vec<Value>,
}
