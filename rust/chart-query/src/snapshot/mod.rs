//! Dynamic snapshots: persisted chart queries that are re-run against the
//! remote source every time they are viewed.

mod crypto;
mod model;
mod store;

pub use crypto::{CredentialCipher, CryptoError};
pub use model::{
    CreateQuerySnapshot, QuerySnapshot, SaveReceipt, SnapshotConfig, SnapshotExecution,
    SnapshotMode, SCHEMA_VERSION,
};
pub use store::{validate_id, FileSnapshotStore, MemorySnapshotStore, SnapshotStore};

use crate::aggregate::{aggregate, AggregateFunction};
use crate::error::{Result, ServiceError};
use crate::filter::{compile, tree};
use crate::pagination::collect_all_pages;
use crate::remote::{validate_token, RemoteSource};
use chrono::{SecondsFormat, Utc};
use std::sync::Arc;
use uuid::Uuid;

const SAVED_MESSAGE: &str = "Query snapshot saved successfully";

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn snapshot_id(timestamp: i64) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("query_{timestamp}_{}", &suffix[..8])
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(ServiceError::InvalidRequest(format!("{field} is required")));
    }
    Ok(())
}

/// Owns snapshot persistence and the decrypt, paginate, aggregate cycle.
#[derive(Clone)]
pub struct SnapshotVault {
    store: Arc<dyn SnapshotStore>,
    source: Arc<dyn RemoteSource>,
    cipher: CredentialCipher,
    page_size: u32,
}

impl SnapshotVault {
    pub fn new(
        store: Arc<dyn SnapshotStore>,
        source: Arc<dyn RemoteSource>,
        cipher: CredentialCipher,
        page_size: u32,
    ) -> Self {
        Self {
            store,
            source,
            cipher,
            page_size,
        }
    }

    /// Encrypts the credential and persists a new record under a fresh id.
    pub async fn save(&self, request: CreateQuerySnapshot) -> Result<SaveReceipt> {
        require("databaseId", &request.database_id)?;
        require("xProperty", &request.x_property)?;
        require("yProperty", &request.y_property)?;
        validate_token(&request.notion_token)?;

        let now = Utc::now();
        let timestamp = now.timestamp_millis();
        let snapshot = QuerySnapshot {
            schema_version: SCHEMA_VERSION,
            id: snapshot_id(timestamp),
            database_id: request.database_id,
            encrypted_token: self.cipher.encrypt(&request.notion_token),
            x_property: request.x_property,
            y_property: request.y_property,
            label_property: request.label_property.filter(|label| !label.is_empty()),
            chart_type: request.chart_type,
            aggregate_function: request.aggregate_function,
            title: request.title,
            snapshot_mode: SnapshotMode::Dynamic,
            is_demo: request.is_demo.unwrap_or(false),
            timestamp,
            created_at: now.to_rfc3339_opts(SecondsFormat::Millis, true),
            last_updated: None,
            filters: tree::compact(&request.filters.unwrap_or_default()),
        };

        self.store.put(&snapshot).await?;

        Ok(SaveReceipt {
            id: snapshot.id,
            message: SAVED_MESSAGE.to_string(),
            timestamp,
            snapshot_mode: snapshot.snapshot_mode,
        })
    }

    async fn load(&self, id: &str) -> Result<QuerySnapshot> {
        validate_id(id)?;
        self.store
            .get(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("query snapshot '{id}'")))
    }

    /// Re-runs the stored query against the remote source.
    pub async fn execute(&self, id: &str) -> Result<SnapshotExecution> {
        let mut snapshot = self.load(id).await?;
        let token = self.cipher.decrypt(&snapshot.encrypted_token)?;

        let filter = if snapshot.filters.is_empty() {
            None
        } else {
            let schema = self
                .source
                .database_schema(&token, &snapshot.database_id)
                .await?;
            compile(&snapshot.filters, &schema.properties)
        };

        let rows = collect_all_pages(
            self.source.as_ref(),
            &token,
            &snapshot.database_id,
            filter.as_ref(),
            self.page_size,
        )
        .await?;

        let data = aggregate(
            &rows,
            &snapshot.x_property,
            &snapshot.y_property,
            snapshot.label_property.as_deref(),
            AggregateFunction::parse(&snapshot.aggregate_function),
        );

        snapshot.last_updated = Some(now_rfc3339());
        self.store.put(&snapshot).await?;

        Ok(SnapshotExecution {
            id: snapshot.id,
            data,
            chart_type: snapshot.chart_type,
            aggregate_function: snapshot.aggregate_function,
            title: snapshot.title,
            is_demo: snapshot.is_demo,
            timestamp: snapshot.timestamp,
            created_at: snapshot.created_at,
            raw_data: rows,
        })
    }

    /// The stored record without its credential.
    pub async fn get_config(&self, id: &str) -> Result<SnapshotConfig> {
        Ok(self.load(id).await?.redacted())
    }
}
