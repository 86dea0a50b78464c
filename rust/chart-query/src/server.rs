use crate::{
    aggregate::{aggregate, AggregateFunction, ChartDataPoint},
    config::{AppConfig, MAX_PAGE_SIZE},
    error::{Result, ServiceError},
    filter::{compile_with_report, Compiled, FilterGroup, FilterWarning, RemoteFilter},
    property::PropertyDescriptor,
    remote::{DatabaseSchema, DatabaseSummary, NotionClient, Page, RemoteSource},
    snapshot::{
        CreateQuerySnapshot, CredentialCipher, FileSnapshotStore, SaveReceipt, SnapshotConfig,
        SnapshotExecution, SnapshotStore, SnapshotVault,
    },
    state::AppState,
};
use axum::{
    extract::{Path, State},
    http::HeaderMap,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

pub struct Server {
    config: Arc<AppConfig>,
    state: AppState,
}

impl Server {
    pub async fn new(config: AppConfig) -> anyhow::Result<Self> {
        let cipher = cipher_for(&config)?;
        let store = FileSnapshotStore::open(config.snapshot_dir.clone()).await?;
        let source = NotionClient::new(&config)?;
        info!(dir = %store.dir().display(), "snapshot store ready");

        Ok(Self::from_parts(config, Arc::new(store), Arc::new(source), cipher))
    }

    /// Assembles a server from explicit collaborators.
    pub fn from_parts(
        config: AppConfig,
        store: Arc<dyn SnapshotStore>,
        source: Arc<dyn RemoteSource>,
        cipher: CredentialCipher,
    ) -> Self {
        let config = Arc::new(config);
        let vault = SnapshotVault::new(store, Arc::clone(&source), cipher, config.page_size);
        let state = AppState::new(Arc::clone(&config), source, vault);
        Self { config, state }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/healthz", get(Self::health))
            .route("/api/filters/compile", post(Self::compile_filters))
            .route("/api/aggregate", post(Self::aggregate))
            .route("/notion/databases", post(Self::databases))
            .route("/notion/database-properties", post(Self::database_properties))
            .route("/notion/query", post(Self::query_database))
            .route("/snapshots/query", post(Self::save_snapshot))
            .route("/snapshots/query/:id", get(Self::execute_snapshot))
            .route("/snapshots/query/:id/config", get(Self::snapshot_config))
            .with_state(self.state.clone())
            .layer(TraceLayer::new_for_http())
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let addr = self.config.listen_addr;
        let listener = TcpListener::bind(addr).await?;
        info!(%addr, "chart-query listening");
        axum::serve(listener, self.router()).await?;
        Ok(())
    }

    async fn health() -> Json<Value> {
        Json(json!({ "status": "ok" }))
    }

    async fn compile_filters(
        State(state): State<AppState>,
        headers: HeaderMap,
        Json(request): Json<CompileRequest>,
    ) -> Result<Json<CompileResponse>> {
        enforce_api_key(&headers, &state.config)?;
        let compiled = compile_with_report(&request.filters, &request.properties);
        Ok(Json(CompileResponse {
            filter: compiled.filter,
            warnings: compiled.warnings,
        }))
    }

    async fn aggregate(
        State(state): State<AppState>,
        headers: HeaderMap,
        Json(request): Json<AggregateRequest>,
    ) -> Result<Json<AggregateResponse>> {
        enforce_api_key(&headers, &state.config)?;
        if request.x_field.is_empty() {
            return Err(ServiceError::InvalidRequest("xField is required".into()));
        }

        let data = aggregate(
            &request.rows,
            &request.x_field,
            &request.y_field,
            request.label_field.as_deref(),
            AggregateFunction::parse(&request.aggregate_function),
        );
        Ok(Json(AggregateResponse { data }))
    }

    async fn databases(
        State(state): State<AppState>,
        headers: HeaderMap,
        Json(request): Json<TokenRequest>,
    ) -> Result<Json<Vec<DatabaseSummary>>> {
        enforce_api_key(&headers, &state.config)?;
        let databases = state.source.list_databases(&request.token).await?;
        Ok(Json(databases))
    }

    async fn database_properties(
        State(state): State<AppState>,
        headers: HeaderMap,
        Json(request): Json<DatabaseRequest>,
    ) -> Result<Json<DatabaseSchema>> {
        enforce_api_key(&headers, &state.config)?;
        let schema = state
            .source
            .database_schema(&request.token, &request.database_id)
            .await?;
        Ok(Json(schema))
    }

    async fn query_database(
        State(state): State<AppState>,
        headers: HeaderMap,
        Json(request): Json<QueryRequest>,
    ) -> Result<Json<QueryResponse>> {
        enforce_api_key(&headers, &state.config)?;

        let compiled = if request.filters.is_empty() {
            Compiled::default()
        } else {
            let properties = match request.properties {
                Some(properties) => properties,
                None => {
                    state
                        .source
                        .database_schema(&request.token, &request.database_id)
                        .await?
                        .properties
                }
            };
            compile_with_report(&request.filters, &properties)
        };

        let page_size = request
            .page_size
            .unwrap_or(state.config.page_size)
            .clamp(1, MAX_PAGE_SIZE);
        let page = state
            .source
            .fetch_page(
                &request.token,
                &request.database_id,
                compiled.filter.as_ref(),
                page_size,
                request.start_cursor.as_deref(),
            )
            .await?;
        Ok(Json(QueryResponse {
            page,
            warnings: compiled.warnings,
        }))
    }

    async fn save_snapshot(
        State(state): State<AppState>,
        headers: HeaderMap,
        Json(request): Json<CreateQuerySnapshot>,
    ) -> Result<Json<SaveReceipt>> {
        enforce_api_key(&headers, &state.config)?;
        let receipt = state.vault.save(request).await?;
        info!(id = %receipt.id, "query snapshot saved");
        Ok(Json(receipt))
    }

    async fn execute_snapshot(
        State(state): State<AppState>,
        headers: HeaderMap,
        Path(id): Path<String>,
    ) -> Result<Json<SnapshotExecution>> {
        enforce_api_key(&headers, &state.config)?;
        let execution = state.vault.execute(&id).await?;
        Ok(Json(execution))
    }

    async fn snapshot_config(
        State(state): State<AppState>,
        headers: HeaderMap,
        Path(id): Path<String>,
    ) -> Result<Json<SnapshotConfig>> {
        enforce_api_key(&headers, &state.config)?;
        let config = state.vault.get_config(&id).await?;
        Ok(Json(config))
    }
}

fn cipher_for(config: &AppConfig) -> anyhow::Result<CredentialCipher> {
    match (&config.encryption_key, config.insecure_default_key) {
        (Some(secret), _) => Ok(CredentialCipher::from_secret(secret)),
        (None, true) => {
            warn!("CHART_ENCRYPTION_KEY is not set; encrypting credentials with the built-in insecure key");
            Ok(CredentialCipher::insecure_default())
        }
        (None, false) => anyhow::bail!("no credential encryption key configured"),
    }
}

fn enforce_api_key(headers: &HeaderMap, config: &AppConfig) -> Result<()> {
    if let Some(expected) = &config.api_key {
        let provided = headers
            .get("x-api-key")
            .and_then(|value| value.to_str().ok());

        if provided != Some(expected.as_str()) {
            return Err(ServiceError::Auth);
        }
    }

    Ok(())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompileRequest {
    #[serde(default)]
    filters: Vec<FilterGroup>,
    #[serde(default)]
    properties: Vec<PropertyDescriptor>,
}

#[derive(Debug, Serialize)]
struct CompileResponse {
    filter: Option<RemoteFilter>,
    warnings: Vec<FilterWarning>,
}

fn default_aggregate_function() -> String {
    AggregateFunction::Sum.as_str().to_string()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AggregateRequest {
    #[serde(default)]
    rows: Vec<Value>,
    x_field: String,
    y_field: String,
    #[serde(default)]
    label_field: Option<String>,
    #[serde(default = "default_aggregate_function")]
    aggregate_function: String,
}

#[derive(Debug, Serialize)]
struct AggregateResponse {
    data: Vec<ChartDataPoint>,
}

#[derive(Deserialize)]
struct TokenRequest {
    token: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DatabaseRequest {
    token: String,
    database_id: String,
}

/// A remote page plus the conditions the compiler had to drop.
#[derive(Debug, Serialize)]
struct QueryResponse {
    #[serde(flatten)]
    page: Page,
    warnings: Vec<FilterWarning>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest {
    token: String,
    database_id: String,
    #[serde(default)]
    filters: Vec<FilterGroup>,
    #[serde(default)]
    properties: Option<Vec<PropertyDescriptor>>,
    #[serde(default)]
    page_size: Option<u32>,
    #[serde(default)]
    start_cursor: Option<String>,
}
