use async_trait::async_trait;
use axum::{
    body::{self, Body},
    http::{self, Request, StatusCode},
    Router,
};
use chart_query::{
    config::AppConfig,
    error::{Result, ServiceError},
    filter::RemoteFilter,
    property::{PropertyDescriptor, PropertyType},
    remote::{DatabaseSchema, DatabaseSummary, Page, RemoteSource},
    server::Server,
    snapshot::{CredentialCipher, MemorySnapshotStore},
};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Value};
use std::{future::Future, path::PathBuf, sync::Arc, sync::Once, time::Duration};
use tower::ServiceExt;

pub const API_KEY: &str = "test-api-key";
pub const TOKEN: &str = "secret_integration";
pub const STAGES: [&str; 3] = ["Lead", "Won", "Lost"];

static TRACING_INIT: Once = Once::new();

/// A remote source that serves pre-built pages keyed by cursor and records
/// every request it sees.
pub struct ScriptedSource {
    pages: Vec<Page>,
    fail_at: Option<(usize, u16)>,
    pub requests: Mutex<Vec<RecordedRequest>>,
    pub schema_calls: Mutex<usize>,
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub token: String,
    pub cursor: Option<String>,
    pub page_size: u32,
    pub filter: Option<Value>,
}

impl ScriptedSource {
    /// Pages of the given sizes, linked by `cursor_<n>` cursors. Row `i`
    /// carries stage `STAGES[i % 3]` and amount `i % 10`.
    pub fn with_page_sizes(sizes: &[usize]) -> Self {
        let mut offset = 0;
        let pages = sizes
            .iter()
            .enumerate()
            .map(|(index, size)| {
                let rows = (offset..offset + size).map(deal_row).collect();
                offset += size;
                let last = index + 1 == sizes.len();
                Page {
                    rows,
                    has_more: !last,
                    next_cursor: (!last).then(|| format!("cursor_{}", index + 1)),
                }
            })
            .collect();

        Self {
            pages,
            fail_at: None,
            requests: Mutex::new(Vec::new()),
            schema_calls: Mutex::new(0),
        }
    }

    /// Fails the request for page `index` with the given upstream status.
    pub fn failing_at(mut self, index: usize, status: u16) -> Self {
        self.fail_at = Some((index, status));
        self
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }
}

pub fn deal_row(index: usize) -> Value {
    json!({
        "object": "page",
        "id": format!("row-{index}"),
        "properties": {
            "Name": { "type": "title", "title": [{ "plain_text": format!("Deal {index}") }] },
            "Stage": { "type": "select", "select": { "name": STAGES[index % STAGES.len()] } },
            "Amount": { "type": "number", "number": (index % 10) as f64 }
        }
    })
}

pub fn schema() -> Vec<PropertyDescriptor> {
    vec![
        PropertyDescriptor::new("Name", PropertyType::Title),
        PropertyDescriptor::new("Stage", PropertyType::Select),
        PropertyDescriptor::new("Amount", PropertyType::Number),
    ]
}

#[async_trait]
impl RemoteSource for ScriptedSource {
    async fn fetch_page(
        &self,
        token: &str,
        _database_id: &str,
        filter: Option<&RemoteFilter>,
        page_size: u32,
        cursor: Option<&str>,
    ) -> Result<Page> {
        let index = match cursor {
            None => 0,
            Some(cursor) => cursor
                .strip_prefix("cursor_")
                .and_then(|n| n.parse::<usize>().ok())
                .ok_or_else(|| ServiceError::upstream(400, "bad cursor"))?,
        };

        self.requests.lock().push(RecordedRequest {
            token: token.to_string(),
            cursor: cursor.map(str::to_string),
            page_size,
            filter: filter.map(RemoteFilter::to_value),
        });

        if let Some((fail_index, status)) = self.fail_at {
            if fail_index == index {
                return Err(ServiceError::upstream(status, "rate limited"));
            }
        }

        self.pages
            .get(index)
            .cloned()
            .ok_or_else(|| ServiceError::upstream(400, "cursor out of range"))
    }

    async fn database_schema(&self, _token: &str, database_id: &str) -> Result<DatabaseSchema> {
        *self.schema_calls.lock() += 1;
        Ok(DatabaseSchema {
            id: database_id.to_string(),
            title: "Deals".into(),
            properties: schema(),
        })
    }

    async fn list_databases(&self, _token: &str) -> Result<Vec<DatabaseSummary>> {
        Ok(vec![DatabaseSummary {
            id: "db-deals".into(),
            title: "Deals".into(),
            properties: vec!["Name".into(), "Stage".into(), "Amount".into()],
            last_edited_time: None,
        }])
    }
}

#[derive(Clone)]
pub struct ChartTestHarness {
    router: Router,
    api_key: String,
    pub store: Arc<MemorySnapshotStore>,
    pub source: Arc<ScriptedSource>,
}

fn test_config() -> AppConfig {
    AppConfig {
        listen_addr: "127.0.0.1:0".parse().expect("valid test address"),
        snapshot_dir: PathBuf::from("unused"),
        encryption_key: Some("integration-secret".into()),
        insecure_default_key: false,
        notion_base_url: "http://127.0.0.1:9".into(),
        notion_version: "2022-06-28".into(),
        page_size: 100,
        request_timeout: Duration::from_secs(5),
        api_key: Some(API_KEY.into()),
    }
}

/// Runs a test closure against a router wired to an in-memory store and `source`.
pub async fn with_chart_harness<F, Fut>(source: ScriptedSource, test: F)
where
    F: FnOnce(ChartTestHarness) -> Fut,
    Fut: Future<Output = ()>,
{
    TRACING_INIT.call_once(|| {
        let _ = tracing_subscriber::fmt::try_init();
    });

    let store = Arc::new(MemorySnapshotStore::new());
    let source = Arc::new(source);
    let server = Server::from_parts(
        test_config(),
        store.clone(),
        source.clone(),
        CredentialCipher::from_secret("integration-secret"),
    );

    test(ChartTestHarness {
        router: server.router(),
        api_key: API_KEY.to_string(),
        store,
        source,
    })
    .await;
}

impl ChartTestHarness {
    pub async fn post<T: Serialize>(&self, path: &str, payload: &T) -> http::Response<Body> {
        let body = serde_json::to_vec(payload).expect("request payload should serialize");
        self.send("POST", path, Body::from(body), true).await
    }

    #[allow(dead_code)]
    pub async fn post_without_api_key<T: Serialize>(
        &self,
        path: &str,
        payload: &T,
    ) -> http::Response<Body> {
        let body = serde_json::to_vec(payload).expect("request payload should serialize");
        self.send("POST", path, Body::from(body), false).await
    }

    pub async fn get(&self, path: &str) -> http::Response<Body> {
        self.send("GET", path, Body::empty(), true).await
    }

    async fn send(
        &self,
        method: &str,
        path: &str,
        body: Body,
        include_api_key: bool,
    ) -> http::Response<Body> {
        let mut builder = Request::builder()
            .method(method)
            .uri(path)
            .header(http::header::CONTENT_TYPE, "application/json");

        if include_api_key {
            builder = builder.header("x-api-key", &self.api_key);
        }

        let request = builder
            .body(body)
            .expect("failed to build harness request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router should handle harness request")
    }
}

pub async fn read_json(response: http::Response<Body>) -> (StatusCode, Value) {
    let status = response.status();
    let bytes = body::to_bytes(response.into_body(), 16 * 1024 * 1024)
        .await
        .expect("response body should be readable");
    let value =
        serde_json::from_slice::<Value>(&bytes).expect("response body should be valid JSON");
    (status, value)
}
