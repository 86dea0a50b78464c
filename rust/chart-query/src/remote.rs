//! The remote tabular source: the query/schema/search primitives the pipeline
//! consumes, and their HTTP implementation against the Notion API.

use crate::config::AppConfig;
use crate::error::{Result, ServiceError};
use crate::filter::RemoteFilter;
use crate::property::{PropertyDescriptor, PropertyType, SelectOption};
use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::debug;

const TOKEN_PREFIXES: [&str; 2] = ["secret_", "ntn_"];
const UNTITLED: &str = "Untitled";

/// One page of query results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Page {
    #[serde(rename = "results")]
    pub rows: Vec<Value>,
    #[serde(default)]
    pub has_more: bool,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatabaseSchema {
    pub id: String,
    pub title: String,
    pub properties: Vec<PropertyDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatabaseSummary {
    pub id: String,
    pub title: String,
    pub properties: Vec<String>,
    pub last_edited_time: Option<String>,
}

#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Fetches one page. `cursor` is the `next_cursor` of the previous page.
    async fn fetch_page(
        &self,
        token: &str,
        database_id: &str,
        filter: Option<&RemoteFilter>,
        page_size: u32,
        cursor: Option<&str>,
    ) -> Result<Page>;

    async fn database_schema(&self, token: &str, database_id: &str) -> Result<DatabaseSchema>;

    async fn list_databases(&self, token: &str) -> Result<Vec<DatabaseSummary>>;
}

/// Rejects credentials that cannot be Notion integration tokens.
pub fn validate_token(token: &str) -> Result<()> {
    if TOKEN_PREFIXES.iter().any(|prefix| token.starts_with(prefix)) {
        Ok(())
    } else {
        Err(ServiceError::InvalidRequest(
            "invalid token format, token must start with \"secret_\" or \"ntn_\"".into(),
        ))
    }
}

#[derive(Clone)]
pub struct NotionClient {
    client: Client,
    base_url: String,
    version: String,
}

impl NotionClient {
    pub fn new(config: &AppConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .context("failed to build remote HTTP client")?;

        Ok(Self {
            client,
            base_url: config.notion_base_url.clone(),
            version: config.notion_version.clone(),
        })
    }

    fn request(&self, builder: RequestBuilder, token: &str) -> RequestBuilder {
        builder
            .bearer_auth(token)
            .header("Notion-Version", &self.version)
    }

    async fn send(&self, builder: RequestBuilder, fallback: &str) -> Result<Value> {
        let response = builder
            .send()
            .await
            .map_err(|err| ServiceError::upstream(StatusCode::BAD_GATEWAY.as_u16(), err.to_string()))?;

        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);
        debug!(status = status.as_u16(), "remote source responded");

        if status.is_success() {
            return Ok(body);
        }

        Err(match status {
            StatusCode::UNAUTHORIZED => {
                ServiceError::upstream(status.as_u16(), "Invalid Notion token")
            }
            StatusCode::NOT_FOUND => ServiceError::upstream(
                status.as_u16(),
                "Database not found or no access permission",
            ),
            _ => ServiceError::upstream(
                status.as_u16(),
                body.get("message")
                    .and_then(Value::as_str)
                    .unwrap_or(fallback),
            ),
        })
    }
}

#[async_trait]
impl RemoteSource for NotionClient {
    async fn fetch_page(
        &self,
        token: &str,
        database_id: &str,
        filter: Option<&RemoteFilter>,
        page_size: u32,
        cursor: Option<&str>,
    ) -> Result<Page> {
        validate_token(token)?;

        let mut body = Map::new();
        if let Some(filter) = filter {
            body.insert("filter".into(), filter.to_value());
        }
        body.insert("page_size".into(), json!(page_size));
        if let Some(cursor) = cursor {
            body.insert("start_cursor".into(), json!(cursor));
        }

        debug!(database_id, page_size, has_cursor = cursor.is_some(), "querying database page");
        let url = format!("{}/databases/{database_id}/query", self.base_url);
        let response = self
            .send(
                self.request(self.client.post(url), token).json(&body),
                "Failed to query database",
            )
            .await?;

        serde_json::from_value(response)
            .map_err(|err| ServiceError::upstream(StatusCode::BAD_GATEWAY.as_u16(), err.to_string()))
    }

    async fn database_schema(&self, token: &str, database_id: &str) -> Result<DatabaseSchema> {
        validate_token(token)?;

        let url = format!("{}/databases/{database_id}", self.base_url);
        let response = self
            .send(
                self.request(self.client.get(url), token),
                "Failed to fetch database properties",
            )
            .await?;

        Ok(parse_schema(&response))
    }

    async fn list_databases(&self, token: &str) -> Result<Vec<DatabaseSummary>> {
        validate_token(token)?;

        let url = format!("{}/search", self.base_url);
        let body = json!({ "filter": { "property": "object", "value": "database" } });
        let response = self
            .send(
                self.request(self.client.post(url), token).json(&body),
                "Failed to fetch databases",
            )
            .await?;

        let databases = response
            .get("results")
            .and_then(Value::as_array)
            .map(|results| results.iter().map(parse_summary).collect())
            .unwrap_or_default();
        Ok(databases)
    }
}

fn extract_title(title: Option<&Value>) -> String {
    title
        .and_then(Value::as_array)
        .and_then(|runs| runs.first())
        .and_then(|run| run.get("plain_text"))
        .and_then(Value::as_str)
        .filter(|text| !text.is_empty())
        .unwrap_or(UNTITLED)
        .to_string()
}

fn string_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn parse_summary(database: &Value) -> DatabaseSummary {
    DatabaseSummary {
        id: string_field(database, "id"),
        title: extract_title(database.get("title")),
        properties: database
            .get("properties")
            .and_then(Value::as_object)
            .map(|properties| properties.keys().cloned().collect())
            .unwrap_or_default(),
        last_edited_time: database
            .get("last_edited_time")
            .and_then(Value::as_str)
            .map(str::to_string),
    }
}

/// Maps a database object to descriptors. Columns of types outside the
/// closed [`PropertyType`] set are skipped.
fn parse_schema(database: &Value) -> DatabaseSchema {
    let properties = database
        .get("properties")
        .and_then(Value::as_object)
        .map(|properties| {
            properties
                .iter()
                .filter_map(|(name, property)| {
                    let property_type = property
                        .get("type")
                        .and_then(Value::as_str)
                        .and_then(PropertyType::from_tag)?;
                    Some(PropertyDescriptor {
                        name: name.clone(),
                        property_type,
                        id: Some(
                            property
                                .get("id")
                                .and_then(Value::as_str)
                                .unwrap_or(name.as_str())
                                .to_string(),
                        ),
                        options: select_options(property_type, property),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    DatabaseSchema {
        id: string_field(database, "id"),
        title: extract_title(database.get("title")),
        properties,
    }
}

fn select_options(property_type: PropertyType, property: &Value) -> Option<Vec<SelectOption>> {
    if !matches!(
        property_type,
        PropertyType::Select | PropertyType::MultiSelect | PropertyType::Status
    ) {
        return None;
    }

    let options = property
        .get(property_type.as_str())
        .and_then(|config| config.get("options"))
        .cloned()?;
    serde_json::from_value(options).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn tokens_need_a_known_prefix() {
        assert!(validate_token("secret_abc").is_ok());
        assert!(validate_token("ntn_abc").is_ok());
        assert!(matches!(
            validate_token("abc"),
            Err(ServiceError::InvalidRequest(_))
        ));
        assert!(validate_token("").is_err());
    }

    #[test]
    fn titles_fall_back_to_untitled() {
        assert_eq!(extract_title(None), "Untitled");
        assert_eq!(extract_title(Some(&json!([]))), "Untitled");
        assert_eq!(extract_title(Some(&json!([{ "plain_text": "" }]))), "Untitled");
        assert_eq!(
            extract_title(Some(&json!([{ "plain_text": "Deals" }, { "plain_text": "x" }]))),
            "Deals"
        );
    }

    #[test]
    fn schema_keeps_known_types_and_select_options() {
        let schema = parse_schema(&json!({
            "id": "db1",
            "title": [{ "plain_text": "Deals" }],
            "properties": {
                "Stage": {
                    "id": "s%3A",
                    "type": "select",
                    "select": { "options": [{ "name": "Won", "id": "1", "color": "green" }] }
                },
                "Amount": { "type": "number", "number": { "format": "dollar" } },
                "Click": { "id": "b", "type": "button", "button": {} }
            }
        }));

        assert_eq!(schema.id, "db1");
        assert_eq!(schema.title, "Deals");
        assert_eq!(schema.properties.len(), 2);

        let stage = schema
            .properties
            .iter()
            .find(|property| property.name == "Stage")
            .unwrap();
        assert_eq!(stage.property_type, PropertyType::Select);
        assert_eq!(stage.options.as_ref().unwrap()[0].name, "Won");

        let amount = schema
            .properties
            .iter()
            .find(|property| property.name == "Amount")
            .unwrap();
        assert_eq!(amount.id.as_deref(), Some("Amount"));
        assert_eq!(amount.options, None);
    }

    #[test]
    fn pages_deserialize_from_query_response() {
        let page: Page = serde_json::from_value(json!({
            "object": "list",
            "results": [{ "id": "r1" }],
            "has_more": true,
            "next_cursor": "c2"
        }))
        .unwrap();
        assert_eq!(page.rows.len(), 1);
        assert!(page.has_more);
        assert_eq!(page.next_cursor.as_deref(), Some("c2"));
    }

    #[test]
    fn search_results_summarize_databases() {
        let summary = parse_summary(&json!({
            "id": "db2",
            "title": [],
            "properties": { "Name": {}, "Due": {} },
            "last_edited_time": "2024-05-01T00:00:00.000Z"
        }));
        assert_eq!(summary.title, "Untitled");
        assert_eq!(summary.properties.len(), 2);
        assert_eq!(summary.last_edited_time.as_deref(), Some("2024-05-01T00:00:00.000Z"));
    }

    mod over_http {
        use super::*;
        use pretty_assertions::assert_eq;
        use crate::filter::{compile, FilterCondition, FilterGroup, FilterOperator, LogicalOperator};
        use crate::property::Scalar;
        use axum::{
            body::Bytes,
            http::{HeaderMap, Method, StatusCode as ServerStatus, Uri},
            Json, Router,
        };
        use parking_lot::Mutex;
        use std::{path::PathBuf, sync::Arc, time::Duration};

        const TOKEN: &str = "secret_remote";

        #[derive(Debug, Clone)]
        struct Captured {
            method: String,
            path: String,
            authorization: Option<String>,
            notion_version: Option<String>,
            body: Value,
        }

        /// Serves `reply` with `status` for every request and records what it saw.
        async fn upstream(status: u16, reply: Value) -> (NotionClient, Arc<Mutex<Vec<Captured>>>) {
            let captured = Arc::new(Mutex::new(Vec::new()));
            let sink = captured.clone();
            let status = ServerStatus::from_u16(status).unwrap();

            let app = Router::new().fallback(
                move |method: Method, uri: Uri, headers: HeaderMap, body: Bytes| {
                    let sink = sink.clone();
                    let reply = reply.clone();
                    async move {
                        let header = |name: &str| {
                            headers
                                .get(name)
                                .and_then(|value| value.to_str().ok())
                                .map(str::to_string)
                        };
                        sink.lock().push(Captured {
                            method: method.to_string(),
                            path: uri.path().to_string(),
                            authorization: header("authorization"),
                            notion_version: header("notion-version"),
                            body: serde_json::from_slice(&body).unwrap_or(Value::Null),
                        });
                        (status, Json(reply))
                    }
                },
            );

            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            tokio::spawn(async move {
                axum::serve(listener, app).await.unwrap();
            });

            let config = AppConfig {
                listen_addr: "127.0.0.1:0".parse().unwrap(),
                snapshot_dir: PathBuf::from("unused"),
                encryption_key: Some("k".into()),
                insecure_default_key: false,
                notion_base_url: format!("http://{addr}/v1"),
                notion_version: "2022-06-28".into(),
                page_size: 100,
                request_timeout: Duration::from_secs(5),
                api_key: None,
            };
            (NotionClient::new(&config).unwrap(), captured)
        }

        fn upstream_error(result: Result<impl std::fmt::Debug>) -> (u16, String) {
            match result {
                Err(ServiceError::Upstream { status, message }) => (status, message),
                other => panic!("expected upstream error, got {other:?}"),
            }
        }

        #[tokio::test]
        async fn query_sends_auth_headers_and_paging_body() {
            let (client, captured) = upstream(
                200,
                json!({ "results": [{ "id": "r1" }], "has_more": true, "next_cursor": "c2" }),
            )
            .await;

            let properties = vec![PropertyDescriptor::new("Amount", PropertyType::Number)];
            let groups = vec![FilterGroup::new(LogicalOperator::And).with_condition(
                FilterCondition::new(
                    "Amount",
                    FilterOperator::GreaterThan,
                    Some(Scalar::Number(5.0).into()),
                ),
            )];
            let filter = compile(&groups, &properties);

            let page = client
                .fetch_page(TOKEN, "db1", filter.as_ref(), 50, Some("c1"))
                .await
                .unwrap();
            assert_eq!(page.rows, vec![json!({ "id": "r1" })]);
            assert_eq!(page.next_cursor.as_deref(), Some("c2"));

            let request = captured.lock()[0].clone();
            assert_eq!(request.method, "POST");
            assert_eq!(request.path, "/v1/databases/db1/query");
            assert_eq!(request.authorization.as_deref(), Some("Bearer secret_remote"));
            assert_eq!(request.notion_version.as_deref(), Some("2022-06-28"));
            assert_eq!(
                request.body,
                json!({
                    "filter": { "property": "Amount", "number": { "greater_than": 5.0 } },
                    "page_size": 50,
                    "start_cursor": "c1"
                })
            );
        }

        #[tokio::test]
        async fn first_page_omits_cursor_and_filter() {
            let (client, captured) = upstream(200, json!({ "results": [] })).await;

            let page = client.fetch_page(TOKEN, "db1", None, 100, None).await.unwrap();
            assert!(!page.has_more);
            assert_eq!(captured.lock()[0].body, json!({ "page_size": 100 }));
        }

        #[tokio::test]
        async fn unauthorized_maps_to_invalid_token() {
            let (client, _) = upstream(401, json!({ "message": "API token is invalid." })).await;
            assert_eq!(
                upstream_error(client.fetch_page(TOKEN, "db1", None, 100, None).await),
                (401, "Invalid Notion token".to_string())
            );
        }

        #[tokio::test]
        async fn missing_database_maps_to_no_access() {
            let (client, captured) = upstream(404, json!({ "message": "Could not find" })).await;
            assert_eq!(
                upstream_error(client.database_schema(TOKEN, "db9").await),
                (404, "Database not found or no access permission".to_string())
            );

            let request = captured.lock()[0].clone();
            assert_eq!(request.method, "GET");
            assert_eq!(request.path, "/v1/databases/db9");
        }

        #[tokio::test]
        async fn other_statuses_carry_the_upstream_message() {
            let (client, _) = upstream(400, json!({ "message": "body.filter is invalid" })).await;
            assert_eq!(
                upstream_error(client.fetch_page(TOKEN, "db1", None, 100, None).await),
                (400, "body.filter is invalid".to_string())
            );
        }

        #[tokio::test]
        async fn messageless_failures_use_the_operation_fallback() {
            let (client, _) = upstream(500, json!({})).await;
            assert_eq!(
                upstream_error(client.list_databases(TOKEN).await),
                (500, "Failed to fetch databases".to_string())
            );
        }

        #[tokio::test]
        async fn search_filters_to_databases() {
            let (client, captured) = upstream(
                200,
                json!({ "results": [{ "id": "db1", "title": [{ "plain_text": "Deals" }], "properties": { "Name": {} } }] }),
            )
            .await;

            let databases = client.list_databases(TOKEN).await.unwrap();
            assert_eq!(databases[0].title, "Deals");

            let request = captured.lock()[0].clone();
            assert_eq!(request.path, "/v1/search");
            assert_eq!(
                request.body,
                json!({ "filter": { "property": "object", "value": "database" } })
            );
        }

        #[tokio::test]
        async fn malformed_tokens_never_reach_the_network() {
            let (client, captured) = upstream(200, json!({ "results": [] })).await;
            assert!(matches!(
                client.fetch_page("bogus", "db1", None, 100, None).await,
                Err(ServiceError::InvalidRequest(_))
            ));
            assert!(captured.lock().is_empty());
        }
    }
}
