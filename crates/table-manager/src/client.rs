//! DynamoDB Client
//!
//! Just enough of the JSON 1.0 protocol to describe and create tables.

use std::time::Duration;

use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::TableError;
use crate::signing::{amz_date, Credentials, RequestSigner, SignableRequest};

const CONTENT_TYPE_JSON: &str = "application/x-amz-json-1.0";
const TARGET_PREFIX: &str = "DynamoDB_20120810";
const SERVICE: &str = "dynamodb";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Service error codes with special handling
pub const RESOURCE_NOT_FOUND: &str = "ResourceNotFoundException";
pub const RESOURCE_IN_USE: &str = "ResourceInUseException";

/// `TableStatus` values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TableStatus {
    Creating,
    Updating,
    Deleting,
    Active,
    #[serde(other)]
    Unknown,
}

/// The fields of a table description this tool reads
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TableDescription {
    pub table_name: String,
    pub table_status: TableStatus,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(rename = "__type", default)]
    kind: String,
    #[serde(alias = "Message", default)]
    message: String,
}

/// Signed DynamoDB client
#[derive(Debug, Clone)]
pub struct DynamoClient {
    http: Client,
    endpoint: Url,
    host: String,
    signer: RequestSigner,
}

impl DynamoClient {
    pub fn new(endpoint: &str, region: &str, credentials: Credentials) -> Result<Self, TableError> {
        let invalid = |reason: String| TableError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            reason,
        };

        let url = Url::parse(endpoint).map_err(|e| invalid(e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid(format!("unsupported scheme '{}'", url.scheme())));
        }
        let host = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            (None, _) => return Err(invalid("missing host".to_string())),
        };

        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        Ok(Self {
            http,
            endpoint: url,
            host,
            signer: RequestSigner::new(credentials, region, SERVICE),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// `None` when the table does not exist
    pub async fn describe_table(&self, name: &str) -> Result<Option<TableDescription>, TableError> {
        match self.call("DescribeTable", &json!({ "TableName": name })).await {
            Ok(body) => table_from(body, "Table", "DescribeTable").map(Some),
            Err(e) if e.api_code() == Some(RESOURCE_NOT_FOUND) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn create_table(&self, request: &Value) -> Result<TableDescription, TableError> {
        let body = self.call("CreateTable", request).await?;
        table_from(body, "TableDescription", "CreateTable")
    }

    /// Poll `DescribeTable` until the table is `ACTIVE`
    pub async fn wait_until_active(
        &self,
        name: &str,
        poll_interval: Duration,
        timeout: Duration,
    ) -> Result<TableDescription, TableError> {
        let start = Instant::now();
        info!("Waiting for table {} to become active", name);

        loop {
            if let Some(table) = self.describe_table(name).await? {
                if table.table_status == TableStatus::Active {
                    return Ok(table);
                }
                debug!("Table {} is {:?}", name, table.table_status);
            }

            let elapsed = start.elapsed();
            if elapsed >= timeout {
                return Err(TableError::ActiveTimeout {
                    table: name.to_string(),
                    waited: elapsed,
                });
            }
            tokio::time::sleep(poll_interval.min(timeout - elapsed)).await;
        }
    }

    async fn call(&self, operation: &'static str, body: &Value) -> Result<Value, TableError> {
        let payload = serde_json::to_vec(body)?;
        let target = format!("{}.{}", TARGET_PREFIX, operation);
        let now = Utc::now();
        let date = amz_date(now);

        let authorization = self.signer.authorization(
            &SignableRequest {
                method: "POST",
                path: self.endpoint.path(),
                query: "",
                headers: vec![
                    ("content-type", CONTENT_TYPE_JSON),
                    ("host", self.host.as_str()),
                    ("x-amz-date", date.as_str()),
                    ("x-amz-target", target.as_str()),
                ],
                payload: &payload,
            },
            now,
        );

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(CONTENT_TYPE_JSON));
        headers.insert(HeaderName::from_static("x-amz-date"), HeaderValue::from_str(&date)?);
        headers.insert(HeaderName::from_static("x-amz-target"), HeaderValue::from_str(&target)?);
        headers.insert(AUTHORIZATION, HeaderValue::from_str(&authorization)?);

        debug!("{} -> {}", target, self.endpoint);
        let response = self
            .http
            .post(self.endpoint.clone())
            .headers(headers)
            .body(payload)
            .send()
            .await?;

        let status = response.status();
        let bytes = response.bytes().await?;

        if status.is_success() {
            if bytes.is_empty() {
                return Ok(Value::Null);
            }
            return serde_json::from_slice(&bytes).map_err(|e| TableError::UnexpectedResponse {
                operation,
                reason: e.to_string(),
            });
        }

        let error: ErrorBody = serde_json::from_slice(&bytes).unwrap_or(ErrorBody {
            kind: String::new(),
            message: String::from_utf8_lossy(&bytes).into_owned(),
        });
        let code = match error.kind.rsplit('#').next() {
            Some(code) if !code.is_empty() => code.to_string(),
            _ => format!("HTTP {}", status.as_u16()),
        };
        Err(TableError::Api {
            code,
            message: error.message,
        })
    }
}

fn table_from(
    mut body: Value,
    field: &str,
    operation: &'static str,
) -> Result<TableDescription, TableError> {
    let table = body.get_mut(field).map(Value::take).unwrap_or(Value::Null);
    serde_json::from_value(table).map_err(|e| TableError::UnexpectedResponse {
        operation,
        reason: e.to_string(),
    })
}
