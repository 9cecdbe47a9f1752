use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::{Map, Value};

use crate::error::LoadError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CollectionName {
    Students,
    Attendance,
    Parents,
    Classes,
    Notices,
    Leaves,
    Reports,
}

impl CollectionName {
    pub const ALL: [CollectionName; 7] = [
        CollectionName::Students,
        CollectionName::Attendance,
        CollectionName::Parents,
        CollectionName::Classes,
        CollectionName::Notices,
        CollectionName::Leaves,
        CollectionName::Reports,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CollectionName::Students => "students",
            CollectionName::Attendance => "attendance",
            CollectionName::Parents => "parents",
            CollectionName::Classes => "classes",
            CollectionName::Notices => "notices",
            CollectionName::Leaves => "leaves",
            CollectionName::Reports => "reports",
        }
    }

    pub fn default_path(self) -> String {
        format!("/{}", self.as_str())
    }
}

impl fmt::Display for CollectionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where one collection's payload comes from.
#[async_trait]
pub trait CollectionSource: Send + Sync {
    async fn fetch(&self) -> Result<Value, LoadError>;

    /// Human-readable origin for logs.
    fn describe(&self) -> String;
}

pub type Sources = BTreeMap<CollectionName, Box<dyn CollectionSource>>;

pub type Loaded = BTreeMap<CollectionName, Result<Vec<Value>, LoadError>>;

pub struct HttpSource {
    http: reqwest::Client,
    url: String,
}

impl HttpSource {
    pub fn new(http: reqwest::Client, base_url: &str, path: &str) -> Self {
        Self {
            http,
            url: format!("{}{}", base_url.trim_end_matches('/'), path),
        }
    }

    pub fn client(timeout: Duration) -> Result<reqwest::Client, LoadError> {
        reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(LoadError::from)
    }
}

#[async_trait]
impl CollectionSource for HttpSource {
    async fn fetch(&self) -> Result<Value, LoadError> {
        let response = self.http.get(&self.url).send().await?;
        let status = response.status();

        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(LoadError::Status {
                status: status.as_u16(),
                message: if message.is_empty() {
                    status.canonical_reason().unwrap_or("request failed").to_string()
                } else {
                    message
                },
            });
        }

        let body = response.json().await?;
        Ok(body)
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}

pub struct JsonFileSource {
    path: PathBuf,
}

impl JsonFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl CollectionSource for JsonFileSource {
    async fn fetch(&self) -> Result<Value, LoadError> {
        let bytes = tokio::fs::read(&self.path).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// CSV with a header row; each row becomes an object keyed by header. Blank cells are dropped.
pub struct CsvFileSource {
    path: PathBuf,
}

impl CsvFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl CollectionSource for CsvFileSource {
    async fn fetch(&self) -> Result<Value, LoadError> {
        let bytes = tokio::fs::read(&self.path).await?;
        let mut reader = csv::Reader::from_reader(bytes.as_slice());
        let headers = reader.headers()?.clone();
        let mut rows = Vec::new();

        for result in reader.records() {
            let record = result?;
            let row: Map<String, Value> = headers
                .iter()
                .zip(record.iter())
                .filter(|(_, cell)| !cell.trim().is_empty())
                .map(|(header, cell)| (header.trim().to_string(), Value::String(cell.to_string())))
                .collect();
            rows.push(Value::Object(row));
        }

        Ok(Value::Array(rows))
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Fixed payload, for fixtures and tests.
pub struct StaticSource {
    payload: Value,
}

impl StaticSource {
    pub fn new(payload: Value) -> Self {
        Self { payload }
    }
}

#[async_trait]
impl CollectionSource for StaticSource {
    async fn fetch(&self) -> Result<Value, LoadError> {
        Ok(self.payload.clone())
    }

    fn describe(&self) -> String {
        "static".to_string()
    }
}

/// Accepts a bare array, or an object wrapping one under `data`, `results`, `items` or the
/// collection's own name.
pub fn extract_records(collection: CollectionName, payload: Value) -> Result<Vec<Value>, LoadError> {
    match payload {
        Value::Array(items) => Ok(items),
        Value::Object(mut map) => {
            for key in ["data", "results", "items", collection.as_str()] {
                if let Some(Value::Array(items)) = map.remove(key) {
                    return Ok(items);
                }
            }
            Err(LoadError::Malformed(format!(
                "expected a list of {collection} records"
            )))
        }
        _ => Err(LoadError::Malformed(format!(
            "expected a list of {collection} records"
        ))),
    }
}

/// Fetches every source concurrently and settles all of them. A failure is recorded against its
/// own collection only.
pub async fn load_all(sources: &Sources) -> Loaded {
    let fetches = sources.iter().map(|(name, source)| async move {
        let result = source
            .fetch()
            .await
            .and_then(|payload| extract_records(*name, payload));

        match &result {
            Ok(records) => {
                tracing::debug!(collection = %name, origin = %source.describe(), count = records.len(), "collection loaded")
            }
            Err(err) => {
                tracing::warn!(collection = %name, origin = %source.describe(), error = %err, "collection failed to load")
            }
        }

        (*name, result)
    });

    join_all(fetches).await.into_iter().collect()
}
