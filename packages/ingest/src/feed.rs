//! Feed implementations: HTTP endpoint, local file, and in-memory JSON.
//!
//! Every feed funnels its body through [`parse_document`], which accepts
//! either a bare array of point records or an object wrapping the array
//! under `pins`, `data`, or `points`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::{FeedDocument, IngestError, PinFeed};

/// Keys under which a wrapped document may carry its records.
const RECORD_KEYS: &[&str] = &["pins", "data", "points"];

/// Maximum length of the response body preview included in error logs.
const BODY_PREVIEW_LEN: usize = 300;

/// Where to fetch pins from and how long to wait.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Point-feed endpoint URL.
    pub url: Option<String>,
    /// Ceiling for the whole request, in seconds.
    pub timeout_secs: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_secs: 30,
        }
    }
}

impl FeedConfig {
    /// The request ceiling as a [`Duration`].
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Extracts the record list from a feed body.
///
/// # Errors
///
/// Returns [`IngestError::Json`] if the body isn't JSON, or
/// [`IngestError::Payload`] if it holds no record array.
pub fn parse_document(body: &str) -> Result<FeedDocument, IngestError> {
    let value: serde_json::Value = serde_json::from_str(body)?;

    match value {
        serde_json::Value::Array(records) => Ok(records),
        serde_json::Value::Object(mut map) => {
            for key in RECORD_KEYS {
                if let Some(serde_json::Value::Array(records)) = map.remove(*key) {
                    return Ok(records);
                }
            }
            Err(IngestError::Payload {
                message: format!(
                    "expected an array or an object with one of {RECORD_KEYS:?}, got keys {:?}",
                    map.keys().collect::<Vec<_>>()
                ),
            })
        }
        other => Err(IngestError::Payload {
            message: format!("expected an array of points, got {}", json_kind(&other)),
        }),
    }
}

const fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

/// Opens a feed from a URL or a file path.
///
/// `http://` and `https://` sources are fetched over HTTP with the given
/// ceiling; anything else is read from disk.
///
/// # Errors
///
/// Returns [`IngestError::Http`] if the HTTP client can't be built.
pub fn open_feed(source: &str, timeout: Duration) -> Result<Arc<dyn PinFeed>, IngestError> {
    if source.starts_with("http://") || source.starts_with("https://") {
        Ok(Arc::new(HttpFeed::new(source, timeout)?))
    } else {
        Ok(Arc::new(FileFeed::new(source)))
    }
}

/// Fetches the feed from an HTTP endpoint with a single GET.
pub struct HttpFeed {
    client: reqwest::Client,
    url: String,
    timeout_secs: u64,
}

impl HttpFeed {
    /// Creates a feed for `url` with the given request ceiling.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Http`] if the HTTP client can't be built.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, IngestError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("movement-map/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            url: url.into(),
            timeout_secs: timeout.as_secs(),
        })
    }
}

#[async_trait]
impl PinFeed for HttpFeed {
    fn describe(&self) -> String {
        self.url.clone()
    }

    async fn fetch(&self) -> Result<FeedDocument, IngestError> {
        let response = self
            .client
            .get(&self.url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if !status.is_success() {
            log::warn!("Feed {} answered HTTP {status}", self.url);
            return Err(IngestError::Status {
                status: status.as_u16(),
            });
        }

        let body = response.text().await.map_err(|e| self.classify(e))?;
        parse_document(&body).inspect_err(|e| {
            let preview: String = body.chars().take(BODY_PREVIEW_LEN).collect();
            log::warn!(
                "Feed {} returned an unusable body ({} bytes): {e}\n  body preview: {preview}",
                self.url,
                body.len(),
            );
        })
    }
}

impl HttpFeed {
    fn classify(&self, e: reqwest::Error) -> IngestError {
        if e.is_timeout() {
            IngestError::Timeout {
                seconds: self.timeout_secs,
            }
        } else {
            IngestError::Http(e)
        }
    }
}

/// Reads the feed from a JSON file on disk.
pub struct FileFeed {
    path: PathBuf,
}

impl FileFeed {
    /// Creates a feed reading `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl PinFeed for FileFeed {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    async fn fetch(&self) -> Result<FeedDocument, IngestError> {
        let body = tokio::fs::read_to_string(&self.path).await?;
        parse_document(&body)
    }
}

/// Serves a fixed JSON body. Useful for tests and fixtures.
#[derive(Debug, Clone)]
pub struct StaticFeed {
    body: String,
}

impl StaticFeed {
    /// Creates a feed that always returns `body`.
    #[must_use]
    pub fn new(body: impl Into<String>) -> Self {
        Self { body: body.into() }
    }
}

#[async_trait]
impl PinFeed for StaticFeed {
    fn describe(&self) -> String {
        format!("static feed ({} bytes)", self.body.len())
    }

    async fn fetch(&self) -> Result<FeedDocument, IngestError> {
        parse_document(&self.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_and_wrapped_arrays() {
        assert_eq!(parse_document(r#"[{"id": 1}, {"id": 2}]"#).unwrap().len(), 2);
        assert_eq!(parse_document(r#"{"pins": [{"id": 1}]}"#).unwrap().len(), 1);
        assert_eq!(parse_document(r#"{"data": []}"#).unwrap().len(), 0);
        assert_eq!(
            parse_document(r#"{"count": 1, "points": [{"id": 1}]}"#)
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn rejects_documents_without_records() {
        assert!(matches!(
            parse_document(r#"{"pins": "soon"}"#),
            Err(IngestError::Payload { .. })
        ));
        assert!(matches!(
            parse_document("42"),
            Err(IngestError::Payload { .. })
        ));
        assert!(matches!(parse_document("<html>"), Err(IngestError::Json(_))));
    }

    #[test]
    fn feed_config_defaults() {
        let config: FeedConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, FeedConfig::default());
        assert_eq!(config.timeout(), Duration::from_secs(30));
    }

    #[test]
    fn open_feed_picks_transport_by_scheme() {
        let timeout = Duration::from_secs(1);
        assert_eq!(
            open_feed("https://example.org/pins", timeout).unwrap().describe(),
            "https://example.org/pins"
        );
        assert_eq!(
            open_feed("fixtures/pins.json", timeout).unwrap().describe(),
            "fixtures/pins.json"
        );
    }

    #[tokio::test]
    async fn file_feed_reads_json_from_disk() {
        let path = std::env::temp_dir().join("movement_map_file_feed_test.json");
        std::fs::write(&path, r#"[{"id": "x", "lat": 1.0, "lng": 2.0}]"#).unwrap();

        let records = FileFeed::new(&path).fetch().await.unwrap();
        assert_eq!(records.len(), 1);

        let _ = std::fs::remove_file(&path);
        assert!(matches!(
            FileFeed::new(&path).fetch().await,
            Err(IngestError::Io(_))
        ));
    }
}
