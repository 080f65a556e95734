//! Remote sources for the track and photo queries.
//!
//! - `HttpSource` POSTs the query as JSON to `<base_url>/<endpoint>`.
//! - `MemorySource` answers from canned responses (fixtures, tests).

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Deserialize;
use streaming::{PhotoResponse, RemoteQuery, SourceKind, TrackResponse};
use tokio::sync::RwLock;

#[derive(Debug)]
pub struct SourceError {
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl std::fmt::Display for SourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.source {
            Some(inner) => write!(f, "{}: {}", self.message, inner),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for SourceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as _)
    }
}

impl SourceError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RemoteReply {
    Tracks(TrackResponse),
    Photos(PhotoResponse),
}

impl RemoteReply {
    pub fn source(&self) -> SourceKind {
        match self {
            RemoteReply::Tracks(_) => SourceKind::Tracks,
            RemoteReply::Photos(_) => SourceKind::Photos,
        }
    }
}

/// Type alias for a boxed future that can be sent between threads.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Answers track and photo queries.
///
/// Implementations must be `Send + Sync`; fetches for one pass run as
/// concurrent tasks.
pub trait RemoteSource: Send + Sync {
    fn name(&self) -> &str;

    /// Runs `query` against `endpoint`. `success: false` replies are returned
    /// as `Ok`; only transport and decoding problems are errors.
    fn query(&self, endpoint: &str, query: &RemoteQuery) -> BoxFuture<'_, Result<RemoteReply, SourceError>>;
}

/// Per-request limit for `HttpSource`, below the fetch gate's in-flight
/// timeout.
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

pub struct HttpSource {
    base_url: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl HttpSource {
    pub fn new(base_url: impl Into<String>) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| SourceError::with_source("failed to build HTTP client", e))?;
        Ok(Self {
            base_url: base_url.into(),
            token: None,
            client,
        })
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token.filter(|t| !t.trim().is_empty());
        self
    }

    pub fn endpoint_url(&self, endpoint: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        )
    }
}

impl RemoteSource for HttpSource {
    fn name(&self) -> &str {
        &self.base_url
    }

    fn query(&self, endpoint: &str, query: &RemoteQuery) -> BoxFuture<'_, Result<RemoteReply, SourceError>> {
        let url = self.endpoint_url(endpoint);
        let kind = query.source();
        let body = match query {
            RemoteQuery::Tracks(q) => serde_json::to_value(q),
            RemoteQuery::Photos(q) => serde_json::to_value(q),
        };

        Box::pin(async move {
            let body = body.map_err(|e| SourceError::with_source("failed to encode query", e))?;
            let mut request = self.client.post(&url).json(&body);
            if let Some(token) = &self.token {
                request = request.bearer_auth(token);
            }

            let resp = request
                .send()
                .await
                .map_err(|e| SourceError::with_source("HTTP request failed", e))?;
            if !resp.status().is_success() {
                return Err(SourceError::new(format!("HTTP error: {}", resp.status())));
            }

            let reply = match kind {
                SourceKind::Tracks => resp.json::<TrackResponse>().await.map(RemoteReply::Tracks),
                SourceKind::Photos => resp.json::<PhotoResponse>().await.map(RemoteReply::Photos),
            };
            reply.map_err(|e| SourceError::with_source("failed to decode response", e))
        })
    }
}

/// Canned replies, as stored in a fixtures file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Fixtures {
    #[serde(default)]
    pub tracks: Option<TrackResponse>,
    #[serde(default)]
    pub photos: Option<PhotoResponse>,
}

/// In-memory source. Records every query it receives.
pub struct MemorySource {
    tracks: RwLock<Option<TrackResponse>>,
    photos: RwLock<Option<PhotoResponse>>,
    seen: Mutex<Vec<(String, RemoteQuery)>>,
}

impl MemorySource {
    pub fn new(fixtures: Fixtures) -> Self {
        Self {
            tracks: RwLock::new(fixtures.tracks),
            photos: RwLock::new(fixtures.photos),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn from_json(text: &str) -> Result<Self, SourceError> {
        let fixtures: Fixtures = serde_json::from_str(text)
            .map_err(|e| SourceError::with_source("invalid fixtures file", e))?;
        Ok(Self::new(fixtures))
    }

    pub async fn set_tracks(&self, reply: Option<TrackResponse>) {
        *self.tracks.write().await = reply;
    }

    pub async fn set_photos(&self, reply: Option<PhotoResponse>) {
        *self.photos.write().await = reply;
    }

    #[cfg(test)]
    pub fn seen(&self) -> Vec<(String, RemoteQuery)> {
        self.seen.lock().clone()
    }
}

impl RemoteSource for MemorySource {
    fn name(&self) -> &str {
        "memory"
    }

    fn query(&self, endpoint: &str, query: &RemoteQuery) -> BoxFuture<'_, Result<RemoteReply, SourceError>> {
        self.seen.lock().push((endpoint.to_string(), query.clone()));
        let kind = query.source();
        Box::pin(async move {
            let reply = match kind {
                SourceKind::Tracks => self.tracks.read().await.clone().map(RemoteReply::Tracks),
                SourceKind::Photos => self.photos.read().await.clone().map(RemoteReply::Photos),
            };
            reply.ok_or_else(|| SourceError::new(format!("no {kind} fixture")))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use streaming::PhotoQuery;

    fn photo_query() -> RemoteQuery {
        RemoteQuery::Photos(PhotoQuery {
            days: 5,
            limit: 200,
            with_gps: true,
        })
    }

    #[test]
    fn endpoint_url_joins_without_double_slash() {
        let src = HttpSource::new("http://hass.local:8123/api/").unwrap();
        assert_eq!(
            src.endpoint_url("/people_map_plus/tracks"),
            "http://hass.local:8123/api/people_map_plus/tracks"
        );
    }

    #[test]
    fn error_display_includes_cause() {
        let inner = std::io::Error::new(std::io::ErrorKind::Other, "reset");
        let err = SourceError::with_source("HTTP request failed", inner);
        assert_eq!(err.to_string(), "HTTP request failed: reset");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[tokio::test]
    async fn memory_source_answers_and_records() {
        let src = MemorySource::from_json(r#"{ "photos": { "success": true, "items": [] } }"#).unwrap();
        let reply = src.query("people_map_plus/photos", &photo_query()).await.unwrap();
        assert_eq!(reply.source(), SourceKind::Photos);
        assert_eq!(src.seen().len(), 1);
        assert_eq!(src.seen()[0].0, "people_map_plus/photos");
    }

    #[tokio::test]
    async fn memory_source_without_fixture_errors() {
        let src = MemorySource::new(Fixtures::default());
        let err = src.query("x", &photo_query()).await.unwrap_err();
        assert_eq!(err.to_string(), "no photos fixture");

        src.set_photos(Some(PhotoResponse::default())).await;
        assert!(src.query("x", &photo_query()).await.is_ok());
    }
}
