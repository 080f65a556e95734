//! Wire types for the two paged remote queries.
//!
//! Requests serialize in camelCase. Responses are read leniently: numbers may
//! arrive as strings, text fields may be missing or null, and snake_case field
//! names are accepted alongside camelCase. Per-item validation happens later,
//! in the layers that consume these types.

use foundation::{finite, parse_finite};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::gate::{FetchKey, FetchKeyBuilder};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Tracks,
    Photos,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceKind::Tracks => write!(f, "tracks"),
            SourceKind::Photos => write!(f, "photos"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackQuery {
    pub entities: Vec<String>,
    pub days: u32,
    pub max_points: u32,
    pub min_distance_meters: u32,
}

impl TrackQuery {
    /// Every field changes the result, so every field is part of the key.
    pub fn fetch_key(&self, endpoint: &str) -> FetchKey {
        FetchKeyBuilder::new(SourceKind::Tracks)
            .part(endpoint)
            .list(&self.entities)
            .part(self.days)
            .part(self.max_points)
            .part(self.min_distance_meters)
            .build()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoQuery {
    pub days: u32,
    pub limit: u32,
    pub with_gps: bool,
}

impl PhotoQuery {
    pub fn fetch_key(&self, endpoint: &str) -> FetchKey {
        FetchKeyBuilder::new(SourceKind::Photos)
            .part(endpoint)
            .part(self.days)
            .part(self.limit)
            .part(self.with_gps)
            .build()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RemoteQuery {
    Tracks(TrackQuery),
    Photos(PhotoQuery),
}

impl RemoteQuery {
    pub fn source(&self) -> SourceKind {
        match self {
            RemoteQuery::Tracks(_) => SourceKind::Tracks,
            RemoteQuery::Photos(_) => SourceKind::Photos,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default, deserialize_with = "lenient_list")]
    pub tracks: Vec<RawTrack>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "loose_text")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTrack {
    #[serde(default, alias = "entity_id", deserialize_with = "loose_id")]
    pub entity_id: String,
    #[serde(default, deserialize_with = "lenient_list")]
    pub points: Vec<RawTrackPoint>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawTrackPoint {
    #[serde(default, deserialize_with = "loose_number")]
    pub lat: Option<f64>,
    #[serde(default, deserialize_with = "loose_number")]
    pub lon: Option<f64>,
    #[serde(default, alias = "timestamp", deserialize_with = "loose_text")]
    pub ts: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhotoResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default, deserialize_with = "lenient_list")]
    pub items: Vec<RawPhotoItem>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "loose_text")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPhotoItem {
    #[serde(default, deserialize_with = "loose_number")]
    pub lat: Option<f64>,
    #[serde(default, deserialize_with = "loose_number")]
    pub lon: Option<f64>,
    #[serde(default, alias = "preview_url", deserialize_with = "loose_text")]
    pub preview_url: Option<String>,
    #[serde(default, alias = "thumb_url", deserialize_with = "loose_text")]
    pub thumb_url: Option<String>,
    #[serde(default, alias = "media_url", deserialize_with = "loose_text")]
    pub media_url: Option<String>,
    #[serde(default, alias = "media_rel_path", deserialize_with = "loose_text")]
    pub media_rel_path: Option<String>,
    #[serde(default, alias = "captured_at_utc", deserialize_with = "loose_text")]
    pub captured_at_utc: Option<String>,
}

/// Elements that fail to decode are dropped; a missing, null or non-array
/// list reads as empty.
fn lenient_list<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: serde::de::DeserializeOwned,
{
    let Value::Array(raw) = Value::deserialize(deserializer)? else {
        return Ok(Vec::new());
    };
    let total = raw.len();
    let kept: Vec<T> = raw
        .into_iter()
        .filter_map(|item| serde_json::from_value(item).ok())
        .collect();
    if kept.len() < total {
        tracing::debug!(dropped = total - kept.len(), kept = kept.len(), "skipped malformed items");
    }
    Ok(kept)
}

fn loose_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(loose_text(deserializer)?.unwrap_or_default())
}

fn loose_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Number(n) => n.as_f64().and_then(finite),
        Value::String(s) => parse_finite(&s),
        _ => None,
    })
}

fn loose_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn track_query_serializes_camel_case() {
        let q = TrackQuery {
            entities: vec!["person.a".into()],
            days: 3,
            max_points: 500,
            min_distance_meters: 10,
        };
        assert_eq!(
            serde_json::to_value(&q).unwrap(),
            json!({ "entities": ["person.a"], "days": 3, "maxPoints": 500, "minDistanceMeters": 10 })
        );
        let p = PhotoQuery { days: 5, limit: 200, with_gps: true };
        assert_eq!(
            serde_json::to_value(&p).unwrap(),
            json!({ "days": 5, "limit": 200, "withGps": true })
        );
    }

    #[test]
    fn track_response_is_read_leniently() {
        let resp: TrackResponse = serde_json::from_value(json!({
            "success": true,
            "tracks": [{
                "entity_id": "person.a",
                "points": [
                    { "lat": "53.9", "lon": 27.5, "ts": "2024-01-01T00:00:00Z" },
                    { "lat": null, "lon": "x", "ts": 17 },
                ]
            }]
        }))
        .unwrap();
        assert!(resp.success);
        let points = &resp.tracks[0].points;
        assert_eq!(resp.tracks[0].entity_id, "person.a");
        assert_eq!(points[0].lat, Some(53.9));
        assert_eq!(points[0].ts.as_deref(), Some("2024-01-01T00:00:00Z"));
        assert_eq!(points[1], RawTrackPoint::default());
    }

    #[test]
    fn malformed_elements_are_dropped_not_fatal() {
        let resp: TrackResponse = serde_json::from_value(json!({
            "success": true,
            "tracks": [
                { "points": [] },
                null,
                "person.x",
                {
                    "entityId": "person.a",
                    "points": [null, { "lat": 1, "lon": 2, "ts": "2024-01-01T00:00:00Z" }, 7]
                },
            ]
        }))
        .unwrap();
        assert_eq!(resp.tracks.len(), 2);
        assert_eq!(resp.tracks[0].entity_id, "");
        assert_eq!(resp.tracks[1].entity_id, "person.a");
        assert_eq!(resp.tracks[1].points.len(), 1);
        assert_eq!(resp.tracks[1].points[0].lat, Some(1.0));

        let photos: PhotoResponse = serde_json::from_value(json!({
            "success": true,
            "items": [null, { "lat": 1, "lon": 2, "previewUrl": "/a.jpg" }, "junk"]
        }))
        .unwrap();
        assert_eq!(photos.items.len(), 1);
        assert_eq!(photos.items[0].preview_url.as_deref(), Some("/a.jpg"));
    }

    #[test]
    fn null_lists_read_as_empty() {
        let resp: TrackResponse =
            serde_json::from_value(json!({ "success": true, "tracks": null })).unwrap();
        assert!(resp.success);
        assert!(resp.tracks.is_empty());
        let resp: PhotoResponse =
            serde_json::from_value(json!({ "success": true, "items": { "a": 1 } })).unwrap();
        assert!(resp.items.is_empty());
    }

    #[test]
    fn failed_response_defaults_to_unsuccessful() {
        let resp: PhotoResponse = serde_json::from_value(json!({ "error": "boom" })).unwrap();
        assert!(!resp.success);
        assert!(resp.items.is_empty());
        assert_eq!(resp.error.as_deref(), Some("boom"));
    }

    #[test]
    fn photo_item_accepts_both_casings() {
        let a: RawPhotoItem = serde_json::from_value(json!({
            "lat": 1, "lon": 2, "previewUrl": "/p.jpg", "mediaRelPath": "2024/a.jpg",
            "capturedAtUtc": "2024-01-01T00:00:00Z"
        }))
        .unwrap();
        let b: RawPhotoItem = serde_json::from_value(json!({
            "lat": 1, "lon": 2, "preview_url": "/p.jpg", "media_rel_path": "2024/a.jpg",
            "captured_at_utc": "2024-01-01T00:00:00Z"
        }))
        .unwrap();
        assert_eq!(a, b);
        assert_eq!(a.media_url, None);
    }

    #[test]
    fn fetch_keys_cover_every_parameter() {
        let base = TrackQuery {
            entities: vec!["person.a".into(), "person.b".into()],
            days: 1,
            max_points: 500,
            min_distance_meters: 10,
        };
        let key = base.fetch_key("people_map_plus/tracks");
        let mut changed = base.clone();
        changed.min_distance_meters = 11;
        assert_ne!(key, changed.fetch_key("people_map_plus/tracks"));
        let mut changed = base.clone();
        changed.entities.reverse();
        assert_ne!(key, changed.fetch_key("people_map_plus/tracks"));
        assert_ne!(key, base.fetch_key("other/tracks"));
        assert_eq!(key, base.clone().fetch_key("people_map_plus/tracks"));
    }
}
