//! Card configuration.
//!
//! The host hands over an untyped JSON object. It is validated once, here:
//! the type tag must match, integer options are clamped into their documented
//! ranges, and everything downstream reads the typed [`CardConfig`].

use foundation::{parse_finite, LatLon};
use presence::{LabelMode, PersonDefaults, PersonSpec};
use serde_json::{json, Map, Value};
use streaming::{PhotoQuery, TrackQuery};

pub const CARD_TYPE: &str = "custom:people-map-plus";
const CARD_TYPE_SHORT: &str = "people-map-plus";
pub const STUB_TITLE: &str = "People Map Plus";

pub const DEFAULT_TRACKS_ENDPOINT: &str = "people_map_plus/tracks";
pub const DEFAULT_PHOTOS_ENDPOINT: &str = "people_map_plus/photos";
const DEFAULT_CENTER: (f64, f64) = (53.9, 27.5667);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    MissingType,
    WrongType { found: String },
    Invalid { field: &'static str, message: String },
    Json(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::MissingType => write!(f, "card config has no type (expected {CARD_TYPE})"),
            ConfigError::WrongType { found } => {
                write!(f, "card type {found:?} is not {CARD_TYPE}")
            }
            ConfigError::Invalid { field, message } => write!(f, "invalid {field}: {message}"),
            ConfigError::Json(msg) => write!(f, "card config is not valid JSON: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

fn invalid(field: &'static str, message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        message: message.into(),
    }
}

/// Coerces `value` to a number the way a loosely typed dashboard config is
/// read: numeric strings parse, blank strings, `null` and `false` count as 0,
/// `true` as 1. Halves round toward positive infinity, then the result is
/// clamped into `[min, max]`. A missing key or anything unparseable yields
/// `fallback`.
pub fn clamp_int(value: Option<&Value>, min: i64, max: i64, fallback: i64) -> i64 {
    let parsed = match value {
        Some(Value::Number(n)) => n.as_f64().filter(|v| v.is_finite()),
        Some(Value::String(s)) if s.trim().is_empty() => Some(0.0),
        Some(Value::String(s)) => parse_finite(s),
        Some(Value::Bool(b)) => Some(if *b { 1.0 } else { 0.0 }),
        Some(Value::Null) => Some(0.0),
        _ => None,
    };
    match parsed {
        Some(v) => ((v + 0.5).floor() as i64).clamp(min, max),
        None => fallback,
    }
}

fn clamp_u32(obj: &Map<String, Value>, key: &str, min: u32, max: u32, fallback: u32) -> u32 {
    let v = clamp_int(obj.get(key), min.into(), max.into(), fallback.into());
    u32::try_from(v).unwrap_or(fallback)
}

fn flag(obj: &Map<String, Value>, key: &str, default: bool) -> bool {
    obj.get(key).and_then(Value::as_bool).unwrap_or(default)
}

fn endpoint(obj: &Map<String, Value>, key: &str, default: &str) -> String {
    obj.get(key)
        .and_then(Value::as_str)
        .map(|s| s.trim().trim_start_matches('/'))
        .filter(|s| !s.is_empty())
        .unwrap_or(default)
        .to_string()
}

fn loose_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|v| v.is_finite()),
        Value::String(s) => parse_finite(s),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CardConfig {
    pub title: Option<String>,
    pub default_zoom: u32,
    pub default_center: LatLon,
    pub fit_entities: bool,
    pub persons: Vec<PersonSpec>,
    pub label: LabelMode,
    pub panel_mode: bool,
    pub panel_top_offset_px: u32,
    pub min_height: u32,
    pub height: u32,
    pub show_status: bool,

    pub show_tracks: bool,
    pub tracks_endpoint: String,
    pub track_entities: Vec<String>,
    pub track_days: u32,
    pub tracks_max_points: u32,
    pub tracks_min_distance_m: u32,
    pub tracks_refresh_seconds: u32,

    pub show_photos: bool,
    pub photos_endpoint: String,
    pub photo_days: u32,
    pub photo_limit: u32,
    pub photos_refresh_seconds: u32,
    pub photo_marker_size: u32,
}

impl Default for CardConfig {
    fn default() -> Self {
        Self {
            title: None,
            default_zoom: 12,
            default_center: LatLon {
                lat: DEFAULT_CENTER.0,
                lon: DEFAULT_CENTER.1,
            },
            fit_entities: true,
            persons: Vec::new(),
            label: LabelMode::Name,
            panel_mode: true,
            panel_top_offset_px: 112,
            min_height: 360,
            height: 420,
            show_status: false,
            show_tracks: false,
            tracks_endpoint: DEFAULT_TRACKS_ENDPOINT.to_string(),
            track_entities: Vec::new(),
            track_days: 1,
            tracks_max_points: 500,
            tracks_min_distance_m: 10,
            tracks_refresh_seconds: 60,
            show_photos: false,
            photos_endpoint: DEFAULT_PHOTOS_ENDPOINT.to_string(),
            photo_days: 5,
            photo_limit: 200,
            photos_refresh_seconds: 300,
            photo_marker_size: 48,
        }
    }
}

impl CardConfig {
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| ConfigError::Json(e.to_string()))?;
        Self::from_value(&value)
    }

    pub fn from_value(value: &Value) -> Result<Self, ConfigError> {
        let obj = value
            .as_object()
            .ok_or_else(|| invalid("config", "expected an object"))?;

        match obj.get("type") {
            None | Some(Value::Null) => return Err(ConfigError::MissingType),
            Some(Value::String(t)) if t == CARD_TYPE || t == CARD_TYPE_SHORT => {}
            Some(other) => {
                let found = other.as_str().map_or_else(|| other.to_string(), str::to_string);
                return Err(ConfigError::WrongType { found });
            }
        }

        let d = Self::default();
        let label = match obj.get("label").and_then(Value::as_str) {
            Some(raw) => LabelMode::parse(raw).unwrap_or_else(|| {
                tracing::warn!(label = raw, "unknown label mode, using name");
                LabelMode::Name
            }),
            None => d.label,
        };

        Ok(Self {
            title: obj
                .get("title")
                .and_then(Value::as_str)
                .map(str::to_string),
            default_zoom: clamp_u32(obj, "default_zoom", 1, 19, d.default_zoom),
            default_center: parse_center(obj.get("default_center"))?.unwrap_or(d.default_center),
            fit_entities: flag(obj, "fit_entities", d.fit_entities),
            persons: parse_persons(obj.get("persons"))?,
            label,
            panel_mode: flag(obj, "panel_mode", d.panel_mode),
            panel_top_offset_px: clamp_u32(obj, "panel_top_offset_px", 0, 500, d.panel_top_offset_px),
            min_height: clamp_u32(obj, "min_height", 200, 2000, d.min_height),
            height: clamp_u32(obj, "height", 200, 2000, d.height),
            show_status: flag(obj, "show_status", d.show_status),

            show_tracks: flag(obj, "show_tracks", d.show_tracks),
            tracks_endpoint: endpoint(obj, "tracks_endpoint", DEFAULT_TRACKS_ENDPOINT),
            track_entities: parse_id_list(obj.get("track_entities"))?,
            track_days: clamp_u32(obj, "track_days", 1, 30, d.track_days),
            tracks_max_points: clamp_u32(obj, "tracks_max_points", 50, 5000, d.tracks_max_points),
            tracks_min_distance_m: clamp_u32(obj, "tracks_min_distance_m", 0, 1000, d.tracks_min_distance_m),
            tracks_refresh_seconds: clamp_u32(obj, "tracks_refresh_seconds", 15, 3600, d.tracks_refresh_seconds),

            show_photos: flag(obj, "show_photos", d.show_photos),
            photos_endpoint: endpoint(obj, "photos_endpoint", DEFAULT_PHOTOS_ENDPOINT),
            photo_days: clamp_u32(obj, "photo_days", 1, 365, d.photo_days),
            photo_limit: clamp_u32(obj, "photo_limit", 1, 200_000, d.photo_limit),
            photos_refresh_seconds: clamp_u32(obj, "photos_refresh_seconds", 30, 86_400, d.photos_refresh_seconds),
            photo_marker_size: clamp_u32(obj, "photo_marker_size", 24, 160, d.photo_marker_size),
        })
    }

    /// Minimal configuration inserted by a dashboard editor.
    pub fn stub() -> Self {
        Self {
            title: Some(STUB_TITLE.to_string()),
            ..Self::default()
        }
    }

    pub fn stub_value() -> Value {
        json!({
            "type": CARD_TYPE,
            "title": STUB_TITLE,
            "default_zoom": 12,
            "fit_entities": true,
            "persons": [],
            "panel_mode": true,
        })
    }

    pub fn person_defaults(&self) -> PersonDefaults {
        PersonDefaults {
            label: self.label,
            ..PersonDefaults::default()
        }
    }

    /// Map height in pixels for a host viewport `inner_height_px` tall.
    pub fn map_height(&self, inner_height_px: f64) -> f64 {
        if self.panel_mode {
            let available = inner_height_px - f64::from(self.panel_top_offset_px);
            available.max(f64::from(self.min_height))
        } else {
            f64::from(self.height)
        }
    }

    pub fn track_query(&self, entities: Vec<String>) -> TrackQuery {
        TrackQuery {
            entities,
            days: self.track_days,
            max_points: self.tracks_max_points,
            min_distance_meters: self.tracks_min_distance_m,
        }
    }

    pub fn photo_query(&self) -> PhotoQuery {
        PhotoQuery {
            days: self.photo_days,
            limit: self.photo_limit,
            with_gps: true,
        }
    }

    pub fn tracks_refresh_ms(&self) -> i64 {
        i64::from(self.tracks_refresh_seconds) * 1000
    }

    pub fn photos_refresh_ms(&self) -> i64 {
        i64::from(self.photos_refresh_seconds) * 1000
    }
}

fn parse_center(value: Option<&Value>) -> Result<Option<LatLon>, ConfigError> {
    let Some(value) = value.filter(|v| !v.is_null()) else {
        return Ok(None);
    };
    let pair = value
        .as_array()
        .filter(|a| a.len() == 2)
        .ok_or_else(|| invalid("default_center", "expected [lat, lon]"))?;
    let lat = loose_f64(&pair[0]);
    let lon = loose_f64(&pair[1]);
    LatLon::from_parts(lat, lon)
        .map(Some)
        .ok_or_else(|| invalid("default_center", "not a valid coordinate"))
}

fn parse_persons(value: Option<&Value>) -> Result<Vec<PersonSpec>, ConfigError> {
    let items = match value {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(items)) => items,
        Some(_) => return Err(invalid("persons", "expected a list")),
    };

    let mut out = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Value::String(id) => {
                let id = id.trim();
                if !id.is_empty() {
                    out.push(PersonSpec::id(id));
                }
            }
            Value::Object(entry) => {
                let entity = entry
                    .get("entity")
                    .or_else(|| entry.get("entity_id"))
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| invalid("persons", "entry has no entity"))?;
                out.push(PersonSpec {
                    entity: entity.to_string(),
                    label: entry
                        .get("label")
                        .and_then(Value::as_str)
                        .and_then(LabelMode::parse),
                    color: entry
                        .get("color")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    radius: entry.get("radius").and_then(loose_f64),
                });
            }
            other => {
                return Err(invalid(
                    "persons",
                    format!("unsupported entry {other}"),
                ))
            }
        }
    }
    Ok(out)
}

fn parse_id_list(value: Option<&Value>) -> Result<Vec<String>, ConfigError> {
    match value {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => Ok(items
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()),
        Some(_) => Err(invalid("track_entities", "expected a list of ids")),
    }
}
