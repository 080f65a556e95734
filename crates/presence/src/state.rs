use std::collections::BTreeMap;

use foundation::{LatLon, finite, parse_finite};
use serde::Deserialize;
use serde_json::{Map, Value};

pub const PERSON_DOMAIN: &str = "person";
pub const ZONE_DOMAIN: &str = "zone";

/// Category part of a namespaced identifier (`"person"` for `"person.alice"`).
pub fn domain_of(entity_id: &str) -> Option<&str> {
    entity_id.split_once('.').map(|(domain, _)| domain)
}

/// Identifier without its category (`"alice"` for `"person.alice"`).
pub fn object_id(entity_id: &str) -> &str {
    entity_id
        .split_once('.')
        .map(|(_, object)| object)
        .unwrap_or(entity_id)
}

pub fn in_domain(entity_id: &str, domain: &str) -> bool {
    domain_of(entity_id) == Some(domain)
}

/// Typed view of the attribute bag, limited to what resolution reads.
///
/// Values are coerced once at the boundary: numbers may arrive as JSON
/// numbers or numeric strings, text fields are trimmed and dropped when empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attributes {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub source: Option<String>,
    pub zone: Option<String>,
    pub entity_id: Option<String>,
    pub friendly_name: Option<String>,
    pub name: Option<String>,
}

impl Attributes {
    pub fn from_map(raw: &Map<String, Value>) -> Self {
        let number = |key: &str| raw.get(key).and_then(loose_number);
        let text = |key: &str| raw.get(key).and_then(loose_text);
        Self {
            latitude: number("latitude"),
            longitude: number("longitude"),
            source: text("source"),
            zone: text("zone"),
            entity_id: text("entity_id"),
            friendly_name: text("friendly_name"),
            name: text("name"),
        }
    }

    pub fn coordinate(&self) -> Option<LatLon> {
        LatLon::from_parts(self.latitude, self.longitude)
    }
}

fn loose_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().and_then(finite),
        Value::String(s) => parse_finite(s),
        _ => None,
    }
}

fn loose_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        // Group-like entities carry a list of members; the first one is the reference.
        Value::Array(items) => return items.iter().find_map(loose_text),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

/// One row of the host's state table. Read-only to the engine.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "RawEntityState")]
pub struct EntityState {
    pub entity_id: String,
    pub state: String,
    pub attributes: Attributes,
}

impl EntityState {
    pub fn new(entity_id: impl Into<String>, state: impl Into<String>, attributes: Attributes) -> Self {
        Self {
            entity_id: entity_id.into(),
            state: state.into(),
            attributes,
        }
    }

    pub fn friendly_name(&self) -> &str {
        self.attributes
            .friendly_name
            .as_deref()
            .unwrap_or(self.entity_id.as_str())
    }
}

#[derive(Deserialize)]
struct RawEntityState {
    #[serde(default)]
    entity_id: String,
    #[serde(default)]
    state: Value,
    #[serde(default)]
    attributes: Map<String, Value>,
}

impl From<RawEntityState> for EntityState {
    fn from(raw: RawEntityState) -> Self {
        let state = match raw.state {
            Value::String(s) => s,
            Value::Null => String::new(),
            other => other.to_string(),
        };
        Self {
            entity_id: raw.entity_id,
            state,
            attributes: Attributes::from_map(&raw.attributes),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    Json(String),
    UnexpectedShape,
}

impl std::fmt::Display for StateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StateError::Json(msg) => write!(f, "state snapshot is not valid JSON: {msg}"),
            StateError::UnexpectedShape => {
                write!(f, "state snapshot must be an object keyed by entity id or an array")
            }
        }
    }
}

impl std::error::Error for StateError {}

/// Snapshot of the live entity-state table.
///
/// Entries are kept in a `BTreeMap`, so category scans yield identifiers in
/// lexicographic order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateTable {
    states: BTreeMap<String, EntityState>,
}

impl StateTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, state: EntityState) {
        self.states.insert(state.entity_id.clone(), state);
    }

    pub fn get(&self, entity_id: &str) -> Option<&EntityState> {
        self.states.get(entity_id)
    }

    /// Exact lookup, then a lowercase retry.
    pub fn lookup(&self, entity_id: &str) -> Option<&EntityState> {
        let trimmed = entity_id.trim();
        self.get(trimmed)
            .or_else(|| self.get(trimmed.to_lowercase().as_str()))
    }

    pub fn contains(&self, entity_id: &str) -> bool {
        self.states.contains_key(entity_id)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn in_domain<'a>(&'a self, domain: &'a str) -> impl Iterator<Item = &'a EntityState> + 'a {
        self.states
            .values()
            .filter(move |s| in_domain(&s.entity_id, domain))
    }

    /// Decodes either the host's `{ id: state }` map or a plain array of states.
    pub fn from_json(text: &str) -> Result<Self, StateError> {
        let value: Value = serde_json::from_str(text).map_err(|e| StateError::Json(e.to_string()))?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, StateError> {
        let mut table = Self::new();
        match value {
            Value::Object(map) => {
                for (key, raw) in map {
                    let mut state: EntityState =
                        serde_json::from_value(raw).map_err(|e| StateError::Json(e.to_string()))?;
                    if state.entity_id.is_empty() {
                        state.entity_id = key;
                    }
                    table.insert(state);
                }
            }
            Value::Array(items) => {
                for raw in items {
                    let state: EntityState =
                        serde_json::from_value(raw).map_err(|e| StateError::Json(e.to_string()))?;
                    if state.entity_id.is_empty() {
                        tracing::debug!("skipping state row without entity_id");
                        continue;
                    }
                    table.insert(state);
                }
            }
            _ => return Err(StateError::UnexpectedShape),
        }
        Ok(table)
    }
}

impl FromIterator<EntityState> for StateTable {
    fn from_iter<I: IntoIterator<Item = EntityState>>(iter: I) -> Self {
        let mut table = Self::new();
        for state in iter {
            table.insert(state);
        }
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn splits_namespaced_ids() {
        assert_eq!(domain_of("person.alice"), Some("person"));
        assert_eq!(object_id("person.alice"), "alice");
        assert_eq!(domain_of("alice"), None);
        assert_eq!(object_id("alice"), "alice");
        assert!(in_domain("zone.home", ZONE_DOMAIN));
        assert!(!in_domain("zoned.home", ZONE_DOMAIN));
    }

    #[test]
    fn coerces_attribute_bag() {
        let raw = json!({
            "latitude": "53.9",
            "longitude": 27.5667,
            "source": " device_tracker.phone ",
            "zone": "",
            "entity_id": ["device_tracker.a", "device_tracker.b"],
            "friendly_name": "Alice",
            "gps_accuracy": 12,
        });
        let attrs = Attributes::from_map(raw.as_object().unwrap());
        assert_eq!(
            attrs,
            Attributes {
                latitude: Some(53.9),
                longitude: Some(27.5667),
                source: Some("device_tracker.phone".into()),
                zone: None,
                entity_id: Some("device_tracker.a".into()),
                friendly_name: Some("Alice".into()),
                name: None,
            }
        );
    }

    #[test]
    fn non_numeric_coordinates_are_absent() {
        let raw = json!({ "latitude": "north", "longitude": true });
        let attrs = Attributes::from_map(raw.as_object().unwrap());
        assert_eq!(attrs.latitude, None);
        assert_eq!(attrs.longitude, None);
        assert_eq!(attrs.coordinate(), None);
    }

    #[test]
    fn decodes_keyed_snapshot() {
        let table = StateTable::from_json(
            r#"{
                "person.alice": { "state": "home", "attributes": { "friendly_name": "Alice" } },
                "zone.home": { "entity_id": "zone.home", "state": 0, "attributes": {} }
            }"#,
        )
        .unwrap();
        assert_eq!(table.len(), 2);
        let alice = table.get("person.alice").unwrap();
        assert_eq!(alice.entity_id, "person.alice");
        assert_eq!(alice.friendly_name(), "Alice");
        assert_eq!(table.get("zone.home").unwrap().state, "0");
    }

    #[test]
    fn decodes_array_snapshot_and_skips_anonymous_rows() {
        let table = StateTable::from_json(
            r#"[{ "entity_id": "person.bob", "state": "away" }, { "state": "orphan" }]"#,
        )
        .unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.get("person.bob").unwrap().friendly_name(), "person.bob");
    }

    #[test]
    fn rejects_scalar_snapshot() {
        assert_eq!(StateTable::from_json("42"), Err(StateError::UnexpectedShape));
        assert!(matches!(StateTable::from_json("{"), Err(StateError::Json(_))));
    }

    #[test]
    fn domain_scan_is_sorted() {
        let table: StateTable = ["person.zed", "zone.home", "person.amy"]
            .into_iter()
            .map(|id| EntityState::new(id, "", Attributes::default()))
            .collect();
        let ids: Vec<_> = table
            .in_domain(PERSON_DOMAIN)
            .map(|s| s.entity_id.as_str())
            .collect();
        assert_eq!(ids, vec!["person.amy", "person.zed"]);
    }

    #[test]
    fn lookup_falls_back_to_lowercase() {
        let table: StateTable = [EntityState::new("person.amy", "", Attributes::default())]
            .into_iter()
            .collect();
        assert!(table.lookup("Person.Amy").is_some());
        assert!(table.lookup("person.bob").is_none());
    }
}
