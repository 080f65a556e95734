use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::state::{PERSON_DOMAIN, StateTable};

pub const DEFAULT_PERSON_COLOR: &str = "#1e88e5";
pub const DEFAULT_PERSON_RADIUS: f64 = 7.0;

/// Auto-discovery takes at most this many people, in lexicographic id order.
pub const AUTO_DISCOVER_LIMIT: usize = 5;

/// What a person marker is labeled with.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelMode {
    #[default]
    Name,
    State,
    EntityId,
}

impl LabelMode {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "name" => Some(Self::Name),
            "state" => Some(Self::State),
            "entity_id" => Some(Self::EntityId),
            _ => None,
        }
    }
}

/// One configured person entry, either a bare id or id plus overrides.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PersonSpec {
    pub entity: String,
    pub label: Option<LabelMode>,
    pub color: Option<String>,
    pub radius: Option<f64>,
}

impl PersonSpec {
    pub fn id(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PersonDefaults {
    pub label: LabelMode,
    pub color: String,
    pub radius: f64,
}

impl Default for PersonDefaults {
    fn default() -> Self {
        Self {
            label: LabelMode::Name,
            color: DEFAULT_PERSON_COLOR.to_string(),
            radius: DEFAULT_PERSON_RADIUS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackedPerson {
    pub entity_id: String,
    pub label: LabelMode,
    pub color: String,
    pub radius: f64,
}

impl TrackedPerson {
    fn from_spec(entity_id: String, spec: &PersonSpec, defaults: &PersonDefaults) -> Self {
        let color = spec
            .color
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or(defaults.color.as_str())
            .to_string();
        let radius = spec
            .radius
            .filter(|r| r.is_finite() && *r > 0.0)
            .unwrap_or(defaults.radius);
        Self {
            entity_id,
            label: spec.label.unwrap_or(defaults.label),
            color,
            radius,
        }
    }

    fn with_defaults(entity_id: String, defaults: &PersonDefaults) -> Self {
        Self {
            entity_id,
            label: defaults.label,
            color: defaults.color.clone(),
            radius: defaults.radius,
        }
    }
}

/// Maps a configured identifier onto a live one.
///
/// Tries the exact id, then its lowercase form, then (for ids without a
/// category) the `person.` category.
pub fn normalize_entity_id(table: &StateTable, raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if table.contains(raw) {
        return Some(raw.to_string());
    }
    let lower = raw.to_lowercase();
    if table.contains(&lower) {
        return Some(lower);
    }
    if !lower.contains('.') {
        let prefixed = format!("{PERSON_DOMAIN}.{lower}");
        if table.contains(&prefixed) {
            return Some(prefixed);
        }
    }
    None
}

/// Resolves the explicit list (input order, first occurrence wins) or, when it
/// normalizes to nothing, auto-discovers people.
pub fn resolve_persons(
    specs: &[PersonSpec],
    table: &StateTable,
    defaults: &PersonDefaults,
) -> Vec<TrackedPerson> {
    let explicit = resolve_explicit(specs, table, defaults);
    if !explicit.is_empty() {
        return explicit;
    }
    auto_discover(table, defaults)
}

pub fn auto_discover(table: &StateTable, defaults: &PersonDefaults) -> Vec<TrackedPerson> {
    let mut ids: Vec<&str> = table
        .in_domain(PERSON_DOMAIN)
        .map(|s| s.entity_id.as_str())
        .collect();
    ids.sort_unstable();
    ids.into_iter()
        .take(AUTO_DISCOVER_LIMIT)
        .map(|id| TrackedPerson::with_defaults(id.to_string(), defaults))
        .collect()
}

fn resolve_explicit(
    specs: &[PersonSpec],
    table: &StateTable,
    defaults: &PersonDefaults,
) -> Vec<TrackedPerson> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for spec in specs {
        let Some(entity_id) = normalize_entity_id(table, &spec.entity) else {
            tracing::debug!(entity = %spec.entity, "configured entity not in state table");
            continue;
        };
        if !seen.insert(entity_id.clone()) {
            continue;
        }
        out.push(TrackedPerson::from_spec(entity_id, spec, defaults));
    }
    out
}

/// Entities whose history is drawn.
///
/// An override list wins only when at least one of its ids normalizes;
/// otherwise the tracked people are used.
pub fn resolve_track_entities(
    overrides: &[String],
    persons: &[TrackedPerson],
    table: &StateTable,
) -> Vec<String> {
    let mut seen = HashSet::new();
    let explicit: Vec<String> = overrides
        .iter()
        .filter_map(|raw| normalize_entity_id(table, raw))
        .filter(|id| seen.insert(id.clone()))
        .collect();
    if !explicit.is_empty() {
        return explicit;
    }
    persons.iter().map(|p| p.entity_id.clone()).collect()
}
