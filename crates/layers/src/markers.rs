use foundation::{LatLon, LatLonBounds};
use presence::{EntityState, LabelMode, ResolvedVia, StateTable, TrackedPerson, resolve_detailed};
use serde::Serialize;

use crate::symbology::{CircleStyle, PERSON_FILL_OPACITY, PERSON_STROKE_WEIGHT};

pub const FIT_PADDING_PX: f64 = 24.0;
pub const FIT_MAX_ZOOM: f64 = 15.0;

pub const STATUS_NO_COORDINATES: &str = "No person coordinates found.";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PersonMarker {
    pub entity_id: String,
    pub position: LatLon,
    pub via: ResolvedVia,
    pub label: String,
    pub popup: String,
    pub style: CircleStyle,
}

/// Request to fit the viewport around `bounds`.
#[derive(Debug, Copy, Clone, PartialEq, Serialize)]
pub struct FitRequest {
    pub bounds: LatLonBounds,
    pub padding_px: f64,
    pub max_zoom: f64,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct PersonLayerSnapshot {
    pub markers: Vec<PersonMarker>,
}

impl PersonLayerSnapshot {
    pub fn bounds(&self) -> Option<LatLonBounds> {
        LatLonBounds::from_points(self.markers.iter().map(|m| m.position))
    }

    pub fn fit_request(&self) -> Option<FitRequest> {
        self.bounds().map(|bounds| FitRequest {
            bounds,
            padding_px: FIT_PADDING_PX,
            max_zoom: FIT_MAX_ZOOM,
        })
    }

    pub fn status_text(&self) -> String {
        if self.markers.is_empty() {
            STATUS_NO_COORDINATES.to_string()
        } else {
            format!("Markers: {}", self.markers.len())
        }
    }
}

/// One circle marker per tracked person that resolves to a coordinate.
///
/// People missing from the table or without a coordinate are skipped.
pub fn build_person_markers(persons: &[TrackedPerson], table: &StateTable) -> PersonLayerSnapshot {
    let markers = persons
        .iter()
        .filter_map(|person| {
            let state = table.get(&person.entity_id)?;
            let resolution = resolve_detailed(table, state)?;
            let label = label_for(person.label, state);
            Some(PersonMarker {
                entity_id: person.entity_id.clone(),
                position: resolution.position,
                via: resolution.via,
                popup: popup_text(&label, resolution.position),
                label,
                style: CircleStyle::solid(
                    &person.color,
                    person.radius,
                    PERSON_STROKE_WEIGHT,
                    PERSON_FILL_OPACITY,
                ),
            })
        })
        .collect();
    PersonLayerSnapshot { markers }
}

pub fn label_for(mode: LabelMode, state: &EntityState) -> String {
    match mode {
        LabelMode::Name => state.friendly_name().to_string(),
        LabelMode::State => state.state.clone(),
        LabelMode::EntityId => state.entity_id.clone(),
    }
}

pub fn popup_text(label: &str, at: LatLon) -> String {
    format!("{label}\n{:.5}, {:.5}", at.lat, at.lon)
}
