use serde::Serialize;

/// Polyline color for entities that no tracked person claims.
pub const FALLBACK_TRACK_COLOR: &str = "#3388ff";

pub const PERSON_STROKE_WEIGHT: f64 = 2.0;
pub const PERSON_FILL_OPACITY: f64 = 0.6;
pub const TRACK_WEIGHT: f64 = 3.0;
pub const ENDPOINT_RADIUS: f64 = 5.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircleStyle {
    pub radius: f64,
    pub color: String,
    pub weight: f64,
    pub opacity: f64,
    pub fill_color: String,
    pub fill_opacity: f64,
}

impl CircleStyle {
    /// Stroke and fill in the same color.
    pub fn solid(color: &str, radius: f64, weight: f64, fill_opacity: f64) -> Self {
        Self {
            radius,
            color: color.to_string(),
            weight,
            opacity: 1.0,
            fill_color: color.to_string(),
            fill_opacity,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolylineStyle {
    pub color: String,
    pub weight: f64,
    pub opacity: f64,
}

impl PolylineStyle {
    pub fn new(color: &str, weight: f64, opacity: f64) -> Self {
        Self {
            color: color.to_string(),
            weight,
            opacity,
        }
    }
}
