//! Spherical Web Mercator, the projection every slippy-map surface uses.
//!
//! Coordinates are "world pixels": the full world is a square of
//! `TILE_SIZE_PX * 2^zoom` pixels with the origin at the north-west corner.

use std::f64::consts::PI;

use serde::Serialize;

use crate::bounds::LatLonBounds;
use crate::geo::{LatLon, ScreenPoint};

pub const TILE_SIZE_PX: f64 = 256.0;

/// Latitude at which the Mercator square is cut off.
pub const MAX_MERCATOR_LAT: f64 = 85.051_128_779_806_59;

pub fn world_size_px(zoom: f64) -> f64 {
    TILE_SIZE_PX * 2f64.powf(zoom)
}

pub fn project_world(at: LatLon, zoom: f64) -> ScreenPoint {
    let size = world_size_px(zoom);
    let lat = at.lat.clamp(-MAX_MERCATOR_LAT, MAX_MERCATOR_LAT).to_radians();
    let x = (at.lon + 180.0) / 360.0 * size;
    let y = (1.0 - (lat.tan() + 1.0 / lat.cos()).ln() / PI) / 2.0 * size;
    ScreenPoint::new(x, y)
}

pub fn unproject_world(p: ScreenPoint, zoom: f64) -> LatLon {
    let size = world_size_px(zoom);
    let lon = p.x / size * 360.0 - 180.0;
    let n = PI - 2.0 * PI * p.y / size;
    let lat = n.sinh().atan().to_degrees();
    LatLon {
        lat: lat.clamp(-MAX_MERCATOR_LAT, MAX_MERCATOR_LAT),
        lon: lon.clamp(-180.0, 180.0),
    }
}

/// A map view: what is centered, at which zoom, in how many pixels.
#[derive(Debug, Copy, Clone, PartialEq, Serialize)]
pub struct Viewport {
    pub center: LatLon,
    pub zoom: f64,
    pub size_px: [f64; 2],
}

impl Viewport {
    pub fn new(center: LatLon, zoom: f64, size_px: [f64; 2]) -> Self {
        Self {
            center,
            zoom,
            size_px,
        }
    }

    /// Projects a position to viewport pixels.
    pub fn project(&self, at: LatLon) -> ScreenPoint {
        let origin = project_world(self.center, self.zoom);
        let p = project_world(at, self.zoom);
        ScreenPoint::new(
            p.x - origin.x + self.size_px[0] * 0.5,
            p.y - origin.y + self.size_px[1] * 0.5,
        )
    }

    /// Fits `bounds` into `size_px` minus `padding_px` on every side.
    ///
    /// Zoom snaps down to an integer level and never exceeds `max_zoom`.
    pub fn fit(bounds: LatLonBounds, size_px: [f64; 2], padding_px: f64, max_zoom: f64) -> Self {
        let sw = project_world(bounds.south_west(), 0.0);
        let ne = project_world(bounds.north_east(), 0.0);
        let span_x = (ne.x - sw.x).abs();
        let span_y = (sw.y - ne.y).abs();
        let avail_x = (size_px[0] - 2.0 * padding_px).max(1.0);
        let avail_y = (size_px[1] - 2.0 * padding_px).max(1.0);

        let scale = match (span_x > 0.0, span_y > 0.0) {
            (false, false) => f64::INFINITY,
            (true, false) => avail_x / span_x,
            (false, true) => avail_y / span_y,
            (true, true) => (avail_x / span_x).min(avail_y / span_y),
        };
        let zoom = if scale.is_finite() {
            scale.log2().floor().clamp(0.0, max_zoom)
        } else {
            max_zoom
        };

        let mid = ScreenPoint::new((sw.x + ne.x) * 0.5, (sw.y + ne.y) * 0.5);
        let center = unproject_world(mid, 0.0);
        Self::new(center, zoom, size_px)
    }
}
