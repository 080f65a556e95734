use serde::Serialize;

use crate::geo::LatLon;

/// Geographic bounding box in decimal degrees.
#[derive(Debug, Copy, Clone, PartialEq, Serialize)]
pub struct LatLonBounds {
    pub south: f64,
    pub west: f64,
    pub north: f64,
    pub east: f64,
}

impl LatLonBounds {
    pub fn from_point(p: LatLon) -> Self {
        Self {
            south: p.lat,
            west: p.lon,
            north: p.lat,
            east: p.lon,
        }
    }

    /// Returns `None` for an empty iterator.
    pub fn from_points(points: impl IntoIterator<Item = LatLon>) -> Option<Self> {
        let mut iter = points.into_iter();
        let mut out = Self::from_point(iter.next()?);
        for p in iter {
            out.extend(p);
        }
        Some(out)
    }

    pub fn extend(&mut self, p: LatLon) {
        self.south = self.south.min(p.lat);
        self.north = self.north.max(p.lat);
        self.west = self.west.min(p.lon);
        self.east = self.east.max(p.lon);
    }

    pub fn south_west(&self) -> LatLon {
        LatLon {
            lat: self.south,
            lon: self.west,
        }
    }

    pub fn north_east(&self) -> LatLon {
        LatLon {
            lat: self.north,
            lon: self.east,
        }
    }
}
