//! Historical paths with recency-based fading.
//!
//! Each entity's track becomes one polyline segment per consecutive pair of
//! valid points. A segment is assigned a day bucket (how many whole days old
//! it is, clamped to the lookback window) and fades linearly from fully
//! opaque today to 0.1 at the oldest bucket.

use std::collections::HashMap;

use foundation::{DAY_MS, EpochMs, LatLon, parse_iso8601_ms, round_to};
use presence::TrackedPerson;
use serde::Serialize;
use streaming::{RawTrack, RawTrackPoint};

use crate::symbology::{
    CircleStyle, ENDPOINT_RADIUS, FALLBACK_TRACK_COLOR, PolylineStyle, TRACK_WEIGHT,
};

pub const MIN_SEGMENT_OPACITY: f64 = 0.1;
const START_FILL_OPACITY: f64 = 0.85;
const END_FILL_OPACITY: f64 = 1.0;

#[derive(Debug, Copy, Clone, PartialEq, Serialize)]
pub struct TrackPoint {
    pub position: LatLon,
    pub timestamp_ms: Option<EpochMs>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackSegment {
    pub entity_id: String,
    pub from: TrackPoint,
    pub to: TrackPoint,
    pub bucket: u32,
    pub opacity: f64,
    pub style: PolylineStyle,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointKind {
    Start,
    End,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackEndpoint {
    pub entity_id: String,
    pub kind: EndpointKind,
    pub point: TrackPoint,
    pub label: String,
    pub style: CircleStyle,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct TrackLayerSnapshot {
    pub segments: Vec<TrackSegment>,
    pub endpoints: Vec<TrackEndpoint>,
}

/// Drops points without a usable coordinate. Bad timestamps become `None`.
/// Delivery order is kept.
pub fn normalize_points(raw: &[RawTrackPoint]) -> Vec<TrackPoint> {
    raw.iter()
        .filter_map(|p| {
            let position = LatLon::from_parts(p.lat, p.lon)?;
            let timestamp_ms = p.ts.as_deref().and_then(parse_iso8601_ms);
            Some(TrackPoint {
                position,
                timestamp_ms,
            })
        })
        .collect()
}

/// Whole days between `timestamp_ms` and `now_ms`, clamped to the window.
///
/// Future timestamps count as today; a missing timestamp counts as today.
pub fn day_bucket(timestamp_ms: Option<EpochMs>, now_ms: EpochMs, day_window: u32) -> u32 {
    let Some(ts) = timestamp_ms else {
        return 0;
    };
    let last = day_window.max(1) - 1;
    let age_days = now_ms.saturating_sub(ts).max(0) / DAY_MS;
    u32::try_from(age_days).unwrap_or(u32::MAX).min(last)
}

pub fn bucket_opacity(bucket: u32, day_window: u32) -> f64 {
    if day_window <= 1 {
        return 1.0;
    }
    let last = f64::from(day_window - 1);
    let bucket = f64::from(bucket.min(day_window - 1));
    round_to(1.0 - (1.0 - MIN_SEGMENT_OPACITY) * bucket / last, 3)
}

pub fn colors_by_entity(persons: &[TrackedPerson]) -> HashMap<String, String> {
    persons
        .iter()
        .map(|p| (p.entity_id.clone(), p.color.clone()))
        .collect()
}

/// Builds segments and start/end markers for every track with an entity id
/// and at least two valid points. Output follows track order, then point order.
pub fn build_segments(
    tracks: &[RawTrack],
    colors: &HashMap<String, String>,
    day_window: u32,
    now_ms: EpochMs,
) -> TrackLayerSnapshot {
    let mut out = TrackLayerSnapshot::default();

    for track in tracks {
        if track.entity_id.is_empty() {
            tracing::trace!(points = track.points.len(), "track without entity id");
            continue;
        }
        let points = normalize_points(&track.points);
        let (Some(first), Some(last)) = (points.first(), points.last()) else {
            continue;
        };
        if points.len() < 2 {
            tracing::trace!(entity = %track.entity_id, "track has fewer than two valid points");
            continue;
        }

        let color = colors
            .get(&track.entity_id)
            .map(String::as_str)
            .unwrap_or(FALLBACK_TRACK_COLOR);

        for pair in points.windows(2) {
            let (from, to) = (pair[0], pair[1]);
            let bucket = day_bucket(from.timestamp_ms, now_ms, day_window)
                .max(day_bucket(to.timestamp_ms, now_ms, day_window));
            let opacity = bucket_opacity(bucket, day_window);
            out.segments.push(TrackSegment {
                entity_id: track.entity_id.clone(),
                from,
                to,
                bucket,
                opacity,
                style: PolylineStyle::new(color, TRACK_WEIGHT, opacity),
            });
        }

        for (kind, point, fill_opacity) in [
            (EndpointKind::Start, *first, START_FILL_OPACITY),
            (EndpointKind::End, *last, END_FILL_OPACITY),
        ] {
            out.endpoints.push(TrackEndpoint {
                entity_id: track.entity_id.clone(),
                kind,
                point,
                label: track.entity_id.clone(),
                style: CircleStyle::solid(color, ENDPOINT_RADIUS, 2.0, fill_opacity),
            });
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use presence::LabelMode;

    const NOW: EpochMs = 1_700_000_000_000;

    fn assert_close(a: f64, b: f64, eps: f64) {
        let diff = (a - b).abs();
        assert!(diff <= eps, "expected {a} ~= {b} (diff {diff})");
    }

    fn iso(ms: EpochMs) -> String {
        foundation::format_iso8601(ms).unwrap()
    }

    fn point(lat: f64, lon: f64, age_ms: Option<i64>) -> RawTrackPoint {
        RawTrackPoint {
            lat: Some(lat),
            lon: Some(lon),
            ts: age_ms.map(|age| iso(NOW - age)),
        }
    }

    fn track(id: &str, points: Vec<RawTrackPoint>) -> RawTrack {
        RawTrack {
            entity_id: id.to_string(),
            points,
        }
    }

    #[test]
    fn bucket_clamps_and_treats_missing_as_today() {
        assert_eq!(day_bucket(None, NOW, 5), 0);
        assert_eq!(day_bucket(Some(NOW + DAY_MS), NOW, 5), 0);
        assert_eq!(day_bucket(Some(NOW - DAY_MS + 1), NOW, 5), 0);
        assert_eq!(day_bucket(Some(NOW - DAY_MS), NOW, 5), 1);
        assert_eq!(day_bucket(Some(NOW - 40 * DAY_MS), NOW, 5), 4);
        assert_eq!(day_bucket(Some(NOW - 40 * DAY_MS), NOW, 1), 0);
    }

    #[test]
    fn opacity_decays_linearly_to_floor() {
        assert_eq!(bucket_opacity(0, 5), 1.0);
        assert_close(bucket_opacity(2, 5), 0.55, 1e-12);
        assert_close(bucket_opacity(4, 5), 0.1, 1e-12);
        assert_eq!(bucket_opacity(0, 1), 1.0);
        assert_eq!(bucket_opacity(3, 0), 1.0);
    }

    #[test]
    fn segment_takes_older_endpoint_bucket() {
        let tracks = vec![track(
            "person.a",
            vec![point(53.9, 27.5, Some(2 * DAY_MS + 5)), point(53.91, 27.51, Some(1_000))],
        )];
        let snap = build_segments(&tracks, &HashMap::new(), 5, NOW);
        assert_eq!(snap.segments.len(), 1);
        assert_eq!(snap.segments[0].bucket, 2);
        assert_close(snap.segments[0].opacity, 0.55, 1e-12);
        assert_close(snap.segments[0].style.opacity, 0.55, 1e-12);
    }

    #[test]
    fn single_day_window_is_always_opaque() {
        let tracks = vec![track(
            "person.a",
            vec![
                point(1.0, 1.0, Some(10 * DAY_MS)),
                point(1.1, 1.1, Some(3 * DAY_MS)),
                point(1.2, 1.2, None),
            ],
        )];
        let snap = build_segments(&tracks, &HashMap::new(), 1, NOW);
        assert_eq!(snap.segments.len(), 2);
        assert!(snap.segments.iter().all(|s| s.opacity == 1.0));
    }

    #[test]
    fn invalid_points_are_dropped_and_short_tracks_skipped() {
        let mut bad_ts = point(2.0, 2.0, None);
        bad_ts.ts = Some("not a time".into());
        let tracks = vec![
            track(
                "person.short",
                vec![point(1.0, 1.0, None), RawTrackPoint::default()],
            ),
            track(
                "person.ok",
                vec![
                    RawTrackPoint { lat: Some(95.0), ..point(0.0, 0.0, None) },
                    point(1.0, 1.0, Some(0)),
                    bad_ts,
                ],
            ),
        ];
        let snap = build_segments(&tracks, &HashMap::new(), 3, NOW);
        assert_eq!(snap.segments.len(), 1);
        assert_eq!(snap.segments[0].entity_id, "person.ok");
        assert_eq!(snap.segments[0].to.timestamp_ms, None);
        assert_eq!(snap.endpoints.len(), 2);
        assert!(snap.endpoints.iter().all(|e| e.entity_id == "person.ok"));
    }

    #[test]
    fn tracks_without_entity_id_are_skipped() {
        let tracks = vec![
            track("", vec![point(1.0, 1.0, None), point(2.0, 2.0, None)]),
            track("person.a", vec![point(3.0, 3.0, None), point(4.0, 4.0, None)]),
        ];
        let snap = build_segments(&tracks, &HashMap::new(), 3, NOW);
        assert_eq!(snap.segments.len(), 1);
        assert_eq!(snap.segments[0].entity_id, "person.a");
        assert_eq!(snap.endpoints.len(), 2);
    }

    #[test]
    fn endpoints_and_colors() {
        let persons = vec![TrackedPerson {
            entity_id: "person.a".into(),
            label: LabelMode::Name,
            color: "#ff0000".into(),
            radius: 7.0,
        }];
        let tracks = vec![
            track("person.a", vec![point(1.0, 1.0, None), point(2.0, 2.0, None)]),
            track("device_tracker.x", vec![point(3.0, 3.0, None), point(4.0, 4.0, None)]),
        ];
        let snap = build_segments(&tracks, &colors_by_entity(&persons), 3, NOW);
        assert_eq!(snap.segments[0].style.color, "#ff0000");
        assert_eq!(snap.segments[1].style.color, FALLBACK_TRACK_COLOR);

        let a: Vec<_> = snap
            .endpoints
            .iter()
            .filter(|e| e.entity_id == "person.a")
            .collect();
        assert_eq!(a[0].kind, EndpointKind::Start);
        assert_eq!(a[0].point.position.lat, 1.0);
        assert_eq!(a[1].kind, EndpointKind::End);
        assert_eq!(a[1].point.position.lat, 2.0);
        assert_eq!(a[1].label, "person.a");
        assert!(a.iter().all(|e| e.style.fill_opacity >= 0.85));
    }
}
