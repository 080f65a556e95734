//! The engine instance: everything that must survive between render passes.
//!
//! Hosts drive it with four kinds of events: a new state snapshot
//! ([`PresenceEngine::on_state`]), a viewport change
//! ([`PresenceEngine::on_viewport`]), a remote fetch completing
//! ([`PresenceEngine::complete_tracks`] / [`PresenceEngine::complete_photos`])
//! and clicks. The engine never performs I/O itself; it hands out
//! [`FetchRequest`]s and takes the responses back.

use foundation::EpochMs;
use layers::{
    build_person_markers, build_segments, colors_by_entity, FitRequest, PersonLayerSnapshot,
    PhotoOverlay, PhotoViewer, ScreenProjector, SelectedPhoto, TrackLayerSnapshot, ViewerDisplay,
    ViewerStep,
};
use presence::{resolve_persons, resolve_track_entities, StateTable, TrackedPerson};
use serde::Serialize;
use streaming::{
    Admission, FetchGate, FetchKey, FetchTicket, PhotoResponse, RawTrack, RemoteQuery, SourceKind,
    TrackResponse,
};

use crate::config::CardConfig;
use crate::metrics::{FetchOutcome, Metrics};

pub const STATUS_MAP_UNAVAILABLE: &str = "Map failed to load.";

/// A remote query the host should perform and report back with `ticket`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FetchRequest {
    pub ticket: FetchTicket,
    pub source: SourceKind,
    pub endpoint: String,
    pub query: RemoteQuery,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RenderPlan {
    pub persons: PersonLayerSnapshot,
    pub status: Option<String>,
    pub fit: Option<FitRequest>,
    pub tracks: TrackLayerSnapshot,
    pub fetches: Vec<FetchRequest>,
}

trait Reply {
    fn succeeded(&self) -> bool;
    fn error(&self) -> Option<&str>;
}

impl Reply for TrackResponse {
    fn succeeded(&self) -> bool {
        self.success
    }
    fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

impl Reply for PhotoResponse {
    fn succeeded(&self) -> bool {
        self.success
    }
    fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

#[derive(Debug)]
pub struct PresenceEngine {
    config: CardConfig,
    persons: Vec<TrackedPerson>,
    track_gate: FetchGate,
    photo_gate: FetchGate,
    tracks: Vec<RawTrack>,
    photos: PhotoOverlay,
    viewer: PhotoViewer,
    fit_done: bool,
    torn_down: bool,
    map_unavailable: bool,
    metrics: Metrics,
}

impl PresenceEngine {
    pub fn new(config: CardConfig) -> Self {
        Self {
            track_gate: FetchGate::new(config.tracks_refresh_ms()),
            photo_gate: FetchGate::new(config.photos_refresh_ms()),
            photos: PhotoOverlay::new(f64::from(config.photo_marker_size)),
            config,
            persons: Vec::new(),
            tracks: Vec::new(),
            viewer: PhotoViewer::new(),
            fit_done: false,
            torn_down: false,
            map_unavailable: false,
            metrics: Metrics::new(),
        }
    }

    pub fn config(&self) -> &CardConfig {
        &self.config
    }

    pub fn persons(&self) -> &[TrackedPerson] {
        &self.persons
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Swaps in a new configuration. Changed query parameters change the
    /// fetch keys, so the next pass refetches immediately.
    pub fn reconfigure(&mut self, config: CardConfig) {
        self.track_gate.set_refresh_interval(config.tracks_refresh_ms());
        self.photo_gate.set_refresh_interval(config.photos_refresh_ms());
        self.photos.set_marker_size(f64::from(config.photo_marker_size));
        self.config = config;
        self.fit_done = false;
    }

    /// One render pass for a fresh state snapshot.
    pub fn on_state(&mut self, table: &StateTable, now_ms: EpochMs) -> RenderPlan {
        if self.map_unavailable {
            return RenderPlan {
                status: Some(STATUS_MAP_UNAVAILABLE.to_string()),
                ..RenderPlan::default()
            };
        }
        if self.torn_down {
            tracing::debug!("engine reattached after teardown");
            self.torn_down = false;
        }

        self.persons = resolve_persons(&self.config.persons, table, &self.config.person_defaults());
        let persons = build_person_markers(&self.persons, table);
        self.metrics
            .set_gauge("markers", i64::try_from(persons.markers.len()).unwrap_or(i64::MAX));

        let mut fit = None;
        if self.config.fit_entities && !self.fit_done {
            fit = persons.fit_request();
            self.fit_done = fit.is_some();
        }
        let status = self.config.show_status.then(|| persons.status_text());

        let mut fetches = Vec::new();
        if self.config.show_tracks {
            fetches.extend(self.plan_track_fetch(table, now_ms));
        }
        if self.config.show_photos {
            fetches.extend(self.plan_photo_fetch(now_ms));
        }

        RenderPlan {
            persons,
            status,
            fit,
            tracks: self.track_layer(now_ms),
            fetches,
        }
    }

    fn plan_track_fetch(&mut self, table: &StateTable, now_ms: EpochMs) -> Option<FetchRequest> {
        let entities = resolve_track_entities(&self.config.track_entities, &self.persons, table);
        if entities.is_empty() {
            tracing::debug!("no entities to fetch tracks for");
            return None;
        }
        let query = self.config.track_query(entities);
        let key = query.fetch_key(&self.config.tracks_endpoint);
        let ticket = admit(&mut self.track_gate, &mut self.metrics, SourceKind::Tracks, key, now_ms)?;
        Some(FetchRequest {
            ticket,
            source: SourceKind::Tracks,
            endpoint: self.config.tracks_endpoint.clone(),
            query: RemoteQuery::Tracks(query),
        })
    }

    fn plan_photo_fetch(&mut self, now_ms: EpochMs) -> Option<FetchRequest> {
        let query = self.config.photo_query();
        let key = query.fetch_key(&self.config.photos_endpoint);
        let ticket = admit(&mut self.photo_gate, &mut self.metrics, SourceKind::Photos, key, now_ms)?;
        Some(FetchRequest {
            ticket,
            source: SourceKind::Photos,
            endpoint: self.config.photos_endpoint.clone(),
            query: RemoteQuery::Photos(query),
        })
    }

    /// Segments for the last accepted track response, faded relative to `now_ms`.
    pub fn track_layer(&self, now_ms: EpochMs) -> TrackLayerSnapshot {
        if !self.config.show_tracks {
            return TrackLayerSnapshot::default();
        }
        build_segments(
            &self.tracks,
            &colors_by_entity(&self.persons),
            self.config.track_days,
            now_ms,
        )
    }

    /// Applies a track response. Returns `true` if it replaced the cached tracks.
    pub fn complete_tracks(&mut self, ticket: FetchTicket, result: Result<TrackResponse, String>) -> bool {
        let settled = settle(
            &mut self.track_gate,
            &mut self.metrics,
            SourceKind::Tracks,
            self.torn_down,
            ticket,
            result,
        );
        match settled {
            Some(response) => {
                tracing::debug!(tracks = response.tracks.len(), "tracks updated");
                self.tracks = response.tracks;
                true
            }
            None => false,
        }
    }

    /// Applies a photo response. Returns `true` if it replaced the candidates.
    pub fn complete_photos(&mut self, ticket: FetchTicket, result: Result<PhotoResponse, String>) -> bool {
        let settled = settle(
            &mut self.photo_gate,
            &mut self.metrics,
            SourceKind::Photos,
            self.torn_down,
            ticket,
            result,
        );
        let Some(response) = settled else {
            return false;
        };
        self.photos.replace(&response.items);
        self.viewer.sync(self.photos.candidates());
        tracing::debug!(
            items = response.items.len(),
            candidates = self.photos.candidates().len(),
            "photos updated"
        );
        true
    }

    /// Recomputes which photo markers are shown for the current projection.
    pub fn on_viewport<P: ScreenProjector>(&mut self, projector: &P) -> Vec<SelectedPhoto> {
        if !self.config.show_photos || self.torn_down || self.map_unavailable {
            return Vec::new();
        }
        let selected = self.photos.select(projector);
        self.metrics
            .set_gauge("photos.selected", i64::try_from(selected.len()).unwrap_or(i64::MAX));
        selected
    }

    pub fn click_photo(&mut self, item_key: &str) -> Option<ViewerDisplay> {
        match self.photos.find(item_key) {
            Some(photo) => {
                let photo = photo.clone();
                self.viewer.click_marker(&photo);
            }
            None => tracing::debug!(item_key, "click on unknown photo"),
        }
        self.viewer.display()
    }

    pub fn click_viewer(&mut self) -> Option<ViewerDisplay> {
        self.viewer.click_viewer();
        self.viewer.display()
    }

    pub fn viewer_step(&self) -> ViewerStep {
        self.viewer.step()
    }

    pub fn viewer_display(&self) -> Option<ViewerDisplay> {
        self.viewer.display()
    }

    /// Releases per-attachment state. Responses for fetches issued before this
    /// call are discarded.
    pub fn teardown(&mut self) {
        self.viewer.close();
        self.track_gate.reset();
        self.photo_gate.reset();
        self.tracks.clear();
        self.photos.clear();
        self.fit_done = false;
        self.torn_down = true;
    }

    /// The map surface could not be created. Persistent; no retry.
    pub fn mark_map_unavailable(&mut self) {
        tracing::error!("map surface unavailable");
        self.map_unavailable = true;
    }
}

fn admit(
    gate: &mut FetchGate,
    metrics: &mut Metrics,
    source: SourceKind,
    key: FetchKey,
    now_ms: EpochMs,
) -> Option<FetchTicket> {
    match gate.begin(key, now_ms) {
        Admission::Issued(ticket) => {
            tracing::debug!(%source, %ticket, "fetch issued");
            metrics.record_fetch(source, FetchOutcome::Issued);
            Some(ticket)
        }
        Admission::Fresh => {
            tracing::debug!(%source, "fetch suppressed, key unchanged within refresh interval");
            metrics.record_fetch(source, FetchOutcome::Fresh);
            None
        }
        Admission::InFlight => {
            tracing::debug!(%source, "fetch suppressed, same query in flight");
            metrics.record_fetch(source, FetchOutcome::InFlight);
            None
        }
    }
}

fn settle<R: Reply>(
    gate: &mut FetchGate,
    metrics: &mut Metrics,
    source: SourceKind,
    torn_down: bool,
    ticket: FetchTicket,
    result: Result<R, String>,
) -> Option<R> {
    if torn_down {
        tracing::debug!(%source, %ticket, "discarding response after teardown");
        metrics.record_fetch(source, FetchOutcome::Stale);
        return None;
    }
    let response = match result {
        Ok(response) => response,
        Err(message) => {
            gate.fail(ticket);
            tracing::warn!(%source, %ticket, error = %message, "remote fetch failed");
            metrics.record_fetch(source, FetchOutcome::Failed);
            return None;
        }
    };
    if !response.succeeded() {
        gate.fail(ticket);
        tracing::warn!(
            %source,
            %ticket,
            error = response.error().unwrap_or("unspecified"),
            "remote fetch reported failure"
        );
        metrics.record_fetch(source, FetchOutcome::Failed);
        return None;
    }
    if !gate.complete(ticket) {
        tracing::debug!(%source, %ticket, "discarding stale response");
        metrics.record_fetch(source, FetchOutcome::Stale);
        return None;
    }
    metrics.record_fetch(source, FetchOutcome::Applied);
    Some(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CARD_TYPE;
    use foundation::math::Viewport;
    use foundation::{format_iso8601, LatLon, DAY_MS};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use streaming::{RawPhotoItem, RawTrackPoint};

    const NOW: EpochMs = 1_700_000_000_000;

    fn table() -> StateTable {
        StateTable::from_value(json!({
            "person.alice": {
                "state": "home",
                "attributes": { "latitude": 53.9, "longitude": 27.56, "friendly_name": "Alice" }
            },
            "person.bob": {
                "state": "Work",
                "attributes": { "friendly_name": "Bob" }
            },
            "zone.work": {
                "state": "0",
                "attributes": { "latitude": 53.95, "longitude": 27.6, "friendly_name": "Work" }
            },
        }))
        .unwrap()
    }

    fn engine(extra: serde_json::Value) -> PresenceEngine {
        let mut cfg = json!({ "type": CARD_TYPE });
        if let (Some(base), Some(extra)) = (cfg.as_object_mut(), extra.as_object()) {
            base.extend(extra.clone());
        }
        PresenceEngine::new(CardConfig::from_value(&cfg).unwrap())
    }

    fn point(lat: f64, lon: f64, ms: EpochMs) -> RawTrackPoint {
        RawTrackPoint {
            lat: Some(lat),
            lon: Some(lon),
            ts: format_iso8601(ms),
        }
    }

    fn tracks_ok() -> TrackResponse {
        TrackResponse {
            success: true,
            tracks: vec![RawTrack {
                entity_id: "person.alice".into(),
                points: vec![point(53.9, 27.5, NOW - DAY_MS), point(53.91, 27.51, NOW)],
            }],
            error: None,
        }
    }

    fn photo_item(key: &str, lat: f64, lon: f64, ms: EpochMs) -> RawPhotoItem {
        RawPhotoItem {
            lat: Some(lat),
            lon: Some(lon),
            preview_url: Some(format!("/thumb/{key}.jpg")),
            media_url: Some(format!("/media/{key}.jpg")),
            media_rel_path: Some(key.to_string()),
            captured_at_utc: format_iso8601(ms),
            ..RawPhotoItem::default()
        }
    }

    fn only_ticket(plan: &RenderPlan, source: SourceKind) -> FetchTicket {
        let found: Vec<_> = plan.fetches.iter().filter(|f| f.source == source).collect();
        assert_eq!(found.len(), 1);
        found[0].ticket
    }

    #[test]
    fn renders_markers_status_and_fits_once() {
        let mut e = engine(json!({ "show_status": true }));
        let plan = e.on_state(&table(), NOW);
        let ids: Vec<_> = plan.persons.markers.iter().map(|m| m.entity_id.as_str()).collect();
        assert_eq!(ids, vec!["person.alice", "person.bob"]);
        assert_eq!(plan.status.as_deref(), Some("Markers: 2"));
        assert!(plan.fit.is_some());
        assert!(plan.fetches.is_empty());

        let again = e.on_state(&table(), NOW + 1000);
        assert_eq!(again.fit, None);
        assert_eq!(e.metrics().gauge("markers"), Some(2));
    }

    #[test]
    fn empty_table_reports_no_coordinates_and_does_not_fit() {
        let mut e = engine(json!({ "show_status": true }));
        let plan = e.on_state(&StateTable::new(), NOW);
        assert_eq!(plan.status.as_deref(), Some("No person coordinates found."));
        assert_eq!(plan.fit, None);

        let plan = e.on_state(&table(), NOW);
        assert!(plan.fit.is_some());
    }

    #[test]
    fn status_hidden_unless_enabled() {
        let mut e = engine(json!({}));
        assert_eq!(e.on_state(&table(), NOW).status, None);
    }

    #[test]
    fn track_fetches_are_gated() {
        let mut e = engine(json!({ "show_tracks": true, "tracks_refresh_seconds": 60 }));
        let plan = e.on_state(&table(), NOW);
        let ticket = only_ticket(&plan, SourceKind::Tracks);
        match &plan.fetches[0].query {
            RemoteQuery::Tracks(q) => assert_eq!(q.entities, vec!["person.alice", "person.bob"]),
            other => panic!("unexpected query {other:?}"),
        }

        assert!(e.on_state(&table(), NOW + 1_000).fetches.is_empty());
        assert!(e.complete_tracks(ticket, Ok(tracks_ok())));
        assert!(e.on_state(&table(), NOW + 2_000).fetches.is_empty());

        let plan = e.on_state(&table(), NOW + 60_000);
        assert_eq!(plan.fetches.len(), 1);
        assert_eq!(e.metrics().fetches(SourceKind::Tracks, FetchOutcome::Issued), 2);
        assert_eq!(e.metrics().fetches(SourceKind::Tracks, FetchOutcome::InFlight), 1);
        assert_eq!(e.metrics().fetches(SourceKind::Tracks, FetchOutcome::Fresh), 1);
    }

    #[test]
    fn parameter_change_refetches_immediately() {
        let mut e = engine(json!({ "show_tracks": true }));
        let first = only_ticket(&e.on_state(&table(), NOW), SourceKind::Tracks);
        assert!(e.complete_tracks(first, Ok(tracks_ok())));

        let mut cfg = e.config().clone();
        cfg.track_days = 3;
        e.reconfigure(cfg);
        let plan = e.on_state(&table(), NOW + 1_000);
        assert_eq!(plan.fetches.len(), 1);
    }

    #[test]
    fn older_response_cannot_overwrite_newer() {
        let mut e = engine(json!({ "show_tracks": true }));
        let old = only_ticket(&e.on_state(&table(), NOW), SourceKind::Tracks);

        let mut cfg = e.config().clone();
        cfg.track_days = 2;
        e.reconfigure(cfg);
        let new = only_ticket(&e.on_state(&table(), NOW + 500), SourceKind::Tracks);

        assert!(e.complete_tracks(new, Ok(tracks_ok())));
        assert!(!e.complete_tracks(old, Ok(tracks_ok())));
        assert_eq!(e.track_layer(NOW).segments.len(), 1);
        assert_eq!(e.metrics().fetches(SourceKind::Tracks, FetchOutcome::Stale), 1);
    }

    #[test]
    fn failures_keep_prior_tracks() {
        let mut e = engine(json!({ "show_tracks": true, "track_days": 2 }));
        let t1 = only_ticket(&e.on_state(&table(), NOW), SourceKind::Tracks);
        assert!(e.complete_tracks(t1, Ok(tracks_ok())));

        let t2 = only_ticket(&e.on_state(&table(), NOW + 60_000), SourceKind::Tracks);
        assert!(!e.complete_tracks(t2, Err("connection refused".into())));
        let t3 = only_ticket(&e.on_state(&table(), NOW + 120_000), SourceKind::Tracks);
        let refused = TrackResponse {
            success: false,
            error: Some("recorder offline".into()),
            ..TrackResponse::default()
        };
        assert!(!e.complete_tracks(t3, Ok(refused)));

        let layer = e.track_layer(NOW);
        assert_eq!(layer.segments.len(), 1);
        assert_eq!(layer.segments[0].opacity, 0.1);
        assert_eq!(layer.endpoints.len(), 2);
        assert_eq!(e.metrics().fetches(SourceKind::Tracks, FetchOutcome::Failed), 2);
    }

    #[test]
    fn responses_after_teardown_are_discarded() {
        let mut e = engine(json!({ "show_tracks": true, "show_photos": true }));
        let plan = e.on_state(&table(), NOW);
        let tracks = only_ticket(&plan, SourceKind::Tracks);
        let photos = only_ticket(&plan, SourceKind::Photos);

        e.teardown();
        assert!(!e.complete_tracks(tracks, Ok(tracks_ok())));
        let items = vec![photo_item("a", 53.9, 27.5, NOW)];
        let response = PhotoResponse {
            success: true,
            items,
            error: None,
        };
        assert!(!e.complete_photos(photos, Ok(response)));
        assert!(e.track_layer(NOW).segments.is_empty());

        let plan = e.on_state(&table(), NOW + 10);
        assert_eq!(plan.fetches.len(), 2);
        assert!(plan.fit.is_some());
    }

    #[test]
    fn photos_select_and_drive_viewer() {
        let mut e = engine(json!({ "show_photos": true, "photo_marker_size": 48 }));
        let ticket = only_ticket(&e.on_state(&table(), NOW), SourceKind::Photos);
        let response = PhotoResponse {
            success: true,
            items: vec![
                photo_item("old", 53.9, 27.5, NOW - DAY_MS),
                photo_item("new", 53.9, 27.5001, NOW),
                photo_item("far", 54.2, 28.0, NOW - 2 * DAY_MS),
            ],
            error: None,
        };
        assert!(e.complete_photos(ticket, Ok(response)));

        let view = Viewport::new(LatLon::new(53.9, 27.5).unwrap(), 12.0, [800.0, 600.0]);
        let keys: Vec<_> = e
            .on_viewport(&view)
            .into_iter()
            .map(|s| s.photo.item_key)
            .collect();
        assert_eq!(keys, vec!["new", "far"]);

        let shown = e.click_photo("new").unwrap();
        assert_eq!(shown.step, ViewerStep::Preview);
        assert_eq!(shown.url, "/thumb/new.jpg");
        let shown = e.click_photo("new").unwrap();
        assert_eq!(shown.url, "/media/new.jpg");
        assert_eq!(e.click_viewer(), None);
        assert_eq!(e.viewer_step(), ViewerStep::Closed);

        e.click_photo("far");
        e.teardown();
        assert_eq!(e.viewer_step(), ViewerStep::Closed);
    }

    #[test]
    fn photos_hidden_when_disabled() {
        let mut e = engine(json!({}));
        let view = Viewport::new(LatLon::new(53.9, 27.5).unwrap(), 12.0, [800.0, 600.0]);
        assert!(e.on_viewport(&view).is_empty());
        assert!(e.on_state(&table(), NOW).fetches.is_empty());
    }

    #[test]
    fn map_unavailable_is_persistent() {
        let mut e = engine(json!({ "show_tracks": true }));
        e.mark_map_unavailable();
        let plan = e.on_state(&table(), NOW);
        assert_eq!(plan.status.as_deref(), Some(STATUS_MAP_UNAVAILABLE));
        assert!(plan.persons.markers.is_empty());
        assert!(plan.fetches.is_empty());
    }
}
