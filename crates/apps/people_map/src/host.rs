//! Drives the engine the way a dashboard would: one pass per state snapshot,
//! remote fetches as concurrent tasks, photo selection once the viewport is
//! known.

use std::sync::Arc;
use std::time::Duration;

use foundation::math::Viewport;
use foundation::EpochMs;
use futures_util::future::join_all;
use layers::{SelectedPhoto, ViewerDisplay};
use parking_lot::Mutex;
use presence::StateTable;
use runtime::{CardConfig, FetchRequest, MetricsSnapshot, PresenceEngine, RenderPlan};
use serde::Serialize;
use streaming::{SourceKind, DEFAULT_INFLIGHT_TIMEOUT_MS};
use tracing::{debug, warn};

use crate::sources::{RemoteReply, RemoteSource};

pub type SharedEngine = Arc<Mutex<PresenceEngine>>;

/// A fetch still pending after this long is reported to the engine as failed.
pub const FETCH_TIMEOUT: Duration = Duration::from_millis(DEFAULT_INFLIGHT_TIMEOUT_MS as u64);

/// Everything one pass produced, in the order a renderer would apply it.
#[derive(Debug, Serialize)]
pub struct PassOutput {
    pub pass: u64,
    pub now_ms: EpochMs,
    pub map_height_px: f64,
    pub viewport: Viewport,
    /// `plan.tracks` is rebuilt once this pass's fetches have settled.
    pub plan: RenderPlan,
    pub photos: Vec<SelectedPhoto>,
    pub viewer: Option<ViewerDisplay>,
    pub metrics: MetricsSnapshot,
}

/// Parses `WIDTHxHEIGHT` in pixels.
pub fn parse_window(raw: &str) -> Result<[f64; 2], String> {
    let (w, h) = raw
        .trim()
        .split_once(|c: char| c.eq_ignore_ascii_case(&'x'))
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got {raw:?}"))?;
    let parse = |s: &str| {
        s.trim()
            .parse::<u32>()
            .ok()
            .filter(|v| *v > 0)
            .ok_or_else(|| format!("invalid dimension {s:?} in {raw:?}"))
    };
    Ok([f64::from(parse(w)?), f64::from(parse(h)?)])
}

pub struct Host {
    engine: SharedEngine,
    source: Arc<dyn RemoteSource>,
    window_px: [f64; 2],
    fetch_timeout: Duration,
    viewport: Option<Viewport>,
    passes: u64,
}

impl Host {
    pub fn new(config: CardConfig, source: Arc<dyn RemoteSource>, window_px: [f64; 2]) -> Self {
        Self {
            engine: Arc::new(Mutex::new(PresenceEngine::new(config))),
            source,
            window_px,
            fetch_timeout: FETCH_TIMEOUT,
            viewport: None,
            passes: 0,
        }
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn engine(&self) -> SharedEngine {
        Arc::clone(&self.engine)
    }

    pub async fn run_pass(&mut self, table: &StateTable, now_ms: EpochMs) -> PassOutput {
        self.passes += 1;
        let mut plan = self.engine.lock().on_state(table, now_ms);

        let tasks = plan.fetches.iter().cloned().map(|request| {
            let engine = Arc::clone(&self.engine);
            let source = Arc::clone(&self.source);
            let timeout = self.fetch_timeout;
            tokio::spawn(async move { dispatch(&engine, source.as_ref(), request, timeout).await })
        });
        for joined in join_all(tasks).await {
            if let Err(e) = joined {
                warn!(error = %e, "fetch task did not finish");
            }
        }

        let (config, map_height_px) = {
            let engine = self.engine.lock();
            let cfg = engine.config().clone();
            let height = cfg.map_height(self.window_px[1]);
            (cfg, height)
        };
        let size_px = [self.window_px[0], map_height_px];
        let viewport = match (plan.fit, self.viewport) {
            (Some(fit), _) => Viewport::fit(fit.bounds, size_px, fit.padding_px, fit.max_zoom),
            (None, Some(current)) => Viewport { size_px, ..current },
            (None, None) => {
                Viewport::new(config.default_center, f64::from(config.default_zoom), size_px)
            }
        };
        self.viewport = Some(viewport);

        let mut engine = self.engine.lock();
        let photos = engine.on_viewport(&viewport);
        plan.tracks = engine.track_layer(now_ms);
        PassOutput {
            pass: self.passes,
            now_ms,
            map_height_px,
            viewport,
            photos,
            viewer: engine.viewer_display(),
            metrics: engine.metrics().snapshot(),
            plan,
        }
    }

    /// Simulated marker click; returns what the viewer shows afterwards.
    pub fn click_photo(&self, item_key: &str) -> Option<ViewerDisplay> {
        self.engine.lock().click_photo(item_key)
    }

    pub fn teardown(&self) {
        self.engine.lock().teardown();
    }
}

/// Performs one fetch and feeds the outcome back. Returns whether the engine
/// applied it. A source that does not answer within `timeout` counts as a
/// failed fetch.
async fn dispatch(
    engine: &SharedEngine,
    source: &dyn RemoteSource,
    request: FetchRequest,
    timeout: Duration,
) -> bool {
    debug!(
        source = source.name(),
        kind = %request.source,
        ticket = %request.ticket,
        endpoint = %request.endpoint,
        "fetching"
    );
    let reply = match tokio::time::timeout(timeout, source.query(&request.endpoint, &request.query)).await {
        Ok(reply) => reply.map_err(|e| e.to_string()),
        Err(_) => Err(format!("no reply within {} ms", timeout.as_millis())),
    };

    let mut engine = engine.lock();
    match (request.source, reply) {
        (SourceKind::Tracks, Ok(RemoteReply::Tracks(r))) => engine.complete_tracks(request.ticket, Ok(r)),
        (SourceKind::Photos, Ok(RemoteReply::Photos(r))) => engine.complete_photos(request.ticket, Ok(r)),
        (kind, reply) => {
            let message = match reply {
                Err(message) => message,
                Ok(other) => format!("expected a {kind} reply, got {}", other.source()),
            };
            match kind {
                SourceKind::Tracks => engine.complete_tracks(request.ticket, Err(message)),
                SourceKind::Photos => engine.complete_photos(request.ticket, Err(message)),
            }
        }
    }
}
