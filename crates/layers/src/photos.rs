use foundation::math::Viewport;
use foundation::{EpochMs, LatLon, ScreenPoint, parse_iso8601_ms};
use serde::Serialize;
use streaming::RawPhotoItem;

pub const DEFAULT_PHOTO_MARKER_SIZE_PX: f64 = 48.0;

/// A geotagged photo that passed validation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhotoCandidate {
    pub position: LatLon,
    pub preview_url: String,
    pub media_url: String,
    pub captured_at_ms: Option<EpochMs>,
    /// Stable across refreshes: the relative media path, else the media URL.
    pub item_key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectedPhoto {
    pub photo: PhotoCandidate,
    pub screen: ScreenPoint,
    pub radius_px: f64,
}

pub trait ScreenProjector {
    fn project(&self, at: LatLon) -> Option<ScreenPoint>;
}

impl ScreenProjector for Viewport {
    fn project(&self, at: LatLon) -> Option<ScreenPoint> {
        Some(Viewport::project(self, at))
    }
}

/// Accepts absolute paths (`/local/x.jpg`) and absolute `http(s)` URLs only.
///
/// Anything else (other schemes, protocol-relative `//host`, relative paths,
/// control characters) never reaches an image element.
pub fn is_safe_image_url(raw: &str) -> bool {
    let url = raw.trim();
    if url.is_empty() || url.chars().any(char::is_control) {
        return false;
    }
    if url.starts_with('/') {
        return !url.starts_with("//");
    }
    let lower = url.to_ascii_lowercase();
    ["http://", "https://"]
        .iter()
        .any(|scheme| lower.starts_with(scheme) && lower.len() > scheme.len())
}

fn safe_url(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|u| is_safe_image_url(u))
        .map(str::to_string)
}

pub fn candidate_from_item(item: &RawPhotoItem) -> Option<PhotoCandidate> {
    let position = LatLon::from_parts(item.lat, item.lon)?;
    let preview = safe_url(item.preview_url.as_deref()).or_else(|| safe_url(item.thumb_url.as_deref()));
    let media = safe_url(item.media_url.as_deref());
    let (preview_url, media_url) = match (preview, media) {
        (Some(p), Some(m)) => (p, m),
        (Some(p), None) => (p.clone(), p),
        (None, Some(m)) => (m.clone(), m),
        (None, None) => return None,
    };
    let item_key = item
        .media_rel_path
        .as_deref()
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| media_url.clone());
    Some(PhotoCandidate {
        position,
        preview_url,
        media_url,
        captured_at_ms: item.captured_at_utc.as_deref().and_then(parse_iso8601_ms),
        item_key,
    })
}

/// Validates items and orders them most recent first.
///
/// The sort is stable; photos without a capture time go last.
pub fn candidates_from_items(items: &[RawPhotoItem]) -> Vec<PhotoCandidate> {
    let mut out: Vec<PhotoCandidate> = items.iter().filter_map(candidate_from_item).collect();
    let dropped = items.len() - out.len();
    if dropped > 0 {
        tracing::debug!(dropped, "discarded photos without position or usable url");
    }
    out.sort_by(|a, b| b.captured_at_ms.cmp(&a.captured_at_ms));
    out
}

/// Greedy de-overlap in screen space.
///
/// `ordered` must already be in priority order. A photo is kept only if it is
/// farther than `marker_radius_px` plus the radius of every kept photo from
/// each kept photo's projected point.
pub fn select_photos<P: ScreenProjector>(
    ordered: &[PhotoCandidate],
    projector: &P,
    marker_radius_px: f64,
) -> Vec<SelectedPhoto> {
    let mut out: Vec<SelectedPhoto> = Vec::new();

    for photo in ordered {
        let Some(screen) = projector.project(photo.position) else {
            continue;
        };
        if !screen.is_finite() {
            continue;
        }

        let clear = out
            .iter()
            .all(|kept| kept.screen.distance_to(screen) > marker_radius_px + kept.radius_px);
        if !clear {
            continue;
        }

        out.push(SelectedPhoto {
            photo: photo.clone(),
            screen,
            radius_px: marker_radius_px,
        });
    }

    out
}

/// Recency-ordered photo candidates plus the marker size used to de-overlap them.
///
/// Candidates change only when a fetch lands; selection is recomputed for
/// every viewport.
#[derive(Debug, Clone, PartialEq)]
pub struct PhotoOverlay {
    candidates: Vec<PhotoCandidate>,
    marker_size_px: f64,
}

impl Default for PhotoOverlay {
    fn default() -> Self {
        Self::new(DEFAULT_PHOTO_MARKER_SIZE_PX)
    }
}

impl PhotoOverlay {
    pub fn new(marker_size_px: f64) -> Self {
        Self {
            candidates: Vec::new(),
            marker_size_px,
        }
    }

    pub fn set_marker_size(&mut self, marker_size_px: f64) {
        self.marker_size_px = marker_size_px;
    }

    pub fn marker_radius_px(&self) -> f64 {
        self.marker_size_px * 0.5
    }

    pub fn replace(&mut self, items: &[RawPhotoItem]) {
        self.candidates = candidates_from_items(items);
    }

    pub fn clear(&mut self) {
        self.candidates.clear();
    }

    pub fn candidates(&self) -> &[PhotoCandidate] {
        &self.candidates
    }

    pub fn find(&self, item_key: &str) -> Option<&PhotoCandidate> {
        self.candidates.iter().find(|c| c.item_key == item_key)
    }

    pub fn select<P: ScreenProjector>(&self, projector: &P) -> Vec<SelectedPhoto> {
        select_photos(&self.candidates, projector, self.marker_radius_px())
    }
}
