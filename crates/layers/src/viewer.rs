use foundation::format_capture_time;
use serde::Serialize;

use crate::photos::PhotoCandidate;

/// Closed -> Preview -> Full -> Closed. Never Closed -> Full.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewerStep {
    #[default]
    Closed,
    Preview,
    Full,
}

impl ViewerStep {
    pub fn index(self) -> u8 {
        match self {
            ViewerStep::Closed => 0,
            ViewerStep::Preview => 1,
            ViewerStep::Full => 2,
        }
    }
}

/// What the open viewer shows.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViewerDisplay {
    pub step: ViewerStep,
    pub item_key: String,
    pub url: String,
    pub caption: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PhotoViewer {
    step: ViewerStep,
    item: Option<PhotoCandidate>,
}

impl PhotoViewer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn step(&self) -> ViewerStep {
        self.step
    }

    pub fn item_key(&self) -> Option<&str> {
        self.item.as_ref().map(|i| i.item_key.as_str())
    }

    /// A marker was clicked. Re-clicking the shown photo advances the viewer;
    /// any other photo opens in preview.
    pub fn click_marker(&mut self, photo: &PhotoCandidate) {
        let same = self.item_key() == Some(photo.item_key.as_str());
        self.step = match (self.step, same) {
            (ViewerStep::Preview, true) => ViewerStep::Full,
            (ViewerStep::Full, true) => ViewerStep::Closed,
            _ => ViewerStep::Preview,
        };
        self.item = match self.step {
            ViewerStep::Closed => None,
            _ => Some(photo.clone()),
        };
    }

    /// A click inside the open viewer.
    pub fn click_viewer(&mut self) {
        match self.step {
            ViewerStep::Closed => {}
            ViewerStep::Preview => self.step = ViewerStep::Full,
            ViewerStep::Full => self.close(),
        }
    }

    pub fn close(&mut self) {
        self.step = ViewerStep::Closed;
        self.item = None;
    }

    /// Picks up refreshed URLs for the shown photo after a photo fetch.
    pub fn sync(&mut self, candidates: &[PhotoCandidate]) {
        let Some(current) = &self.item else {
            return;
        };
        if let Some(fresh) = candidates.iter().find(|c| c.item_key == current.item_key) {
            self.item = Some(fresh.clone());
        }
    }

    pub fn display(&self) -> Option<ViewerDisplay> {
        let item = self.item.as_ref()?;
        let (url, qualifier) = match self.step {
            ViewerStep::Closed => return None,
            ViewerStep::Preview => (&item.preview_url, "thumbnail"),
            ViewerStep::Full => (&item.media_url, "full"),
        };
        let when = item
            .captured_at_ms
            .map(format_capture_time)
            .unwrap_or_else(|| "unknown time".to_string());
        Some(ViewerDisplay {
            step: self.step,
            item_key: item.item_key.clone(),
            url: url.clone(),
            caption: format!("{when} ({qualifier})"),
        })
    }
}
