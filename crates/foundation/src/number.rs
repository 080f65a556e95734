/// Parses a finite number out of free-form text.
///
/// Surrounding whitespace is ignored; empty text, `NaN` and infinities are rejected.
pub fn parse_finite(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|v| v.is_finite())
}

pub fn finite(value: f64) -> Option<f64> {
    value.is_finite().then_some(value)
}

pub fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value * scale).round() / scale
}
