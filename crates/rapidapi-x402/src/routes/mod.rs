pub mod catalog;
pub mod discovery;
pub mod health;
pub mod services;
pub mod usage;

/// Numeric query parameter; anything non-numeric counts as absent.
pub fn count_param(raw: Option<&str>) -> Option<usize> {
    raw.and_then(|v| v.trim().parse().ok())
}
