use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// One prediction received from the service. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub label: String,
    /// Model confidence in `[0, 1]`, when the service reports one.
    pub confidence: Option<f64>,
    /// Sequence index of the window this prediction was made for.
    pub window_seq: u64,
    /// Capture time of the window's first frame.
    pub captured_at: DateTime<Utc>,
    /// When the response arrived.
    pub received_at: DateTime<Utc>,
}

impl PredictionRecord {
    pub fn new(label: &str, confidence: Option<f64>, window_seq: u64, captured_at_ms: i64) -> Self {
        let received_at = Utc::now();
        Self {
            label: clean_label(label),
            confidence: confidence.map(|c| c.clamp(0.0, 1.0)),
            window_seq,
            captured_at: DateTime::from_timestamp_millis(captured_at_ms).unwrap_or(received_at),
            received_at,
        }
    }
}

fn enumeration_prefix() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d+\.\s*").expect("static regex"))
}

/// Strip enumeration markers such as `"12. "` that the service's label
/// encoder leaves on some classes, then trim.
pub fn clean_label(label: &str) -> String {
    enumeration_prefix().replace_all(label, "").trim().to_string()
}

/// Join labels into the space-separated word list sent for sentence generation.
pub fn join_words<'a>(labels: impl IntoIterator<Item = &'a str>) -> String {
    labels
        .into_iter()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
