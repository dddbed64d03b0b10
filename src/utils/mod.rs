use serde::Serialize;
use serde_json::{Map, Value, json};
use std::fmt::Display;
use std::time::{Duration, Instant};
use tracing::info;

/// Logs how long a labelled step took when dropped.
pub struct Timer {
    label: String,
    start: Instant,
}

impl Timer {
    pub fn start(label: impl Into<String>) -> Self {
        let label = label.into();
        info!("Starting: {}", label);
        Self {
            label,
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        info!("Finished: {} (took {:.2?})", self.label, self.elapsed());
    }
}

/// One page of a list, 1-based. Pages past the end are empty.
pub fn paginate<T: Clone>(items: &[T], page: usize, per_page: usize) -> Vec<T> {
    let start = page.max(1).saturating_sub(1).saturating_mul(per_page);
    items.iter().skip(start).take(per_page).cloned().collect()
}

// ── Response envelopes ────────────────────────────────────────────────────────

pub fn failure(message: impl Display) -> Value {
    json!({ "status": false, "message": message.to_string() })
}

/// `{"status": true, "<field>": value}` or `{"status": false, "message": ...}`.
pub fn envelope<T: Serialize, E: Display>(field: &str, result: Result<T, E>) -> Value {
    match result.map(serde_json::to_value) {
        Ok(Ok(value)) => {
            let mut map = Map::new();
            map.insert("status".to_string(), Value::Bool(true));
            map.insert(field.to_string(), value);
            Value::Object(map)
        }
        Ok(Err(e)) => failure(e),
        Err(e) => failure(e),
    }
}

/// Like [`envelope`], but the payload's own fields sit beside `status`.
pub fn flat_envelope<T: Serialize, E: Display>(result: Result<T, E>) -> Value {
    match result.map(serde_json::to_value) {
        Ok(Ok(Value::Object(fields))) => {
            let mut map = Map::new();
            map.insert("status".to_string(), Value::Bool(true));
            map.extend(fields);
            Value::Object(map)
        }
        Ok(Ok(other)) => json!({ "status": true, "data": other }),
        Ok(Err(e)) => failure(e),
        Err(e) => failure(e),
    }
}
