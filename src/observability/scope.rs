//! Scoped BEGIN / COMPLETE / FAILED logging for multi-step operations

use std::time::Instant;

use tracing::{error, info, warn};

/// Logs `{name}_BEGIN` on creation and exactly one closing event.
///
/// ```ignore
/// let scope = ObservationScope::new("DISTRIBUTION").with_field("clusters", "3");
/// // ... work ...
/// scope.complete(); // DISTRIBUTION_COMPLETE
/// ```
///
/// Dropping an unfinished scope logs `{name}_INCOMPLETE`.
pub struct ObservationScope {
    name: &'static str,
    fields: Vec<(&'static str, String)>,
    started: Instant,
    finished: bool,
}

impl ObservationScope {
    pub fn new(name: &'static str) -> Self {
        info!(event = %format!("{}_BEGIN", name), "begin");
        Self {
            name,
            fields: Vec::new(),
            started: Instant::now(),
            finished: false,
        }
    }

    /// Attach a field repeated on the closing event.
    pub fn with_field(mut self, key: &'static str, value: impl ToString) -> Self {
        self.fields.push((key, value.to_string()));
        self
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    fn rendered_fields(&self) -> String {
        self.fields
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn complete(mut self) {
        self.finished = true;
        info!(
            event = %format!("{}_COMPLETE", self.name),
            elapsed_ms = self.elapsed_ms(),
            fields = %self.rendered_fields(),
            "complete"
        );
    }

    pub fn fail(mut self, reason: &str) {
        self.finished = true;
        error!(
            event = %format!("{}_FAILED", self.name),
            elapsed_ms = self.elapsed_ms(),
            fields = %self.rendered_fields(),
            reason,
            "failed"
        );
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

impl Drop for ObservationScope {
    fn drop(&mut self) {
        if !self.finished {
            warn!(
                event = %format!("{}_INCOMPLETE", self.name),
                elapsed_ms = self.elapsed_ms(),
                "scope dropped without completion"
            );
        }
    }
}
