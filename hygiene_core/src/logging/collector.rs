//! Event collector for batch ingestion
//!
//! Groups events by the source being ingested (a file path, a batch label,
//! or an inline document index) so a batch run can be summarized afterwards.

use super::events::LogEvent;
use crate::config::compile_time::logging::*;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

// ============================================================================
// SOURCE CONTEXT
// ============================================================================

/// Context information for the source currently being ingested
#[derive(Debug, Clone)]
pub struct SourceContext {
    pub label: String,
    pub source_id: usize,
    pub start_time: Instant,
}

impl SourceContext {
    pub fn new(label: impl Into<String>, source_id: usize) -> Self {
        Self {
            label: label.into(),
            source_id,
            start_time: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }
}

// ============================================================================
// PROCESSING SUMMARY
// ============================================================================

/// Summary of batch processing results
#[derive(Debug, Clone)]
pub struct ProcessingSummary {
    pub total_sources: usize,
    pub clean_sources: usize,
    pub failed_sources: usize,
    pub sources_with_warnings: usize,
    pub total_errors: usize,
    pub total_warnings: usize,
    pub total_processing_time: Duration,
    pub average_source_time: Duration,
}

impl ProcessingSummary {
    pub fn new() -> Self {
        Self {
            total_sources: 0,
            clean_sources: 0,
            failed_sources: 0,
            sources_with_warnings: 0,
            total_errors: 0,
            total_warnings: 0,
            total_processing_time: Duration::new(0, 0),
            average_source_time: Duration::new(0, 0),
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_sources == 0 {
            0.0
        } else {
            self.clean_sources as f64 / self.total_sources as f64
        }
    }

    pub fn has_errors(&self) -> bool {
        self.total_errors > 0
    }

    pub fn has_warnings(&self) -> bool {
        self.total_warnings > 0
    }
}

impl Default for ProcessingSummary {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// EVENT COLLECTOR
// ============================================================================

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Thread-safe event collector for batch ingestion
pub struct EventCollector {
    source_events: Mutex<BTreeMap<String, Vec<LogEvent>>>,
    source_contexts: Mutex<BTreeMap<String, SourceContext>>,
    processing_start: Instant,
}

impl EventCollector {
    pub fn new() -> Self {
        Self {
            source_events: Mutex::new(BTreeMap::new()),
            source_contexts: Mutex::new(BTreeMap::new()),
            processing_start: Instant::now(),
        }
    }

    /// Record an event for a source; past the per-source cap a single
    /// overflow warning is appended and further events are dropped
    pub fn record_event(&self, source: &str, event: LogEvent) {
        let mut events = lock(&self.source_events);
        let total: usize = events.values().map(|v| v.len()).sum();
        if total >= LOG_BUFFER_SIZE {
            return;
        }

        let source_events = events.entry(source.to_string()).or_default();

        if source_events.len() < MAX_LOG_EVENTS_PER_SOURCE {
            source_events.push(event);
        } else if source_events.len() == MAX_LOG_EVENTS_PER_SOURCE {
            source_events.push(LogEvent::warning(&format!(
                "Too many events for source (limit: {})",
                MAX_LOG_EVENTS_PER_SOURCE
            )));
        }
    }

    pub fn record_source_context(&self, context: SourceContext) {
        lock(&self.source_contexts).insert(context.label.clone(), context);
    }

    pub fn get_source_events(&self, source: &str) -> Vec<LogEvent> {
        lock(&self.source_events)
            .get(source)
            .cloned()
            .unwrap_or_default()
    }

    pub fn get_source_errors(&self, source: &str) -> Vec<LogEvent> {
        lock(&self.source_events)
            .get(source)
            .map(|events| events.iter().filter(|e| e.is_error()).cloned().collect())
            .unwrap_or_default()
    }

    pub fn get_source_warnings(&self, source: &str) -> Vec<LogEvent> {
        lock(&self.source_events)
            .get(source)
            .map(|events| events.iter().filter(|e| e.is_warning()).cloned().collect())
            .unwrap_or_default()
    }

    pub fn get_all_source_events(&self) -> BTreeMap<String, Vec<LogEvent>> {
        lock(&self.source_events).clone()
    }

    pub fn source_has_errors(&self, source: &str) -> bool {
        lock(&self.source_events)
            .get(source)
            .map(|events| events.iter().any(|e| e.is_error()))
            .unwrap_or(false)
    }

    pub fn get_sources_with_errors(&self) -> Vec<String> {
        lock(&self.source_events)
            .iter()
            .filter(|(_, events)| events.iter().any(|e| e.is_error()))
            .map(|(source, _)| source.clone())
            .collect()
    }

    /// Errors whose code is registered as unrecoverable
    pub fn get_unrecoverable_errors(&self) -> Vec<(String, LogEvent)> {
        let events = lock(&self.source_events);
        let mut found = Vec::new();

        for (source, source_events) in events.iter() {
            for event in source_events {
                if event.is_error() && !event.is_recoverable() {
                    found.push((source.clone(), event.clone()));
                }
            }
        }

        found.truncate(MAX_ERROR_COLLECTION);
        found
    }

    pub fn get_summary(&self) -> ProcessingSummary {
        let events = lock(&self.source_events);
        let contexts = lock(&self.source_contexts);

        let mut summary = ProcessingSummary::new();
        summary.total_sources = events.len();
        summary.total_processing_time = self.processing_start.elapsed();

        let mut total_source_time = Duration::new(0, 0);
        let mut timed_sources = 0u32;

        for (source, source_events) in events.iter() {
            let has_errors = source_events.iter().any(|e| e.is_error());
            let has_warnings = source_events.iter().any(|e| e.is_warning());

            if has_errors {
                summary.failed_sources += 1;
            } else if has_warnings {
                summary.sources_with_warnings += 1;
            } else {
                summary.clean_sources += 1;
            }

            summary.total_errors += source_events.iter().filter(|e| e.is_error()).count();
            summary.total_warnings += source_events.iter().filter(|e| e.is_warning()).count();

            if let Some(context) = contexts.get(source) {
                total_source_time += context.elapsed();
                timed_sources += 1;
            }
        }

        if timed_sources > 0 {
            summary.average_source_time = total_source_time / timed_sources;
        }

        summary
    }

    pub fn clear(&self) {
        lock(&self.source_events).clear();
        lock(&self.source_contexts).clear();
    }

    pub fn total_event_count(&self) -> usize {
        lock(&self.source_events).values().map(|v| v.len()).sum()
    }

    /// (current, max, fraction) against the compile-time buffer size
    pub fn get_capacity_info(&self) -> (usize, usize, f64) {
        let current = self.total_event_count();
        let max = LOG_BUFFER_SIZE;
        let fraction = if max > 0 {
            current as f64 / max as f64
        } else {
            0.0
        };
        (current, max, fraction)
    }
}

impl Default for EventCollector {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// FORMATTING
// ============================================================================

/// Render collected errors and warnings grouped by source
pub fn format_summary(collector: &EventCollector) -> String {
    let mut output = String::new();

    for (source, events) in &collector.get_all_source_events() {
        let errors: Vec<_> = events.iter().filter(|e| e.is_error()).collect();
        let warnings: Vec<_> = events.iter().filter(|e| e.is_warning()).collect();

        if errors.is_empty() && warnings.is_empty() {
            continue;
        }

        output.push_str(&format!("Ingesting {}...\n", source));

        for event in errors {
            output.push_str(&format!(
                "error[{}]: {}\n",
                event.code.as_str(),
                event.message
            ));
            output.push_str(&format!(
                "  = severity: {}, category: {}\n",
                event.severity(),
                event.category()
            ));
            for (key, value) in &event.context {
                if key != "source" && key != "source_id" {
                    output.push_str(&format!("  = {}: {}\n", key, value));
                }
            }
            let action = event.recommended_action();
            if action != "No specific action available" {
                output.push_str(&format!("  = help: {}\n", action));
            }
        }

        for event in warnings {
            output.push_str(&format!(
                "warning[{}]: {}\n",
                event.code.as_str(),
                event.message
            ));
        }

        output.push('\n');
    }

    let summary = collector.get_summary();
    if summary.total_errors > 0 {
        output.push_str(&format!("Total errors: {}\n", summary.total_errors));
    }
    if summary.total_warnings > 0 {
        output.push_str(&format!("Total warnings: {}\n", summary.total_warnings));
    }

    output
}
