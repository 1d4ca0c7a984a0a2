//! Global logging for the ingestion pipeline
//!
//! Thread-safe global logger and event collector, a per-thread source
//! context that tags events with what is being ingested, and the macro
//! support functions.

pub mod codes;
pub mod collector;
pub mod config;
pub mod events;
pub mod macros;
pub mod service;

use std::cell::RefCell;
use std::sync::{Arc, OnceLock};

pub use codes::Code;
pub use collector::{EventCollector, ProcessingSummary, SourceContext};
pub use events::{LogEvent, LogLevel};
pub use service::{ConsoleLogger, Logger, LoggingService, MemoryLogger, StructuredLogger};

// ============================================================================
// GLOBAL STATE
// ============================================================================

static GLOBAL_LOGGER: OnceLock<Arc<LoggingService>> = OnceLock::new();
static GLOBAL_EVENT_COLLECTOR: OnceLock<Arc<EventCollector>> = OnceLock::new();

thread_local! {
    static SOURCE_CONTEXT: RefCell<Option<SourceContext>> = const { RefCell::new(None) };
}

// ============================================================================
// INITIALIZATION
// ============================================================================

/// Initialize global logging from runtime preferences
pub fn init_global_logging() -> Result<(), String> {
    config::validate_config().map_err(|e| format!("Configuration validation failed: {}", e))?;

    let logging_service = Arc::new(service::create_configured_service());
    init_global_logging_with_service(logging_service.clone())?;

    for code in [
        codes::system::INTERNAL_ERROR,
        codes::input::INVALID_JSON,
        codes::normalization::MISSING_FIELD,
        codes::resolution::RETRIES_EXHAUSTED,
    ] {
        if codes::get_metadata(code.as_str()).is_none() {
            return Err(format!("Missing metadata for code: {}", code));
        }
    }

    logging_service.log_event(LogEvent::success(
        codes::success::SYSTEM_INITIALIZATION_COMPLETED,
        "Global logging system initialized",
    ));

    Ok(())
}

/// Install logging preferences, then initialize global logging from them
pub fn init_global_logging_with_preferences(
    preferences: crate::config::LoggingPreferences,
) -> Result<(), String> {
    config::init_runtime_preferences(preferences)?;
    init_global_logging()
}

/// Initialize with a custom service (tests, embedding applications)
pub fn init_global_logging_with_service(service: Arc<LoggingService>) -> Result<(), String> {
    GLOBAL_LOGGER
        .set(service)
        .map_err(|_| "Global logger already initialized".to_string())?;

    GLOBAL_EVENT_COLLECTOR
        .set(Arc::new(EventCollector::new()))
        .map_err(|_| "Global event collector already initialized".to_string())?;

    Ok(())
}

pub fn is_initialized() -> bool {
    GLOBAL_LOGGER.get().is_some() && GLOBAL_EVENT_COLLECTOR.get().is_some()
}

// ============================================================================
// GLOBAL ACCESS
// ============================================================================

pub fn try_get_global_logger() -> Option<&'static LoggingService> {
    GLOBAL_LOGGER.get().map(|service| service.as_ref())
}

pub fn try_get_global_collector() -> Option<&'static EventCollector> {
    GLOBAL_EVENT_COLLECTOR
        .get()
        .map(|collector| collector.as_ref())
}

// ============================================================================
// SOURCE CONTEXT MANAGEMENT
// ============================================================================

/// Set the source context for the current thread
pub fn set_source_context(label: impl Into<String>, source_id: usize) {
    let context = SourceContext::new(label, source_id);

    if let Some(collector) = try_get_global_collector() {
        collector.record_source_context(context.clone());
    }

    SOURCE_CONTEXT.with(|ctx| {
        *ctx.borrow_mut() = Some(context);
    });
}

pub fn clear_source_context() {
    SOURCE_CONTEXT.with(|ctx| {
        *ctx.borrow_mut() = None;
    });
}

/// Run `f` with a source context set, restoring the previous one afterwards
pub fn with_source_context<F, R>(label: impl Into<String>, source_id: usize, f: F) -> R
where
    F: FnOnce() -> R,
{
    let previous = get_current_source_context();
    set_source_context(label, source_id);
    let result = f();
    SOURCE_CONTEXT.with(|ctx| {
        *ctx.borrow_mut() = previous;
    });
    result
}

pub fn get_current_source_context() -> Option<SourceContext> {
    SOURCE_CONTEXT.with(|ctx| ctx.borrow().clone())
}

// ============================================================================
// MACRO SUPPORT FUNCTIONS
// ============================================================================

fn decorate(mut event: LogEvent, context: Vec<(&str, &str)>) -> LogEvent {
    for (key, value) in context {
        event = event.with_context(key, value);
    }

    if config::include_source_context() {
        if let Some(source_ctx) = get_current_source_context() {
            event = event.with_context("source", &source_ctx.label);
            event = event.with_context("source_id", &source_ctx.source_id.to_string());
        }
    }

    event
}

/// Emit an event and, when it is an error or warning, collect it under the
/// current source
fn dispatch(event: LogEvent) {
    if let Some(logger) = try_get_global_logger() {
        logger.log_event(event.clone());
    }

    if event.is_error() || event.is_warning() {
        if let (Some(source_ctx), Some(collector)) =
            (get_current_source_context(), try_get_global_collector())
        {
            collector.record_event(&source_ctx.label, event);
        }
    }
}

pub fn log_error_with_context(code: Code, message: &str, context: Vec<(&str, &str)>) {
    dispatch(decorate(LogEvent::error(code, message), context));
}

pub fn log_warning_with_context(code: Code, message: &str, context: Vec<(&str, &str)>) {
    dispatch(decorate(LogEvent::warning_with_code(code, message), context));
}

pub fn log_success_with_context(code: Code, message: &str, context: Vec<(&str, &str)>) {
    dispatch(decorate(LogEvent::success(code, message), context));
}

pub fn log_info_with_context(message: &str, context: Vec<(&str, &str)>) {
    dispatch(decorate(LogEvent::info(message), context));
}

pub fn log_debug_with_context(message: &str, context: Vec<(&str, &str)>) {
    dispatch(decorate(LogEvent::debug(message), context));
}

// ============================================================================
// BATCH PROCESSING
// ============================================================================

pub fn get_processing_summary() -> ProcessingSummary {
    try_get_global_collector()
        .map(|collector| collector.get_summary())
        .unwrap_or_default()
}

pub fn get_source_errors(source: &str) -> Vec<LogEvent> {
    try_get_global_collector()
        .map(|collector| collector.get_source_errors(source))
        .unwrap_or_default()
}

pub fn format_processing_summary() -> String {
    try_get_global_collector()
        .map(collector::format_summary)
        .unwrap_or_else(|| "No event collector available for summary".to_string())
}

pub fn clear_event_collection() {
    if let Some(collector) = try_get_global_collector() {
        collector.clear();
    }
}

pub fn get_system_diagnostics() -> String {
    let mut diagnostics = String::new();

    diagnostics.push_str("=== Logging System Diagnostics ===\n");
    diagnostics.push_str(&format!("Initialized: {}\n", is_initialized()));

    if let Some(collector) = try_get_global_collector() {
        let (current, max, fraction) = collector.get_capacity_info();
        diagnostics.push_str(&format!(
            "Capacity: {}/{} ({:.1}%)\n",
            current,
            max,
            fraction * 100.0
        ));

        let summary = collector.get_summary();
        diagnostics.push_str(&format!("Sources processed: {}\n", summary.total_sources));
        diagnostics.push_str(&format!("Total errors: {}\n", summary.total_errors));
        diagnostics.push_str(&format!("Total warnings: {}\n", summary.total_warnings));
    }

    diagnostics.push('\n');
    diagnostics.push_str(&config::get_config_summary());

    diagnostics
}

/// Error logging that falls back to stderr when logging is uninitialized
pub fn safe_log_error(code: Code, message: &str) {
    match try_get_global_logger() {
        Some(logger) => logger.log_event(LogEvent::error(code, message)),
        None => eprintln!("[ERROR] FALLBACK: [{}] {}", code.as_str(), message),
    }
}
