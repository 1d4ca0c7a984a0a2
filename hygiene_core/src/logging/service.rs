//! Logging service implementation

use super::codes::Code;
use super::config;
use super::events::{LogEvent, LogLevel};
use std::sync::{Arc, Mutex};

/// Simple logger trait
pub trait Logger: Send + Sync {
    fn log(&self, event: &LogEvent);
}

/// Main logging service with configuration awareness
pub struct LoggingService {
    logger: Arc<dyn Logger>,
    min_level: LogLevel,
}

impl LoggingService {
    pub fn new(logger: Arc<dyn Logger>, min_level: LogLevel) -> Self {
        Self { logger, min_level }
    }

    /// Create service with configuration-aware settings
    pub fn with_config() -> Self {
        let min_level = config::get_min_log_level();
        let logger: Arc<dyn Logger> = if config::use_structured_logging() {
            Arc::new(StructuredLogger)
        } else {
            text_logger()
        };

        Self::new(logger, min_level)
    }

    pub fn set_min_level(&mut self, level: LogLevel) {
        self.min_level = level;
    }

    pub fn should_log(&self, level: LogLevel) -> bool {
        level <= self.min_level
    }

    pub fn log_event(&self, event: LogEvent) {
        if self.should_log(event.level) {
            self.logger.log(&event);
        }
    }

    pub fn log_error(&self, error_code: Code, message: &str) {
        self.log_event(LogEvent::error(error_code, message));
    }

    pub fn log_warning(&self, message: &str) {
        self.log_event(LogEvent::warning(message));
    }

    pub fn log_info(&self, message: &str) {
        self.log_event(LogEvent::info(message));
    }

    pub fn log_success(&self, success_code: Code, message: &str) {
        self.log_event(LogEvent::success(success_code, message));
    }

    pub fn log_debug(&self, message: &str) {
        self.log_event(LogEvent::debug(message));
    }
}

/// Console logger writing plain text; errors go to stderr
pub struct ConsoleLogger;

impl Logger for ConsoleLogger {
    fn log(&self, event: &LogEvent) {
        match event.level {
            LogLevel::Error => eprintln!("{}", event.format()),
            _ => println!("{}", event.format()),
        }
    }
}

/// Structured logger for JSON output and better tooling integration
pub struct StructuredLogger;

impl Logger for StructuredLogger {
    fn log(&self, event: &LogEvent) {
        let line = event.format_json().unwrap_or_else(|_| event.format());
        match event.level {
            LogLevel::Error => eprintln!("{}", line),
            _ => println!("{}", line),
        }
    }
}

/// Forwards events to the `log` facade so host applications can route them
#[cfg(feature = "logging")]
pub struct FacadeLogger;

#[cfg(feature = "logging")]
impl Logger for FacadeLogger {
    fn log(&self, event: &LogEvent) {
        let level = match event.level {
            LogLevel::Error => log::Level::Error,
            LogLevel::Warning => log::Level::Warn,
            LogLevel::Info => log::Level::Info,
            LogLevel::Debug => log::Level::Debug,
        };
        log::log!(target: "hygiene", level, "{}", event.format());
    }
}

#[cfg(feature = "logging")]
fn text_logger() -> Arc<dyn Logger> {
    if config::use_console_logging() {
        Arc::new(ConsoleLogger)
    } else {
        Arc::new(FacadeLogger)
    }
}

#[cfg(not(feature = "logging"))]
fn text_logger() -> Arc<dyn Logger> {
    Arc::new(ConsoleLogger)
}

/// Memory logger for testing
pub struct MemoryLogger {
    events: Mutex<Vec<LogEvent>>,
}

impl MemoryLogger {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn get_events(&self) -> Vec<LogEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }

    pub fn event_count(&self) -> usize {
        self.events.lock().map(|events| events.len()).unwrap_or(0)
    }

    pub fn get_events_with_code(&self, code: Code) -> Vec<LogEvent> {
        self.get_events()
            .into_iter()
            .filter(|e| e.code == code)
            .collect()
    }

    pub fn has_error_with_code(&self, code: Code) -> bool {
        self.get_events()
            .iter()
            .any(|e| e.is_error() && e.code == code)
    }
}

impl Default for MemoryLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl Logger for MemoryLogger {
    fn log(&self, event: &LogEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

/// Build the service selected by runtime preferences
pub fn create_configured_service() -> LoggingService {
    LoggingService::with_config()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::codes;

    #[test]
    fn test_service_filters_by_level() {
        let memory = Arc::new(MemoryLogger::new());
        let service = LoggingService::new(memory.clone(), LogLevel::Warning);

        service.log_debug("dropped");
        service.log_info("dropped");
        service.log_warning("kept");
        service.log_error(codes::normalization::INVALID_FIELD, "kept");

        assert_eq!(memory.event_count(), 2);
        assert!(memory.has_error_with_code(codes::normalization::INVALID_FIELD));
    }

    #[test]
    fn test_memory_logger_queries() {
        let memory = Arc::new(MemoryLogger::new());
        let mut service = LoggingService::new(memory.clone(), LogLevel::Error);
        service.set_min_level(LogLevel::Debug);

        service.log_success(codes::success::RECORD_INSERTED, "inserted");
        service.log_success(codes::success::RECORD_INSERTED, "inserted again");

        assert_eq!(
            memory
                .get_events_with_code(codes::success::RECORD_INSERTED)
                .len(),
            2
        );
        memory.clear();
        assert_eq!(memory.event_count(), 0);
    }
}
