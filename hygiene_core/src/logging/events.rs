//! Event system for ingestion logging

use super::codes::Code;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Log severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error = 0,
    Warning = 1,
    Info = 2,
    Debug = 3,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warning => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
        }
    }
}

/// Core log event structure
#[derive(Debug, Clone)]
pub struct LogEvent {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub code: Code,
    pub message: String,
    pub context: BTreeMap<String, String>,
}

impl LogEvent {
    fn build(level: LogLevel, code: Code, message: &str) -> Self {
        let limit = crate::config::compile_time::logging::MAX_LOG_MESSAGE_LENGTH;
        let message = if message.len() > limit {
            let mut end = limit;
            while !message.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}...", &message[..end])
        } else {
            message.to_string()
        };

        Self {
            timestamp: Utc::now(),
            level,
            code,
            message,
            context: BTreeMap::new(),
        }
    }

    /// Create a new error event
    pub fn error(error_code: Code, message: &str) -> Self {
        Self::build(LogLevel::Error, error_code, message)
    }

    /// Create a new warning event (warnings may not have codes)
    pub fn warning(message: &str) -> Self {
        Self::build(LogLevel::Warning, Code::new("W000"), message)
    }

    /// Create warning with specific code
    pub fn warning_with_code(warning_code: Code, message: &str) -> Self {
        Self::build(LogLevel::Warning, warning_code, message)
    }

    /// Create a new info event
    pub fn info(message: &str) -> Self {
        Self::build(LogLevel::Info, Code::new("I000"), message)
    }

    /// Create a success event (info with success code)
    pub fn success(success_code: Code, message: &str) -> Self {
        Self::build(LogLevel::Info, success_code, message)
    }

    /// Create a debug event
    pub fn debug(message: &str) -> Self {
        Self::build(LogLevel::Debug, Code::new("D000"), message)
    }

    /// Add context data
    pub fn with_context(mut self, key: &str, value: &str) -> Self {
        self.context.insert(key.to_string(), value.to_string());
        self
    }

    pub fn is_error(&self) -> bool {
        self.level == LogLevel::Error
    }

    pub fn is_warning(&self) -> bool {
        self.level == LogLevel::Warning
    }

    pub fn is_info(&self) -> bool {
        self.level == LogLevel::Info
    }

    pub fn is_debug(&self) -> bool {
        self.level == LogLevel::Debug
    }

    pub fn severity(&self) -> &'static str {
        super::codes::get_severity(self.code.as_str()).as_str()
    }

    pub fn category(&self) -> &'static str {
        super::codes::get_category(self.code.as_str())
    }

    pub fn description(&self) -> &'static str {
        super::codes::get_description(self.code.as_str())
    }

    pub fn recommended_action(&self) -> &'static str {
        super::codes::get_action(self.code.as_str())
    }

    pub fn is_recoverable(&self) -> bool {
        super::codes::is_recoverable(self.code.as_str())
    }

    /// Format for display
    pub fn format(&self) -> String {
        let mut output = format!(
            "[{}] {} - {}",
            self.level.as_str(),
            self.code.as_str(),
            self.message
        );

        if !self.context.is_empty() {
            let pairs: Vec<String> = self
                .context
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            output.push_str(&format!(" ({})", pairs.join(", ")));
        }

        output
    }

    /// Format with description and recommended action
    pub fn format_detailed(&self) -> String {
        let mut output = self.format();

        output.push_str(&format!("\n  Category: {}", self.category()));
        output.push_str(&format!("\n  Severity: {}", self.severity()));

        if self.is_error() {
            output.push_str(&format!("\n  Recoverable: {}", self.is_recoverable()));
        }

        let description = self.description();
        if description != "Unknown error" {
            output.push_str(&format!("\n  Description: {}", description));
        }

        let action = self.recommended_action();
        if action != "No specific action available" {
            output.push_str(&format!("\n  Recommended action: {}", action));
        }

        output
    }

    /// Format as JSON for structured logging
    pub fn format_json(&self) -> Result<String, serde_json::Error> {
        let mut json = serde_json::json!({
            "timestamp": self.timestamp.to_rfc3339(),
            "level": self.level.as_str(),
            "code": self.code.as_str(),
            "message": self.message,
            "category": self.category(),
            "severity": self.severity(),
        });

        if self.is_error() {
            json["error_metadata"] = serde_json::json!({
                "recoverable": self.is_recoverable(),
                "description": self.description(),
                "recommended_action": self.recommended_action(),
            });
        }

        if !self.context.is_empty() {
            json["context"] = serde_json::to_value(&self.context)?;
        }

        serde_json::to_string(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::codes;

    #[test]
    fn test_error_event_creation() {
        let event = LogEvent::error(codes::normalization::MISSING_FIELD, "owner missing");

        assert!(event.is_error());
        assert_eq!(event.code.as_str(), "E021");
        assert_eq!(event.message, "owner missing");
        assert_eq!(event.category(), "Normalization");
    }

    #[test]
    fn test_event_with_context() {
        let event = LogEvent::error(codes::input::FILE_TOO_LARGE, "File too large")
            .with_context("size", "1024")
            .with_context("limit", "512");

        assert_eq!(event.context.get("size"), Some(&"1024".to_string()));
        assert!(event.format().contains("limit=512"));
    }

    #[test]
    fn test_event_formatting() {
        let event = LogEvent::warning_with_code(codes::resolution::COMMIT_CONFLICT, "retrying");
        let formatted = event.format_detailed();

        assert!(formatted.contains("[WARN]"));
        assert!(formatted.contains("W040"));
        assert!(formatted.contains("Category: Resolution"));
    }

    #[test]
    fn test_long_messages_are_clipped() {
        let limit = crate::config::compile_time::logging::MAX_LOG_MESSAGE_LENGTH;
        let event = LogEvent::info(&"x".repeat(limit + 50));
        assert_eq!(event.message.len(), limit + 3);
    }

    #[test]
    fn test_json_formatting() {
        let event = LogEvent::error(codes::input::INVALID_JSON, "bad export")
            .with_context("source", "scan.json");

        let json = event.format_json().unwrap();
        assert!(json.contains("\"level\":\"ERROR\""));
        assert!(json.contains("\"code\":\"E008\""));
        assert!(json.contains("\"source\":\"scan.json\""));
    }
}
