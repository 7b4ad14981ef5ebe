//! Security event types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity of a security event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SecurityLevel {
    Info,
    Warning,
    Critical,
    Alert,
}

impl SecurityLevel {
    /// Whether this level also goes to the high-severity journal.
    pub fn is_high_severity(self) -> bool {
        matches!(self, SecurityLevel::Critical | SecurityLevel::Alert)
    }
}

impl std::fmt::Display for SecurityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SecurityLevel::Info => write!(f, "INFO"),
            SecurityLevel::Warning => write!(f, "WARNING"),
            SecurityLevel::Critical => write!(f, "CRITICAL"),
            SecurityLevel::Alert => write!(f, "ALERT"),
        }
    }
}

/// Kind of a security event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SecurityEventKind {
    AuthFailed,
    RateLimitExceeded,
    InvalidInput,
    SuspiciousPattern,
    JwtValidationFailed,
    DeduplicationBlocked,
    UnauthorizedAccess,
    CommandInjectionAttempt,
    MaliciousUrlBlocked,
    ApiKeyValidationFailed,
}

impl std::fmt::Display for SecurityEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SecurityEventKind::AuthFailed => "AUTH_FAILED",
            SecurityEventKind::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            SecurityEventKind::InvalidInput => "INVALID_INPUT",
            SecurityEventKind::SuspiciousPattern => "SUSPICIOUS_PATTERN",
            SecurityEventKind::JwtValidationFailed => "JWT_VALIDATION_FAILED",
            SecurityEventKind::DeduplicationBlocked => "DEDUPLICATION_BLOCKED",
            SecurityEventKind::UnauthorizedAccess => "UNAUTHORIZED_ACCESS",
            SecurityEventKind::CommandInjectionAttempt => "COMMAND_INJECTION_ATTEMPT",
            SecurityEventKind::MaliciousUrlBlocked => "MALICIOUS_URL_BLOCKED",
            SecurityEventKind::ApiKeyValidationFailed => "API_KEY_VALIDATION_FAILED",
        };
        write!(f, "{name}")
    }
}

/// One journal entry. Append-only, never mutated after being written.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityEvent {
    pub timestamp: DateTime<Utc>,
    pub level: SecurityLevel,
    pub kind: SecurityEventKind,
    pub message: String,
    #[serde(default)]
    pub details: serde_json::Value,
    pub source_host_address: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_serialization() {
        assert_eq!(
            serde_json::to_string(&SecurityLevel::Warning).unwrap(),
            "\"WARNING\""
        );
        assert_eq!(
            serde_json::to_string(&SecurityLevel::Alert).unwrap(),
            "\"ALERT\""
        );
    }

    #[test]
    fn test_kind_serialization_matches_display() {
        for kind in [
            SecurityEventKind::AuthFailed,
            SecurityEventKind::RateLimitExceeded,
            SecurityEventKind::JwtValidationFailed,
            SecurityEventKind::DeduplicationBlocked,
            SecurityEventKind::MaliciousUrlBlocked,
        ] {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{kind}\""));
        }
    }

    #[test]
    fn test_event_round_trip() {
        let event = SecurityEvent {
            timestamp: Utc::now(),
            level: SecurityLevel::Critical,
            kind: SecurityEventKind::JwtValidationFailed,
            message: "JWT validation failed".to_string(),
            details: serde_json::json!({"error": "expired"}),
            source_host_address: "127.0.0.1".to_string(),
        };

        let line = serde_json::to_string(&event).unwrap();
        assert!(line.contains("\"sourceHostAddress\""));

        let parsed: SecurityEvent = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed.kind, SecurityEventKind::JwtValidationFailed);
        assert_eq!(parsed.level, SecurityLevel::Critical);
    }
}
