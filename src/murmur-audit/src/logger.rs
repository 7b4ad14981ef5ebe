//! Journal writer with rotation and in-memory anomaly detection.

use std::collections::{HashMap, VecDeque};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{error, info, warn};

use crate::event::{SecurityEvent, SecurityEventKind, SecurityLevel};

const JOURNAL_FILE: &str = "security.log";
const ALERT_JOURNAL_FILE: &str = "security-alerts.log";

/// Journal rotation ceiling.
const DEFAULT_MAX_JOURNAL_BYTES: u64 = 10 * 1024 * 1024;

/// Rolling window for anomaly detection.
const ANOMALY_WINDOW: Duration = Duration::from_secs(60);

/// Same-kind repetitions inside the window that trigger a synthesized ALERT.
const ANOMALY_THRESHOLD: usize = 3;

#[derive(Clone)]
struct JournalPaths {
    journal: PathBuf,
    alert_journal: PathBuf,
}

struct Inner {
    paths: Option<JournalPaths>,
    max_journal_bytes: u64,
    recent: VecDeque<(SecurityEventKind, Instant)>,
    /// Kinds that already produced a synthesized alert in the current window.
    alerted: HashMap<SecurityEventKind, Instant>,
    counts: HashMap<SecurityEventKind, u64>,
    source_host: String,
}

/// Aggregate view over everything recorded so far.
#[derive(Debug, Clone)]
pub struct LogStatistics {
    pub total_events: u64,
    pub counts: HashMap<SecurityEventKind, u64>,
    pub recent_events: usize,
}

/// Structured, leveled security event journal.
///
/// Must be initialized with a log directory before first use; a log call on an
/// uninitialized instance is a console-warned no-op rather than an error, so
/// early startup paths can log unconditionally. Journal writes never panic the
/// caller: rotation and I/O failures are swallowed after a console report.
pub struct SecurityEventLog {
    inner: Mutex<Inner>,
}

impl SecurityEventLog {
    /// New, uninitialized journal.
    pub fn new() -> Self {
        Self::with_max_journal_size(DEFAULT_MAX_JOURNAL_BYTES)
    }

    /// New journal with a custom rotation ceiling.
    pub fn with_max_journal_size(max_journal_bytes: u64) -> Self {
        Self {
            inner: Mutex::new(Inner {
                paths: None,
                max_journal_bytes,
                recent: VecDeque::new(),
                alerted: HashMap::new(),
                counts: HashMap::new(),
                source_host: local_host_address(),
            }),
        }
    }

    /// Bind the journal to `log_dir`, creating it if needed.
    ///
    /// Calling this twice is a warned no-op.
    pub fn initialize(&self, log_dir: &Path) -> Result<()> {
        {
            let mut inner = self.lock();
            if inner.paths.is_some() {
                warn!("security event log already initialized");
                return Ok(());
            }

            std::fs::create_dir_all(log_dir)
                .with_context(|| format!("failed to create log directory: {}", log_dir.display()))?;

            inner.paths = Some(JournalPaths {
                journal: log_dir.join(JOURNAL_FILE),
                alert_journal: log_dir.join(ALERT_JOURNAL_FILE),
            });
        }

        self.record(
            SecurityLevel::Info,
            SecurityEventKind::SuspiciousPattern,
            "security event log initialized",
            serde_json::json!({
                "logDir": log_dir.display().to_string(),
                "platform": std::env::consts::OS,
            }),
        );
        Ok(())
    }

    /// Append one event to the journal(s) and feed anomaly detection.
    pub fn record(
        &self,
        level: SecurityLevel,
        kind: SecurityEventKind,
        message: &str,
        details: serde_json::Value,
    ) {
        let mut inner = self.lock();
        let Some(paths) = inner.paths.clone() else {
            warn!(%level, %kind, dropped = message, "security event log not initialized");
            return;
        };

        let event = SecurityEvent {
            timestamp: Utc::now(),
            level,
            kind,
            message: message.to_string(),
            details,
            source_host_address: inner.source_host.clone(),
        };
        write_event(&paths, inner.max_journal_bytes, &event);
        *inner.counts.entry(kind).or_insert(0) += 1;

        self.detect_anomaly(&mut inner, &paths, kind);
    }

    /// Track `kind` in the rolling window and synthesize at most one ALERT
    /// per kind per window.
    fn detect_anomaly(&self, inner: &mut Inner, paths: &JournalPaths, kind: SecurityEventKind) {
        let now = Instant::now();
        inner.recent.push_back((kind, now));
        inner
            .recent
            .retain(|(_, seen)| now.duration_since(*seen) < ANOMALY_WINDOW);
        inner
            .alerted
            .retain(|_, seen| now.duration_since(*seen) < ANOMALY_WINDOW);

        let same_kind = inner.recent.iter().filter(|(k, _)| *k == kind).count();
        if same_kind < ANOMALY_THRESHOLD || inner.alerted.contains_key(&kind) {
            return;
        }
        inner.alerted.insert(kind, now);

        // The synthesized alert is written directly and never re-enters the
        // rolling window, so it cannot trigger itself.
        let alert = SecurityEvent {
            timestamp: Utc::now(),
            level: SecurityLevel::Alert,
            kind: SecurityEventKind::SuspiciousPattern,
            message: format!(
                "suspicious activity detected: {same_kind} {kind} events in {}s",
                ANOMALY_WINDOW.as_secs()
            ),
            details: serde_json::json!({
                "eventKind": kind.to_string(),
                "count": same_kind,
                "windowSeconds": ANOMALY_WINDOW.as_secs(),
            }),
            source_host_address: inner.source_host.clone(),
        };
        write_event(paths, inner.max_journal_bytes, &alert);
        *inner
            .counts
            .entry(SecurityEventKind::SuspiciousPattern)
            .or_insert(0) += 1;
    }

    /// Failed authentication attempt.
    pub fn auth_failed(&self, details: serde_json::Value) {
        self.record(
            SecurityLevel::Warning,
            SecurityEventKind::AuthFailed,
            "authentication attempt failed",
            details,
        );
    }

    /// Rate limit denial.
    pub fn rate_limit_exceeded(&self, action: &str) {
        self.record(
            SecurityLevel::Warning,
            SecurityEventKind::RateLimitExceeded,
            "rate limit exceeded",
            serde_json::json!({"action": action}),
        );
    }

    /// Malformed or incomplete input.
    pub fn invalid_input(&self, field: &str, reason: &str) {
        self.record(
            SecurityLevel::Info,
            SecurityEventKind::InvalidInput,
            "invalid input detected",
            serde_json::json!({"field": field, "reason": reason}),
        );
    }

    /// Token verification failure. `token_prefix` must already be truncated;
    /// full tokens never reach the journal.
    pub fn jwt_validation_failed(&self, reason: &str, token_prefix: &str) {
        self.record(
            SecurityLevel::Critical,
            SecurityEventKind::JwtValidationFailed,
            "JWT validation failed",
            serde_json::json!({"error": reason, "token": format!("{token_prefix}...")}),
        );
    }

    /// Replayed attempt blocked by the deduplication tracker.
    pub fn deduplication_blocked(&self, key: &str, action: &str) {
        self.record(
            SecurityLevel::Warning,
            SecurityEventKind::DeduplicationBlocked,
            "duplicate request blocked",
            serde_json::json!({"key": key, "action": action}),
        );
    }

    /// Access to a resource the caller is not entitled to.
    pub fn unauthorized_access(&self, resource: &str, reason: &str) {
        self.record(
            SecurityLevel::Critical,
            SecurityEventKind::UnauthorizedAccess,
            "unauthorized access attempt",
            serde_json::json!({"resource": resource, "reason": reason}),
        );
    }

    /// URL rejected by the navigation allow-list.
    pub fn malicious_url_blocked(&self, url: &str, reason: &str) {
        self.record(
            SecurityLevel::Warning,
            SecurityEventKind::MaliciousUrlBlocked,
            "malicious URL blocked",
            serde_json::json!({"url": url, "reason": reason}),
        );
    }

    /// API key rejected before storage.
    pub fn api_key_validation_failed(&self, reason: &str) {
        self.record(
            SecurityLevel::Warning,
            SecurityEventKind::ApiKeyValidationFailed,
            "API key validation failed",
            serde_json::json!({"reason": reason}),
        );
    }

    /// Manually raised alert.
    pub fn alert(&self, message: &str, details: serde_json::Value) {
        self.record(
            SecurityLevel::Alert,
            SecurityEventKind::SuspiciousPattern,
            message,
            details,
        );
    }

    /// Snapshot of per-kind counters.
    pub fn statistics(&self) -> LogStatistics {
        let inner = self.lock();
        LogStatistics {
            total_events: inner.counts.values().sum(),
            counts: inner.counts.clone(),
            recent_events: inner.recent.len(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned journal is still a usable journal.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for SecurityEventLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Append `event` to the main journal and, for high severity, the alert
/// journal. All failures are reported to the console and swallowed.
fn write_event(paths: &JournalPaths, max_bytes: u64, event: &SecurityEvent) {
    let line = match serde_json::to_string(event) {
        Ok(line) => line,
        Err(e) => {
            error!(error = %e, "failed to serialize security event");
            return;
        }
    };

    append_line(&paths.journal, &line);
    rotate_if_needed(&paths.journal, max_bytes);

    if event.level.is_high_severity() {
        append_line(&paths.alert_journal, &line);
        rotate_if_needed(&paths.alert_journal, max_bytes);
    }

    match event.level {
        SecurityLevel::Info => info!(kind = %event.kind, "{}", event.message),
        SecurityLevel::Warning => warn!(kind = %event.kind, "{}", event.message),
        SecurityLevel::Critical | SecurityLevel::Alert => {
            error!(kind = %event.kind, level = %event.level, "{}", event.message);
        }
    }
}

fn append_line(path: &Path, line: &str) {
    let existed = path.exists();
    let result = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .and_then(|mut file| writeln!(file, "{line}"));

    if let Err(e) = result {
        error!(path = %path.display(), error = %e, "failed to write security journal");
        return;
    }

    if !existed {
        restrict_permissions(path);
    }
}

/// Rename the journal with a timestamp suffix once it exceeds the ceiling.
fn rotate_if_needed(path: &Path, max_bytes: u64) {
    let Ok(metadata) = std::fs::metadata(path) else {
        return;
    };
    if metadata.len() < max_bytes {
        return;
    }

    let rotated = path.with_extension(format!("log.{}", Utc::now().timestamp()));
    match std::fs::rename(path, &rotated) {
        Ok(()) => info!(
            from = %path.display(),
            to = %rotated.display(),
            "security journal rotated"
        ),
        Err(e) => error!(path = %path.display(), error = %e, "journal rotation failed"),
    }
}

fn restrict_permissions(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        if let Err(e) = std::fs::set_permissions(path, perms) {
            warn!(path = %path.display(), error = %e, "failed to restrict journal permissions");
        }
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
}

/// First non-loopback IPv4 address, for the `sourceHostAddress` field.
fn local_host_address() -> String {
    if let Ok(interfaces) = if_addrs::get_if_addrs() {
        for iface in interfaces {
            if !iface.is_loopback() {
                if let std::net::IpAddr::V4(v4) = iface.ip() {
                    return v4.to_string();
                }
            }
        }
    }
    "127.0.0.1".to_string()
}
