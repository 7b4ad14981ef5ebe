//! Handshake orchestration.
//!
//! The controller wires the gates together: callbacks are deduplicated
//! before anything else mutates, then rate limited, then verified, then
//! persisted. Every rejection produces a user-safe message for the UI and a
//! detailed entry in the security journal.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{debug, warn};
use url::Url;

use murmur_audit::SecurityEventLog;
use murmur_guard::{ActionClass, DEFAULT_DEDUP_WINDOW, DeduplicationTracker, RateLimiter};
use murmur_secrets::{SecretStatus, SecretStore};

use crate::challenge::AuthChallenge;
use crate::constants::{
    ALLOWED_CALLBACK_PATHS, AUTH_LANDING_PATH, AUTH_ORIGIN, DEEP_LINK_SCHEME, SECRET_ID_API_KEY,
    SECRET_ID_AUTH_RECORD,
};
use crate::error::AuthFlowError;
use crate::record::{AuthRecord, AuthUser};
use crate::url_guard::{self, UrlOpener};
use crate::verifier::TokenVerifier;

/// Handshake progression. `Rejected` and `Authenticated` are terminal for
/// one callback; a new `start_auth` begins a fresh handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Idle,
    AwaitingCallback,
    Gating,
    Verifying,
    Authenticated,
    Rejected,
}

/// Asynchronous notifications consumed by the UI layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthNotification {
    /// The handshake completed and a session was stored.
    Success { user: AuthUser },
    /// The handshake failed; `message` is safe to display verbatim.
    Error { message: String },
}

/// Result of [`AuthFlowController::get_status`].
#[derive(Debug, Clone)]
pub struct AuthStatus {
    pub authenticated: bool,
    pub user: Option<AuthUser>,
}

impl AuthStatus {
    fn unauthenticated() -> Self {
        Self {
            authenticated: false,
            user: None,
        }
    }
}

/// Orchestrates the browser-handoff authentication flow.
pub struct AuthFlowController {
    secrets: SecretStore,
    limiter: RateLimiter,
    dedup: DeduplicationTracker,
    audit: Arc<SecurityEventLog>,
    verifier: TokenVerifier,
    opener: Box<dyn UrlOpener>,
    state: Mutex<HandshakeState>,
    pending: Mutex<Vec<AuthChallenge>>,
    notify_tx: mpsc::UnboundedSender<AuthNotification>,
}

impl AuthFlowController {
    /// Build a controller from its collaborators. Returns the controller and
    /// the notification stream the UI layer should drain.
    pub fn new(
        secrets: SecretStore,
        limiter: RateLimiter,
        dedup: DeduplicationTracker,
        audit: Arc<SecurityEventLog>,
        verifier: TokenVerifier,
        opener: Box<dyn UrlOpener>,
    ) -> (Self, mpsc::UnboundedReceiver<AuthNotification>) {
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        let controller = Self {
            secrets,
            limiter,
            dedup,
            audit,
            verifier,
            opener,
            state: Mutex::new(HandshakeState::Idle),
            pending: Mutex::new(Vec::new()),
            notify_tx,
        };
        (controller, notify_rx)
    }

    /// Begin a handshake: generate a fresh challenge/session pair, open the
    /// login page in the external browser and return immediately.
    ///
    /// The browser navigation is fire-and-forget; a launch failure is logged
    /// but does not abort the handshake, since the user can still reach the
    /// login page manually.
    pub fn start_auth(&self) -> Result<AuthChallenge, AuthFlowError> {
        let challenge = AuthChallenge::generate();

        let landing = format!(
            "{AUTH_ORIGIN}{AUTH_LANDING_PATH}?challenge={}&sessionId={}&mode=login",
            urlencoding::encode(&challenge.challenge),
            urlencoding::encode(&challenge.session_id),
        );
        let validated = match url_guard::validate_landing_url(&landing) {
            Ok(url) => url,
            Err(reason) => {
                self.audit.malicious_url_blocked(&landing, &reason);
                return Err(AuthFlowError::UnsafeUrl(reason));
            }
        };

        if let Err(e) = self.opener.open(&validated) {
            warn!(error = %e, "failed to open browser for authentication");
        }

        {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            let now = Instant::now();
            pending.retain(|entry| now.duration_since(entry.issued_at) < DEFAULT_DEDUP_WINDOW);
            pending.push(challenge.clone());
        }
        self.set_state(HandshakeState::AwaitingCallback);

        debug!(session_id = %challenge.session_id, "authentication started");
        Ok(challenge)
    }

    /// Process a deep-link callback delivered by the OS.
    ///
    /// This is the only re-entrant surface: the deduplication check runs
    /// before any state is mutated, so a rapid second delivery of the same
    /// callback cannot race past the gates.
    pub async fn handle_callback(&self, callback_url: &str) -> Result<AuthUser, AuthFlowError> {
        let parsed = match Url::parse(callback_url) {
            Ok(parsed) => parsed,
            Err(_) => return self.reject_invalid("url", "callback URL is not parseable"),
        };
        if parsed.scheme() != DEEP_LINK_SCHEME {
            return self.reject_invalid("scheme", "callback scheme is not recognized");
        }

        let path = callback_path(&parsed);
        if !ALLOWED_CALLBACK_PATHS.contains(&path.as_str()) {
            return self.reject_invalid("path", &format!("callback path not allowed: {path}"));
        }

        let params: HashMap<String, String> = parsed.query_pairs().into_owned().collect();
        let Some(token) = params.get("token") else {
            return self.reject_invalid("token", "missing token parameter");
        };
        let Some(challenge) = params.get("challenge") else {
            return self.reject_invalid("challenge", "missing challenge parameter");
        };
        let Some(session_id) = params.get("sessionId") else {
            return self.reject_invalid("sessionId", "missing sessionId parameter");
        };

        self.set_state(HandshakeState::Gating);

        let dedup_key = format!("{challenge}:{session_id}");
        if self.dedup.is_duplicate(&dedup_key) {
            self.audit.deduplication_blocked(&dedup_key, "authentication");
            self.set_state(HandshakeState::Rejected);
            return Err(AuthFlowError::DuplicateAttempt);
        }

        if !self.limiter.try_consume(ActionClass::Authentication) {
            self.audit.rate_limit_exceeded("authentication");
            self.notify(AuthNotification::Error {
                message: "Too many sign-in attempts. Please wait a minute and try again."
                    .to_string(),
            });
            self.set_state(HandshakeState::Rejected);
            return Err(AuthFlowError::RateLimited);
        }

        if !self.consume_pending(challenge, session_id) {
            // A late callback for a handshake this process no longer tracks
            // is still processed on its own merits.
            debug!("callback does not match a pending challenge");
        }

        self.set_state(HandshakeState::Verifying);
        let claims = match self.verifier.verify(token).await {
            Ok(claims) => claims,
            Err(e) => {
                self.audit
                    .jwt_validation_failed(&e.to_string(), &token_prefix(token));
                self.notify(AuthNotification::Error {
                    message: "Sign-in failed. Please try again.".to_string(),
                });
                self.set_state(HandshakeState::Rejected);
                return Err(e.into());
            }
        };

        let record = AuthRecord::new(&claims, challenge, session_id);
        let serialized = serde_json::to_string(&record)
            .map_err(|e| AuthFlowError::StorageWriteFailed(e.to_string()))?;
        if let Err(e) = self.secrets.save(SECRET_ID_AUTH_RECORD, &serialized) {
            self.audit.auth_failed(serde_json::json!({
                "reason": "failed to persist session",
                "error": e.to_string(),
            }));
            self.notify(AuthNotification::Error {
                message: "Could not save your session. Please try again.".to_string(),
            });
            self.set_state(HandshakeState::Rejected);
            return Err(AuthFlowError::StorageWriteFailed(e.to_string()));
        }

        self.set_state(HandshakeState::Authenticated);
        self.notify(AuthNotification::Success {
            user: record.user.clone(),
        });
        debug!(user_id = %record.user.id, "authentication succeeded");
        Ok(record.user)
    }

    /// Current session, with expiry enforced on read: an expired record is
    /// deleted and reported as unauthenticated.
    pub fn get_status(&self) -> AuthStatus {
        use secrecy::ExposeSecret;

        let Some(raw) = self.secrets.load(SECRET_ID_AUTH_RECORD) else {
            return AuthStatus::unauthenticated();
        };
        let record: AuthRecord = match serde_json::from_str(raw.expose_secret()) {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, "stored session is corrupt, deleting");
                let _ = self.secrets.delete(SECRET_ID_AUTH_RECORD);
                return AuthStatus::unauthenticated();
            }
        };

        if record.is_expired() {
            debug!("stored session has expired, deleting");
            let _ = self.secrets.delete(SECRET_ID_AUTH_RECORD);
            return AuthStatus::unauthenticated();
        }

        AuthStatus {
            authenticated: true,
            user: Some(record.user),
        }
    }

    /// Delete the stored session. Idempotent; returns whether a session
    /// existed.
    pub fn logout(&self) -> bool {
        self.set_state(HandshakeState::Idle);
        match self.secrets.delete(SECRET_ID_AUTH_RECORD) {
            Ok(deleted) => {
                debug!(deleted, "logout");
                deleted
            }
            Err(e) => {
                warn!(error = %e, "failed to delete stored session");
                false
            }
        }
    }

    /// Validate and store the transcription API key.
    pub fn save_api_key(&self, api_key: &str) -> Result<(), AuthFlowError> {
        let trimmed = api_key.trim();
        if trimmed.is_empty()
            || trimmed.len() > 512
            || !trimmed.chars().all(|c| c.is_ascii_graphic())
        {
            self.audit
                .api_key_validation_failed("API key must be non-empty printable ASCII");
            return Err(AuthFlowError::InvalidApiKey);
        }
        self.secrets
            .save(SECRET_ID_API_KEY, trimmed)
            .map_err(|e| AuthFlowError::StorageWriteFailed(e.to_string()))
    }

    /// Presence and masked preview of the stored API key.
    pub fn api_key_status(&self) -> SecretStatus {
        self.secrets.status(SECRET_ID_API_KEY)
    }

    /// Delete the stored API key. Idempotent.
    pub fn delete_api_key(&self) -> bool {
        match self.secrets.delete(SECRET_ID_API_KEY) {
            Ok(deleted) => deleted,
            Err(e) => {
                warn!(error = %e, "failed to delete API key");
                false
            }
        }
    }

    /// Current handshake state.
    pub fn state(&self) -> HandshakeState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, next: HandshakeState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = next;
    }

    /// Consume the pending challenge matching this callback, pruning expired
    /// entries along the way. Returns whether a match existed.
    fn consume_pending(&self, challenge: &str, session_id: &str) -> bool {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        pending.retain(|entry| now.duration_since(entry.issued_at) < DEFAULT_DEDUP_WINDOW);

        let before = pending.len();
        pending.retain(|entry| {
            !(entry.challenge == challenge && entry.session_id == session_id)
        });
        pending.len() != before
    }

    fn reject_invalid(&self, field: &str, reason: &str) -> Result<AuthUser, AuthFlowError> {
        self.audit.invalid_input(field, reason);
        self.set_state(HandshakeState::Rejected);
        Err(AuthFlowError::InvalidCallback(reason.to_string()))
    }

    fn notify(&self, notification: AuthNotification) {
        if self.notify_tx.send(notification).is_err() {
            debug!("notification receiver dropped");
        }
    }
}

/// Normalize a deep-link URL's host + path into an allow-list comparable
/// form: `murmur://auth/callback` and `murmur://callback` become
/// `auth/callback` and `callback`.
fn callback_path(url: &Url) -> String {
    let host = url.host_str().unwrap_or("");
    let path = url.path().trim_matches('/');
    match (host.is_empty(), path.is_empty()) {
        (true, _) => path.to_string(),
        (false, true) => host.to_string(),
        (false, false) => format!("{host}/{path}"),
    }
}

/// First characters of a token, for logging. Never the full value.
fn token_prefix(token: &str) -> String {
    token.chars().take(20).collect()
}
