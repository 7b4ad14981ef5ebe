//! Typed errors for the authentication flow.

use thiserror::Error;

/// Token verification failures.
///
/// Every failure mode has its own variant so callers can log precisely and
/// decide whether a retry makes sense.
#[derive(Debug, Error)]
pub enum TokenError {
    /// The token could not be parsed, or its header is unusable.
    #[error("malformed token: {0}")]
    Malformed(String),

    /// No published signing key matches the token's key id.
    #[error("no signing key published for key id '{0}'")]
    UnknownKey(String),

    /// The signature does not verify against the published key.
    #[error("token signature verification failed")]
    BadSignature,

    /// The token's expiry has passed.
    #[error("token has expired")]
    Expired,

    /// The token's not-before time is still in the future.
    #[error("token is not yet valid")]
    NotYetValid,
}

/// Rejection reasons surfaced by the auth flow controller.
#[derive(Debug, Error)]
pub enum AuthFlowError {
    /// The callback URL was malformed or incomplete.
    #[error("invalid callback: {0}")]
    InvalidCallback(String),

    /// The same challenge/session pair was already processed recently.
    #[error("duplicate authentication attempt")]
    DuplicateAttempt,

    /// Too many authentication attempts in the current window.
    #[error("too many authentication attempts")]
    RateLimited,

    /// The token failed verification.
    #[error(transparent)]
    Token(#[from] TokenError),

    /// The landing URL failed allow-list validation.
    #[error("refusing to open authentication URL: {0}")]
    UnsafeUrl(String),

    /// The API key was rejected before storage.
    #[error("invalid API key")]
    InvalidApiKey,

    /// Persisting a record failed.
    #[error("failed to persist credentials: {0}")]
    StorageWriteFailed(String),
}
