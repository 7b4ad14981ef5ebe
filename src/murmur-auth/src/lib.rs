//! Authentication flow for Murmur.
//!
//! Implements the browser-handoff login:
//! 1. [`AuthFlowController::start_auth`] generates a challenge/session pair
//!    and opens the hosted login page in the user's default browser.
//! 2. The OS later delivers a `murmur://` deep-link callback carrying a
//!    signed token plus the challenge pair.
//! 3. [`AuthFlowController::handle_callback`] gates the callback through
//!    replay deduplication and rate limiting, verifies the token signature
//!    against the published key set, persists the session and notifies the
//!    UI layer.
//!
//! Security properties:
//! - Tokens are only trusted after RS256 signature verification against the
//!   published key set; there is no decode-without-verify path.
//! - Callback URLs are matched against a strict allow-list before any state
//!   is touched.
//! - Every gate decision and failure is recorded in the security journal.

pub mod constants;

mod challenge;
mod controller;
mod error;
mod record;
mod url_guard;
mod verifier;

pub use challenge::AuthChallenge;
pub use controller::{AuthFlowController, AuthNotification, AuthStatus, HandshakeState};
pub use error::{AuthFlowError, TokenError};
pub use record::{AuthRecord, AuthUser};
pub use url_guard::{SystemUrlOpener, UrlOpener};
pub use verifier::{HttpKeySource, Jwk, KeySet, KeySource, TokenVerifier, VerifiedClaims};

#[cfg(test)]
mod test_support;
