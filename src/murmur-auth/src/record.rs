//! Persisted authentication record.

use serde::{Deserialize, Serialize};

use crate::verifier::VerifiedClaims;

/// Normalized user identity from a verified token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthUser {
    pub id: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

/// The stored session. Created on successful verification, deleted on logout
/// or expiry detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthRecord {
    pub user: AuthUser,
    pub challenge: String,
    pub session_id: String,
    /// Unix timestamp of the successful verification.
    pub authenticated_at: i64,
    /// Unix timestamp copied from the verified token's expiry claim. Never
    /// wall-clock-extended.
    pub expires_at: i64,
}

impl AuthRecord {
    /// Build a record from verified claims and the handshake identifiers.
    pub fn new(claims: &VerifiedClaims, challenge: &str, session_id: &str) -> Self {
        Self {
            user: AuthUser {
                id: claims.user_id.clone(),
                email: claims.email.clone(),
                first_name: claims.first_name.clone(),
                last_name: claims.last_name.clone(),
                image_url: claims.image_url.clone(),
            },
            challenge: challenge.to_string(),
            session_id: session_id.to_string(),
            authenticated_at: chrono::Utc::now().timestamp(),
            expires_at: claims.expires_at,
        }
    }

    /// Whether the session expiry has passed.
    pub fn is_expired(&self) -> bool {
        chrono::Utc::now().timestamp() >= self.expires_at
    }
}
