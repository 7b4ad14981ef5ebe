//! Constants for the authentication flow.

use std::time::Duration;

/// Origin of the hosted authentication pages.
pub const AUTH_ORIGIN: &str = "https://auth.murmur.app";

/// Path of the login landing page under [`AUTH_ORIGIN`].
pub const AUTH_LANDING_PATH: &str = "/login";

/// Published signing key set.
pub const JWKS_URL: &str = "https://auth.murmur.app/.well-known/jwks.json";

/// Deep-link scheme registered with the OS.
pub const DEEP_LINK_SCHEME: &str = "murmur";

/// Callback paths accepted from the deep link, with and without the leading
/// segment. Anything else is rejected without side effects.
pub const ALLOWED_CALLBACK_PATHS: &[&str] = &["auth/callback", "callback"];

/// Secret record id for the transcription API key.
pub const SECRET_ID_API_KEY: &str = "credentials";

/// Secret record id for the authentication record.
pub const SECRET_ID_AUTH_RECORD: &str = "auth";

/// How long the cached key set stays fresh.
pub const KEY_SET_CACHE_TTL: Duration = Duration::from_secs(600);

/// Key set fetches allowed per minute.
pub const KEY_SET_FETCHES_PER_MINUTE: u32 = 10;

/// User-Agent string for HTTP requests.
pub const USER_AGENT: &str = concat!("murmur-desktop/", env!("CARGO_PKG_VERSION"));
