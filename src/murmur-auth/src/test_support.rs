//! Shared fixtures for in-crate tests: a generated RS256 keypair, token
//! signing helpers and an in-memory key source.

use std::sync::OnceLock;

use anyhow::Result;
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use rsa::RsaPrivateKey;
use rsa::pkcs8::EncodePrivateKey;
use rsa::traits::PublicKeyParts;

use crate::verifier::{Jwk, KeySet, KeySource};

pub(crate) const TEST_KID: &str = "test-key-1";

struct TestKeys {
    encoding: EncodingKey,
    other_encoding: EncodingKey,
    key_set: KeySet,
}

fn generate_rsa() -> (EncodingKey, String, String) {
    let mut rng = rand_core::OsRng;
    let key = RsaPrivateKey::new(&mut rng, 2048).expect("failed to generate RSA key");
    let pem = key
        .to_pkcs8_pem(rsa::pkcs8::LineEnding::LF)
        .expect("failed to encode private key");
    let encoding = EncodingKey::from_rsa_pem(pem.as_bytes()).expect("failed to load private key");

    let n = URL_SAFE_NO_PAD.encode(key.n().to_bytes_be());
    let e = URL_SAFE_NO_PAD.encode(key.e().to_bytes_be());
    (encoding, n, e)
}

fn keys() -> &'static TestKeys {
    static KEYS: OnceLock<TestKeys> = OnceLock::new();
    KEYS.get_or_init(|| {
        let (encoding, n, e) = generate_rsa();
        let (other_encoding, _, _) = generate_rsa();
        TestKeys {
            encoding,
            other_encoding,
            key_set: KeySet {
                keys: vec![Jwk {
                    kid: TEST_KID.to_string(),
                    kty: "RSA".to_string(),
                    n,
                    e,
                    alg: Some("RS256".to_string()),
                }],
            },
        }
    })
}

/// The published key set matching [`sign_claims`].
pub(crate) fn test_key_set() -> KeySet {
    keys().key_set.clone()
}

/// A valid RS256 key that is NOT in the published set.
pub(crate) fn other_encoding_key() -> &'static EncodingKey {
    &keys().other_encoding
}

/// Standard identity claims used across tests.
pub(crate) fn claims_json(sub: &str, email: &str, exp: i64) -> serde_json::Value {
    serde_json::json!({
        "sub": sub,
        "email": email,
        "exp": exp,
        "given_name": "Ada",
        "family_name": "Lovelace",
        "picture": "https://example.com/ada.png",
    })
}

/// Sign `claims` with the test key and an explicit (or absent) key id.
pub(crate) fn sign_with(kid: Option<&str>, claims: &serde_json::Value) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = kid.map(str::to_string);
    jsonwebtoken::encode(&header, claims, &keys().encoding).expect("failed to sign token")
}

/// Sign `claims` under the published test key id.
pub(crate) fn sign_claims(claims: &serde_json::Value) -> String {
    sign_with(Some(TEST_KID), claims)
}

/// In-memory [`KeySource`].
pub(crate) struct StaticKeySource {
    set: KeySet,
}

impl StaticKeySource {
    pub(crate) fn new(set: KeySet) -> Self {
        Self { set }
    }
}

#[async_trait]
impl KeySource for StaticKeySource {
    async fn fetch_keys(&self) -> Result<KeySet> {
        Ok(self.set.clone())
    }
}
