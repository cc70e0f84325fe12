use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use once_cell::sync::Lazy;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::CONFIG;
use crate::error::{AppError, Result};

/// Name of the cookie carrying the session token
pub const SESSION_COOKIE: &str = "elder_session";

// HMAC key for session tokens
static JWT_SECRET: Lazy<String> = Lazy::new(|| match &CONFIG.auth.jwt_secret {
    Some(secret) => secret.clone(),
    None => {
        tracing::warn!("ELDER_JWT_SECRET not set, generating a per-process signing secret");
        generate_secret(32)
    }
});

/// JWT session claims
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // Identity id
    pub username: String,
    pub exp: i64,
    pub iat: i64,
    pub jti: String,
}

/// Hash a password using bcrypt
pub fn hash_password(password: &str) -> Result<String> {
    bcrypt::hash(password, bcrypt::DEFAULT_COST)
        .map_err(|e| AppError::Internal(format!("Failed to hash password: {}", e)))
}

/// Verify a password against its hash
pub fn verify_password(password: &str, hash: &str) -> bool {
    bcrypt::verify(password, hash).unwrap_or(false)
}

/// Create a signed session token for an identity
pub fn create_access_token(identity_id: i64, username: &str) -> Result<String> {
    create_access_token_with_expiry(identity_id, username, CONFIG.auth.access_token_expire_secs)
}

pub fn create_access_token_with_expiry(
    identity_id: i64,
    username: &str,
    expires_in: i64,
) -> Result<String> {
    let now = Utc::now();
    let claims = Claims {
        sub: identity_id.to_string(),
        username: username.to_string(),
        exp: (now + Duration::seconds(expires_in)).timestamp(),
        iat: now.timestamp(),
        jti: uuid::Uuid::new_v4().to_string(),
    };

    let key = EncodingKey::from_secret(JWT_SECRET.as_bytes());
    encode(&Header::new(Algorithm::HS256), &claims, &key).map_err(|e| e.into())
}

/// Decode and validate a session token
pub fn decode_token(token: &str) -> Result<Claims> {
    let key = DecodingKey::from_secret(JWT_SECRET.as_bytes());

    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    validation.leeway = 0;

    let token_data = decode::<Claims>(token, &key, &validation)?;
    Ok(token_data.claims)
}

/// Random URL-safe secret of `bytes` random bytes
pub fn generate_secret(bytes: usize) -> String {
    let mut rng = rand::thread_rng();
    let raw: Vec<u8> = (0..bytes).map(|_| rng.gen()).collect();
    URL_SAFE_NO_PAD.encode(raw)
}

/// Random positive 63-bit identifier for public entity lookup
pub fn generate_unique_id() -> i64 {
    rand::thread_rng().gen_range(1..=i64::MAX)
}

/// Compare two secrets without leaking the position of the first mismatch
pub fn secrets_match(provided: &str, expected: &str) -> bool {
    let a = Sha256::digest(provided.as_bytes());
    let b = Sha256::digest(expected.as_bytes());
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
