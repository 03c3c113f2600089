//! Admin API authentication
//!
//! The configured admin token is exchanged for a short-lived JWT at
//! `/api/auth/login`. Protected routes accept either as a bearer token.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, TokenData, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

const ADMIN_SUBJECT: &str = "admin";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: i64,
    pub iat: i64,
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub secret: String,
    pub admin_token: String,
    pub token_expiry_hours: i64,
}

#[derive(Clone)]
pub struct AuthManager {
    config: Arc<AuthConfig>,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl AuthManager {
    pub fn new(config: AuthConfig) -> Self {
        let encoding_key = EncodingKey::from_secret(config.secret.as_bytes());
        let decoding_key = DecodingKey::from_secret(config.secret.as_bytes());
        Self {
            config: Arc::new(config),
            encoding_key,
            decoding_key,
        }
    }

    pub fn create_token(&self, subject: &str) -> Result<String, jsonwebtoken::errors::Error> {
        let now = Utc::now();
        let exp = now + Duration::hours(self.config.token_expiry_hours);

        let claims = Claims {
            sub: subject.to_string(),
            exp: exp.timestamp(),
            iat: now.timestamp(),
        };

        encode(&Header::default(), &claims, &self.encoding_key)
    }

    pub fn verify_token(&self, token: &str) -> Result<TokenData<Claims>, jsonwebtoken::errors::Error> {
        decode::<Claims>(token, &self.decoding_key, &Validation::default())
    }

    /// Exchange the admin token for a JWT. None if the token is wrong.
    pub fn login(
        &self,
        request: &LoginRequest,
    ) -> Option<Result<String, jsonwebtoken::errors::Error>> {
        if !constant_time_eq(request.token.as_bytes(), self.config.admin_token.as_bytes()) {
            return None;
        }
        Some(self.create_token(ADMIN_SUBJECT))
    }

    /// Check an `Authorization` header value
    pub fn is_authorized(&self, auth_header: Option<&str>) -> bool {
        let Some(token) = auth_header.and_then(|h| self.extract_token_from_header(h)) else {
            return false;
        };

        if constant_time_eq(token.as_bytes(), self.config.admin_token.as_bytes()) {
            return true;
        }

        match self.verify_token(&token) {
            Ok(_) => true,
            Err(e) => {
                debug!(error = %e, "Rejected bearer token");
                false
            }
        }
    }

    pub fn extract_token_from_header(&self, auth_header: &str) -> Option<String> {
        auth_header
            .strip_prefix("Bearer ")
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(|s| s.to_string())
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
