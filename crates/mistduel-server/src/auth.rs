use axum::extract::FromRequestParts;
use axum::http::HeaderMap;
use axum::http::request::Parts;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use mistduel_core::player::UserId;

use crate::error::AppError;
use crate::state::AppState;

type HmacSha256 = Hmac<Sha256>;

/// Verifies player tokens issued by the external auth service.
///
/// Tokens are `"<user_id>.<hex hmac-sha256(user_id)>"`. Without a secret the
/// token is just the decimal user id, which is only meant for development.
#[derive(Clone)]
pub struct TokenVerifier {
    secret: Option<String>,
}

impl TokenVerifier {
    pub fn new(secret: Option<String>) -> Self {
        Self { secret }
    }

    /// Returns the user the token was issued to, or `None` if it is invalid.
    pub fn verify(&self, token: &str) -> Option<UserId> {
        let Some(ref secret) = self.secret else {
            return token.parse::<UserId>().ok();
        };

        let (id_part, sig_part) = token.split_once('.')?;
        let user_id = id_part.parse::<UserId>().ok()?;
        let expected = hex::decode(sig_part).ok()?;

        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
        mac.update(id_part.as_bytes());
        mac.verify_slice(&expected).ok()?;
        Some(user_id)
    }

    /// Issue a token for `user_id`. The server never calls this on the request
    /// path; it exists for tooling and tests.
    pub fn sign(&self, user_id: UserId) -> String {
        let Some(ref secret) = self.secret else {
            return user_id.to_string();
        };
        let id_part = user_id.to_string();
        let sig = match HmacSha256::new_from_slice(secret.as_bytes()) {
            Ok(mut mac) => {
                mac.update(id_part.as_bytes());
                hex::encode(mac.finalize().into_bytes())
            },
            Err(_) => String::new(),
        };
        format!("{id_part}.{sig}")
    }
}

/// Extract the token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

/// The authenticated caller of an HTTP endpoint.
pub struct AuthUser(pub UserId);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, AppError> {
        let token = bearer_token(&parts.headers)
            .ok_or_else(|| AppError::Unauthorized("missing bearer token".to_string()))?;
        state
            .auth
            .verify(token)
            .map(AuthUser)
            .ok_or_else(|| AppError::Unauthorized("invalid token".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_token_roundtrip() {
        let verifier = TokenVerifier::new(Some("test-secret".to_string()));
        let token = verifier.sign(42);
        assert!(token.starts_with("42."));
        assert_eq!(verifier.verify(&token), Some(42));
    }

    #[test]
    fn rejects_tampered_tokens() {
        let verifier = TokenVerifier::new(Some("test-secret".to_string()));
        let token = verifier.sign(42);
        let forged = token.replacen("42.", "43.", 1);
        assert_eq!(verifier.verify(&forged), None);
        assert_eq!(verifier.verify("42"), None);
        assert_eq!(verifier.verify("42.nothex!"), None);
        assert_eq!(verifier.verify(""), None);

        let other = TokenVerifier::new(Some("other-secret".to_string()));
        assert_eq!(other.verify(&token), None);
    }

    #[test]
    fn dev_mode_accepts_bare_ids() {
        let verifier = TokenVerifier::new(None);
        assert_eq!(verifier.verify("7"), Some(7));
        assert_eq!(verifier.sign(7), "7");
        assert_eq!(verifier.verify("seven"), None);
    }

    #[test]
    fn bearer_header_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);
        headers.insert("authorization", "Bearer abc.def".parse().unwrap());
        assert_eq!(bearer_token(&headers), Some("abc.def"));
        headers.insert("authorization", "Basic xyz".parse().unwrap());
        assert_eq!(bearer_token(&headers), None);
    }
}
