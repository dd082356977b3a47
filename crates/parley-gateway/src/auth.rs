use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::warn;

use parley_core::config::{AuthConfig, AuthMode};

type HmacSha256 = Hmac<Sha256>;

/// Token version prefix; bump when the signed payload shape changes.
const TOKEN_VERSION: &str = "pt1";

/// Outcome of verifying an inbound credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    User(String),
    Anonymous,
    Invalid(String),
}

/// Authentication capability consumed by the HTTP and WS surfaces. Token
/// issuance lives with the account system; this side only verifies.
pub trait AuthVerifier: Send + Sync {
    /// Verify a bearer token. A missing token is anonymous, not invalid.
    fn verify(&self, bearer: Option<&str>) -> AuthOutcome;

    /// Verify a WS handshake. Defaults to bearer verification over the
    /// handshake headers.
    fn verify_ws(&self, headers: &HeaderMap) -> AuthOutcome {
        self.verify(extract_bearer(headers))
    }
}

pub fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

/// Verifier for HMAC-SHA256 signed tokens of the form
/// `pt1.<user_id>.<expiry_unix>.<hex signature>`, signed over
/// `user_id.expiry`.
pub struct HmacAuthVerifier {
    secret: String,
}

impl HmacAuthVerifier {
    pub fn new(secret: impl Into<String>) -> Self {
        Self { secret: secret.into() }
    }

    /// Sign a token; used by operator tooling and tests.
    pub fn issue(&self, user_id: &str, ttl_secs: i64) -> String {
        let expiry = chrono::Utc::now().timestamp() + ttl_secs;
        let payload = format!("{user_id}.{expiry}");
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .expect("HMAC accepts keys of any length");
        mac.update(payload.as_bytes());
        let sig = hex::encode(mac.finalize().into_bytes());
        format!("{TOKEN_VERSION}.{user_id}.{expiry}.{sig}")
    }
}

impl AuthVerifier for HmacAuthVerifier {
    fn verify(&self, bearer: Option<&str>) -> AuthOutcome {
        let Some(token) = bearer else {
            return AuthOutcome::Anonymous;
        };

        let parts: Vec<&str> = token.split('.').collect();
        let [version, user_id, expiry, sig] = parts.as_slice() else {
            return AuthOutcome::Invalid("malformed token".into());
        };
        if *version != TOKEN_VERSION {
            return AuthOutcome::Invalid(format!("unsupported token version: {version}"));
        }
        let Ok(expiry_ts) = expiry.parse::<i64>() else {
            return AuthOutcome::Invalid("malformed token expiry".into());
        };

        let Ok(sig_bytes) = hex::decode(sig) else {
            return AuthOutcome::Invalid("malformed token signature".into());
        };
        let payload = format!("{user_id}.{expiry_ts}");
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .expect("HMAC accepts keys of any length");
        mac.update(payload.as_bytes());
        // verify_slice is constant-time.
        if mac.verify_slice(&sig_bytes).is_err() {
            return AuthOutcome::Invalid("signature mismatch".into());
        }

        if expiry_ts < chrono::Utc::now().timestamp() {
            return AuthOutcome::Invalid("token expired".into());
        }
        AuthOutcome::User((*user_id).to_string())
    }
}

/// Verifier for trusted networks: everything is anonymous.
pub struct NoAuthVerifier;

impl AuthVerifier for NoAuthVerifier {
    fn verify(&self, _bearer: Option<&str>) -> AuthOutcome {
        AuthOutcome::Anonymous
    }
}

/// Build the configured verifier.
pub fn build_verifier(config: &AuthConfig) -> anyhow::Result<std::sync::Arc<dyn AuthVerifier>> {
    match config.mode {
        AuthMode::None => {
            warn!("auth disabled; all requests are anonymous");
            Ok(std::sync::Arc::new(NoAuthVerifier))
        }
        AuthMode::Hmac => {
            let secret = config
                .secret
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("auth mode is hmac but no secret is configured"))?;
            Ok(std::sync::Arc::new(HmacAuthVerifier::new(secret)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_token_verifies_to_user() {
        let verifier = HmacAuthVerifier::new("top-secret");
        let token = verifier.issue("u-42", 3600);
        assert_eq!(verifier.verify(Some(&token)), AuthOutcome::User("u-42".into()));
    }

    #[test]
    fn missing_token_is_anonymous() {
        let verifier = HmacAuthVerifier::new("top-secret");
        assert_eq!(verifier.verify(None), AuthOutcome::Anonymous);
    }

    #[test]
    fn tampered_token_is_invalid() {
        let verifier = HmacAuthVerifier::new("top-secret");
        let token = verifier.issue("u-42", 3600);
        let forged = token.replace("u-42", "u-43");
        assert!(matches!(verifier.verify(Some(&forged)), AuthOutcome::Invalid(_)));
    }

    #[test]
    fn wrong_secret_is_invalid() {
        let issuer = HmacAuthVerifier::new("secret-a");
        let verifier = HmacAuthVerifier::new("secret-b");
        let token = issuer.issue("u-42", 3600);
        assert!(matches!(verifier.verify(Some(&token)), AuthOutcome::Invalid(_)));
    }

    #[test]
    fn expired_token_is_invalid() {
        let verifier = HmacAuthVerifier::new("top-secret");
        let token = verifier.issue("u-42", -60);
        assert_eq!(verifier.verify(Some(&token)), AuthOutcome::Invalid("token expired".into()));
    }

    #[test]
    fn garbage_token_is_invalid() {
        let verifier = HmacAuthVerifier::new("top-secret");
        assert!(matches!(verifier.verify(Some("not-a-token")), AuthOutcome::Invalid(_)));
    }

    #[test]
    fn bearer_extraction() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Bearer abc123".parse().unwrap());
        assert_eq!(extract_bearer(&headers), Some("abc123"));

        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Basic abc123".parse().unwrap());
        assert_eq!(extract_bearer(&headers), None);
    }
}
