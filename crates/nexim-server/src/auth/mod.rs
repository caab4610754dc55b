//! Token issuing and verification, password digests, and the
//! service-to-service request signature.

use hmac::{Hmac, Mac};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use nexim_shared::errcode::{AppError, AppResult};
use nexim_shared::platform::Platform;

use crate::config::Config;

/// Who a verified token belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthIdentity {
    pub user_id: String,
    pub platform: Platform,
}

#[derive(Debug, Serialize, Deserialize)]
struct NativeClaims {
    user_id: String,
    platform_id: i32,
    exp: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct ExternalClaims {
    user_id: String,
    #[serde(default)]
    iss: String,
    exp: u64,
}

pub fn issue_token(config: &Config, user_id: &str, platform: Platform) -> AppResult<String> {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let claims = NativeClaims {
        user_id: user_id.to_string(),
        platform_id: platform.id(),
        exp: now + config.jwt.expire_hours * 3600,
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(config.jwt.secret.as_bytes()),
    )
    .map_err(|_| AppError::internal())
}

/// Verify a bearer token: the native format first, then the external
/// issuer's format when enabled. External subjects are namespaced with the
/// configured prefix so they can never collide with native ids.
pub fn verify_token(config: &Config, token: &str) -> AppResult<AuthIdentity> {
    let validation = Validation::new(Algorithm::HS256);

    if let Ok(data) = decode::<NativeClaims>(
        token,
        &DecodingKey::from_secret(config.jwt.secret.as_bytes()),
        &validation,
    ) {
        let platform =
            Platform::from_id(data.claims.platform_id).ok_or_else(AppError::token_invalid)?;
        return Ok(AuthIdentity {
            user_id: data.claims.user_id,
            platform,
        });
    }

    if config.external_jwt.enabled {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[config.external_jwt.issuer.as_str()]);
        let data = decode::<ExternalClaims>(
            token,
            &DecodingKey::from_secret(config.external_jwt.secret.as_bytes()),
            &validation,
        )
        .map_err(|_| AppError::token_invalid())?;

        let platform = Platform::from_id(config.external_jwt.default_platform_id)
            .unwrap_or(Platform::Web);
        return Ok(AuthIdentity {
            user_id: format!("{}{}", config.external_jwt.id_prefix, data.claims.user_id),
            platform,
        });
    }

    Err(AppError::token_invalid())
}

pub fn new_salt() -> String {
    let mut bytes = [0u8; 16];
    // Falling back to a zeroed salt would silently weaken digests.
    getrandom::fill(&mut bytes).expect("failed to generate random bytes");
    hex::encode(bytes)
}

pub fn password_digest(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn verify_password(salt: &str, password: &str, digest: &str) -> bool {
    let computed = password_digest(salt, password);
    let a = computed.as_bytes();
    let b = digest.as_bytes();
    a.len() == b.len() && a.ct_eq(b).unwrap_u8() == 1
}

/// Signature string for internal service calls:
/// `hex(HMAC-SHA256(secret, "<svc>\n<ts>\n<METHOD>\n<path>\n<hex(sha256(body))>"))`.
pub fn sign_internal_request(
    secret: &str,
    service_name: &str,
    timestamp: &str,
    method: &str,
    path: &str,
    body: &[u8],
) -> String {
    let body_hash = hex::encode(Sha256::digest(body));
    let payload = format!(
        "{service_name}\n{timestamp}\n{}\n{path}\n{body_hash}",
        method.to_uppercase()
    );

    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(payload.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

pub fn signatures_match(expected: &str, provided: &str) -> bool {
    let provided = provided.to_lowercase();
    let a = expected.as_bytes();
    let b = provided.as_bytes();
    a.len() == b.len() && a.ct_eq(b).unwrap_u8() == 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn config() -> Config {
        let mut c = Config::default();
        c.jwt.secret = "test-secret-test-secret-test-secret".into();
        c
    }

    #[test]
    fn native_token_roundtrip() {
        let c = config();
        let token = issue_token(&c, "u___12", Platform::Ios).unwrap();
        let identity = verify_token(&c, &token).unwrap();
        assert_eq!(identity.user_id, "u___12");
        assert_eq!(identity.platform, Platform::Ios);
    }

    #[test]
    fn garbage_token_is_invalid() {
        let c = config();
        assert_eq!(
            verify_token(&c, "not-a-token"),
            Err(AppError::token_invalid())
        );
    }

    #[test]
    fn external_token_gets_prefixed_and_web_platform() {
        let mut c = config();
        c.external_jwt.enabled = true;
        c.external_jwt.secret = "other-secret-other-secret-other".into();
        c.external_jwt.issuer = "external-system".into();
        c.external_jwt.id_prefix = "ext:".into();

        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs();
        #[derive(Serialize)]
        struct Ext<'a> {
            user_id: &'a str,
            iss: &'a str,
            exp: u64,
        }
        let token = encode(
            &Header::new(Algorithm::HS256),
            &Ext {
                user_id: "42",
                iss: "external-system",
                exp: now + 60,
            },
            &EncodingKey::from_secret(c.external_jwt.secret.as_bytes()),
        )
        .unwrap();

        let identity = verify_token(&c, &token).unwrap();
        assert_eq!(identity.user_id, "ext:42");
        assert_eq!(identity.platform, Platform::Web);
    }

    #[test]
    fn password_digest_verifies_and_rejects() {
        let salt = new_salt();
        let digest = password_digest(&salt, "hunter22");
        assert!(verify_password(&salt, "hunter22", &digest));
        assert!(!verify_password(&salt, "hunter23", &digest));
        assert!(!verify_password("othersalt", "hunter22", &digest));
    }

    #[test]
    fn internal_signature_is_stable_and_method_case_insensitive() {
        let a = sign_internal_request("s", "svc", "123", "post", "/internal/msg/send", b"{}");
        let b = sign_internal_request("s", "svc", "123", "POST", "/internal/msg/send", b"{}");
        assert_eq!(a, b);
        assert!(signatures_match(&a, &a.to_uppercase()));

        let c = sign_internal_request("s", "svc", "124", "POST", "/internal/msg/send", b"{}");
        assert_ne!(a, c);
    }
}
