//! Service-to-service request signing.
//!
//! Callers send `X-Service-Name`, `X-Timestamp`, and `X-Signature` where
//! the signature is
//! `hex(HMAC-SHA256(secret, "<svc>\n<ts>\n<METHOD>\n<path>\n<hex(sha256(body))>"))`.
//! Requests are rejected when internal auth is disabled, the service is not
//! allow-listed, or the timestamp skew exceeds the configured maximum. The
//! acting-as-user variant additionally reads `X-User-Id`/`X-Platform-Id`.

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::Response;

use nexim_shared::actor::{self, Actor};
use nexim_shared::errcode::AppError;
use nexim_shared::platform::Platform;

use crate::auth::{sign_internal_request, signatures_match, AuthIdentity};
use crate::config::Config;
use crate::web::response::error_response;
use crate::web::AppState;

const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Name of the verified calling service, readable via `Extension`.
#[derive(Debug, Clone)]
pub struct ServiceName(pub String);

pub async fn internal_auth(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, Response> {
    let (mut req, service) = verify(state, req).await.map_err(|e| error_response(&e))?;
    req.extensions_mut().insert(service);
    Ok(next.run(req).await)
}

/// Internal auth plus an acting user injected as [`AuthIdentity`].
pub async fn internal_auth_as_user(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, Response> {
    let (mut req, service) = verify(state, req).await.map_err(|e| error_response(&e))?;

    let user_id = header(&req, "X-User-Id");
    if user_id.is_empty() {
        return Err(error_response(&AppError::unauthorized()));
    }
    validate_acting_user(&user_id).map_err(|e| error_response(&e))?;

    let platform_header = header(&req, "X-Platform-Id");
    let platform = if platform_header.is_empty() {
        Platform::Web
    } else {
        platform_header
            .parse::<i32>()
            .ok()
            .and_then(Platform::from_id)
            .ok_or_else(|| error_response(&AppError::invalid_param()))?
    };

    req.extensions_mut().insert(service);
    req.extensions_mut().insert(AuthIdentity { user_id, platform });
    Ok(next.run(req).await)
}

async fn verify(state: AppState, req: Request) -> Result<(Request, ServiceName), AppError> {
    let config = state.config.load();

    let (parts, body) = req.into_parts();
    let bytes = axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|_| AppError::invalid_param().with_message("body too large"))?;

    let service = validate_signature(&config, &parts, &bytes)?;

    let req = Request::from_parts(parts, Body::from(bytes));
    Ok((req, ServiceName(service)))
}

fn validate_signature(config: &Config, parts: &Parts, body: &[u8]) -> Result<String, AppError> {
    let internal = &config.internal_auth;
    if !internal.enabled || internal.secret.trim().is_empty() {
        return Err(AppError::forbidden());
    }

    let service_name = parts_header(parts, "X-Service-Name");
    let timestamp = parts_header(parts, "X-Timestamp");
    let signature = parts_header(parts, "X-Signature");
    if service_name.is_empty() || timestamp.is_empty() || signature.is_empty() {
        return Err(AppError::unauthorized());
    }

    if !service_allowed(&service_name, &internal.allowed_services) {
        return Err(AppError::forbidden());
    }

    let ts: i64 = timestamp
        .parse()
        .map_err(|_| AppError::unauthorized())?;
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64;
    if (now - ts).abs() > internal.max_skew_secs {
        return Err(AppError::unauthorized().with_message("timestamp skew too large"));
    }

    let expected = sign_internal_request(
        &internal.secret,
        &service_name,
        &timestamp,
        parts.method.as_str(),
        parts.uri.path(),
        body,
    );
    if !signatures_match(&expected, &signature) {
        return Err(AppError::unauthorized());
    }

    Ok(service_name)
}

/// Services address users by actor id. A value that carries an actor prefix
/// but does not parse is a caller bug, rejected before it reaches storage.
fn validate_acting_user(user_id: &str) -> Result<(), AppError> {
    let looks_like_actor =
        user_id.starts_with(actor::USER_PREFIX) || user_id.starts_with(actor::AGENT_PREFIX);
    if looks_like_actor && Actor::parse(user_id).is_err() {
        return Err(AppError::invalid_param().with_message("malformed actor id"));
    }
    Ok(())
}

fn service_allowed(service_name: &str, allowed: &[String]) -> bool {
    if allowed.is_empty() {
        return true;
    }
    allowed
        .iter()
        .any(|s| s.trim().eq_ignore_ascii_case(service_name))
}

fn header(req: &Request, name: &str) -> String {
    req.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .unwrap_or("")
        .to_string()
}

fn parts_header(parts: &Parts, name: &str) -> String {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .unwrap_or("")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request as HttpRequest;

    fn config(secret: &str, allowed: Vec<String>) -> Config {
        let mut c = Config::default();
        c.internal_auth.enabled = true;
        c.internal_auth.secret = secret.to_string();
        c.internal_auth.allowed_services = allowed;
        c
    }

    fn parts_for(method: &str, path: &str, headers: &[(&str, String)]) -> Parts {
        let mut builder = HttpRequest::builder().method(method).uri(path);
        for (name, value) in headers {
            builder = builder.header(*name, value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    fn now_secs() -> i64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64
    }

    #[test]
    fn valid_signature_passes() {
        let config = config("secret", vec![]);
        let ts = now_secs().to_string();
        let body = br#"{"user_id":"u___1"}"#;
        let sig = sign_internal_request("secret", "billing", &ts, "POST", "/internal/msg/send", body);

        let parts = parts_for(
            "POST",
            "/internal/msg/send",
            &[
                ("X-Service-Name", "billing".to_string()),
                ("X-Timestamp", ts),
                ("X-Signature", sig),
            ],
        );
        assert_eq!(validate_signature(&config, &parts, body).unwrap(), "billing");
    }

    #[test]
    fn disabled_internal_auth_is_forbidden() {
        let mut config = config("secret", vec![]);
        config.internal_auth.enabled = false;
        let parts = parts_for("GET", "/internal/health", &[]);
        assert_eq!(
            validate_signature(&config, &parts, b"").unwrap_err().code,
            AppError::forbidden().code
        );
    }

    #[test]
    fn unlisted_service_is_forbidden() {
        let config = config("secret", vec!["billing".to_string()]);
        let ts = now_secs().to_string();
        let sig = sign_internal_request("secret", "intruder", &ts, "GET", "/internal/health", b"");
        let parts = parts_for(
            "GET",
            "/internal/health",
            &[
                ("X-Service-Name", "intruder".to_string()),
                ("X-Timestamp", ts),
                ("X-Signature", sig),
            ],
        );
        assert_eq!(
            validate_signature(&config, &parts, b"").unwrap_err().code,
            AppError::forbidden().code
        );
    }

    #[test]
    fn stale_timestamp_is_rejected() {
        let config = config("secret", vec![]);
        let ts = (now_secs() - 10_000).to_string();
        let sig = sign_internal_request("secret", "billing", &ts, "GET", "/internal/health", b"");
        let parts = parts_for(
            "GET",
            "/internal/health",
            &[
                ("X-Service-Name", "billing".to_string()),
                ("X-Timestamp", ts),
                ("X-Signature", sig),
            ],
        );
        assert_eq!(
            validate_signature(&config, &parts, b"").unwrap_err().code,
            AppError::unauthorized().code
        );
    }

    #[test]
    fn acting_user_actor_ids_must_parse() {
        assert!(validate_acting_user("u___12").is_ok());
        assert!(validate_acting_user("ag__34").is_ok());
        // Non-actor ids pass through untouched.
        assert!(validate_acting_user("legacy-user-7").is_ok());
        assert!(validate_acting_user("u___x").is_err());
        assert!(validate_acting_user("ag__").is_err());
    }

    #[test]
    fn tampered_body_fails_the_signature() {
        let config = config("secret", vec![]);
        let ts = now_secs().to_string();
        let sig =
            sign_internal_request("secret", "billing", &ts, "POST", "/internal/msg/send", b"{}");
        let parts = parts_for(
            "POST",
            "/internal/msg/send",
            &[
                ("X-Service-Name", "billing".to_string()),
                ("X-Timestamp", ts),
                ("X-Signature", sig),
            ],
        );
        assert_eq!(
            validate_signature(&config, &parts, br#"{"evil":true}"#)
                .unwrap_err()
                .code,
            AppError::unauthorized().code
        );
    }
}
