//! Bearer-token middleware. `Authorization: Bearer <t>` is preferred;
//! `X-Token` stays as a fallback for callers that cannot set it.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;

use nexim_shared::errcode::AppError;

use crate::auth;
use crate::web::response::error_response;
use crate::web::AppState;

pub async fn jwt_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, Response> {
    let token = extract_token(&req).map_err(|e| error_response(&e))?;

    let config = state.config.load();
    let identity = auth::verify_token(&config, &token).map_err(|e| error_response(&e))?;

    req.extensions_mut().insert(identity);
    Ok(next.run(req).await)
}

fn extract_token(req: &Request) -> Result<String, AppError> {
    let auth_header = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .unwrap_or("");

    if !auth_header.is_empty() {
        if let Some(token) = auth_header.strip_prefix("Bearer ") {
            let token = token.trim();
            if token.is_empty() {
                return Err(AppError::token_missing());
            }
            return Ok(token.to_string());
        }
        // Malformed Authorization still allows X-Token for compatibility.
        if let Some(token) = x_token(req) {
            return Ok(token);
        }
        return Err(AppError::token_invalid());
    }

    x_token(req).ok_or_else(AppError::token_missing)
}

fn x_token(req: &Request) -> Option<String> {
    let token = req
        .headers()
        .get("X-Token")?
        .to_str()
        .ok()?
        .trim()
        .to_string();
    (!token.is_empty()).then_some(token)
}
