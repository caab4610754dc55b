use axum::extract::State;
use axum::response::Response;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use nexim_shared::errcode::AppError;
use nexim_shared::platform::Platform;

use crate::auth;
use crate::store::users;
use crate::web::response::{success, ApiError};
use crate::web::AppState;

const MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub user_id: String,
    #[serde(default)]
    pub nickname: String,
    pub password: String,
    #[serde(default)]
    pub avatar_url: String,
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<Response, ApiError> {
    if req.user_id.trim().is_empty() {
        return Err(AppError::invalid_param()
            .with_message("user_id is required")
            .into());
    }
    if req.password.len() < MIN_PASSWORD_LEN {
        return Err(AppError::invalid_param()
            .with_message("password too short")
            .into());
    }

    let salt = auth::new_salt();
    let digest = auth::password_digest(&salt, &req.password);
    let created = users::create(
        &state.store.conn(),
        &req.user_id,
        &req.nickname,
        &req.avatar_url,
        &salt,
        &digest,
    )
    .map_err(|_| AppError::internal())?;

    if !created {
        return Err(AppError::conflict()
            .with_message("user id already registered")
            .into());
    }

    info!(user_id = %req.user_id, "user registered");
    Ok(success(json!({ "user_id": req.user_id })))
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub user_id: String,
    pub password: String,
    #[serde(default = "default_platform_id")]
    pub platform_id: i32,
}

fn default_platform_id() -> i32 {
    Platform::Web.id()
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Response, ApiError> {
    let platform = Platform::from_id(req.platform_id)
        .ok_or_else(|| AppError::invalid_param().with_message("unknown platform_id"))?;

    let user = users::get(&state.store.conn(), &req.user_id)
        .ok_or_else(|| AppError::unauthorized().with_message("bad credentials"))?;
    if !auth::verify_password(&user.salt, &req.password, &user.password_digest) {
        return Err(AppError::unauthorized()
            .with_message("bad credentials")
            .into());
    }

    let config = state.config.load();
    let token = auth::issue_token(&config, &user.user_id, platform)?;

    Ok(success(json!({
        "token": token,
        "user_id": user.user_id,
        "platform_id": platform.id(),
    })))
}
