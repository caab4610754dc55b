use axum::extract::{Path, State};
use axum::response::Response;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use serde_json::json;

use nexim_shared::errcode::AppError;

use crate::auth::AuthIdentity;
use crate::store::users;
use crate::web::response::{success, ApiError};
use crate::web::AppState;

const MAX_BATCH: usize = 100;

#[derive(Debug, Serialize)]
pub struct UserInfo {
    pub user_id: String,
    pub nickname: String,
    pub avatar_url: String,
    pub created_at: i64,
}

impl From<users::UserRow> for UserInfo {
    fn from(row: users::UserRow) -> Self {
        Self {
            user_id: row.user_id,
            nickname: row.nickname,
            avatar_url: row.avatar_url,
            created_at: row.created_at,
        }
    }
}

pub async fn info(
    State(state): State<AppState>,
    Extension(identity): Extension<AuthIdentity>,
) -> Result<Response, ApiError> {
    let user = users::get(&state.store.conn(), &identity.user_id)
        .ok_or_else(AppError::not_found)?;
    Ok(success(UserInfo::from(user)))
}

pub async fn profile(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Response, ApiError> {
    let user = users::get(&state.store.conn(), &user_id).ok_or_else(AppError::not_found)?;
    Ok(success(UserInfo::from(user)))
}

#[derive(Debug, Deserialize)]
pub struct UpdateRequest {
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

pub async fn update(
    State(state): State<AppState>,
    Extension(identity): Extension<AuthIdentity>,
    Json(req): Json<UpdateRequest>,
) -> Result<Response, ApiError> {
    users::update_profile(
        &state.store.conn(),
        &identity.user_id,
        req.nickname.as_deref(),
        req.avatar_url.as_deref(),
    )
    .map_err(|_| AppError::internal())?;
    Ok(success(json!(null)))
}

#[derive(Debug, Deserialize)]
pub struct BatchInfoRequest {
    pub user_ids: Vec<String>,
}

pub async fn batch_info(
    State(state): State<AppState>,
    Json(req): Json<BatchInfoRequest>,
) -> Result<Response, ApiError> {
    if req.user_ids.len() > MAX_BATCH {
        return Err(AppError::invalid_param()
            .with_message("too many user ids")
            .into());
    }
    let users: Vec<UserInfo> = users::batch_get(&state.store.conn(), &req.user_ids)
        .into_iter()
        .map(UserInfo::from)
        .collect();
    Ok(success(users))
}

#[derive(Debug, Deserialize)]
pub struct OnlineStatusRequest {
    pub user_ids: Vec<String>,
}

pub async fn online_status(
    State(state): State<AppState>,
    Json(req): Json<OnlineStatusRequest>,
) -> Result<Response, ApiError> {
    if req.user_ids.len() > MAX_BATCH {
        return Err(AppError::invalid_param()
            .with_message("too many user ids")
            .into());
    }

    let mut statuses = Vec::with_capacity(req.user_ids.len());
    for user_id in &req.user_ids {
        let platforms = state.table.online_platforms(user_id).await;
        statuses.push(json!({
            "user_id": user_id,
            "online": !platforms.is_empty(),
            "platform_ids": platforms,
        }));
    }
    Ok(success(statuses))
}
