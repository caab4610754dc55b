use axum::extract::{Query, State};
use axum::response::Response;
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use nexim_shared::errcode::AppError;

use crate::auth::AuthIdentity;
use crate::store::{groups, users};
use crate::web::response::{success, ApiError};
use crate::web::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateRequest {
    pub name: String,
    #[serde(default)]
    pub member_ids: Vec<String>,
}

pub async fn create(
    State(state): State<AppState>,
    Extension(identity): Extension<AuthIdentity>,
    Json(req): Json<CreateRequest>,
) -> Result<Response, ApiError> {
    if req.name.trim().is_empty() {
        return Err(AppError::invalid_param()
            .with_message("group name is required")
            .into());
    }

    let group_id = format!("g{}", Uuid::new_v4().simple());
    {
        let conn = state.store.conn();
        groups::create(&conn, &group_id, &req.name, &identity.user_id)
            .map_err(|_| AppError::internal())?;
        groups::add_member(&conn, &group_id, &identity.user_id)
            .map_err(|_| AppError::internal())?;
        for member in &req.member_ids {
            if member == &identity.user_id || !users::exists(&conn, member) {
                continue;
            }
            groups::add_member(&conn, &group_id, member).map_err(|_| AppError::internal())?;
        }
    }

    info!(group_id = %group_id, owner = %identity.user_id, "group created");
    Ok(success(json!({ "group_id": group_id })))
}

#[derive(Debug, Deserialize)]
pub struct MembershipRequest {
    pub group_id: String,
}

pub async fn join(
    State(state): State<AppState>,
    Extension(identity): Extension<AuthIdentity>,
    Json(req): Json<MembershipRequest>,
) -> Result<Response, ApiError> {
    {
        let conn = state.store.conn();
        if groups::get(&conn, &req.group_id).is_none() {
            return Err(AppError::not_found().with_message("group not found").into());
        }
        groups::add_member(&conn, &req.group_id, &identity.user_id)
            .map_err(|_| AppError::internal())?;
    }
    state.membership.invalidate(&req.group_id);
    Ok(success(json!(null)))
}

pub async fn quit(
    State(state): State<AppState>,
    Extension(identity): Extension<AuthIdentity>,
    Json(req): Json<MembershipRequest>,
) -> Result<Response, ApiError> {
    let removed = groups::remove_member(&state.store.conn(), &req.group_id, &identity.user_id)
        .map_err(|_| AppError::internal())?;
    if !removed {
        return Err(AppError::not_found().with_message("not a member").into());
    }
    state.membership.invalidate(&req.group_id);
    Ok(success(json!(null)))
}

#[derive(Debug, Deserialize)]
pub struct GroupQuery {
    pub group_id: String,
}

pub async fn info(
    State(state): State<AppState>,
    Query(query): Query<GroupQuery>,
) -> Result<Response, ApiError> {
    let group = groups::get(&state.store.conn(), &query.group_id)
        .ok_or_else(|| AppError::not_found().with_message("group not found"))?;
    Ok(success(json!({
        "group_id": group.group_id,
        "name": group.name,
        "owner_id": group.owner_id,
        "created_at": group.created_at,
    })))
}

pub async fn members(
    State(state): State<AppState>,
    Query(query): Query<GroupQuery>,
) -> Result<Response, ApiError> {
    let conn = state.store.conn();
    if groups::get(&conn, &query.group_id).is_none() {
        return Err(AppError::not_found().with_message("group not found").into());
    }
    let members = groups::members(&conn, &query.group_id);
    Ok(success(json!({
        "group_id": query.group_id,
        "members": members,
    })))
}
