use axum::extract::{Query, State};
use axum::response::Response;
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::json;

use nexim_shared::errcode::AppError;

use crate::auth::AuthIdentity;
use crate::convo::{ListCursor, MAX_LIST_LIMIT};
use crate::web::response::{success, ApiError};
use crate::web::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    #[serde(default)]
    pub with_last_message: Option<bool>,
    #[serde(default)]
    pub limit: i64,
    #[serde(default)]
    pub cursor_updated_at: i64,
    #[serde(default)]
    pub cursor_conversation_id: String,
}

fn list_impl(
    state: &AppState,
    identity: &AuthIdentity,
    params: ListParams,
) -> Result<Response, ApiError> {
    if params.limit < 0 || params.limit > MAX_LIST_LIMIT {
        return Err(AppError::invalid_param()
            .with_message("limit out of range")
            .into());
    }
    // Cursor fields travel together.
    if params.cursor_updated_at > 0 && params.cursor_conversation_id.is_empty() {
        return Err(AppError::invalid_param().with_message("bad cursor").into());
    }
    if !params.cursor_conversation_id.is_empty() && params.cursor_updated_at <= 0 {
        return Err(AppError::invalid_param().with_message("bad cursor").into());
    }

    let cursor = (params.cursor_updated_at > 0).then(|| ListCursor {
        updated_at: params.cursor_updated_at,
        conversation_id: params.cursor_conversation_id.clone(),
    });

    let page = state.convo.list_page(
        &identity.user_id,
        params.with_last_message.unwrap_or(false),
        params.limit,
        cursor.as_ref(),
    )?;
    Ok(success(page))
}

pub async fn list_get(
    State(state): State<AppState>,
    Extension(identity): Extension<AuthIdentity>,
    Query(params): Query<ListParams>,
) -> Result<Response, ApiError> {
    list_impl(&state, &identity, params)
}

pub async fn list_post(
    State(state): State<AppState>,
    Extension(identity): Extension<AuthIdentity>,
    Json(params): Json<ListParams>,
) -> Result<Response, ApiError> {
    list_impl(&state, &identity, params)
}

#[derive(Debug, Default, Deserialize)]
pub struct AllParams {
    #[serde(default)]
    pub with_last_message: Option<bool>,
}

fn all_impl(
    state: &AppState,
    identity: &AuthIdentity,
    params: AllParams,
) -> Result<Response, ApiError> {
    let list = state.convo.all(
        &identity.user_id,
        params.with_last_message.unwrap_or(false),
    )?;
    Ok(success(list))
}

pub async fn all_get(
    State(state): State<AppState>,
    Extension(identity): Extension<AuthIdentity>,
    Query(params): Query<AllParams>,
) -> Result<Response, ApiError> {
    all_impl(&state, &identity, params)
}

pub async fn all_post(
    State(state): State<AppState>,
    Extension(identity): Extension<AuthIdentity>,
    Json(params): Json<AllParams>,
) -> Result<Response, ApiError> {
    all_impl(&state, &identity, params)
}

#[derive(Debug, Deserialize)]
pub struct ConversationQuery {
    pub conversation_id: String,
}

pub async fn info(
    State(state): State<AppState>,
    Extension(identity): Extension<AuthIdentity>,
    Query(query): Query<ConversationQuery>,
) -> Result<Response, ApiError> {
    let conv = state.convo.get(&identity.user_id, &query.conversation_id)?;
    Ok(success(conv))
}

#[derive(Debug, Deserialize)]
pub struct UpdateRequest {
    #[serde(default)]
    pub recv_msg_opt: Option<i32>,
    #[serde(default)]
    pub is_pinned: Option<bool>,
}

pub async fn update(
    State(state): State<AppState>,
    Extension(identity): Extension<AuthIdentity>,
    Query(query): Query<ConversationQuery>,
    Json(req): Json<UpdateRequest>,
) -> Result<Response, ApiError> {
    state.convo.update(
        &identity.user_id,
        &query.conversation_id,
        req.recv_msg_opt,
        req.is_pinned,
    )?;
    Ok(success(json!(null)))
}

#[derive(Debug, Deserialize)]
pub struct MarkReadRequest {
    pub conversation_id: String,
    pub read_seq: i64,
}

pub async fn mark_read(
    State(state): State<AppState>,
    Extension(identity): Extension<AuthIdentity>,
    Json(req): Json<MarkReadRequest>,
) -> Result<Response, ApiError> {
    let read_seq = state
        .convo
        .mark_read(&identity.user_id, &req.conversation_id, req.read_seq)?;
    Ok(success(json!({ "read_seq": read_seq })))
}

pub async fn max_read_seq(
    State(state): State<AppState>,
    Extension(identity): Extension<AuthIdentity>,
    Query(query): Query<ConversationQuery>,
) -> Result<Response, ApiError> {
    let (max_seq, read_seq, unread_count) =
        state.convo.unread(&identity.user_id, &query.conversation_id)?;
    Ok(success(json!({
        "max_seq": max_seq,
        "read_seq": read_seq,
        "unread_count": unread_count,
    })))
}

#[derive(Debug, Deserialize)]
pub struct UnreadCountQuery {
    pub conversation_id: String,
    #[serde(default)]
    pub read_seq: i64,
}

pub async fn unread_count(
    State(state): State<AppState>,
    Extension(identity): Extension<AuthIdentity>,
    Query(query): Query<UnreadCountQuery>,
) -> Result<Response, ApiError> {
    let (max_seq, current_read_seq, _) =
        state.convo.unread(&identity.user_id, &query.conversation_id)?;
    // A caller-supplied read_seq overrides the stored position.
    let read_seq = if query.read_seq > 0 {
        query.read_seq
    } else {
        current_read_seq
    };
    Ok(success(json!({
        "unread_count": (max_seq - read_seq).max(0),
    })))
}
