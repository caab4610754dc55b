use axum::extract::{Query, State};
use axum::response::Response;
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::json;

use nexim_shared::proto::{GetMaxSeqData, PullMessagesData, SendMsgData};

use crate::auth::AuthIdentity;
use crate::delivery::ReqContext;
use crate::web::middleware::trace::TraceId;
use crate::web::response::{success, ApiError};
use crate::web::AppState;

fn ctx(identity: &AuthIdentity, trace: &TraceId) -> ReqContext {
    ReqContext {
        user_id: identity.user_id.clone(),
        platform: identity.platform,
        operation_id: trace.0.clone(),
    }
}

pub async fn send(
    State(state): State<AppState>,
    Extension(identity): Extension<AuthIdentity>,
    Extension(trace): Extension<TraceId>,
    Json(req): Json<SendMsgData>,
) -> Result<Response, ApiError> {
    let resp = state
        .pipeline
        .send_message(&ctx(&identity, &trace), req)
        .await?;
    Ok(success(resp))
}

#[derive(Debug, Deserialize)]
pub struct PullQuery {
    pub conversation_id: String,
    #[serde(default)]
    pub begin_seq: i64,
    #[serde(default)]
    pub end_seq: i64,
    #[serde(default)]
    pub limit: i64,
}

pub async fn pull(
    State(state): State<AppState>,
    Extension(identity): Extension<AuthIdentity>,
    Extension(trace): Extension<TraceId>,
    Query(query): Query<PullQuery>,
) -> Result<Response, ApiError> {
    let resp = state
        .pipeline
        .pull_messages(
            &ctx(&identity, &trace),
            PullMessagesData {
                conversation_id: query.conversation_id,
                begin_seq: query.begin_seq,
                end_seq: query.end_seq,
                limit: query.limit,
            },
        )
        .await?;
    Ok(success(resp))
}

#[derive(Debug, Deserialize)]
pub struct MaxSeqQuery {
    pub conversation_id: String,
}

pub async fn max_seq(
    State(state): State<AppState>,
    Extension(identity): Extension<AuthIdentity>,
    Extension(trace): Extension<TraceId>,
    Query(query): Query<MaxSeqQuery>,
) -> Result<Response, ApiError> {
    let resp = state
        .pipeline
        .get_max_seq(
            &ctx(&identity, &trace),
            GetMaxSeqData {
                conversation_id: query.conversation_id,
            },
        )
        .await?;
    Ok(success(resp))
}

#[derive(Debug, Deserialize)]
pub struct RecallRequest {
    pub conversation_id: String,
    pub seq: i64,
}

pub async fn recall(
    State(state): State<AppState>,
    Extension(identity): Extension<AuthIdentity>,
    Extension(trace): Extension<TraceId>,
    Json(req): Json<RecallRequest>,
) -> Result<Response, ApiError> {
    state
        .pipeline
        .recall_message(&ctx(&identity, &trace), &req.conversation_id, req.seq)
        .await?;
    Ok(success(json!(null)))
}
