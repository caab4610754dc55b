//! The delivery pipeline: receive → authorize → allocate → persist →
//! update conversations → respond → fan out.

pub mod bus;
pub mod membership;
pub mod registry;

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{error, warn};
use uuid::Uuid;

use nexim_shared::conv;
use nexim_shared::errcode::{AppError, AppResult};
use nexim_shared::platform::Platform;
use nexim_shared::proto::{
    GetMaxSeqData, GetMaxSeqResp, MarkReadData, MarkReadResp, MessageItem, PullMessagesData,
    PullMessagesResp, SendMsgData, SendMsgResp, WsRequest, WsResponse, MSG_STATUS_RECALLED,
    SESSION_TYPE_GROUP, SESSION_TYPE_SINGLE, WS_GET_MAX_SEQ, WS_HEARTBEAT, WS_MARK_READ,
    WS_PULL_MESSAGES, WS_PUSH_MSG, WS_SEND_MSG,
};

use crate::convo::{ConversationEngine, Counterpart};
use crate::seq::SeqAllocator;
use crate::store::{self, Store};

use bus::DeliveryBus;
use membership::MembershipCache;
use registry::{OpcodeRegistry, OpHandler};

/// Capability for injecting frames into a recipient's live sessions. The
/// gateway implements it; the pipeline never sees the session table.
pub trait Pusher: Send + Sync {
    fn push(&self, user_id: &str, frame: String);
}

/// Identity and trace context of one inbound request.
#[derive(Debug, Clone)]
pub struct ReqContext {
    pub user_id: String,
    pub platform: Platform,
    pub operation_id: String,
}

pub struct Pipeline {
    store: Arc<Store>,
    allocator: Arc<SeqAllocator>,
    convo: Arc<ConversationEngine>,
    pusher: Arc<dyn Pusher>,
    bus: Arc<DeliveryBus>,
    membership: Arc<MembershipCache>,
    registry: OpcodeRegistry,
    pull_default: i64,
    pull_max: i64,
}

pub fn message_item(m: &store::messages::StoredMessage) -> MessageItem {
    MessageItem {
        server_msg_id: m.rowid,
        conversation_id: m.conversation_id.clone(),
        seq: m.seq,
        client_msg_id: m.client_msg_id.clone(),
        send_id: m.send_id.clone(),
        session_type: m.session_type,
        msg_type: m.msg_type,
        content: m.content.clone(),
        send_at: m.send_at,
        status: m.status,
    }
}

impl Pipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<Store>,
        allocator: Arc<SeqAllocator>,
        convo: Arc<ConversationEngine>,
        pusher: Arc<dyn Pusher>,
        bus: Arc<DeliveryBus>,
        membership: Arc<MembershipCache>,
        pull_default: i64,
        pull_max: i64,
    ) -> Self {
        Self {
            store,
            allocator,
            convo,
            pusher,
            bus,
            membership,
            registry: build_registry(),
            pull_default,
            pull_max,
        }
    }

    pub fn registered_ops(&self) -> Vec<i32> {
        self.registry.ops()
    }

    /// Decode one inbound frame, dispatch it, and encode the response.
    /// Always produces a response envelope; protocol errors echo
    /// `req_identifier` and `msg_incr`.
    pub async fn handle_frame(self: &Arc<Self>, identity: &ReqContext, raw: &str) -> String {
        let req: WsRequest = match serde_json::from_str(raw) {
            Ok(r) => r,
            Err(_) => {
                let synthetic = WsRequest {
                    req_identifier: 0,
                    msg_incr: String::new(),
                    operation_id: identity.operation_id.clone(),
                    send_id: String::new(),
                    data: Value::Null,
                };
                return encode(&WsResponse::error(&synthetic, &AppError::invalid_protocol()));
            }
        };

        let resp = self.dispatch(identity, &req).await;
        encode(&resp)
    }

    async fn dispatch(self: &Arc<Self>, identity: &ReqContext, req: &WsRequest) -> WsResponse {
        // The envelope's send_id must be the session's bound user.
        if !req.send_id.is_empty() && req.send_id != identity.user_id {
            return WsResponse::error(req, &AppError::unauthorized());
        }

        let handler = match self.registry.get(req.req_identifier) {
            Some(h) => h,
            None => {
                warn!(
                    req_identifier = req.req_identifier,
                    user_id = %identity.user_id,
                    "unknown opcode"
                );
                return WsResponse::error(req, &AppError::invalid_protocol());
            }
        };

        let ctx = ReqContext {
            user_id: identity.user_id.clone(),
            platform: identity.platform,
            operation_id: if req.operation_id.is_empty() {
                Uuid::new_v4().simple().to_string()
            } else {
                req.operation_id.clone()
            },
        };

        match (handler.as_ref())(self.clone(), ctx, req.data.clone()).await {
            Ok(data) => WsResponse::ok(req, data),
            Err(err) => WsResponse::error(req, &err),
        }
    }

    /// The authoritative send ordering: authorize, dedupe, allocate,
    /// persist, touch, fan out. The seq is abandoned when persistence
    /// fails; conversation updates happen only after a successful persist.
    pub async fn send_message(&self, ctx: &ReqContext, req: SendMsgData) -> AppResult<SendMsgResp> {
        if req.client_msg_id.is_empty() {
            return Err(AppError::invalid_param().with_message("client_msg_id is required"));
        }

        let (conversation_id, participants) = self.authorize_send(ctx, &req)?;

        // Retried send: hand back the original result.
        if let Some(existing) = store::messages::get_by_client_msg_id(
            &self.store.conn(),
            &conversation_id,
            &req.client_msg_id,
        ) {
            return duplicate_response(&existing, ctx, &req);
        }

        let (seq, _) = self.allocator.allocate(&conversation_id, 1)?;
        let send_at = store::now_millis();

        let stored = {
            let conn = self.store.conn();
            store::messages::put(
                &conn,
                &store::messages::NewMessage {
                    conversation_id: &conversation_id,
                    seq,
                    client_msg_id: &req.client_msg_id,
                    send_id: &ctx.user_id,
                    session_type: req.session_type,
                    msg_type: req.msg_type,
                    content: &req.content,
                    send_at,
                },
            )
            .map_err(|e| {
                // The allocated seq is abandoned, never reused.
                error!(
                    conversation_id = %conversation_id,
                    seq,
                    error = %e,
                    "message persist failed"
                );
                AppError::internal()
            })?
        };
        if stored.seq != seq {
            // A concurrent retry persisted first; its row is canonical.
            return duplicate_response(&stored, ctx, &req);
        }

        self.touch_participants(ctx, &req, &conversation_id, &participants, send_at);

        // Fan out after the sender's response data is final. Failures are
        // logged downstream and never surfaced to the sender.
        let frame = encode(&WsResponse::push(
            WS_PUSH_MSG,
            ctx.operation_id.clone(),
            serde_json::to_value(message_item(&stored)).unwrap_or(Value::Null),
        ));
        for user_id in &participants {
            self.pusher.push(user_id, frame.clone());
            self.bus.publish(user_id, &frame);
        }

        Ok(SendMsgResp {
            server_msg_id: stored.rowid,
            conversation_id,
            seq: stored.seq,
            client_msg_id: stored.client_msg_id,
            send_at: stored.send_at,
        })
    }

    fn authorize_send(
        &self,
        ctx: &ReqContext,
        req: &SendMsgData,
    ) -> AppResult<(String, Vec<String>)> {
        match req.session_type {
            SESSION_TYPE_SINGLE => {
                let recv_id = req
                    .recv_id
                    .as_deref()
                    .filter(|r| !r.is_empty())
                    .ok_or_else(|| {
                        AppError::invalid_param().with_message("recv_id is required")
                    })?;
                if recv_id == ctx.user_id {
                    return Err(
                        AppError::invalid_param().with_message("cannot send to yourself")
                    );
                }
                if !store::users::exists(&self.store.conn(), recv_id) {
                    return Err(AppError::not_found().with_message("recipient not found"));
                }
                Ok((
                    conv::single_chat_id(&ctx.user_id, recv_id),
                    vec![ctx.user_id.clone(), recv_id.to_string()],
                ))
            }
            SESSION_TYPE_GROUP => {
                let group_id = req
                    .group_id
                    .as_deref()
                    .filter(|g| !g.is_empty())
                    .ok_or_else(|| {
                        AppError::invalid_param().with_message("group_id is required")
                    })?;
                let members = self.membership.members(group_id)?;
                if !members.contains(&ctx.user_id) {
                    return Err(AppError::unauthorized().with_message("not a group member"));
                }
                let mut participants: Vec<String> = members.iter().cloned().collect();
                participants.sort();
                Ok((conv::group_chat_id(group_id), participants))
            }
            _ => Err(AppError::invalid_param().with_message("unknown session_type")),
        }
    }

    /// Conversation updates after a durable write. A failed touch is logged
    /// and skipped; the row heals on the next successful touch.
    fn touch_participants(
        &self,
        ctx: &ReqContext,
        req: &SendMsgData,
        conversation_id: &str,
        participants: &[String],
        send_at: i64,
    ) {
        for owner in participants {
            let counterpart = match req.session_type {
                SESSION_TYPE_GROUP => Counterpart::Group {
                    group_id: req.group_id.as_deref().unwrap_or_default(),
                },
                _ => {
                    let peer = if owner == &ctx.user_id {
                        req.recv_id.as_deref().unwrap_or_default()
                    } else {
                        &ctx.user_id
                    };
                    Counterpart::Single { peer }
                }
            };

            if let Err(e) = self
                .convo
                .ensure(owner, counterpart)
                .and_then(|_| self.convo.touch(owner, conversation_id, send_at))
            {
                error!(
                    owner = %owner,
                    conversation_id = %conversation_id,
                    error = %e,
                    "conversation touch failed after persist"
                );
            }
        }
    }

    pub async fn pull_messages(
        &self,
        ctx: &ReqContext,
        req: PullMessagesData,
    ) -> AppResult<PullMessagesResp> {
        if req.conversation_id.is_empty() {
            return Err(AppError::invalid_param().with_message("conversation_id is required"));
        }
        if req.begin_seq < 0 || req.end_seq < req.begin_seq {
            return Err(AppError::invalid_param().with_message("bad seq range"));
        }
        if !self.convo.is_participant(&ctx.user_id, &req.conversation_id) {
            return Err(AppError::unauthorized().with_message("not a participant"));
        }

        let limit = if req.limit <= 0 {
            self.pull_default
        } else {
            req.limit.min(self.pull_max)
        };

        let messages = store::messages::get_range(
            &self.store.conn(),
            &req.conversation_id,
            req.begin_seq,
            req.end_seq,
            limit,
        );

        Ok(PullMessagesResp {
            conversation_id: req.conversation_id,
            messages: messages.iter().map(message_item).collect(),
        })
    }

    pub async fn get_max_seq(
        &self,
        ctx: &ReqContext,
        req: GetMaxSeqData,
    ) -> AppResult<GetMaxSeqResp> {
        if req.conversation_id.is_empty() {
            return Err(AppError::invalid_param().with_message("conversation_id is required"));
        }
        let max_seq = self.allocator.max(&req.conversation_id)?;
        let read_seq =
            store::seq::get_read_seq(&self.store.conn(), &ctx.user_id, &req.conversation_id);
        Ok(GetMaxSeqResp {
            conversation_id: req.conversation_id,
            max_seq,
            read_seq,
        })
    }

    pub async fn mark_read(&self, ctx: &ReqContext, req: MarkReadData) -> AppResult<MarkReadResp> {
        if req.conversation_id.is_empty() {
            return Err(AppError::invalid_param().with_message("conversation_id is required"));
        }
        let read_seq = self
            .convo
            .mark_read(&ctx.user_id, &req.conversation_id, req.read_seq)?;
        Ok(MarkReadResp {
            conversation_id: req.conversation_id,
            read_seq,
        })
    }

    /// Best-effort recall: flags the row, no content rewrite.
    pub async fn recall_message(
        &self,
        ctx: &ReqContext,
        conversation_id: &str,
        seq: i64,
    ) -> AppResult<()> {
        let conn = self.store.conn();
        let rows = store::messages::get_range(&conn, conversation_id, seq, seq, 1);
        let msg = rows.first().ok_or_else(AppError::not_found)?;
        if msg.send_id != ctx.user_id {
            return Err(AppError::unauthorized().with_message("only the sender can recall"));
        }
        store::messages::set_status(&conn, conversation_id, seq, MSG_STATUS_RECALLED);
        Ok(())
    }
}

/// Idempotent-retry response, with a conflict when the retry's fields do
/// not match the stored row.
fn duplicate_response(
    existing: &store::messages::StoredMessage,
    ctx: &ReqContext,
    req: &SendMsgData,
) -> AppResult<SendMsgResp> {
    if existing.send_id != ctx.user_id
        || existing.session_type != req.session_type
        || existing.msg_type != req.msg_type
    {
        return Err(AppError::conflict().with_message("client_msg_id reused with different fields"));
    }
    Ok(SendMsgResp {
        server_msg_id: existing.rowid,
        conversation_id: existing.conversation_id.clone(),
        seq: existing.seq,
        client_msg_id: existing.client_msg_id.clone(),
        send_at: existing.send_at,
    })
}

fn encode(resp: &WsResponse) -> String {
    serde_json::to_string(resp).unwrap_or_else(|_| {
        r#"{"req_identifier":0,"msg_incr":"","operation_id":"","err_code":500001,"err_msg":"internal server error","data":null}"#.to_string()
    })
}

fn build_registry() -> OpcodeRegistry {
    let mut registry = OpcodeRegistry::new();

    registry.register(
        WS_SEND_MSG,
        handler(|p, ctx, data| async move {
            let req: SendMsgData = decode_data(data)?;
            to_value(p.send_message(&ctx, req).await?)
        }),
    );
    registry.register(
        WS_PULL_MESSAGES,
        handler(|p, ctx, data| async move {
            let req: PullMessagesData = decode_data(data)?;
            to_value(p.pull_messages(&ctx, req).await?)
        }),
    );
    registry.register(
        WS_GET_MAX_SEQ,
        handler(|p, ctx, data| async move {
            let req: GetMaxSeqData = decode_data(data)?;
            to_value(p.get_max_seq(&ctx, req).await?)
        }),
    );
    registry.register(
        WS_MARK_READ,
        handler(|p, ctx, data| async move {
            let req: MarkReadData = decode_data(data)?;
            to_value(p.mark_read(&ctx, req).await?)
        }),
    );
    registry.register(
        WS_HEARTBEAT,
        handler(|_, _, _| async move { Ok(json!({ "server_time": store::now_millis() })) }),
    );

    registry
}

fn handler<F, Fut>(f: F) -> OpHandler
where
    F: Fn(Arc<Pipeline>, ReqContext, Value) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<Value, AppError>> + Send + 'static,
{
    Arc::new(move |p, ctx, data| Box::pin(f(p, ctx, data)) as registry::HandlerFuture)
}

fn decode_data<T: serde::de::DeserializeOwned>(data: Value) -> Result<T, AppError> {
    serde_json::from_value(data)
        .map_err(|e| AppError::invalid_param().with_message(format!("bad request data: {e}")))
}

fn to_value<T: serde::Serialize>(value: T) -> Result<Value, AppError> {
    serde_json::to_value(value).map_err(|_| AppError::internal())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seq::MemorySeqCache;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::time::Duration;

    struct RecordingPusher {
        pushed: Mutex<Vec<(String, String)>>,
    }

    impl RecordingPusher {
        fn new() -> Self {
            Self {
                pushed: Mutex::new(Vec::new()),
            }
        }

        fn recipients(&self) -> HashSet<String> {
            self.pushed
                .lock()
                .unwrap()
                .iter()
                .map(|(u, _)| u.clone())
                .collect()
        }
    }

    impl Pusher for RecordingPusher {
        fn push(&self, user_id: &str, frame: String) {
            self.pushed
                .lock()
                .unwrap()
                .push((user_id.to_string(), frame));
        }
    }

    fn pipeline() -> (Arc<Pipeline>, Arc<RecordingPusher>, Arc<Store>) {
        let store = Arc::new(Store::new_in_memory().unwrap());
        {
            let conn = store.conn();
            for id in ["u___1", "u___2", "u___3"] {
                store::users::create(&conn, id, id, "", "s", "d").unwrap();
            }
            store::groups::create(&conn, "g1", "team", "u___1").unwrap();
            store::groups::add_member(&conn, "g1", "u___1").unwrap();
            store::groups::add_member(&conn, "g1", "u___2").unwrap();
        }
        let allocator = Arc::new(SeqAllocator::new(
            Arc::new(MemorySeqCache::new()),
            store.clone(),
        ));
        let convo = Arc::new(ConversationEngine::new(store.clone(), allocator.clone()));
        let pusher = Arc::new(RecordingPusher::new());
        let membership = Arc::new(MembershipCache::new(store.clone(), Duration::from_secs(30)));
        let pipeline = Arc::new(Pipeline::new(
            store.clone(),
            allocator,
            convo,
            pusher.clone(),
            Arc::new(DeliveryBus::new()),
            membership,
            20,
            200,
        ));
        (pipeline, pusher, store)
    }

    fn ctx(user: &str) -> ReqContext {
        ReqContext {
            user_id: user.to_string(),
            platform: Platform::Web,
            operation_id: "op-test".to_string(),
        }
    }

    fn text_send(client_msg_id: &str, recv: &str) -> SendMsgData {
        SendMsgData {
            client_msg_id: client_msg_id.to_string(),
            recv_id: Some(recv.to_string()),
            group_id: None,
            session_type: SESSION_TYPE_SINGLE,
            msg_type: 101,
            content: json!({"text": "hello"}),
        }
    }

    #[tokio::test]
    async fn send_then_pull_single_chat() {
        let (pipeline, pusher, _store) = pipeline();

        let resp = pipeline
            .send_message(&ctx("u___1"), text_send("m1", "u___2"))
            .await
            .unwrap();
        assert_eq!(resp.seq, 1);
        assert_eq!(resp.conversation_id, conv::single_chat_id("u___1", "u___2"));

        // Receiver pulls the authoritative row.
        let pulled = pipeline
            .pull_messages(
                &ctx("u___2"),
                PullMessagesData {
                    conversation_id: resp.conversation_id.clone(),
                    begin_seq: 1,
                    end_seq: 1,
                    limit: 10,
                },
            )
            .await
            .unwrap();
        assert_eq!(pulled.messages.len(), 1);
        assert_eq!(pulled.messages[0].content["text"], "hello");

        // Both participants were fanned out to.
        let recipients = pusher.recipients();
        assert!(recipients.contains("u___1"));
        assert!(recipients.contains("u___2"));
    }

    #[tokio::test]
    async fn resend_with_same_client_msg_id_is_idempotent() {
        let (pipeline, _pusher, store) = pipeline();

        let first = pipeline
            .send_message(&ctx("u___1"), text_send("m1", "u___2"))
            .await
            .unwrap();
        let second = pipeline
            .send_message(&ctx("u___1"), text_send("m1", "u___2"))
            .await
            .unwrap();

        assert_eq!(first.seq, second.seq);
        assert_eq!(first.server_msg_id, second.server_msg_id);
        assert_eq!(
            store::messages::get_range(&store.conn(), &first.conversation_id, 1, 10, 10).len(),
            1
        );
    }

    #[tokio::test]
    async fn reused_client_msg_id_with_different_fields_conflicts() {
        let (pipeline, _pusher, _store) = pipeline();

        pipeline
            .send_message(&ctx("u___1"), text_send("m1", "u___2"))
            .await
            .unwrap();

        let mut retry = text_send("m1", "u___2");
        retry.msg_type = 102;
        let err = pipeline
            .send_message(&ctx("u___1"), retry)
            .await
            .unwrap_err();
        assert_eq!(err.code, AppError::conflict().code);
    }

    #[tokio::test]
    async fn group_send_requires_membership() {
        let (pipeline, pusher, _store) = pipeline();

        let group_send = SendMsgData {
            client_msg_id: "g-m1".to_string(),
            recv_id: None,
            group_id: Some("g1".to_string()),
            session_type: SESSION_TYPE_GROUP,
            msg_type: 101,
            content: json!({"text": "hi team"}),
        };

        // u___3 is not a member.
        let err = pipeline
            .send_message(&ctx("u___3"), group_send.clone())
            .await
            .unwrap_err();
        assert_eq!(err.code, AppError::unauthorized().code);

        let resp = pipeline
            .send_message(&ctx("u___1"), group_send)
            .await
            .unwrap();
        assert_eq!(resp.conversation_id, "g1");
        assert_eq!(pusher.recipients(), HashSet::from(["u___1".into(), "u___2".into()]));
    }

    #[tokio::test]
    async fn pull_requires_participation() {
        let (pipeline, _pusher, _store) = pipeline();

        let resp = pipeline
            .send_message(&ctx("u___1"), text_send("m1", "u___2"))
            .await
            .unwrap();

        let err = pipeline
            .pull_messages(
                &ctx("u___3"),
                PullMessagesData {
                    conversation_id: resp.conversation_id,
                    begin_seq: 1,
                    end_seq: 1,
                    limit: 10,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.code, AppError::unauthorized().code);
    }

    #[tokio::test]
    async fn unknown_opcode_echoes_envelope_with_protocol_error() {
        let (pipeline, _pusher, _store) = pipeline();

        let raw = json!({
            "req_identifier": 9999,
            "msg_incr": "7",
            "operation_id": "op",
            "send_id": "u___1",
            "data": {}
        })
        .to_string();

        let resp: WsResponse =
            serde_json::from_str(&pipeline.handle_frame(&ctx("u___1"), &raw).await).unwrap();
        assert_eq!(resp.req_identifier, 9999);
        assert_eq!(resp.msg_incr, "7");
        assert_ne!(resp.err_code, 0);
        assert!(resp.err_msg.contains("invalid protocol"));
    }

    #[tokio::test]
    async fn mismatched_send_id_is_rejected() {
        let (pipeline, _pusher, _store) = pipeline();

        let raw = json!({
            "req_identifier": WS_HEARTBEAT,
            "msg_incr": "1",
            "operation_id": "op",
            "send_id": "u___2",
            "data": {}
        })
        .to_string();

        let resp: WsResponse =
            serde_json::from_str(&pipeline.handle_frame(&ctx("u___1"), &raw).await).unwrap();
        assert_eq!(resp.err_code, AppError::unauthorized().code);
    }

    #[tokio::test]
    async fn send_over_websocket_envelope() {
        let (pipeline, _pusher, _store) = pipeline();

        let raw = json!({
            "req_identifier": WS_SEND_MSG,
            "msg_incr": "1",
            "operation_id": "op",
            "send_id": "u___1",
            "data": {
                "client_msg_id": "ws-m1",
                "recv_id": "u___2",
                "session_type": SESSION_TYPE_SINGLE,
                "msg_type": 101,
                "content": {"text": "hello"}
            }
        })
        .to_string();

        let resp: WsResponse =
            serde_json::from_str(&pipeline.handle_frame(&ctx("u___1"), &raw).await).unwrap();
        assert_eq!(resp.err_code, 0);
        assert_eq!(resp.data["seq"], 1);
        assert_eq!(
            resp.data["conversation_id"],
            conv::single_chat_id("u___1", "u___2").as_str()
        );
    }

    #[tokio::test]
    async fn unparsable_frame_yields_protocol_error() {
        let (pipeline, _pusher, _store) = pipeline();
        let resp: WsResponse =
            serde_json::from_str(&pipeline.handle_frame(&ctx("u___1"), "not json").await).unwrap();
        assert_eq!(resp.err_code, AppError::invalid_protocol().code);
    }

    #[tokio::test]
    async fn mark_read_via_pipeline_is_clamped_monotonic() {
        let (pipeline, _pusher, _store) = pipeline();

        let sent = pipeline
            .send_message(&ctx("u___1"), text_send("m1", "u___2"))
            .await
            .unwrap();

        let marked = pipeline
            .mark_read(
                &ctx("u___2"),
                MarkReadData {
                    conversation_id: sent.conversation_id.clone(),
                    read_seq: 99,
                },
            )
            .await
            .unwrap();
        assert_eq!(marked.read_seq, 1);

        let maxes = pipeline
            .get_max_seq(
                &ctx("u___2"),
                GetMaxSeqData {
                    conversation_id: sent.conversation_id,
                },
            )
            .await
            .unwrap();
        assert_eq!(maxes.max_seq, 1);
        assert_eq!(maxes.read_seq, 1);
    }

    #[tokio::test]
    async fn recall_flags_only_for_the_sender() {
        let (pipeline, _pusher, store) = pipeline();

        let sent = pipeline
            .send_message(&ctx("u___1"), text_send("m1", "u___2"))
            .await
            .unwrap();

        let err = pipeline
            .recall_message(&ctx("u___2"), &sent.conversation_id, sent.seq)
            .await
            .unwrap_err();
        assert_eq!(err.code, AppError::unauthorized().code);

        pipeline
            .recall_message(&ctx("u___1"), &sent.conversation_id, sent.seq)
            .await
            .unwrap();
        let rows = store::messages::get_range(&store.conn(), &sent.conversation_id, 1, 1, 1);
        assert_eq!(rows[0].status, MSG_STATUS_RECALLED);
    }
}
