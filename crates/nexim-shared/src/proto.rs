//! WebSocket protocol envelope and opcode payloads.
//!
//! Request:  `{"req_identifier": 1003, "msg_incr": "1", "operation_id": "…",
//!             "send_id": "u___12", "data": {…}}`
//! Response: `{"req_identifier": 1003, "msg_incr": "1", "operation_id": "…",
//!             "err_code": 0, "err_msg": "", "data": {…}}`
//!
//! `req_identifier` and `msg_incr` are echoed exactly; `data` is an
//! opcode-specific nested JSON document.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errcode::AppError;

pub const WS_GET_MAX_SEQ: i32 = 1001;
pub const WS_PULL_MESSAGES: i32 = 1002;
pub const WS_SEND_MSG: i32 = 1003;
pub const WS_MARK_READ: i32 = 1004;
pub const WS_HEARTBEAT: i32 = 1005;

/// Server-initiated push of a newly persisted message.
pub const WS_PUSH_MSG: i32 = 2001;

pub const SESSION_TYPE_SINGLE: i32 = 1;
pub const SESSION_TYPE_GROUP: i32 = 2;

pub const MSG_TYPE_TEXT: i32 = 101;
pub const MSG_TYPE_IMAGE: i32 = 102;
pub const MSG_TYPE_CUSTOM: i32 = 110;

pub const MSG_STATUS_NORMAL: i32 = 0;
pub const MSG_STATUS_RECALLED: i32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WsRequest {
    pub req_identifier: i32,
    #[serde(default)]
    pub msg_incr: String,
    #[serde(default)]
    pub operation_id: String,
    #[serde(default)]
    pub send_id: String,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WsResponse {
    pub req_identifier: i32,
    pub msg_incr: String,
    pub operation_id: String,
    pub err_code: i32,
    pub err_msg: String,
    #[serde(default)]
    pub data: Value,
}

impl WsResponse {
    pub fn ok(req: &WsRequest, data: Value) -> Self {
        Self {
            req_identifier: req.req_identifier,
            msg_incr: req.msg_incr.clone(),
            operation_id: req.operation_id.clone(),
            err_code: 0,
            err_msg: String::new(),
            data,
        }
    }

    pub fn error(req: &WsRequest, err: &AppError) -> Self {
        Self {
            req_identifier: req.req_identifier,
            msg_incr: req.msg_incr.clone(),
            operation_id: req.operation_id.clone(),
            err_code: err.code,
            err_msg: err.message.clone(),
            data: Value::Null,
        }
    }

    /// Server push envelope; `msg_incr` is empty because no request is echoed.
    pub fn push(req_identifier: i32, operation_id: impl Into<String>, data: Value) -> Self {
        Self {
            req_identifier,
            msg_incr: String::new(),
            operation_id: operation_id.into(),
            err_code: 0,
            err_msg: String::new(),
            data,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMsgData {
    pub client_msg_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recv_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    pub session_type: i32,
    pub msg_type: i32,
    pub content: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMsgResp {
    pub server_msg_id: i64,
    pub conversation_id: String,
    pub seq: i64,
    pub client_msg_id: String,
    pub send_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullMessagesData {
    pub conversation_id: String,
    pub begin_seq: i64,
    pub end_seq: i64,
    #[serde(default)]
    pub limit: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageItem {
    pub server_msg_id: i64,
    pub conversation_id: String,
    pub seq: i64,
    pub client_msg_id: String,
    pub send_id: String,
    pub session_type: i32,
    pub msg_type: i32,
    pub content: Value,
    pub send_at: i64,
    pub status: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullMessagesResp {
    pub conversation_id: String,
    pub messages: Vec<MessageItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetMaxSeqData {
    pub conversation_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetMaxSeqResp {
    pub conversation_id: String,
    pub max_seq: i64,
    pub read_seq: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkReadData {
    pub conversation_id: String,
    pub read_seq: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkReadResp {
    pub conversation_id: String,
    pub read_seq: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_roundtrip() {
        let req = WsRequest {
            req_identifier: WS_SEND_MSG,
            msg_incr: "1".into(),
            operation_id: "op".into(),
            send_id: "u___12".into(),
            data: json!({"client_msg_id": "c1"}),
        };
        let s = serde_json::to_string(&req).unwrap();
        let back: WsRequest = serde_json::from_str(&s).unwrap();
        assert_eq!(req, back);
    }

    #[test]
    fn request_tolerates_missing_optional_fields() {
        let req: WsRequest = serde_json::from_str(r#"{"req_identifier": 9999}"#).unwrap();
        assert_eq!(req.req_identifier, 9999);
        assert!(req.msg_incr.is_empty());
        assert!(req.data.is_null());
    }

    #[test]
    fn error_response_echoes_identifier_and_incr() {
        let req = WsRequest {
            req_identifier: 9999,
            msg_incr: "7".into(),
            operation_id: "op".into(),
            send_id: String::new(),
            data: Value::Null,
        };
        let resp = WsResponse::error(&req, &AppError::invalid_protocol());
        assert_eq!(resp.req_identifier, 9999);
        assert_eq!(resp.msg_incr, "7");
        assert_ne!(resp.err_code, 0);
        assert!(resp.err_msg.contains("invalid protocol"));
    }
}
