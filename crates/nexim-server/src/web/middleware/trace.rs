//! Trace id propagation: accept `Trace-Id`/`X-Trace-Id`, mint a 128-bit
//! hex id when absent, echo it in the response, and attach it to every log
//! record via a request span.

use axum::extract::Request;
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use tracing::Instrument;
use uuid::Uuid;

pub const TRACE_ID_HEADER: &str = "Trace-Id";
pub const X_TRACE_ID_HEADER: &str = "X-Trace-Id";

/// Request-scoped trace id, readable from handlers via `Extension`.
#[derive(Debug, Clone)]
pub struct TraceId(pub String);

pub async fn trace_id(mut req: Request, next: Next) -> Response {
    let trace_id = resolve(&req);
    req.extensions_mut().insert(TraceId(trace_id.clone()));

    let span = tracing::info_span!("request", trace_id = %trace_id);
    let mut resp = next.run(req).instrument(span).await;

    if let Ok(value) = HeaderValue::from_str(&trace_id) {
        resp.headers_mut().insert(TRACE_ID_HEADER, value.clone());
        resp.headers_mut().insert(X_TRACE_ID_HEADER, value);
    }
    resp
}

fn resolve(req: &Request) -> String {
    for header in [TRACE_ID_HEADER, X_TRACE_ID_HEADER] {
        if let Some(value) = req.headers().get(header).and_then(|v| v.to_str().ok()) {
            let value = value.trim();
            if !value.is_empty() {
                return value.to_string();
            }
        }
    }
    if let Some(query) = req.uri().query() {
        for pair in query.split('&') {
            if let Some(value) = pair.strip_prefix("operation_id=") {
                if !value.is_empty() {
                    return value.to_string();
                }
            }
        }
    }
    Uuid::new_v4().simple().to_string()
}
