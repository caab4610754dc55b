//! Opcode dispatch: a map from `req_identifier` to handler, built once at
//! startup. Unknown opcodes fall through to the standard protocol error.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

use nexim_shared::errcode::AppError;

use super::{Pipeline, ReqContext};

pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Value, AppError>> + Send>>;
pub type OpHandler = Arc<dyn Fn(Arc<Pipeline>, ReqContext, Value) -> HandlerFuture + Send + Sync>;

#[derive(Default)]
pub struct OpcodeRegistry {
    handlers: HashMap<i32, OpHandler>,
}

impl OpcodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, req_identifier: i32, handler: OpHandler) {
        self.handlers.insert(req_identifier, handler);
    }

    pub fn get(&self, req_identifier: i32) -> Option<OpHandler> {
        self.handlers.get(&req_identifier).cloned()
    }

    /// Registered opcodes, for startup diagnostics.
    pub fn ops(&self) -> Vec<i32> {
        let mut ops: Vec<i32> = self.handlers.keys().copied().collect();
        ops.sort_unstable();
        ops
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_hits_and_misses() {
        let mut reg = OpcodeRegistry::new();
        reg.register(
            1003,
            Arc::new(|_, _, _| Box::pin(async { Ok(Value::Null) }) as HandlerFuture),
        );
        assert!(reg.get(1003).is_some());
        assert!(reg.get(9999).is_none());
        assert_eq!(reg.ops(), vec![1003]);
    }
}
