//! In-memory transport for tests.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use http::StatusCode;
use serde_json::{json, Map, Value};

use super::transport::{TransportFailure, TransportRequest, TransportResponse};
use crate::core::Transport;

type Reply = Box<dyn Fn(&TransportRequest) -> Result<TransportResponse, TransportFailure> + Send + Sync>;

/// Records every request and echoes it back after an optional delay
pub(crate) struct MockTransport {
    calls: Mutex<Vec<TransportRequest>>,
    delay: Duration,
    reply: Reply,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
            reply: Box::new(|req| Ok(TransportResponse::ok(StatusCode::OK, echo(req)))),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_reply<F>(mut self, reply: F) -> Self
    where
        F: Fn(&TransportRequest) -> Result<TransportResponse, TransportFailure> + Send + Sync + 'static,
    {
        self.reply = Box::new(reply);
        self
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn calls(&self) -> Vec<TransportRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn urls(&self) -> Vec<String> {
        self.calls().into_iter().map(|req| req.url).collect()
    }
}

fn echo(req: &TransportRequest) -> Value {
    let header: Map<String, Value> = req
        .header
        .iter()
        .map(|(k, v)| (k.to_string(), json!(v.to_str().unwrap_or_default())))
        .collect();
    json!({
        "id": req.request_id,
        "method": req.method.as_str(),
        "url": req.url,
        "header": header,
    })
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(
        &self,
        request: TransportRequest,
    ) -> Result<TransportResponse, TransportFailure> {
        self.calls.lock().unwrap().push(request.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        (self.reply)(&request)
    }
}
