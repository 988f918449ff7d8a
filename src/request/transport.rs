//! Transport boundary types and the reqwest-backed transport.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::core::{RequestError, RequestResult, Transport};

/// Status marker a transport reports for a completed exchange
pub const TRANSPORT_OK: &str = "request:ok";

/// Body handed to the transport
#[derive(Debug, Clone, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    Json(Value),
    Bytes(Bytes),
}

/// Fully resolved request, ready for the wire
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub request_id: String,
    pub method: Method,
    pub url: String,
    pub header: HeaderMap,
    pub body: RequestBody,
    pub timeout: Option<Duration>,
}

/// What the transport reports back on completion
#[derive(Debug, Clone)]
pub struct TransportResponse {
    /// Equals `TRANSPORT_OK` on success
    pub err_msg: String,
    pub status: StatusCode,
    pub header: HeaderMap,
    pub data: Value,
}

impl TransportResponse {
    pub fn ok(status: StatusCode, data: Value) -> Self {
        Self {
            err_msg: TRANSPORT_OK.to_string(),
            status,
            header: HeaderMap::new(),
            data,
        }
    }
}

/// The transport never produced a response
#[derive(Debug, Clone)]
pub struct TransportFailure {
    pub message: String,
    /// The transport itself observed an abort signal
    pub aborted: bool,
}

impl TransportFailure {
    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            aborted: false,
        }
    }

    pub fn aborted(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            aborted: true,
        }
    }
}

/// The response handed to interceptors and returned to callers
#[derive(Debug, Clone)]
pub struct Response {
    /// Transport marker; a response interceptor may rewrite it to fail the request
    pub err_msg: String,
    pub status: StatusCode,
    pub header: HeaderMap,
    pub data: Value,
}

impl Response {
    pub fn is_ok(&self) -> bool {
        self.err_msg == TRANSPORT_OK
    }

    /// Deserialize `data` into a typed body
    pub fn json<T: DeserializeOwned>(&self) -> RequestResult<T> {
        serde_json::from_value(self.data.clone()).map_err(|e| RequestError::Response {
            message: format!("unexpected body shape: {e}"),
        })
    }
}

impl From<TransportResponse> for Response {
    fn from(raw: TransportResponse) -> Self {
        Self {
            err_msg: raw.err_msg,
            status: raw.status,
            header: raw.header,
            data: raw.data,
        }
    }
}

/// HTTP transport over reqwest
#[derive(Clone, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

fn fail_from(err: reqwest::Error) -> TransportFailure {
    if err.is_timeout() {
        TransportFailure::fail(format!("request:fail timeout: {err}"))
    } else {
        TransportFailure::fail(format!("request:fail {err}"))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        request: TransportRequest,
    ) -> Result<TransportResponse, TransportFailure> {
        log::debug!("{} {} ({})", request.method, request.url, request.request_id);

        let mut builder = self
            .client
            .request(request.method, &request.url)
            .headers(request.header);
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }
        builder = match request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(&value),
            RequestBody::Bytes(bytes) => builder.body(bytes),
        };

        let response = builder.send().await.map_err(fail_from)?;
        let status = response.status();
        let header = response.headers().clone();
        let body = response.bytes().await.map_err(fail_from)?;

        let data = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&body).into_owned()))
        };

        Ok(TransportResponse {
            err_msg: TRANSPORT_OK.to_string(),
            status,
            header,
            data,
        })
    }
}
