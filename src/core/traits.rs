//! Core traits for unikit components
//!
//! These are the seams between the request engine, the plugins that extend
//! it, and the platform transport underneath.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use super::error::{AppResult, RequestResult};
use crate::{
    core::container::AppBuilder,
    request::{
        options::RequestOptions,
        transport::{Response, TransportFailure, TransportRequest, TransportResponse},
    },
};

/// The platform network primitive the engine dispatches through.
///
/// Implementations only move bytes; status interpretation, interceptors and
/// cancellation live in the engine.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: TransportRequest)
        -> Result<TransportResponse, TransportFailure>;
}

/// Runs on the request path, before encoding and dispatch
#[async_trait]
pub trait RequestInterceptor: Send + Sync {
    /// Receive the merged options and return them, possibly mutated.
    /// An `Err` rejects the request without reaching the transport.
    async fn on_request(&self, options: RequestOptions) -> RequestResult<RequestOptions>;
}

/// Runs on the response path after a successful transport call
#[async_trait]
pub trait ResponseInterceptor: Send + Sync {
    async fn on_response(
        &self,
        response: Response,
        options: &RequestOptions,
    ) -> RequestResult<Response>;
}

/// An installable application concern (auth, tenant, request id, ...)
pub trait AppPlugin: Send + Sync {
    /// Return the name of this plugin
    fn name(&self) -> &str;

    /// Higher priority installs first
    fn priority(&self) -> i32;

    /// Register init tasks and interceptors on the builder
    fn install(&self, app: &mut AppBuilder) -> AppResult<()>;
}

/// Factory building a plugin from its JSON configuration
pub type PluginCreateFn = fn(JsonValue) -> AppResult<Arc<dyn AppPlugin>>;
