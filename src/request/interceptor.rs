//! Interceptor lists and the onion executor.
//!
//! Engine-level interceptors wrap call-level ones: on the request path the
//! engine list runs first, on the response path it runs last.

use std::{fmt, sync::Arc};

use async_trait::async_trait;

use super::{options::RequestOptions, transport::Response};
use crate::core::{RequestInterceptor, RequestResult, ResponseInterceptor};

/// Request and response interceptors registered at one layer
#[derive(Clone, Default)]
pub struct Interceptors {
    pub request: Vec<Arc<dyn RequestInterceptor>>,
    pub response: Vec<Arc<dyn ResponseInterceptor>>,
}

impl Interceptors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_request(mut self, interceptor: Arc<dyn RequestInterceptor>) -> Self {
        self.request.push(interceptor);
        self
    }

    pub fn on_response(mut self, interceptor: Arc<dyn ResponseInterceptor>) -> Self {
        self.response.push(interceptor);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.request.is_empty() && self.response.is_empty()
    }

    /// Per stage, a non-empty `overlay` list replaces ours
    pub fn merged(&self, overlay: Interceptors) -> Interceptors {
        Interceptors {
            request: if overlay.request.is_empty() {
                self.request.clone()
            } else {
                overlay.request
            },
            response: if overlay.response.is_empty() {
                self.response.clone()
            } else {
                overlay.response
            },
        }
    }
}

impl fmt::Debug for Interceptors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interceptors")
            .field("request", &self.request.len())
            .field("response", &self.response.len())
            .finish()
    }
}

/// Runs one request's interceptors in onion order
pub struct InterceptorChain<'a> {
    engine: &'a Interceptors,
    call: &'a Interceptors,
}

impl<'a> InterceptorChain<'a> {
    pub fn new(engine: &'a Interceptors, call: &'a Interceptors) -> Self {
        Self { engine, call }
    }

    /// Engine-level first, then call-level
    pub async fn run_request(&self, mut options: RequestOptions) -> RequestResult<RequestOptions> {
        for interceptor in self.engine.request.iter().chain(self.call.request.iter()) {
            options = interceptor.on_request(options).await?;
        }
        Ok(options)
    }

    /// Call-level first, then engine-level
    pub async fn run_response(
        &self,
        mut response: Response,
        options: &RequestOptions,
    ) -> RequestResult<Response> {
        for interceptor in self.call.response.iter().chain(self.engine.response.iter()) {
            response = interceptor.on_response(response, options).await?;
        }
        Ok(response)
    }
}

struct FnRequestInterceptor<F>(F);

#[async_trait]
impl<F> RequestInterceptor for FnRequestInterceptor<F>
where
    F: Fn(RequestOptions) -> RequestResult<RequestOptions> + Send + Sync,
{
    async fn on_request(&self, options: RequestOptions) -> RequestResult<RequestOptions> {
        (self.0)(options)
    }
}

struct FnResponseInterceptor<F>(F);

#[async_trait]
impl<F> ResponseInterceptor for FnResponseInterceptor<F>
where
    F: Fn(Response, &RequestOptions) -> RequestResult<Response> + Send + Sync,
{
    async fn on_response(
        &self,
        response: Response,
        options: &RequestOptions,
    ) -> RequestResult<Response> {
        (self.0)(response, options)
    }
}

/// Wrap a synchronous closure as a request interceptor
pub fn request_fn<F>(f: F) -> Arc<dyn RequestInterceptor>
where
    F: Fn(RequestOptions) -> RequestResult<RequestOptions> + Send + Sync + 'static,
{
    Arc::new(FnRequestInterceptor(f))
}

/// Wrap a synchronous closure as a response interceptor
pub fn response_fn<F>(f: F) -> Arc<dyn ResponseInterceptor>
where
    F: Fn(Response, &RequestOptions) -> RequestResult<Response> + Send + Sync + 'static,
{
    Arc::new(FnResponseInterceptor(f))
}
