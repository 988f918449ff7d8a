//! Request execution
//!
//! Drives one request through the barrier wait, option merge, interceptor
//! pipeline, encoding, race-condition binding and the transport call.

use std::{
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use arc_swap::ArcSwap;
use futures::{future::BoxFuture, FutureExt};
use http::{header::CONTENT_TYPE, HeaderValue, Method};
use log::{debug, warn};
use serde_json::Value;

use super::{
    controller::RequestController,
    interceptor::InterceptorChain,
    multipart::encode_multipart,
    options::{EngineConfig, RequestOptions},
    query::append_query,
    race::resolve_race_key,
    transport::{RequestBody, Response, TransportRequest},
};
use crate::{
    core::{RequestError, RequestResult, RequestTaskRegistry, Transport},
    orchestration::barrier::InitBarrier,
    utils::url::join_base_url,
};

struct EngineInner {
    config: ArcSwap<EngineConfig>,
    barrier: Arc<InitBarrier>,
    registry: Arc<RequestTaskRegistry>,
    transport: Arc<dyn Transport>,
}

/// Dispatches requests; cheap to clone.
#[derive(Clone)]
pub struct RequestEngine {
    inner: Arc<EngineInner>,
}

/// A submitted request. Resolves to the response; dropping it early aborts.
pub struct InFlight {
    controller: Arc<RequestController>,
    registry: Arc<RequestTaskRegistry>,
    future: BoxFuture<'static, RequestResult<Response>>,
}

impl InFlight {
    pub fn id(&self) -> &str {
        self.controller.id()
    }

    pub fn controller(&self) -> &Arc<RequestController> {
        &self.controller
    }
}

impl Future for InFlight {
    type Output = RequestResult<Response>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.future.as_mut().poll(cx)
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if self.controller.is_pending() {
            self.registry.remove_controller(&self.controller);
            self.controller.abort();
        }
    }
}

impl RequestEngine {
    pub fn new(
        config: EngineConfig,
        barrier: Arc<InitBarrier>,
        registry: Arc<RequestTaskRegistry>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                config: ArcSwap::from_pointee(config),
                barrier,
                registry,
                transport,
            }),
        }
    }

    /// Snapshot of the current engine defaults
    pub fn config(&self) -> Arc<EngineConfig> {
        self.inner.config.load_full()
    }

    /// Deep-merge `overlay` into the engine defaults.
    ///
    /// Requests already past the barrier keep the snapshot they started with.
    pub fn set_config(&self, overlay: EngineConfig) {
        self.inner
            .config
            .rcu(|current| Arc::new(current.merged(overlay.clone())));
        debug!("Engine config updated");
    }

    pub fn registry(&self) -> &Arc<RequestTaskRegistry> {
        &self.inner.registry
    }

    /// Register a controller now and return the pending request.
    ///
    /// The id is known before the first poll, so the caller can cancel a
    /// request that has not started yet.
    pub fn submit(&self, options: RequestOptions) -> InFlight {
        let controller = self
            .inner
            .registry
            .create_controller(options.request_id.clone());
        let engine = self.clone();
        let ctrl = controller.clone();
        let future = async move { engine.run(ctrl, options).await }.boxed();

        InFlight {
            controller,
            registry: self.inner.registry.clone(),
            future,
        }
    }

    pub async fn dispatch(&self, options: RequestOptions) -> RequestResult<Response> {
        self.submit(options).await
    }

    pub async fn get(&self, options: RequestOptions) -> RequestResult<Response> {
        self.dispatch(options.method(Method::GET)).await
    }

    pub async fn post(&self, options: RequestOptions) -> RequestResult<Response> {
        self.dispatch(options.method(Method::POST)).await
    }

    pub async fn put(&self, options: RequestOptions) -> RequestResult<Response> {
        self.dispatch(options.method(Method::PUT)).await
    }

    pub async fn delete(&self, options: RequestOptions) -> RequestResult<Response> {
        self.dispatch(options.method(Method::DELETE)).await
    }

    /// Abort one request. False if unknown or already settled.
    pub fn cancel(&self, request_id: &str) -> bool {
        self.inner.registry.abort(request_id)
    }

    pub fn cancel_many<I, S>(&self, request_ids: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        request_ids
            .into_iter()
            .filter(|id| self.cancel(id.as_ref()))
            .count()
    }

    /// Abort every registered request
    pub fn cancel_all(&self) -> usize {
        self.inner.registry.abort_all()
    }

    async fn run(
        &self,
        controller: Arc<RequestController>,
        options: RequestOptions,
    ) -> RequestResult<Response> {
        let outcome = self.execute(&controller, options).await;
        self.finish(&controller, &outcome);
        outcome
    }

    fn finish(&self, controller: &Arc<RequestController>, outcome: &RequestResult<Response>) {
        let id = controller.id();
        match outcome {
            Ok(response) => {
                debug!("Request {id} completed with {}", response.status);
                controller.done();
            }
            Err(err) if err.is_abort() => {
                debug!("Request {id} aborted");
                controller.abort();
            }
            Err(err) => {
                warn!("Request {id} failed: {err}");
                controller.done();
            }
        }

        self.inner.registry.remove_controller(controller);
        if let Some(key) = controller.race_key() {
            self.inner.registry.release_race_key(key, id);
        }
    }

    async fn execute(
        &self,
        controller: &RequestController,
        options: RequestOptions,
    ) -> RequestResult<Response> {
        let inner = &self.inner;
        controller.ensure_pending()?;

        if !options.skip_initialized {
            tokio::select! {
                biased;
                _ = controller.cancelled() => return Err(RequestError::abort(controller.id())),
                _ = inner.barrier.ready() => {}
            }
            controller.ensure_pending()?;
        }

        let config = inner.config.load_full();
        let mut options = config.merge(options);
        options.request_id = Some(controller.id().to_string());
        if let Some(message) = options.take_invalid() {
            return Err(RequestError::invalid_options(message));
        }

        let call_interceptors = std::mem::take(&mut options.interceptors);
        let chain = InterceptorChain::new(&config.interceptors, &call_interceptors);
        let mut options = chain.run_request(options).await?;
        controller.ensure_pending()?;

        resolve_url(&mut options);
        let body = encode_body(&mut options)?;

        if let Some(key) = resolve_race_key(
            options.race_condition.as_ref(),
            config.race_condition.as_ref(),
            &options,
        ) {
            controller.set_race_key(key.clone());
            // an older request loses to a newer holder and is aborted here
            inner.registry.set_race_request_id(&key, controller);
        }

        controller.ensure_pending()?;

        let request = TransportRequest {
            request_id: controller.id().to_string(),
            method: options.method.clone(),
            url: options.url.clone(),
            header: options.header.clone(),
            body,
            timeout: options.timeout,
        };

        let sent = tokio::select! {
            biased;
            _ = controller.cancelled() => return Err(RequestError::abort(controller.id())),
            sent = inner.transport.send(request) => sent,
        };

        let raw = match sent {
            Ok(raw) => raw,
            Err(failure) if failure.aborted => return Err(RequestError::abort(controller.id())),
            Err(failure) => {
                return Err(RequestError::Transport {
                    message: failure.message,
                })
            }
        };

        options.interceptors = call_interceptors.clone();
        let response = chain.run_response(Response::from(raw), &options).await?;
        if !response.is_ok() {
            return Err(RequestError::Response {
                message: response.err_msg,
            });
        }
        Ok(response)
    }
}

/// Fold params (and GET object data) into the URL, then apply `base_url`.
fn resolve_url(options: &mut RequestOptions) {
    if options.method == Method::GET && matches!(options.data, Some(Value::Object(_))) {
        if let Some(Value::Object(fields)) = options.data.take() {
            for (key, value) in fields {
                options.params.entry(key).or_insert(value);
            }
        }
    }

    let params = std::mem::take(&mut options.params);
    let url = append_query(&options.url, &params, options.params_indexes);
    options.url = join_base_url(options.base_url.as_deref(), &url);
}

fn encode_body(options: &mut RequestOptions) -> RequestResult<RequestBody> {
    if options.use_multipart_form_data {
        let multipart = encode_multipart(options.data.as_ref())?;
        let content_type = HeaderValue::try_from(multipart.content_type())
            .map_err(|e| RequestError::invalid_options(format!("content type: {e}")))?;
        options.header.insert(CONTENT_TYPE, content_type);
        return Ok(RequestBody::Bytes(multipart.body));
    }

    Ok(match &options.data {
        None => RequestBody::Empty,
        Some(data) => RequestBody::Json(data.clone()),
    })
}
