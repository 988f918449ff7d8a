//! Request engine
//!
//! Config merging, the two-stage interceptor pipeline, query and multipart
//! encoding, per-request cancellation and race-condition deduplication.

pub mod controller;
pub mod engine;
pub mod interceptor;
pub mod multipart;
pub mod options;
pub mod query;
pub mod race;
pub mod transport;

#[cfg(test)]
pub(crate) mod mock;

pub use controller::{ControllerStatus, RequestController};
pub use engine::{InFlight, RequestEngine};
pub use interceptor::{request_fn, response_fn, InterceptorChain, Interceptors};
pub use options::{EngineConfig, RequestOptions};
pub use query::Params;
pub use race::RaceCondition;
pub use transport::{
    HttpTransport, RequestBody, Response, TransportFailure, TransportRequest, TransportResponse,
    TRANSPORT_OK,
};
