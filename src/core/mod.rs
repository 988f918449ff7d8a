//! Core abstractions and interfaces for unikit
//!
//! Errors, the seams between the engine and its extensions, the request task
//! registry and the application container.

pub mod container;
pub mod error;
pub mod registry;
pub mod traits;


// Re-export commonly used types
pub use container::{AppBuilder, AppContext};
pub use error::{
    AppError, AppResult, ErrorChain, ErrorContext, InitActionError, InitTaskError, RequestError,
    RequestResult,
};
pub use registry::RequestTaskRegistry;
pub use traits::*;
