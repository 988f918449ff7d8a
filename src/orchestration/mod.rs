//! Boot orchestration
//!
//! The initialization barrier and the navigation guard that waits on it.

pub mod barrier;
pub mod router;

pub use barrier::{InitBarrier, InitTask};
pub use router::{
    after_fn, guard_fn, AfterNavigation, NavigationDecision, NavigationGuard, PageTable, Route,
    RouterGuard,
};
