//! Per-request cancellation handle.

use std::sync::atomic::{AtomicU8, Ordering};

use once_cell::sync::OnceCell;
use tokio_util::sync::CancellationToken;

use crate::core::{RequestError, RequestResult};

const PENDING: u8 = 0;
const FULFILLED: u8 = 1;
const REJECTED: u8 = 2;

/// Lifecycle state of a dispatched request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerStatus {
    Pending,
    /// Settled normally; transport failures also land here.
    Fulfilled,
    /// Aborted by `cancel()` or by race-condition eviction.
    Rejected,
}

/// The cancellable handle for one in-flight request.
///
/// Terminal states are final. The cancellation token stands in for the
/// transport task handle: the engine races the transport future against it.
#[derive(Debug)]
pub struct RequestController {
    id: String,
    /// Registration order; larger is newer
    seq: u64,
    status: AtomicU8,
    token: CancellationToken,
    race_key: OnceCell<String>,
}

impl RequestController {
    pub fn new(id: impl Into<String>, seq: u64) -> Self {
        Self {
            id: id.into(),
            seq,
            status: AtomicU8::new(PENDING),
            token: CancellationToken::new(),
            race_key: OnceCell::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn status(&self) -> ControllerStatus {
        match self.status.load(Ordering::Acquire) {
            PENDING => ControllerStatus::Pending,
            FULFILLED => ControllerStatus::Fulfilled,
            _ => ControllerStatus::Rejected,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status() == ControllerStatus::Pending
    }

    pub fn is_aborted(&self) -> bool {
        self.status() == ControllerStatus::Rejected
    }

    /// Move `Pending -> Fulfilled`. Returns false if already terminal.
    pub fn done(&self) -> bool {
        self.transition(FULFILLED)
    }

    /// Move `Pending -> Rejected` and fire the cancellation token.
    ///
    /// Returns false (and does nothing) if already terminal.
    pub fn abort(&self) -> bool {
        if !self.transition(REJECTED) {
            return false;
        }
        log::debug!("Request {} aborted", self.id);
        self.token.cancel();
        true
    }

    /// Fails with the abort kind unless the controller is still pending.
    pub fn ensure_pending(&self) -> RequestResult<()> {
        if self.is_pending() {
            Ok(())
        } else {
            Err(RequestError::abort(&self.id))
        }
    }

    /// Resolves once `abort()` has been called.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Record the race-condition key this request claimed. Set at most once.
    pub fn set_race_key(&self, key: String) -> bool {
        self.race_key.set(key).is_ok()
    }

    pub fn race_key(&self) -> Option<&str> {
        self.race_key.get().map(String::as_str)
    }

    fn transition(&self, to: u8) -> bool {
        self.status
            .compare_exchange(PENDING, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}
