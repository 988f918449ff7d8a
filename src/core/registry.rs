//! Request task registry
//!
//! Single source of truth mapping live requests to their controllers and to
//! the race-condition key each one holds.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use dashmap::{mapref::entry::Entry, DashMap};
use log::{debug, info};
use uuid::Uuid;

use crate::request::controller::RequestController;

/// Registry of in-flight requests.
///
/// Invariant: a race-condition key is bound to at most one live request id,
/// and that request is the most recently registered one that claimed it.
pub struct RequestTaskRegistry {
    controllers: DashMap<String, Arc<RequestController>>,
    race_ids: DashMap<String, RaceHolder>,
    next_seq: AtomicU64,
}

#[derive(Debug, Clone)]
struct RaceHolder {
    id: String,
    seq: u64,
}

impl RaceHolder {
    fn of(controller: &RequestController) -> Self {
        Self {
            id: controller.id().to_string(),
            seq: controller.seq(),
        }
    }
}

enum Claim {
    Held,
    Won { evicted: Option<String> },
    Lost { holder: String },
}

impl Default for RequestTaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestTaskRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            controllers: DashMap::new(),
            race_ids: DashMap::new(),
            next_seq: AtomicU64::new(0),
        }
    }

    /// Allocate and register a controller.
    ///
    /// A fresh uuid is used when `request_id` is `None`. Reusing an id that is
    /// still live aborts the previous holder first.
    pub fn create_controller(&self, request_id: Option<String>) -> Arc<RequestController> {
        let id = request_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let controller = Arc::new(RequestController::new(id.clone(), seq));

        if let Some(prev) = self.controllers.insert(id.clone(), controller.clone()) {
            debug!("Request id {id} reused, aborting previous holder");
            prev.abort();
            self.scrub_race_keys(&id);
        }

        debug!("Registered request {id}");
        controller
    }

    /// Get a controller by request id
    pub fn get(&self, id: &str) -> Option<Arc<RequestController>> {
        self.controllers.get(id).map(|entry| entry.value().clone())
    }

    /// Remove a controller and any race-condition entry pointing at it
    pub fn remove(&self, id: &str) -> Option<Arc<RequestController>> {
        let removed = self.controllers.remove(id).map(|(_, ctrl)| ctrl);
        if removed.is_some() {
            debug!("Removed request {id}");
            self.scrub_race_keys(id);
        }
        removed
    }

    /// Remove this exact controller, leaving a newer holder of the same id alone
    pub fn remove_controller(&self, controller: &Arc<RequestController>) -> bool {
        let id = controller.id();
        let removed = self
            .controllers
            .remove_if(id, |_, current| Arc::ptr_eq(current, controller))
            .is_some();
        if removed {
            debug!("Removed request {id}");
            self.scrub_race_keys(id);
        }
        removed
    }

    /// Abort a request and drop it from the registry.
    ///
    /// Returns false when the id is unknown or already terminal.
    pub fn abort(&self, id: &str) -> bool {
        match self.remove(id) {
            Some(ctrl) => ctrl.abort(),
            None => false,
        }
    }

    /// Abort every registered request; returns how many were aborted
    pub fn abort_all(&self) -> usize {
        let ids = self.ids();
        info!("Aborting {} in-flight requests", ids.len());
        ids.iter().filter(|id| self.abort(id)).count()
    }

    /// Bind `key` to `controller`, keeping only the newer of it and the
    /// current holder.
    ///
    /// Requests are ordered by registration, not by when they reach this
    /// point: an older request that arrives after a newer holder is aborted
    /// instead. Returns whether `controller` holds the key afterwards. The
    /// losing request is already rejected when this returns; a losing caller
    /// stays registered until its own completion removes it.
    pub fn set_race_request_id(&self, key: &str, controller: &RequestController) -> bool {
        let id = controller.id();
        let claim = match self.race_ids.entry(key.to_string()) {
            Entry::Vacant(entry) => {
                entry.insert(RaceHolder::of(controller));
                Claim::Won { evicted: None }
            }
            Entry::Occupied(entry) if entry.get().id == id => Claim::Held,
            Entry::Occupied(entry) if entry.get().seq > controller.seq() => Claim::Lost {
                holder: entry.get().id.clone(),
            },
            Entry::Occupied(mut entry) => {
                let prev = entry.insert(RaceHolder::of(controller));
                Claim::Won {
                    evicted: Some(prev.id),
                }
            }
        };

        // the entry guard is gone; aborting scrubs race keys
        match claim {
            Claim::Held | Claim::Won { evicted: None } => true,
            Claim::Won {
                evicted: Some(prev),
            } => {
                debug!("Race condition '{key}': evicting {prev} for {id}");
                self.abort(&prev);
                true
            }
            Claim::Lost { holder } => {
                debug!("Race condition '{key}': {id} is older than holder {holder}, aborting it");
                controller.abort();
                false
            }
        }
    }

    /// Current holder of a race-condition key
    pub fn race_request_id(&self, key: &str) -> Option<String> {
        self.race_ids.get(key).map(|entry| entry.value().id.clone())
    }

    /// Release `key` only if it is still bound to `id`.
    ///
    /// A request evicted by a newer one must not release the newer binding.
    pub fn release_race_key(&self, key: &str, id: &str) -> bool {
        self.race_ids
            .remove_if(key, |_, holder| holder.id == id)
            .is_some()
    }

    /// All registered request ids
    pub fn ids(&self) -> Vec<String> {
        self.controllers.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.controllers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controllers.is_empty()
    }

    /// Number of bound race-condition keys
    pub fn race_key_count(&self) -> usize {
        self.race_ids.len()
    }

    fn scrub_race_keys(&self, id: &str) {
        self.race_ids.retain(|_, holder| holder.id != id);
    }
}
