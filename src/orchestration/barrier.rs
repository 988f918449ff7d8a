//! Initialization barrier
//!
//! Collects order-sensitive bootstrap actions (token hydration, tenant
//! resolution, store seeding) and runs them exactly once. The request engine
//! and the router guard wait on the resulting ready signal.

use std::{
    any::Any,
    future::Future,
    panic::AssertUnwindSafe,
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex, MutexGuard, PoisonError,
    },
};

use futures::{future::BoxFuture, FutureExt};
use log::{debug, error, info, warn};
use tokio::sync::watch;

use crate::core::{AppError, AppResult, ErrorChain, InitActionError, InitTaskError};

type InitAction = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), InitActionError>> + Send>;

/// A queued bootstrap action. Lower `order` runs first.
pub struct InitTask {
    order: i32,
    name: Option<String>,
    action: InitAction,
}

impl InitTask {
    /// Wrap an async action with the default order of 0
    pub fn new<F, Fut, E>(action: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<InitActionError>,
    {
        Self {
            order: 0,
            name: None,
            action: Box::new(move || async move { action().await.map_err(Into::into) }.boxed()),
        }
    }

    pub fn order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    /// Label used when reporting a failure
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn get_order(&self) -> i32 {
        self.order
    }
}

impl std::fmt::Debug for InitTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitTask")
            .field("order", &self.order)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// One-shot gate over the bootstrap queue.
///
/// `fire` never fails: a failing task is logged and the next one still runs.
pub struct InitBarrier {
    queue: Mutex<Vec<InitTask>>,
    fired: AtomicBool,
    ready: watch::Sender<bool>,
}

impl Default for InitBarrier {
    fn default() -> Self {
        Self::new()
    }
}

impl InitBarrier {
    pub fn new() -> Self {
        let (ready, _) = watch::channel(false);
        Self {
            queue: Mutex::new(Vec::new()),
            fired: AtomicBool::new(false),
            ready,
        }
    }

    /// Queue a bare action with order 0
    pub fn register<F, Fut, E>(&self, action: F) -> AppResult<()>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<InitActionError>,
    {
        self.register_task(InitTask::new(action))
    }

    pub fn register_with_order<F, Fut, E>(&self, order: i32, action: F) -> AppResult<()>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<InitActionError>,
    {
        self.register_task(InitTask::new(action).order(order))
    }

    /// Queue a task. Only valid before `fire`.
    pub fn register_task(&self, task: InitTask) -> AppResult<()> {
        let mut queue = self.lock_queue();
        if self.fired.load(Ordering::Acquire) {
            warn!("Init task {:?} registered after the barrier fired, dropping it", task.name);
            return Err(AppError::Configuration(
                "initialization barrier already fired".to_string(),
            ));
        }
        debug!("Queued init task {:?} with order {}", task.name, task.order);
        queue.push(task);
        Ok(())
    }

    /// Run every queued task once, in ascending order, then open the barrier.
    ///
    /// Later calls only log a warning.
    pub async fn fire(&self) {
        let mut tasks = {
            let mut queue = self.lock_queue();
            if self.fired.swap(true, Ordering::AcqRel) {
                warn!("Initialization barrier already fired, ignoring");
                return;
            }
            std::mem::take(&mut *queue)
        };

        // stable: equal orders keep registration order
        tasks.sort_by_key(|task| task.order);
        info!("Running {} init tasks", tasks.len());

        for (position, task) in tasks.into_iter().enumerate() {
            let InitTask {
                order,
                name,
                action,
            } = task;

            let source = match AssertUnwindSafe(action()).catch_unwind().await {
                Ok(Ok(())) => continue,
                Ok(Err(err)) => err,
                Err(panic) => panic_message(panic).into(),
            };

            let err = InitTaskError {
                name,
                order,
                position,
                source,
            };
            error!("{}", ErrorChain(&err));
        }

        self.ready.send_replace(true);
        info!("Initialization barrier open");
    }

    /// Resolves once `fire` has finished. Any number of callers, any time.
    pub async fn ready(&self) {
        let mut rx = self.ready.subscribe();
        // only errs when the sender is gone, and `self` owns it
        let _ = rx.wait_for(|ready| *ready).await;
    }

    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    pub fn is_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    /// Number of tasks still waiting to run
    pub fn pending_tasks(&self) -> usize {
        self.lock_queue().len()
    }

    fn lock_queue(&self) -> MutexGuard<'_, Vec<InitTask>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        format!("panicked: {msg}")
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        format!("panicked: {msg}")
    } else {
        "panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc, Mutex,
        },
        time::Duration,
    };

    use super::*;

    fn init_log() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn recorder() -> Arc<Mutex<Vec<i32>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    fn record(log: &Arc<Mutex<Vec<i32>>>, value: i32) -> impl FnOnce() -> futures::future::Ready<Result<(), InitActionError>> {
        let log = log.clone();
        move || {
            log.lock().unwrap().push(value);
            futures::future::ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_fire_runs_once() {
        init_log();
        let barrier = InitBarrier::new();
        let runs = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let runs = runs.clone();
            barrier
                .register(move || async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, InitActionError>(())
                })
                .unwrap();
        }

        barrier.fire().await;
        barrier.fire().await;

        assert_eq!(runs.load(Ordering::SeqCst), 3);
        assert!(barrier.is_ready());
        assert_eq!(barrier.pending_tasks(), 0);
    }

    #[tokio::test]
    async fn test_ascending_order() {
        let barrier = InitBarrier::new();
        let log = recorder();
        barrier.register_with_order(2, record(&log, 2)).unwrap();
        barrier.register_with_order(0, record(&log, 0)).unwrap();
        barrier.register_with_order(1, record(&log, 1)).unwrap();

        barrier.fire().await;
        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_equal_order_keeps_registration_order() {
        let barrier = InitBarrier::new();
        let log = recorder();
        barrier.register(record(&log, 10)).unwrap();
        barrier.register(record(&log, 20)).unwrap();
        barrier.register_with_order(-1, record(&log, 5)).unwrap();

        barrier.fire().await;
        assert_eq!(*log.lock().unwrap(), vec![5, 10, 20]);
    }

    #[tokio::test]
    async fn test_failure_is_isolated() {
        init_log();
        let barrier = InitBarrier::new();
        let log = recorder();
        barrier.register_with_order(1, record(&log, 1)).unwrap();
        barrier
            .register_task(
                InitTask::new(|| async { Err::<(), _>("tenant lookup failed") })
                    .order(2)
                    .name("tenant"),
            )
            .unwrap();
        barrier
            .register_task(
                InitTask::new(|| async {
                    if true {
                        panic!("store seed blew up");
                    }
                    Ok::<(), InitActionError>(())
                })
                .order(3),
            )
            .unwrap();
        barrier.register_with_order(4, record(&log, 4)).unwrap();

        barrier.fire().await;
        tokio::time::timeout(Duration::from_secs(1), barrier.ready())
            .await
            .expect("barrier should be ready");
        assert_eq!(*log.lock().unwrap(), vec![1, 4]);
    }

    #[tokio::test]
    async fn test_tasks_run_sequentially() {
        let barrier = InitBarrier::new();
        let token = Arc::new(Mutex::new(None::<String>));
        let seen = Arc::new(Mutex::new(None::<String>));

        {
            let token = token.clone();
            barrier
                .register_with_order(0, move || async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    *token.lock().unwrap() = Some("abc".to_string());
                    Ok::<_, InitActionError>(())
                })
                .unwrap();
        }
        {
            let token = token.clone();
            let seen = seen.clone();
            barrier
                .register_with_order(1, move || async move {
                    *seen.lock().unwrap() = token.lock().unwrap().clone();
                    Ok::<_, InitActionError>(())
                })
                .unwrap();
        }

        barrier.fire().await;
        assert_eq!(seen.lock().unwrap().as_deref(), Some("abc"));
    }

    #[tokio::test]
    async fn test_ready_before_and_after_fire() {
        let barrier = Arc::new(InitBarrier::new());
        assert!(!barrier.is_ready());

        let early = {
            let barrier = barrier.clone();
            tokio::spawn(async move { barrier.ready().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!early.is_finished());

        barrier.fire().await;
        early.await.unwrap();
        barrier.ready().await;
    }

    #[tokio::test]
    async fn test_register_after_fire_is_rejected() {
        let barrier = InitBarrier::new();
        barrier.fire().await;
        let result = barrier.register(|| async { Ok::<_, InitActionError>(()) });
        assert!(matches!(result, Err(AppError::Configuration(_))));
        assert_eq!(barrier.pending_tasks(), 0);
    }
}
