use crate::query::{
    completion::QueryHandle,
    executor,
    state::{Response, SchedulerStatus, Waiter, WaveRegistry},
};
use futures::{future::BoxFuture, FutureExt};
use std::{
    collections::HashSet,
    fmt::{Debug, Formatter},
    future::Future,
    hash::Hash,
    sync::{Arc, Mutex},
};
use tokio::sync::oneshot;

/// The externally supplied lookup the scheduler coalesces calls to. Given a
/// set of users, it eventually yields either their device-keys records or an
/// error. The scheduler never runs its own action more than once at a time.
pub(super) type QueryAction<U, R, E> =
    Box<dyn Fn(HashSet<U>) -> BoxFuture<'static, Result<Response<U, R>, E>> + Send + Sync>;

#[derive(thiserror::Error, Debug)]
pub enum QueryError<E> {
    /// `query` was called with an empty user set. Rejected up front; the wave
    /// machinery is never touched.
    #[error("keys query issued with an empty set of users")]
    EmptyUsers,
    /// The query action failed. Every waiter of the failed wave receives the
    /// same error value; the next query starts over from a clean slate.
    #[error("keys query failed: {0}")]
    Action(#[source] Arc<E>),
    /// The executor task was dropped before the wave settled. Only happens
    /// when the runtime the wave was launched on is torn down.
    #[error("keys query was interrupted before it completed")]
    Interrupted,
}

/// `KeysQueryScheduler` coalesces overlapping requests to look up device-keys
/// records for sets of users, so that the expensive underlying lookup runs at
/// most once per wave of demand while every caller still receives a correct,
/// up-to-date answer.
///
/// Calls are classified against two wave slots:
/// - a caller whose users are all covered by the in-flight wave's aggregated
///   set rides that wave and shares its result;
/// - a caller introducing any new user defers to the single pending wave,
///   which aggregates the union of all deferred requests and is promoted the
///   moment the in-flight wave settles;
/// - with no wave in flight, the caller launches one immediately.
///
/// Each caller is handed back exactly the users it asked for, projected out
/// of its wave's response. Results are not cached: once a wave settles, the
/// next query starts a fresh one.
///
/// The scheduler is cheap to clone and shares its state across clones, so it
/// can be handed to every task that needs keys.
pub struct KeysQueryScheduler<U, R, E> {
    inner: Arc<SchedulerInner<U, R, E>>,
}

pub(super) struct SchedulerInner<U, R, E> {
    pub(super) action: QueryAction<U, R, E>,
    pub(super) waves: Mutex<WaveRegistry<U, R, E>>,
}

impl<U, R, E> Clone for KeysQueryScheduler<U, R, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<U, R, E> Debug for KeysQueryScheduler<U, R, E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "KeysQueryScheduler[{:?}]", self.status())
    }
}

impl<U, R, E> KeysQueryScheduler<U, R, E> {
    /// Occupancy of the wave slots at this instant.
    ///
    /// ## Panics
    /// If the wave registry mutex is poisoned.
    #[must_use]
    pub fn status(&self) -> SchedulerStatus {
        self.inner.waves.lock().unwrap().status()
    }
}

impl<U, R, E> KeysQueryScheduler<U, R, E>
where
    U: Clone + Eq + Hash + Send + Sync + 'static,
    R: Clone + Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    #[must_use]
    pub fn new<F, Fut>(action: F) -> Self
    where
        F: Fn(HashSet<U>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Response<U, R>, E>> + Send + 'static,
    {
        Self {
            inner: Arc::new(SchedulerInner {
                action: Box::new(move |users| action(users).boxed()),
                waves: Mutex::new(WaveRegistry::default()),
            }),
        }
    }

    /// Request device-keys records for `users`.
    ///
    /// Classification against the wave slots happens before this returns, so
    /// two calls made one after the other from the same task are guaranteed
    /// to be ordered: if neither fits the in-flight wave, both are served by
    /// the same pending wave. The returned handle resolves once the caller's
    /// wave settles, with the response restricted to `users`.
    ///
    /// Dropping the handle abandons the result without disturbing the wave or
    /// any other caller.
    ///
    /// ## Panics
    /// If the wave registry mutex is poisoned, or if a wave must be launched
    /// while not running inside a tokio runtime.
    pub fn query(&self, users: HashSet<U>) -> QueryHandle<U, R, E> {
        let (sender, receiver) = oneshot::channel();

        if users.is_empty() {
            // Misuse; an empty set must never launch a wave.
            let _ = sender.send(Err(QueryError::EmptyUsers));
            return QueryHandle::new(receiver);
        }

        let launch = {
            let mut waves = self.inner.waves.lock().unwrap();
            waves.classify_and_attach(Waiter::new(users, sender))
        };

        if let Some(snapshot) = launch {
            executor::launch(Arc::clone(&self.inner), snapshot);
        }

        QueryHandle::new(receiver)
    }
}
