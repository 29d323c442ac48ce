use crate::query::scheduler::SchedulerInner;
use std::{collections::HashSet, hash::Hash, sync::Arc};

/// Spawn the executor for a freshly launched wave on a detached task, so that
/// every caller's query makes progress regardless of what its own task does.
///
/// One executor services a whole chain of waves: when a settled wave promotes
/// a pending one, the same task carries on with the promoted snapshot instead
/// of spawning again.
pub(super) fn launch<U, R, E>(inner: Arc<SchedulerInner<U, R, E>>, users: HashSet<U>)
where
    U: Clone + Eq + Hash + Send + Sync + 'static,
    R: Clone + Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    tokio::spawn(run(inner, users));
}

async fn run<U, R, E>(inner: Arc<SchedulerInner<U, R, E>>, mut users: HashSet<U>)
where
    U: Clone + Eq + Hash + Send + Sync + 'static,
    R: Clone + Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    loop {
        tracing::debug!(users = users.len(), "keys query wave in flight");

        // The action gets an owned copy of the snapshot; the registry keeps
        // its own for subset classification of late callers.
        let outcome = match (inner.action)(users.clone()).await {
            Ok(response) => Ok(Arc::new(response)),
            Err(error) => Err(Arc::new(error)),
        };

        let (settled, promoted) = {
            let mut waves = inner.waves.lock().unwrap();
            waves.settle()
        }; // release the registry before signalling

        tracing::debug!(
            waiters = settled.waiter_count(),
            success = outcome.is_ok(),
            backlogged = promoted.is_some(),
            "keys query wave settled"
        );
        settled.signal(&outcome);

        match promoted {
            Some(next) => users = next,
            None => break,
        }
    }
}
