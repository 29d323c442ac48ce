use crate::query::scheduler::QueryError;
use std::{
    collections::{HashMap, HashSet},
    hash::Hash,
    sync::Arc,
};
use tokio::sync::oneshot;

/// The outcome of one keys query: a device-keys record per requested user.
/// Users absent from the backing directory are simply absent from the map.
pub type Response<U, R> = HashMap<U, R>;

/// Shared outcome of a settled wave. A successful response is handed to every
/// waiter behind one `Arc`; a failure is the single error value every waiter
/// of the wave observes.
pub(super) type WaveOutcome<U, R, E> = Result<Arc<Response<U, R>>, Arc<E>>;

/// Occupancy of the scheduler's two wave slots.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SchedulerStatus {
    /// No wave exists; the next query launches one immediately.
    Idle,
    /// One wave is in flight and no caller has deferred behind it.
    InFlight,
    /// One wave is in flight and a pending wave is aggregating deferred callers.
    Backlogged,
}

/// One outstanding `query` call: the set of users it asked for and the channel
/// its outcome is delivered on. Signalling consumes the waiter, so each caller
/// hears about its wave exactly once.
pub(super) struct Waiter<U, R, E> {
    requested: HashSet<U>,
    sender: oneshot::Sender<Result<Response<U, R>, QueryError<E>>>,
}

impl<U, R, E> Waiter<U, R, E>
where
    U: Clone + Eq + Hash,
    R: Clone,
{
    pub(super) fn new(
        requested: HashSet<U>,
        sender: oneshot::Sender<Result<Response<U, R>, QueryError<E>>>,
    ) -> Self {
        Self { requested, sender }
    }

    /// Deliver the wave outcome, restricted to this waiter's own requested set.
    fn signal(self, outcome: &WaveOutcome<U, R, E>) {
        let message = match outcome {
            Ok(response) => Ok(self
                .requested
                .iter()
                .filter_map(|user| {
                    response
                        .get(user)
                        .map(|record| (user.clone(), record.clone()))
                })
                .collect()),
            Err(error) => Err(QueryError::Action(Arc::clone(error))),
        };
        if self.sender.send(message).is_err() {
            // The caller went away before its wave settled. Its result is
            // discarded; nothing else in the wave is affected.
            tracing::debug!("keys query caller dropped its handle before the wave settled");
        }
    }
}

/// The unit of coalescing: the aggregated user set and the waiters it serves,
/// in attachment order.
pub(super) struct Wave<U, R, E> {
    users: HashSet<U>,
    waiters: Vec<Waiter<U, R, E>>,
}

impl<U, R, E> Wave<U, R, E>
where
    U: Clone + Eq + Hash,
    R: Clone,
{
    fn new(waiter: Waiter<U, R, E>) -> Self {
        Self {
            users: waiter.requested.clone(),
            waiters: vec![waiter],
        }
    }

    /// Attach a waiter whose requested set is already covered. The aggregated
    /// set must not change once the wave is in flight.
    fn attach(&mut self, waiter: Waiter<U, R, E>) {
        self.waiters.push(waiter);
    }

    /// Attach a waiter to a still-pending wave, growing the aggregated set to
    /// the union of all deferred requests.
    fn absorb(&mut self, waiter: Waiter<U, R, E>) {
        self.users.extend(waiter.requested.iter().cloned());
        self.waiters.push(waiter);
    }

    pub(super) fn waiter_count(&self) -> usize {
        self.waiters.len()
    }

    /// Fan the outcome out to every waiter of this wave.
    pub(super) fn signal(self, outcome: &WaveOutcome<U, R, E>) {
        for waiter in self.waiters {
            waiter.signal(outcome);
        }
    }
}

/// Tracks the (in-flight, pending) wave pair. Purely synchronous; the
/// scheduler drives it under a single mutex that is never held across a
/// suspension point.
pub(super) struct WaveRegistry<U, R, E> {
    in_flight: Option<Wave<U, R, E>>,
    pending: Option<Wave<U, R, E>>,
}

impl<U, R, E> Default for WaveRegistry<U, R, E> {
    fn default() -> Self {
        Self {
            in_flight: None,
            pending: None,
        }
    }
}

impl<U, R, E> WaveRegistry<U, R, E> {
    pub(super) fn status(&self) -> SchedulerStatus {
        match (&self.in_flight, &self.pending) {
            (None, _) => SchedulerStatus::Idle,
            (Some(_), None) => SchedulerStatus::InFlight,
            (Some(_), Some(_)) => SchedulerStatus::Backlogged,
        }
    }
}

impl<U, R, E> WaveRegistry<U, R, E>
where
    U: Clone + Eq + Hash,
    R: Clone,
{
    /// Classify one `query` call against the current slots and attach its
    /// waiter. Returns the aggregated-set snapshot to invoke the action with
    /// when the call must launch a new wave, `None` when the caller rides an
    /// existing one.
    ///
    /// A caller whose users are all already being fetched joins the in-flight
    /// wave; a caller introducing any new user defers to the pending wave so
    /// its result reflects the full request.
    pub(super) fn classify_and_attach(&mut self, waiter: Waiter<U, R, E>) -> Option<HashSet<U>> {
        match &mut self.in_flight {
            None => {
                debug_assert!(
                    self.pending.is_none(),
                    "a pending wave must not outlive the in-flight wave it deferred to"
                );
                let wave = Wave::new(waiter);
                let snapshot = wave.users.clone();
                self.in_flight = Some(wave);
                Some(snapshot)
            }
            Some(wave) if waiter.requested.is_subset(&wave.users) => {
                wave.attach(waiter);
                None
            }
            Some(_) => {
                if let Some(pending) = &mut self.pending {
                    pending.absorb(waiter);
                } else {
                    self.pending = Some(Wave::new(waiter));
                }
                None
            }
        }
    }

    /// Retire the in-flight wave and promote the pending one, atomically with
    /// respect to dispatch: a caller never observes a gap in which neither
    /// wave occupies the in-flight slot.
    ///
    /// Returns the settled wave (ready to be signalled outside the lock) and
    /// the promoted wave's aggregated-set snapshot, if there is one.
    pub(super) fn settle(&mut self) -> (Wave<U, R, E>, Option<HashSet<U>>) {
        let settled = self
            .in_flight
            .take()
            .expect("settle is only called by the executor of the in-flight wave");
        self.in_flight = self.pending.take();
        let promoted = self.in_flight.as_ref().map(|wave| wave.users.clone());
        (settled, promoted)
    }
}
