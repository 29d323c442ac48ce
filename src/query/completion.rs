use crate::query::{scheduler::QueryError, state::Response};
use futures::FutureExt;
use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};
use tokio::sync::oneshot;

/// Awaitable outcome of one `query` call. Polls the waiter's channel until the
/// wave it is attached to settles.
///
/// Dropping the handle abandons the caller's interest in the result; the wave
/// itself, and every other caller attached to it, carry on unaffected.
#[must_use = "a keys query resolves nothing unless its handle is awaited"]
pub struct QueryHandle<U, R, E> {
    receiver: oneshot::Receiver<Result<Response<U, R>, QueryError<E>>>,
}

impl<U, R, E> QueryHandle<U, R, E> {
    pub(super) fn new(
        receiver: oneshot::Receiver<Result<Response<U, R>, QueryError<E>>>,
    ) -> Self {
        Self { receiver }
    }
}

impl<U, R, E> Future for QueryHandle<U, R, E> {
    type Output = Result<Response<U, R>, QueryError<E>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.receiver.poll_unpin(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            // The executor went away without settling the wave, which only
            // happens when the runtime it was spawned on is torn down.
            Poll::Ready(Err(_)) => Poll::Ready(Err(QueryError::Interrupted)),
            Poll::Pending => Poll::Pending,
        }
    }
}
