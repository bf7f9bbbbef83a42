//! Reactive observation engine
//!
//! Every observation is an independent task running one query shape:
//!
//! ```text
//! subscribed -> running(initial) -> idle(last) <-> running(rerun) -> cancelled
//! ```
//!
//! The task re-runs its query whenever the writer publishes new generations
//! for a table the query reads, and delivers a result only when it differs
//! from the last one delivered. A result computed while a relevant commit
//! landed is discarded and the query runs again. After a few discards in a
//! row the next run holds the commit gate, so it always completes against a
//! settled state.
//!
//! Results go to a single-slot mailbox: a newer result replaces one the
//! consumer has not taken yet, so neither the writer nor other observers
//! wait on a slow consumer and an idle consumer costs one value.

use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use futures::Stream;
use futures::future::BoxFuture;
use futures::task::AtomicWaker;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::data::schema::Generations;
use crate::data::{ReadContext, TableSet};
use crate::error::Result;
use crate::metrics::{
    OBSERVER_DELIVERIES_TOTAL, OBSERVER_DISCARDS_TOTAL, OBSERVER_RERUNS_TOTAL, OBSERVERS_ACTIVE,
};

/// Optimistic runs discarded in a row before the next run holds the gate
const MAX_DISCARDED_RUNS: u32 = 2;

/// A fixed read shape that can be observed
pub trait Query: Send + Sync + 'static {
    type Output: Clone + PartialEq + Send + Sync + 'static;

    /// Label for logs and metrics
    const NAME: &'static str;

    /// Tables the query reads; writes to any of them trigger a rerun.
    fn dependencies(&self) -> TableSet;

    fn fetch<'a>(&'a self, ctx: &'a ReadContext) -> BoxFuture<'a, Result<Self::Output>>;
}

// =============================================================================
// Mailbox
// =============================================================================

struct Slot<T> {
    pending: Option<Result<T>>,
    /// Last value the consumer took
    taken: Option<T>,
    closed: bool,
}

/// Latest undelivered result of one observation
struct Mailbox<T> {
    slot: Mutex<Slot<T>>,
    waker: AtomicWaker,
}

impl<T: Clone + PartialEq> Mailbox<T> {
    fn new() -> Self {
        Self {
            slot: Mutex::new(Slot {
                pending: None,
                taken: None,
                closed: false,
            }),
            waker: AtomicWaker::new(),
        }
    }

    fn slot(&self) -> MutexGuard<'_, Slot<T>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace any untaken result. A value equal to the one the consumer
    /// already holds just clears the slot.
    fn post(&self, result: Result<T>) {
        {
            let mut slot = self.slot();
            match result {
                Ok(value) if slot.taken.as_ref() == Some(&value) => slot.pending = None,
                result => slot.pending = Some(result),
            }
        }
        self.waker.wake();
    }

    fn close(&self) {
        self.slot().closed = true;
        self.waker.wake();
    }

    fn poll_take(&self, cx: &mut Context<'_>) -> Poll<Option<Result<T>>> {
        self.waker.register(cx.waker());

        let mut slot = self.slot();
        match slot.pending.take() {
            Some(Ok(value)) => {
                slot.taken = Some(value.clone());
                Poll::Ready(Some(Ok(value)))
            }
            Some(Err(error)) => Poll::Ready(Some(Err(error))),
            None if slot.closed => Poll::Ready(None),
            None => Poll::Pending,
        }
    }
}

/// Producer end; closes the mailbox when the task ends or is aborted.
struct Outbox<T: Clone + PartialEq>(Arc<Mailbox<T>>);

impl<T: Clone + PartialEq> Drop for Outbox<T> {
    fn drop(&mut self) {
        self.0.close();
    }
}

// =============================================================================
// Observation
// =============================================================================

/// A live query result stream
///
/// Yields the first result as soon as the query has run once, then the
/// latest distinct result after relevant commits. An error is yielded once
/// and ends the stream. Dropping the observation cancels it.
pub struct Observation<T: Clone + PartialEq> {
    mailbox: Arc<Mailbox<T>>,
    task: JoinHandle<()>,
    cancelled: bool,
}

impl<T: Clone + PartialEq + Send + Sync + 'static> Observation<T> {
    pub(crate) fn spawn<Q>(query: Q, ctx: ReadContext, commits: watch::Receiver<Generations>) -> Self
    where
        Q: Query<Output = T>,
    {
        let mailbox = Arc::new(Mailbox::new());
        let outbox = Outbox(mailbox.clone());
        let task = tokio::spawn(observe(query, ctx, commits, outbox));

        Self {
            mailbox,
            task,
            cancelled: false,
        }
    }
}

impl<T: Clone + PartialEq> Observation<T> {
    /// Stop observing. Results computed but not yet received are discarded.
    pub fn cancel(&mut self) {
        if self.cancelled {
            return;
        }
        self.cancelled = true;
        self.task.abort();
        self.mailbox.slot().pending = None;
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Wait for the next delivered result.
    pub async fn next_value(&mut self) -> Option<Result<T>> {
        futures::StreamExt::next(self).await
    }
}

impl<T: Clone + PartialEq> Stream for Observation<T> {
    type Item = Result<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.cancelled {
            return Poll::Ready(None);
        }
        self.mailbox.poll_take(cx)
    }
}

impl<T: Clone + PartialEq> Drop for Observation<T> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Keeps the active-observer gauge in step with the task's lifetime,
/// including when the task is aborted.
struct ActiveObserver {
    name: &'static str,
}

impl ActiveObserver {
    fn new(name: &'static str) -> Self {
        OBSERVERS_ACTIVE.inc();
        tracing::debug!(query = name, "Observation started");
        Self { name }
    }
}

impl Drop for ActiveObserver {
    fn drop(&mut self) {
        OBSERVERS_ACTIVE.dec();
        tracing::debug!(query = self.name, "Observation stopped");
    }
}

async fn observe<Q: Query>(
    query: Q,
    ctx: ReadContext,
    mut commits: watch::Receiver<Generations>,
    outbox: Outbox<Q::Output>,
) {
    let _active = ActiveObserver::new(Q::NAME);
    let dependencies = query.dependencies();
    let mut last: Option<Q::Output> = None;
    let mut seen = commits.borrow_and_update().fingerprint(dependencies);
    let mut discarded = 0;

    loop {
        OBSERVER_RERUNS_TOTAL.with_label_values(&[Q::NAME]).inc();
        let pinned = if discarded >= MAX_DISCARDED_RUNS {
            tracing::debug!(query = Q::NAME, discarded, "Holding commits for rerun");
            let guard = ctx.gate.hold_commits().await;
            // Every commit so far is published and no other can land.
            seen = commits.borrow_and_update().fingerprint(dependencies);
            Some(guard)
        } else {
            None
        };
        let result = query.fetch(&ctx).await;

        {
            // Holding the borrow keeps the writer from publishing (and so
            // from acknowledging) a commit until this delivery is posted.
            let current = commits.borrow();
            let fingerprint = current.fingerprint(dependencies);
            if fingerprint != seen {
                // A relevant commit landed mid-query; the result may predate it.
                seen = fingerprint;
                discarded += 1;
                OBSERVER_DISCARDS_TOTAL.with_label_values(&[Q::NAME]).inc();
                continue;
            }
            discarded = 0;

            match result {
                Ok(value) => {
                    if last.as_ref() != Some(&value) {
                        outbox.0.post(Ok(value.clone()));
                        OBSERVER_DELIVERIES_TOTAL.with_label_values(&[Q::NAME]).inc();
                        last = Some(value);
                    }
                }
                Err(error) => {
                    tracing::warn!(query = Q::NAME, error = %error, "Observation failed");
                    outbox.0.post(Err(error));
                    return;
                }
            }
        }
        drop(pinned);

        // Idle until a commit touches one of our tables.
        loop {
            if commits.changed().await.is_err() {
                return;
            }
            let fingerprint = commits.borrow_and_update().fingerprint(dependencies);
            if fingerprint != seen {
                seen = fingerprint;
                break;
            }
        }
    }
}
