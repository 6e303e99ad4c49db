//! Single-assignment completion handles.
//!
//! A [`Completer`] resolves a slot exactly once; every [`CompletionHandle`]
//! cloned from the same slot observes that one result. Later resolution
//! attempts are no-ops, which is what lets cancellation, timeouts and real
//! responses race safely.
//!
//! A handle can be consumed three ways, all surfacing the same result:
//!
//! - awaited as a [`Future`], or blocked on with [`CompletionHandle::wait`];
//! - through a begin/end callback pair (see [`callback`]);
//! - by attaching a continuation with [`CompletionHandle::on_complete`].
//!
//! Failures are stored as the full list of causes and collapsed by
//! [`unwrap_causes`] whenever they are surfaced: one distinct cause comes back
//! as itself, more than one as [`RequestError::Aggregate`].

pub mod callback;

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::mem;
use std::pin::Pin;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Waker};
use std::time::Duration;

use tokio::runtime::Handle;

use crate::error::{AggregateError, RequestError};

/// Opaque caller state associated with a handle, compared by identity.
pub type AsyncState = Arc<dyn Any + Send + Sync>;

/// Where a continuation runs once the handle resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Execution {
    /// On the resolving thread, before `resolve` returns.
    #[default]
    Inline,
    /// As a task on the tokio runtime current at attach time; inline when
    /// there is none.
    Scheduled,
}

type Outcome<T> = Result<T, Vec<RequestError>>;
type Continuation<T> = Box<dyn FnOnce(Result<T, RequestError>) + Send>;

enum State<T> {
    Pending {
        wakers: Vec<Waker>,
        continuations: Vec<Continuation<T>>,
    },
    Resolved(Outcome<T>),
}

impl<T> State<T> {
    fn is_pending(&self) -> bool {
        matches!(self, State::Pending { .. })
    }
}

struct Inner<T> {
    state: Mutex<State<T>>,
    resolved: Condvar,
    async_state: Option<AsyncState>,
}

/// A fresh unresolved slot with no caller state.
pub fn completion<T>() -> (Completer<T>, CompletionHandle<T>) {
    completion_with_state(None)
}

/// A fresh unresolved slot whose handles carry `async_state`.
pub fn completion_with_state<T>(
    async_state: Option<AsyncState>,
) -> (Completer<T>, CompletionHandle<T>) {
    let inner = Arc::new(Inner {
        state: Mutex::new(State::Pending {
            wakers: Vec::new(),
            continuations: Vec::new(),
        }),
        resolved: Condvar::new(),
        async_state,
    });

    (
        Completer {
            inner: Arc::clone(&inner),
        },
        CompletionHandle { inner },
    )
}

/// The write side of a completion slot.
pub struct Completer<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Completer<T> {
    fn clone(&self) -> Self {
        Completer {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + Send + 'static> Completer<T> {
    pub fn complete(&self, value: T) -> bool {
        self.settle(Ok(value))
    }

    pub fn fail(&self, cause: RequestError) -> bool {
        self.settle(Err(vec![cause]))
    }

    /// Fail with every cause at once. Observers see a single error when the
    /// causes collapse to one distinct cause.
    pub fn fail_many(&self, causes: impl IntoIterator<Item = RequestError>) -> bool {
        self.settle(Err(causes.into_iter().collect()))
    }

    pub fn resolve(&self, result: Result<T, RequestError>) -> bool {
        match result {
            Ok(value) => self.complete(value),
            Err(cause) => self.fail(cause),
        }
    }

    pub fn is_resolved(&self) -> bool {
        !lock(&self.inner.state).is_pending()
    }

    /// Whether `handle` observes the slot this completer resolves.
    pub fn feeds(&self, handle: &CompletionHandle<T>) -> bool {
        Arc::ptr_eq(&self.inner, &handle.inner)
    }

    /// Returns `false` if the slot was already resolved; `outcome` is dropped.
    fn settle(&self, outcome: Outcome<T>) -> bool {
        let surfaced = surface(&outcome);

        let (wakers, continuations) = {
            let mut state = lock(&self.inner.state);
            match mem::replace(&mut *state, State::Resolved(outcome)) {
                State::Pending {
                    wakers,
                    continuations,
                } => (wakers, continuations),
                previous @ State::Resolved(_) => {
                    *state = previous;
                    return false;
                }
            }
        };

        self.inner.resolved.notify_all();
        for waker in wakers {
            waker.wake();
        }
        for continuation in continuations {
            continuation(surfaced.clone());
        }

        true
    }
}

/// The read side of a completion slot. Cheap to clone.
pub struct CompletionHandle<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for CompletionHandle<T> {
    fn clone(&self) -> Self {
        CompletionHandle {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for CompletionHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionHandle")
            .field("resolved", &!lock(&self.inner.state).is_pending())
            .field("has_async_state", &self.inner.async_state.is_some())
            .finish()
    }
}

impl<T: Clone + Send + 'static> CompletionHandle<T> {
    /// A handle that is already failed with `cause`.
    pub fn failed(cause: RequestError) -> Self {
        let (completer, handle) = completion();
        completer.fail(cause);
        handle
    }

    pub fn async_state(&self) -> Option<&AsyncState> {
        self.inner.async_state.as_ref()
    }

    pub fn is_resolved(&self) -> bool {
        !lock(&self.inner.state).is_pending()
    }

    /// Whether both handles observe the same slot.
    pub fn same_slot(&self, other: &CompletionHandle<T>) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn try_result(&self) -> Option<Result<T, RequestError>> {
        match &*lock(&self.inner.state) {
            State::Resolved(outcome) => Some(surface(outcome)),
            State::Pending { .. } => None,
        }
    }

    /// Block the current thread until the slot resolves or `timeout` elapses.
    ///
    /// Elapsing yields [`RequestError::Timeout`] without resolving the slot.
    /// Do not call this from inside an async task; await the handle instead.
    pub fn wait(&self, timeout: Option<Duration>) -> Result<T, RequestError> {
        let state = lock(&self.inner.state);
        let state = match timeout {
            Some(timeout) => {
                self.inner
                    .resolved
                    .wait_timeout_while(state, timeout, |state| state.is_pending())
                    .unwrap_or_else(PoisonError::into_inner)
                    .0
            }
            None => self
                .inner
                .resolved
                .wait_while(state, |state| state.is_pending())
                .unwrap_or_else(PoisonError::into_inner),
        };

        match &*state {
            State::Resolved(outcome) => surface(outcome),
            State::Pending { .. } => Err(RequestError::Timeout),
        }
    }

    /// Await with a deadline; elapsing yields [`RequestError::Timeout`].
    pub async fn timeout(self, timeout: Duration) -> Result<T, RequestError> {
        tokio::time::timeout(timeout, self)
            .await
            .unwrap_or(Err(RequestError::Timeout))
    }

    /// Run `continuation` exactly once with the surfaced result.
    ///
    /// Attaching to an already resolved handle runs it straight away.
    pub fn on_complete<F>(&self, execution: Execution, continuation: F)
    where
        F: FnOnce(Result<T, RequestError>) + Send + 'static,
    {
        let continuation: Continuation<T> = match (execution, Handle::try_current()) {
            (Execution::Scheduled, Ok(runtime)) => Box::new(move |result| {
                runtime.spawn(async move { continuation(result) });
            }),
            _ => Box::new(continuation),
        };

        let mut state = lock(&self.inner.state);
        match &mut *state {
            State::Pending { continuations, .. } => continuations.push(continuation),
            State::Resolved(outcome) => {
                let result = surface(outcome);
                drop(state);
                continuation(result);
            }
        }
    }
}

impl<T: Clone + Send + 'static> Future for CompletionHandle<T> {
    type Output = Result<T, RequestError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = lock(&self.inner.state);

        match &mut *state {
            State::Resolved(outcome) => Poll::Ready(surface(outcome)),
            State::Pending { wakers, .. } => {
                if !wakers.iter().any(|waker| waker.will_wake(cx.waker())) {
                    wakers.push(cx.waker().clone());
                }
                Poll::Pending
            }
        }
    }
}

/// Collapse a set of failure causes into what callers observe.
///
/// Nested aggregates are flattened and duplicates removed. Exactly one
/// distinct cause is returned unchanged, with its source chain intact; any
/// other count yields an aggregate of the distinct causes in order.
pub fn unwrap_causes(causes: &[RequestError]) -> RequestError {
    let mut distinct = Vec::with_capacity(causes.len());
    flatten_into(causes, &mut distinct);

    if distinct.len() == 1 {
        distinct.swap_remove(0)
    } else {
        RequestError::Aggregate(AggregateError::new(distinct))
    }
}

fn flatten_into(causes: &[RequestError], distinct: &mut Vec<RequestError>) {
    for cause in causes {
        match cause {
            RequestError::Aggregate(aggregate) => flatten_into(aggregate.causes(), distinct),
            cause if !distinct.contains(cause) => distinct.push(cause.clone()),
            _ => {}
        }
    }
}

fn surface<T: Clone>(outcome: &Outcome<T>) -> Result<T, RequestError> {
    match outcome {
        Ok(value) => Ok(value.clone()),
        Err(causes) => Err(unwrap_causes(causes)),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
