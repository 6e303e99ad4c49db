//! Stream id multiplexing for one connection.
//!
//! Every outstanding request owns one stream id and one [`PendingOperation`].
//! The id pool and the pending map live behind a single mutex so allocation,
//! resolution, cancellation and the timeout sweep are atomic per id. Handles
//! are always resolved after the lock is released, so continuations never run
//! while the table is held.

mod stream_ids;
pub mod sweeper;

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::completion::{completion_with_state, AsyncState, Completer, CompletionHandle};
use crate::cql::header::ProtocolVersion;
use crate::error::{MuxError, RequestError};

pub use stream_ids::MAX_STREAM_IDS;
pub use sweeper::spawn_timeout_sweeper;

use stream_ids::StreamIdSet;

/// What happened to a result handed to [`Multiplexer::resolve`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Resolved,
    /// No operation was waiting on the stream id.
    Dropped,
}

pub struct PendingOperation<T> {
    pub stream_id: i16,
    pub created_at: Instant,
    pub deadline: Option<Instant>,
    completer: Completer<T>,
}

impl<T> fmt::Debug for PendingOperation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingOperation")
            .field("stream_id", &self.stream_id)
            .field("created_at", &self.created_at)
            .field("deadline", &self.deadline)
            .finish()
    }
}

struct Table<T> {
    ids: StreamIdSet,
    pending: HashMap<i16, PendingOperation<T>>,
}

pub struct Multiplexer<T> {
    table: Mutex<Table<T>>,
    dropped_responses: AtomicU64,
}

impl<T: Clone + Send + 'static> Multiplexer<T> {
    pub fn new(capacity: usize) -> Self {
        Multiplexer {
            table: Mutex::new(Table {
                ids: StreamIdSet::new(capacity),
                pending: HashMap::new(),
            }),
            dropped_responses: AtomicU64::new(0),
        }
    }

    /// A multiplexer using every stream id `version` can address.
    pub fn for_version(version: ProtocolVersion) -> Self {
        Multiplexer::new(version.max_stream_ids())
    }

    pub fn capacity(&self) -> usize {
        self.lock().ids.capacity()
    }

    pub fn outstanding(&self) -> usize {
        self.lock().pending.len()
    }

    /// Results that arrived for stream ids nobody was waiting on.
    pub fn dropped_responses(&self) -> u64 {
        self.dropped_responses.load(Ordering::Relaxed)
    }

    pub fn allocate(
        &self,
        deadline: Option<Instant>,
    ) -> Result<(i16, CompletionHandle<T>), MuxError> {
        self.allocate_with_state(deadline, None)
    }

    pub fn allocate_with_state(
        &self,
        deadline: Option<Instant>,
        async_state: Option<AsyncState>,
    ) -> Result<(i16, CompletionHandle<T>), MuxError> {
        let mut table = self.lock();
        let stream_id = table.ids.allocate().ok_or(MuxError::ExhaustedStreamIds {
            capacity: table.ids.capacity(),
        })?;

        let (completer, handle) = completion_with_state(async_state);
        table.pending.insert(
            stream_id,
            PendingOperation {
                stream_id,
                created_at: Instant::now(),
                deadline,
                completer,
            },
        );
        trace!(stream_id, outstanding = table.pending.len(), "allocated stream id");

        Ok((stream_id, handle))
    }

    /// Hand `result` to whoever waits on `stream_id` and free the id.
    pub fn resolve(&self, stream_id: i16, result: Result<T, RequestError>) -> Resolution {
        match self.take(stream_id) {
            Some(operation) => {
                operation.completer.resolve(result);
                Resolution::Resolved
            }
            None => {
                self.dropped_responses.fetch_add(1, Ordering::Relaxed);
                warn!(stream_id, "dropping response for unknown stream id");
                Resolution::Dropped
            }
        }
    }

    /// Fail the operation with [`RequestError::Cancelled`]. The id can be
    /// allocated again straight away.
    pub fn cancel(&self, stream_id: i16) -> bool {
        self.fail(stream_id, RequestError::Cancelled)
    }

    /// Fail the operation with [`RequestError::Timeout`] regardless of its
    /// deadline.
    pub fn expire(&self, stream_id: i16) -> bool {
        self.fail(stream_id, RequestError::Timeout)
    }

    /// Time out the operation on `stream_id` only if `handle` observes it.
    pub fn expire_handle(&self, stream_id: i16, handle: &CompletionHandle<T>) -> bool {
        self.fail_handle(stream_id, handle, RequestError::Timeout)
    }

    /// Fail the operation on `stream_id` with `cause` only if `handle`
    /// observes it.
    ///
    /// Once a request has resolved its id may already belong to a newer
    /// request; that one is left alone.
    pub fn fail_handle(
        &self,
        stream_id: i16,
        handle: &CompletionHandle<T>,
        cause: RequestError,
    ) -> bool {
        let operation = {
            let mut table = self.lock();
            let owned = table
                .pending
                .get(&stream_id)
                .is_some_and(|operation| operation.completer.feeds(handle));
            if owned {
                Self::remove(&mut table, stream_id)
            } else {
                None
            }
        };

        match operation {
            Some(operation) => operation.completer.fail(cause),
            None => false,
        }
    }

    /// Time out every operation whose deadline is at or before `now`.
    pub fn sweep_expired(&self, now: Instant) -> Vec<i16> {
        let expired: Vec<PendingOperation<T>> = {
            let mut table = self.lock();
            let ids: Vec<i16> = table
                .pending
                .values()
                .filter(|op| op.deadline.is_some_and(|deadline| deadline <= now))
                .map(|op| op.stream_id)
                .collect();

            ids.iter()
                .filter_map(|stream_id| Self::remove(&mut table, *stream_id))
                .collect()
        };

        if !expired.is_empty() {
            debug!(count = expired.len(), "timing out expired requests");
        }

        expired
            .into_iter()
            .map(|operation| {
                operation.completer.fail(RequestError::Timeout);
                operation.stream_id
            })
            .collect()
    }

    /// Fail every outstanding operation with `cause` and release all ids.
    pub fn fail_all(&self, cause: RequestError) -> usize {
        let drained: Vec<PendingOperation<T>> = {
            let mut table = self.lock();
            table.ids.clear();
            table.pending.drain().map(|(_, op)| op).collect()
        };

        if !drained.is_empty() {
            debug!(count = drained.len(), %cause, "failing outstanding requests");
        }

        for operation in &drained {
            operation.completer.fail(cause.clone());
        }
        drained.len()
    }

    /// Fail the operation on `stream_id` with `cause` and free the id.
    pub fn fail(&self, stream_id: i16, cause: RequestError) -> bool {
        match self.take(stream_id) {
            Some(operation) => operation.completer.fail(cause),
            None => false,
        }
    }

    fn take(&self, stream_id: i16) -> Option<PendingOperation<T>> {
        Self::remove(&mut self.lock(), stream_id)
    }

    fn remove(table: &mut Table<T>, stream_id: i16) -> Option<PendingOperation<T>> {
        let operation = table.pending.remove(&stream_id)?;
        table.ids.free(stream_id);
        Some(operation)
    }

    fn lock(&self) -> MutexGuard<'_, Table<T>> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> fmt::Debug for Multiplexer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("Multiplexer")
            .field("capacity", &table.ids.capacity())
            .field("in_use", &table.ids.in_use())
            .field("dropped_responses", &self.dropped_responses.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn pool_of_one_is_exhausted_by_a_second_allocation() {
        let mux = Multiplexer::<u32>::new(1);

        let (first, _handle) = mux.allocate(None).unwrap();
        assert_eq!(first, 0);
        assert_eq!(
            mux.allocate(None).unwrap_err(),
            MuxError::ExhaustedStreamIds { capacity: 1 }
        );

        assert_eq!(mux.resolve(first, Ok(1)), Resolution::Resolved);
        assert!(mux.allocate(None).is_ok());
    }

    #[test]
    fn capacity_follows_the_protocol_version() {
        assert_eq!(Multiplexer::<()>::for_version(ProtocolVersion::V2).capacity(), 128);
        assert_eq!(Multiplexer::<()>::for_version(ProtocolVersion::V4).capacity(), 32768);
    }

    #[test]
    fn resolve_delivers_and_frees_the_id() {
        let mux = Multiplexer::new(8);
        let (stream_id, handle) = mux.allocate(None).unwrap();

        assert_eq!(mux.resolve(stream_id, Ok("rows")), Resolution::Resolved);

        assert_eq!(handle.try_result(), Some(Ok("rows")));
        assert_eq!(mux.outstanding(), 0);
        assert_eq!(mux.allocate(None).unwrap().0, stream_id);
    }

    #[test]
    fn unknown_and_repeated_ids_are_dropped() {
        let mux = Multiplexer::new(8);
        let (stream_id, handle) = mux.allocate(None).unwrap();

        assert_eq!(mux.resolve(5, Ok(0u8)), Resolution::Dropped);
        assert_eq!(mux.resolve(stream_id, Ok(1)), Resolution::Resolved);
        assert_eq!(mux.resolve(stream_id, Ok(2)), Resolution::Dropped);

        assert_eq!(handle.try_result(), Some(Ok(1)));
        assert_eq!(mux.dropped_responses(), 2);
    }

    #[test]
    fn cancel_releases_the_id_and_late_responses_drop() {
        let mux = Multiplexer::new(8);
        let (stream_id, handle) = mux.allocate(None).unwrap();

        assert!(mux.cancel(stream_id));
        assert_eq!(handle.try_result(), Some(Err(RequestError::Cancelled)));
        assert!(!mux.cancel(stream_id));

        assert_eq!(mux.resolve(stream_id, Ok(3u8)), Resolution::Dropped);
        assert_eq!(handle.try_result(), Some(Err(RequestError::Cancelled)));
    }

    #[test]
    fn sweep_only_times_out_elapsed_deadlines() {
        let mux = Multiplexer::<u8>::new(8);
        let now = Instant::now();
        let (late, late_handle) = mux.allocate(Some(now)).unwrap();
        let (_, future_handle) = mux.allocate(Some(now + Duration::from_secs(60))).unwrap();
        let (_, unbounded_handle) = mux.allocate(None).unwrap();

        assert_eq!(mux.sweep_expired(now), vec![late]);

        assert_eq!(late_handle.try_result(), Some(Err(RequestError::Timeout)));
        assert!(!future_handle.is_resolved());
        assert!(!unbounded_handle.is_resolved());
        assert_eq!(mux.outstanding(), 2);
    }

    #[test]
    fn expire_times_out_one_operation() {
        let mux = Multiplexer::<u8>::new(2);
        let (stream_id, handle) = mux.allocate(None).unwrap();

        assert!(mux.expire(stream_id));
        assert_eq!(handle.wait(None), Err(RequestError::Timeout));
        assert_eq!(mux.outstanding(), 0);
    }

    #[test]
    fn expire_handle_leaves_a_reused_id_alone() {
        let mux = Multiplexer::<u8>::new(1);
        let (stream_id, first) = mux.allocate(None).unwrap();
        mux.resolve(stream_id, Ok(1));

        let (reused, second) = mux.allocate(None).unwrap();
        assert_eq!(reused, stream_id);

        assert!(!mux.expire_handle(stream_id, &first));
        assert!(!second.is_resolved());

        assert!(mux.expire_handle(stream_id, &second));
        assert_eq!(second.try_result(), Some(Err(RequestError::Timeout)));
        assert_eq!(mux.outstanding(), 0);
    }

    #[test]
    fn fail_all_resolves_everything_with_the_cause() {
        let mux = Multiplexer::<u8>::new(4);
        let handles: Vec<_> = (0..4).map(|_| mux.allocate(None).unwrap().1).collect();

        assert_eq!(mux.fail_all(RequestError::ConnectionClosed), 4);

        for handle in handles {
            assert_eq!(handle.try_result(), Some(Err(RequestError::ConnectionClosed)));
        }
        assert_eq!(mux.outstanding(), 0);
        assert_eq!(mux.allocate(None).unwrap().0, 0);
    }

    #[test]
    fn allocation_carries_async_state() {
        let mux = Multiplexer::<u8>::new(1);
        let state: AsyncState = Arc::new("caller");

        let (_, handle) = mux.allocate_with_state(None, Some(Arc::clone(&state))).unwrap();

        assert!(Arc::ptr_eq(handle.async_state().unwrap(), &state));
    }

    #[derive(Debug, Clone)]
    enum Step {
        Allocate { timeout: Option<u8> },
        Resolve(i16),
        Cancel(i16),
        Sweep(u8),
    }

    fn step() -> impl Strategy<Value = Step> {
        prop_oneof![
            proptest::option::of(0u8..4).prop_map(|timeout| Step::Allocate { timeout }),
            (0i16..10).prop_map(Step::Resolve),
            (0i16..10).prop_map(Step::Cancel),
            (0u8..4).prop_map(Step::Sweep),
        ]
    }

    proptest! {
        #[test]
        fn interleavings_never_double_resolve(steps in proptest::collection::vec(step(), 1..200)) {
            let mux = Multiplexer::<u32>::new(8);
            let base = Instant::now();
            let resolutions = Arc::new(AtomicUsize::new(0));
            let mut live: HashSet<i16> = HashSet::new();
            let mut handles = Vec::new();

            for step in steps {
                match step {
                    Step::Allocate { timeout } => {
                        let deadline = timeout.map(|t| base + Duration::from_secs(t.into()));
                        match mux.allocate(deadline) {
                            Ok((stream_id, handle)) => {
                                prop_assert!(live.insert(stream_id), "id {} handed out twice", stream_id);
                                let counter = Arc::clone(&resolutions);
                                handle.on_complete(crate::completion::Execution::Inline, move |_| {
                                    counter.fetch_add(1, Ordering::SeqCst);
                                });
                                handles.push(handle);
                            }
                            Err(MuxError::ExhaustedStreamIds { .. }) => prop_assert_eq!(live.len(), 8),
                        }
                    }
                    Step::Resolve(stream_id) => {
                        let resolution = mux.resolve(stream_id, Ok(stream_id as u32));
                        prop_assert_eq!(resolution == Resolution::Resolved, live.remove(&stream_id));
                    }
                    Step::Cancel(stream_id) => {
                        prop_assert_eq!(mux.cancel(stream_id), live.remove(&stream_id));
                    }
                    Step::Sweep(elapsed) => {
                        for stream_id in mux.sweep_expired(base + Duration::from_secs(elapsed.into())) {
                            prop_assert!(live.remove(&stream_id));
                        }
                    }
                }
                prop_assert_eq!(mux.outstanding(), live.len());
            }

            let resolved = handles.iter().filter(|handle| handle.is_resolved()).count();
            prop_assert_eq!(resolutions.load(Ordering::SeqCst), resolved);
            prop_assert_eq!(handles.len() - resolved, live.len());
        }
    }
}
