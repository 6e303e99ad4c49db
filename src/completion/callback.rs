//! Begin/end style consumption of a [`CompletionHandle`].
//!
//! [`begin`] attaches a callback and caller state, returning the handle the
//! callback will later pass to [`end`].

use std::sync::Arc;

use super::{completion_with_state, AsyncState, CompletionHandle, Execution};
use crate::error::RequestError;

/// Attach `callback` and `state` to `handle`.
///
/// When `state` is identity-equal to the state the handle already carries
/// (or both are absent) the same handle is returned. Otherwise a forwarding
/// handle carrying `state` is returned and resolved with the same result.
/// The callback runs once, after the returned handle has resolved.
pub fn begin<T, F>(
    handle: CompletionHandle<T>,
    callback: Option<F>,
    state: Option<AsyncState>,
) -> CompletionHandle<T>
where
    T: Clone + Send + 'static,
    F: FnOnce(&CompletionHandle<T>) + Send + 'static,
{
    if same_state(handle.async_state(), state.as_ref()) {
        if let Some(callback) = callback {
            let observed = handle.clone();
            handle.on_complete(Execution::Inline, move |_| callback(&observed));
        }
        return handle;
    }

    let (completer, forwarded) = completion_with_state(state);
    let observed = forwarded.clone();
    handle.on_complete(Execution::Inline, move |result| {
        completer.resolve(result);
        if let Some(callback) = callback {
            callback(&observed);
        }
    });

    forwarded
}

/// Collect the result of a handle returned by [`begin`], blocking if needed.
pub fn end<T: Clone + Send + 'static>(handle: &CompletionHandle<T>) -> Result<T, RequestError> {
    handle.wait(None)
}

fn same_state(current: Option<&AsyncState>, requested: Option<&AsyncState>) -> bool {
    match (current, requested) {
        (None, None) => true,
        (Some(current), Some(requested)) => Arc::ptr_eq(current, requested),
        _ => false,
    }
}
