//! Outcome delivery on caller-chosen queues.

use crate::exec::SerialQueue;

/// Routes operation outcomes onto queues.
///
/// An outcome handler runs exactly once: the handlers are `FnOnce` and are
/// consumed when the completion fires, so double delivery is
/// unrepresentable. Delivery is always a dispatch, never an inline call, so
/// handlers never run on the background context's affine queue.
pub struct CallbackDispatcher {
    foreground: SerialQueue,
}

impl CallbackDispatcher {
    pub fn new(foreground: SerialQueue) -> Self {
        Self { foreground }
    }

    pub fn foreground(&self) -> &SerialQueue {
        &self.foreground
    }

    /// The queue outcomes default to when a request names none: the caller's
    /// current queue, captured at request time, or the foreground queue for
    /// callers on unmanaged threads.
    pub fn capture_origin(&self) -> SerialQueue {
        SerialQueue::current().unwrap_or_else(|| self.foreground.clone())
    }

    /// Build the single-shot completion for a success/failure callback pair.
    /// Exactly one of the two handlers runs, on its resolved queue.
    pub fn completion<T, E, S, F>(
        &self,
        on_success: S,
        on_failure: F,
        success_queue: Option<SerialQueue>,
        failure_queue: Option<SerialQueue>,
    ) -> Box<dyn FnOnce(Result<T, E>) + Send + 'static>
    where
        T: Send + 'static,
        E: Send + 'static,
        S: FnOnce(T) + Send + 'static,
        F: FnOnce(E) + Send + 'static,
    {
        let origin = self.capture_origin();
        let success_target = success_queue.unwrap_or_else(|| origin.clone());
        let failure_target = failure_queue.unwrap_or(origin);
        Box::new(move |result| match result {
            Ok(value) => success_target.dispatch(move || on_success(value)),
            Err(err) => failure_target.dispatch(move || on_failure(err)),
        })
    }
}
