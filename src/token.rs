use crate::task::TaskHandle;
use log::trace;
use tokio::task::JoinHandle;

/// One cancel/uncancel cycle against a specific task.
///
/// A token is constructed exactly once per fence lifetime that ends up requesting
/// cancellation, via either [`CancelToken::schedule`] (entry pre-trigger path) or
/// [`CancelToken::immediate`] (runtime trigger path). [`CancelToken::resolve`] is called
/// exactly once, at fence exit, to balance the counter and decide suppression.
pub(crate) struct CancelToken {
    task: TaskHandle,
    baseline: u32,
    delivered: bool,
    deferred: Option<JoinHandle<()>>,
}

impl CancelToken {
    /// Defer `task.cancel(message)` to the next tick via a detached local task, rather than
    /// calling it synchronously.
    ///
    /// Used from the fence's entry-time pre-trigger path: the fenced body has not yet
    /// suspended, and an immediate `task.cancel()` there would be indistinguishable from
    /// cancelling a task that has not yet yielded — a spurious wakeup. Deferring via the
    /// executor means the cancel only lands once the task has actually returned control to it.
    pub(crate) fn schedule(task: TaskHandle, baseline: u32, message: String) -> Self {
        let deliver_task = task.clone();
        let handle = tokio::task::spawn_local(async move {
            deliver_task.cancel(message);
        });
        trace!("cancel token scheduled, baseline={baseline}");
        CancelToken {
            task,
            baseline,
            delivered: false,
            deferred: Some(handle),
        }
    }

    /// Call `task.cancel(message)` right now.
    ///
    /// Used from the runtime trigger callback path: the task is already suspended (the
    /// callback itself only runs because the task yielded control to the loop), so there is
    /// no spurious-wakeup hazard and no reason to defer.
    pub(crate) fn immediate(task: TaskHandle, baseline: u32, message: String) -> Self {
        task.cancel(message);
        trace!("cancel token delivered immediately, baseline={baseline}");
        CancelToken {
            task,
            baseline,
            delivered: true,
            deferred: None,
        }
    }

    /// Balance the counter and decide whether the fence may claim the exit exception.
    ///
    /// `body_was_cancelled` reflects whether the fence's own [`crate::watch::Watch`] wrapper
    /// intercepted a [`crate::Cancelled`] at exit (as opposed to the body completing
    /// normally or returning its own non-cancellation output).
    pub(crate) fn resolve(mut self, body_was_cancelled: bool) -> bool {
        if !self.delivered {
            if let Some(handle) = self.deferred.take() {
                handle.abort();
            }
            trace!("cancel token rescinded, was never delivered");
            return false;
        }

        let remaining = self.task.uncancel();
        let suppress = remaining <= self.baseline && body_was_cancelled;
        trace!(
            "cancel token resolved, remaining={remaining}, baseline={}, suppress={suppress}",
            self.baseline
        );
        suppress
    }
}

impl Drop for CancelToken {
    fn drop(&mut self) {
        if let Some(handle) = self.deferred.take() {
            handle.abort();
        }
    }
}
