use log::trace;
use pin_project::pin_project;
use std::cell::{Cell, RefCell};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

/// Per-task cancellation bookkeeping: the `cancelling` counter and the one outstanding
/// cancel message (if any) still waiting to be delivered at the task's next suspension.
///
/// There is no real OS task here — a "task" is just whatever future is being driven by
/// [`scope`] on this thread.
struct TaskInner {
    cancelling: Cell<u32>,
    pending: RefCell<Option<String>>,
    /// The waker of whichever [`crate::watch::Watch`] last observed this task suspended.
    /// `cancel()` calls it so a cancel request actually gets the task re-polled instead of
    /// sitting unseen until something unrelated happens to wake it.
    waker: RefCell<Option<Waker>>,
}

/// A handle to the cancellation state of the task currently executing on this thread.
///
/// Cheaply cloneable (it is a reference-counted pointer); clones observe and mutate the
/// same counter. Not `Send` — this primitive is single-threaded only.
#[derive(Clone)]
pub struct TaskHandle(Rc<TaskInner>);

impl TaskHandle {
    pub(crate) fn new() -> Self {
        TaskHandle(Rc::new(TaskInner {
            cancelling: Cell::new(0),
            pending: RefCell::new(None),
            waker: RefCell::new(None),
        }))
    }

    /// The number of cancel requests issued against this task that have not yet been
    /// matched by [`TaskHandle::uncancel`].
    pub fn cancelling(&self) -> u32 {
        self.0.cancelling.get()
    }

    /// Request cancellation of this task. Increments the counter immediately and leaves a
    /// message pending delivery at the task's next suspension point.
    pub fn cancel(&self, message: impl Into<String>) {
        let message = message.into();
        self.0.cancelling.set(self.0.cancelling.get() + 1);
        trace!(
            "task cancel requested ({}), cancelling={}",
            message,
            self.0.cancelling.get()
        );
        *self.0.pending.borrow_mut() = Some(message);
        if let Some(waker) = self.0.waker.borrow_mut().take() {
            waker.wake();
        }
    }

    /// Balance exactly one outstanding cancel request. Returns the counter after the
    /// decrement.
    pub fn uncancel(&self) -> u32 {
        let remaining = self.0.cancelling.get().saturating_sub(1);
        self.0.cancelling.set(remaining);
        trace!("task uncancel, remaining={}", remaining);
        remaining
    }

    /// Take the pending cancel message, if one is outstanding. Called only at a suspension
    /// point (when the watched body returns `Pending`), never eagerly.
    pub(crate) fn take_pending(&self) -> Option<String> {
        self.0.pending.borrow_mut().take()
    }

    /// Record the waker that should be woken if this task is cancelled while suspended.
    /// Called by [`crate::watch::Watch`] on every `Pending` poll.
    pub(crate) fn set_waker(&self, waker: &Waker) {
        let mut slot = self.0.waker.borrow_mut();
        if !slot.as_ref().is_some_and(|current| current.will_wake(waker)) {
            *slot = Some(waker.clone());
        }
    }

    fn ptr_eq(&self, other: &TaskHandle) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

thread_local! {
    static CURRENT: RefCell<Option<TaskHandle>> = const { RefCell::new(None) };
}

/// The task executing the current frame, or `None` outside of any [`scope`].
pub fn current_task() -> Option<TaskHandle> {
    CURRENT.with_borrow(|slot| slot.clone())
}

/// `true` iff `handle` is the task currently executing on this thread.
///
/// Used to detect a trigger callback that fired synchronously inside the fenced task's own
/// poll chain instead of being dispatched through the event loop.
pub(crate) fn is_current(handle: &TaskHandle) -> bool {
    CURRENT.with_borrow(|slot| slot.as_ref().is_some_and(|current| current.ptr_eq(handle)))
}

/// Run `future` as a task: establishes a fresh [`TaskHandle`] as "current" for the duration
/// of every poll of `future`, restoring whatever was current beforehand around each call.
///
/// The save-and-restore-around-a-single-call discipline is what lets nested `scope` calls,
/// and the inline-trigger check, behave correctly even though everything runs on one thread.
pub fn scope<F: Future>(future: F) -> Scope<F> {
    Scope {
        inner: future,
        handle: TaskHandle::new(),
    }
}

#[pin_project]
pub struct Scope<F> {
    #[pin]
    inner: F,
    handle: TaskHandle,
}

impl<F: Future> Future for Scope<F> {
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let mut previous = CURRENT.with_borrow_mut(|slot| slot.replace(this.handle.clone()));
        let result = this.inner.poll(cx);
        CURRENT.with_borrow_mut(|slot| std::mem::swap(slot, &mut previous));
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn current_task_visible_inside_scope_only() {
        assert!(current_task().is_none());
        scope(async {
            assert!(current_task().is_some());
        })
        .await;
        assert!(current_task().is_none());
    }

    #[tokio::test]
    async fn cancel_uncancel_round_trips_the_counter() {
        scope(async {
            let task = current_task().unwrap();
            assert_eq!(task.cancelling(), 0);
            task.cancel("because");
            assert_eq!(task.cancelling(), 1);
            assert_eq!(task.uncancel(), 0);
        })
        .await;
    }

    #[tokio::test]
    async fn nested_scopes_have_distinct_identities() {
        scope(async {
            let outer = current_task().unwrap();
            scope(async {
                let inner = current_task().unwrap();
                assert!(!inner.ptr_eq(&outer));
                assert!(is_current(&inner));
                assert!(!is_current(&outer));
            })
            .await;
            assert!(is_current(&outer));
        })
        .await;
    }
}
