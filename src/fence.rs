use crate::task::{self, TaskHandle};
use crate::token::CancelToken;
use crate::triggers::{CancelCallback, Trigger, TriggerHandle};
use crate::watch::Watch;
use crate::{CancelReason, Cancelled, FenceError};
use log::{debug, trace};
use std::cell::RefCell;
use std::future::Future;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FenceState {
    Fresh,
    Armed,
    CancelScheduled,
    Exited,
}

/// State a fence's callback shares with its armed triggers: every trigger's `on_cancel`
/// closure holds a clone of this, so it must be free of any borrow on the `Fence` itself
/// (the fence is typically borrowed across an `.await` while its triggers are armed).
struct Shared {
    task: TaskHandle,
    baseline: u32,
    reasons: RefCell<Vec<CancelReason>>,
    token: RefCell<Option<CancelToken>>,
}

/// A scoped cooperative-cancellation guard.
///
/// Construct with the triggers to arm, then drive a body through [`Fence::guard`]:
///
/// ```rust
/// use std::time::Duration;
/// use fence::{Fence, task, triggers::TimeoutTrigger};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let local = tokio::task::LocalSet::new();
/// local.run_until(task::scope(async {
///     let mut fence = Fence::new(vec![Box::new(TimeoutTrigger::new(Duration::from_secs(5)))]);
///     let result = fence.guard(async { 1 + 1 }).await;
///     assert_eq!(result.unwrap(), Some(2));
///     assert!(!fence.cancelled());
/// }))
/// .await;
/// # }
/// ```
///
/// For full control over the enter/exit split, use [`Fence::enter`] and [`Fence::exit`]
/// directly around your own polling loop.
pub struct Fence {
    triggers: Vec<Box<dyn Trigger>>,
    handles: Vec<Box<dyn TriggerHandle>>,
    shared: Option<Rc<Shared>>,
    state: FenceState,
}

impl Fence {
    /// Build a fence that will arm `triggers`, in order, on [`Fence::enter`].
    pub fn new(triggers: Vec<Box<dyn Trigger>>) -> Self {
        Fence {
            triggers,
            handles: Vec::new(),
            shared: None,
            state: FenceState::Fresh,
        }
    }

    /// `true` iff at least one reason has been recorded so far.
    pub fn cancelled(&self) -> bool {
        self.shared
            .as_ref()
            .is_some_and(|s| !s.reasons.borrow().is_empty())
    }

    /// An ordered snapshot of the reasons recorded so far: pre-check order, then the order
    /// runtime trigger callbacks arrived in.
    pub fn reasons(&self) -> Vec<CancelReason> {
        self.shared
            .as_ref()
            .map(|s| s.reasons.borrow().clone())
            .unwrap_or_default()
    }

    /// `true` iff any recorded reason carries the given `code`.
    pub fn cancelled_by(&self, code: &str) -> bool {
        self.shared.as_ref().is_some_and(|s| {
            s.reasons
                .borrow()
                .iter()
                .any(|reason| reason.code() == Some(code))
        })
    }

    /// Enter the fence: capture the current task's baseline counter, pre-check every trigger
    /// in order, and either schedule a deferred cancel (if any pre-checked) or arm every
    /// trigger.
    ///
    /// Fails if the fence has already been entered, or if called outside [`task::scope`].
    pub fn enter(&mut self) -> Result<(), FenceError> {
        if self.state != FenceState::Fresh {
            return Err(FenceError::Reused);
        }
        let task = task::current_task().ok_or(FenceError::NoTask)?;
        let baseline = task.cancelling();
        let shared = Rc::new(Shared {
            task: task.clone(),
            baseline,
            reasons: RefCell::new(Vec::new()),
            token: RefCell::new(None),
        });

        for trigger in &self.triggers {
            if let Some(reason) = trigger.check() {
                trace!("fence pre-check: trigger already satisfied ({reason})");
                shared.reasons.borrow_mut().push(reason);
            }
        }

        if !shared.reasons.borrow().is_empty() {
            let message = shared.reasons.borrow()[0].message().to_string();
            let token = CancelToken::schedule(task, baseline, message);
            *shared.token.borrow_mut() = Some(token);
            self.state = FenceState::CancelScheduled;
            debug!("fence entered with a pre-triggered reason; cancel scheduled");
        } else {
            for trigger in &self.triggers {
                let callback_shared = shared.clone();
                let callback: CancelCallback = Rc::new(move |reason| {
                    Self::on_trigger(&callback_shared, reason);
                });
                self.handles.push(trigger.arm(callback));
            }
            self.state = FenceState::Armed;
            debug!("fence entered, {} trigger(s) armed", self.handles.len());
        }

        self.shared = Some(shared);
        Ok(())
    }

    /// Invoked when an armed trigger's callback fires. Appends the reason unconditionally,
    /// even if a cancel has already been scheduled by an earlier callback; the first callback
    /// to arrive also creates the token.
    fn on_trigger(shared: &Rc<Shared>, reason: CancelReason) {
        trace!("fence trigger fired: {reason}");
        shared.reasons.borrow_mut().push(reason.clone());
        if shared.token.borrow().is_some() {
            return;
        }
        if task::is_current(&shared.task) {
            panic!("{}", FenceError::InlineTrigger);
        }
        let token = CancelToken::immediate(shared.task.clone(), shared.baseline, reason.message().to_string());
        *shared.token.borrow_mut() = Some(token);
    }

    /// Exit the fence: disarm every handle, then resolve any pending cancel against
    /// `body_was_cancelled` (whether the body's exit value was this fence's own
    /// [`Cancelled`]). Returns `true` iff the caller should suppress that exception.
    ///
    /// Safe to call even if [`Fence::enter`] failed or was never called (a no-op then).
    pub fn exit(&mut self, body_was_cancelled: bool) -> bool {
        self.state = FenceState::Exited;
        for handle in self.handles.drain(..) {
            handle.disarm();
        }
        let Some(shared) = self.shared.as_ref() else {
            return false;
        };
        match shared.token.borrow_mut().take() {
            Some(token) => token.resolve(body_was_cancelled),
            None => false,
        }
    }

    /// Run `body` under this fence: enter, poll `body` while watching for cancellation,
    /// then exit.
    ///
    /// Returns `Ok(Some(value))` if `body` completed on its own; `Ok(None)` if it was
    /// cancelled by this fence and the fence suppressed it (inspect [`Fence::cancelled`] /
    /// [`Fence::reasons`] to see why); `Err(Cancelled)` if a cancellation reached the body but
    /// this fence was not the last one with a stake in it, i.e. an outer scope or an external
    /// caller owns it and must see it propagate.
    ///
    /// # Panics
    /// Panics if the fence was already entered, or if called outside [`task::scope`] — both
    /// are programmer errors, not runtime conditions a caller should need to recover from.
    pub async fn guard<T, F>(&mut self, body: F) -> Result<Option<T>, Cancelled>
    where
        F: Future<Output = T>,
    {
        self.enter().expect("Fence::guard: fence misused");
        let task = self
            .shared
            .as_ref()
            .expect("just entered")
            .task
            .clone();
        match Watch::new(body, task).await {
            Ok(value) => {
                self.exit(false);
                Ok(Some(value))
            }
            Err(cancelled) => {
                if self.exit(true) {
                    Ok(None)
                } else {
                    Err(cancelled)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;
    use crate::triggers::EventTrigger;
    use std::time::Duration;

    #[tokio::test(flavor = "current_thread")]
    async fn pre_triggered_timeout_with_awaiting_body_is_suppressed() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(task::scope(async {
                let task = task::current_task().unwrap();
                let baseline = task.cancelling();

                let mut f = Fence::new(vec![Box::new(TimeoutTrigger::new(Duration::ZERO))]);
                let result = f.guard(std::future::pending::<()>()).await;

                assert!(result.unwrap().is_none());
                assert!(f.cancelled());
                assert_eq!(f.reasons().len(), 1);
                assert_eq!(f.reasons()[0].cancel_type(), crate::CancelType::Timeout);
                assert_eq!(task.cancelling(), baseline);
            }))
            .await;
    }

    #[tokio::test(flavor = "current_thread")]
    async fn pre_triggered_timeout_with_synchronous_body_rescinds() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(task::scope(async {
                let task = task::current_task().unwrap();
                let baseline = task.cancelling();

                let mut f = Fence::new(vec![Box::new(TimeoutTrigger::new(Duration::ZERO))]);
                let result = f.guard(async { 42 }).await;

                assert_eq!(result.unwrap(), Some(42));
                assert!(f.cancelled());
                assert_eq!(task.cancelling(), baseline);
            }))
            .await;
    }

    #[tokio::test(flavor = "current_thread")]
    async fn runtime_event_fire_is_suppressed_and_cleans_up_the_waiter() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(task::scope(async {
                let task = task::current_task().unwrap();
                let baseline = task.cancelling();
                let event = Event::new();

                let setter = event.clone();
                tokio::task::spawn_local(async move {
                    tokio::task::yield_now().await;
                    setter.set();
                });

                let mut f = Fence::new(vec![Box::new(EventTrigger::new(event.clone()))]);
                let result = f.guard(std::future::pending::<()>()).await;

                assert!(result.unwrap().is_none());
                assert!(f.cancelled());
                assert_eq!(f.reasons()[0].cancel_type(), crate::CancelType::Event);
                assert_eq!(task.cancelling(), baseline);
            }))
            .await;
    }

    #[tokio::test(flavor = "current_thread")]
    async fn nested_fences_each_observe_their_own_baseline() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(task::scope(async {
                let task = task::current_task().unwrap();
                let baseline = task.cancelling();

                let mut outer = Fence::new(vec![Box::new(TimeoutTrigger::new(Duration::from_secs(10)))]);
                let outer_result = outer
                    .guard(async {
                        let mut inner =
                            Fence::new(vec![Box::new(TimeoutTrigger::new(Duration::ZERO))]);
                        inner.guard(std::future::pending::<()>()).await.unwrap();
                        assert!(inner.cancelled());
                        "inner finished"
                    })
                    .await;

                assert_eq!(outer_result.unwrap(), Some("inner finished"));
                assert!(!outer.cancelled());
                assert_eq!(task.cancelling(), baseline);
            }))
            .await;
    }

    #[tokio::test(flavor = "current_thread")]
    async fn external_cancellation_is_never_suppressed() {
        // The body cancels its own task directly, before its first suspension, racing the
        // fence's own pre-triggered timeout. Both land before the fence's `Watch` ever gets
        // a chance to observe one in isolation, so the fence's scheduled cancel is still
        // unresolved (never delivered) when the external one is taken instead: the fence's
        // own token gets rescinded and the external cancellation propagates untouched. This
        // mirrors a caller cancelling a task out from under a fence that was about to time
        // out anyway — the fence's own trigger did fire (`cancelled()` is true), but it
        // never gets to claim the exception.
        let local = tokio::task::LocalSet::new();
        local
            .run_until(task::scope(async {
                let task = task::current_task().unwrap();
                let external = task.clone();

                let mut f = Fence::new(vec![Box::new(TimeoutTrigger::new(Duration::ZERO))]);
                let result = f
                    .guard(async move {
                        external.cancel("external shutdown");
                        std::future::pending::<()>().await
                    })
                    .await;

                assert!(result.is_err());
                assert!(f.cancelled());
                assert_eq!(task.cancelling(), 1);
            }))
            .await;
    }

    #[tokio::test(flavor = "current_thread")]
    async fn multi_trigger_aggregation_preserves_firing_order() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(task::scope(async {
                let task = task::current_task().unwrap();
                let baseline = task.cancelling();
                let e1 = Event::new();
                let e2 = Event::new();

                let mut f = Fence::new(vec![
                    Box::new(EventTrigger::new(e1.clone()).with_code("first")),
                    Box::new(EventTrigger::new(e2.clone()).with_code("second")),
                ]);

                let e1_setter = e1.clone();
                let e2_setter = e2.clone();
                let body = async move {
                    // Both triggers fire before the body's first suspension, so both
                    // watcher tasks observe an already-set event the first time they are
                    // polled and fire in the order they were armed.
                    e1_setter.set();
                    e2_setter.set();
                    std::future::pending::<()>().await
                };

                let result = f.guard(body).await;

                assert!(result.unwrap().is_none());
                let reasons = f.reasons();
                assert_eq!(reasons.len(), 2);
                assert_eq!(reasons[0].code(), Some("first"));
                assert_eq!(reasons[1].code(), Some("second"));
                assert_eq!(task.cancelling(), baseline);
            }))
            .await;
    }

    #[tokio::test(flavor = "current_thread")]
    async fn reentry_after_exit_is_rejected() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(task::scope(async {
                let mut f = Fence::new(Vec::new());
                f.enter().unwrap();
                f.exit(false);
                assert!(matches!(f.enter(), Err(FenceError::Reused)));
            }))
            .await;
    }

    #[tokio::test(flavor = "current_thread")]
    async fn no_suppression_without_cancellation() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(task::scope(async {
                let mut f = Fence::new(Vec::new());
                let result = f.guard(async { "done" }).await;
                assert_eq!(result.unwrap(), Some("done"));
                assert!(!f.cancelled());
            }))
            .await;
    }

    #[tokio::test(flavor = "current_thread")]
    async fn cancelled_by_matches_on_code() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(task::scope(async {
                let mut f =
                    Fence::new(vec![Box::new(TimeoutTrigger::new(Duration::ZERO).with_code("deadline"))]);
                f.guard(std::future::pending::<()>()).await.unwrap();
                assert!(f.cancelled_by("deadline"));
                assert!(!f.cancelled_by("other"));
            }))
            .await;
    }
}
