use crate::event::{Event, Waiter};
use crate::triggers::{CancelCallback, Trigger, TriggerHandle};
use crate::{CancelReason, CancelType};
use log::trace;
use std::cell::RefCell;
use tokio::task::JoinHandle;

/// Cancels the fence once the given [`Event`] is set.
///
/// ```rust
/// use fence::{Fence, event::Event, task, triggers::EventTrigger};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let local = tokio::task::LocalSet::new();
/// local.run_until(async {
///     let event = Event::new();
///     event.set();
///     task::scope(async {
///         let mut fence = Fence::new(vec![Box::new(EventTrigger::new(event))]);
///         let result = fence.guard(std::future::pending::<()>()).await;
///         assert!(result.is_ok());
///         assert!(fence.cancelled());
///     })
///     .await;
/// })
/// .await;
/// # }
/// ```
pub struct EventTrigger {
    event: Event,
    code: Option<String>,
}

impl EventTrigger {
    /// Create a trigger that fires when `event` is set.
    pub fn new(event: Event) -> Self {
        EventTrigger { event, code: None }
    }

    /// Attach an opaque `code` for [`crate::Fence::cancelled_by`] matching.
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    fn reason(&self) -> CancelReason {
        CancelReason::new(
            format!("event {:#x} triggered", self.event.id()),
            CancelType::Event,
            self.code.clone(),
        )
    }
}

impl Trigger for EventTrigger {
    fn check(&self) -> Option<CancelReason> {
        if self.event.is_set() {
            Some(self.reason())
        } else {
            None
        }
    }

    fn arm(&self, on_cancel: CancelCallback) -> Box<dyn TriggerHandle> {
        let reason = self.reason();
        let waiter = self.event.subscribe();
        // Keep a clone purely to unsubscribe later: the original is moved into the spawned
        // task below and consumed by `.await`, but both clones name the same entry in the
        // event's waiter list.
        let unsubscribe = waiter.clone();
        trace!("event trigger armed");
        let handle = tokio::task::spawn_local(async move {
            waiter.await;
            on_cancel(reason);
        });
        Box::new(EventHandle {
            unsubscribe: RefCell::new(Some(unsubscribe)),
            handle: RefCell::new(Some(handle)),
        })
    }
}

/// Handle returned by [`EventTrigger::arm`].
///
/// `disarm()` cancels the pending watch task and removes its waiter from the event's waiter
/// list, whether or not the event has already been set: the event itself never cleans up
/// resolved waiters.
pub struct EventHandle {
    unsubscribe: RefCell<Option<Waiter>>,
    handle: RefCell<Option<JoinHandle<()>>>,
}

impl TriggerHandle for EventHandle {
    fn disarm(&self) {
        if let Some(waiter) = self.unsubscribe.borrow_mut().take() {
            waiter.unsubscribe();
        }
        if let Some(handle) = self.handle.borrow_mut().take() {
            handle.abort();
        }
        trace!("event trigger disarmed");
    }
}
