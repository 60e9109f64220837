use crate::triggers::{CancelCallback, Trigger, TriggerHandle};
use crate::{CancelReason, CancelType};
use log::trace;
use std::cell::RefCell;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Cancels the fence once `delay` has elapsed.
///
/// ```rust
/// use std::time::Duration;
/// use fence::{Fence, task, triggers::TimeoutTrigger};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let local = tokio::task::LocalSet::new();
/// local.run_until(task::scope(async {
///     let mut fence = Fence::new(vec![Box::new(TimeoutTrigger::new(Duration::ZERO))]);
///     let result = fence.guard(std::future::pending::<()>()).await;
///     assert!(result.is_ok());
///     assert!(fence.cancelled());
/// })).await;
/// # }
/// ```
pub struct TimeoutTrigger {
    delay: Duration,
    code: Option<String>,
}

impl TimeoutTrigger {
    /// Create a trigger that fires after `delay`. `delay == Duration::ZERO` pre-triggers at
    /// fence entry instead of arming.
    pub fn new(delay: Duration) -> Self {
        TimeoutTrigger { delay, code: None }
    }

    /// Attach an opaque `code` for [`crate::Fence::cancelled_by`] matching.
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    fn reason(&self) -> CancelReason {
        CancelReason::new(
            format!("timed out after {:?}", self.delay),
            CancelType::Timeout,
            self.code.clone(),
        )
    }
}

impl Trigger for TimeoutTrigger {
    fn check(&self) -> Option<CancelReason> {
        if self.delay.is_zero() {
            Some(self.reason())
        } else {
            None
        }
    }

    fn arm(&self, on_cancel: CancelCallback) -> Box<dyn TriggerHandle> {
        let reason = self.reason();
        let delay = self.delay;
        trace!("timeout trigger armed for {delay:?}");
        let handle = tokio::task::spawn_local(async move {
            tokio::time::sleep(delay).await;
            on_cancel(reason);
        });
        Box::new(TimeoutHandle {
            handle: RefCell::new(Some(handle)),
        })
    }
}

/// Handle returned by [`TimeoutTrigger::arm`]. `disarm()` cancels the pending timer.
pub struct TimeoutHandle {
    handle: RefCell<Option<JoinHandle<()>>>,
}

impl TriggerHandle for TimeoutHandle {
    fn disarm(&self) {
        if let Some(handle) = self.handle.borrow_mut().take() {
            handle.abort();
            trace!("timeout trigger disarmed");
        }
    }
}
