use crate::CancelReason;
use std::rc::Rc;

mod event;
mod timeout;

pub use event::{EventHandle, EventTrigger};
pub use timeout::{TimeoutHandle, TimeoutTrigger};

/// Callback a [`Trigger`] invokes, from the event loop, when its condition fires.
pub type CancelCallback = Rc<dyn Fn(CancelReason)>;

/// A cancellation condition a [`crate::Fence`] can arm.
///
/// `check()` is a synchronous pre-check performed once at fence entry, before anything is
/// armed: if it already reports a reason, the fence schedules a cancel instead of arming.
/// `arm()` starts asynchronous monitoring and must dispatch `on_cancel` through the event
/// loop, never synchronously within the arming call.
///
/// Triggers are intended to be reusable across fences but may carry per-arming state; a
/// fence never calls `arm` twice on the same trigger within one lifetime.
pub trait Trigger {
    /// Return a reason if the condition is already met, without arming anything.
    fn check(&self) -> Option<CancelReason>;

    /// Start monitoring the condition. `on_cancel` must be invoked asynchronously (dispatched
    /// through the event loop), never inline within this call or within the fenced task's own
    /// poll chain.
    fn arm(&self, on_cancel: CancelCallback) -> Box<dyn TriggerHandle>;
}

/// A live watch returned by [`Trigger::arm`].
///
/// `disarm()` must be idempotent and safe to call after the trigger has already fired.
pub trait TriggerHandle {
    /// Stop monitoring and release any resources (timers, waiters) this handle holds.
    fn disarm(&self);
}
