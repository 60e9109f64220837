use log::trace;
use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

struct WaiterState {
    woken: bool,
    waker: Option<Waker>,
}

struct EventInner {
    is_set: bool,
    waiters: Vec<Rc<RefCell<WaiterState>>>,
}

/// A one-shot, manually-reset event with an explicit waiter-list contract.
///
/// `tokio::sync::Notify` cleans up its own waiter queue as futures resolve or drop, which is
/// exactly the behavior [`EventTrigger`](crate::triggers::EventTrigger) cannot rely on: a
/// trigger's `disarm()` must remove a waiter from the event's list *whether or not it has
/// already resolved*, because the event itself does not do so. This type keeps every
/// subscribed waiter in a plain `Vec` until [`Waiter::unsubscribe`] explicitly removes it.
#[derive(Clone)]
pub struct Event {
    inner: Rc<RefCell<EventInner>>,
}

impl Default for Event {
    fn default() -> Self {
        Event {
            inner: Rc::new(RefCell::new(EventInner {
                is_set: false,
                waiters: Vec::new(),
            })),
        }
    }
}

impl Event {
    /// Create a new, unset event.
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` iff [`Event::set`] has been called.
    pub fn is_set(&self) -> bool {
        self.inner.borrow().is_set
    }

    /// A stable per-event identifier, derived from the address of the event's shared state.
    /// Two clones of the same `Event` report the same id; two distinct events never collide
    /// for the lifetime of either. Used to name an event in a cancellation reason's message
    /// the way a repr would in a host with reference identity built into its printer.
    pub fn id(&self) -> usize {
        Rc::as_ptr(&self.inner) as usize
    }

    /// Set the event, waking every current waiter. Waiters are *not* removed from the waiter
    /// list by this call; they remain until explicitly [`Waiter::unsubscribe`]d.
    pub fn set(&self) {
        let inner = self.inner.borrow();
        if inner.is_set {
            return;
        }
        drop(inner);
        self.inner.borrow_mut().is_set = true;
        let waiters = self.inner.borrow().waiters.clone();
        trace!("event set, waking {} waiter(s)", waiters.len());
        for waiter in waiters {
            let waker = {
                let mut state = waiter.borrow_mut();
                state.woken = true;
                state.waker.take()
            };
            if let Some(waker) = waker {
                waker.wake();
            }
        }
    }

    /// Register a new waiter. The returned [`Waiter`] resolves once [`Event::set`] is called
    /// (or immediately, if it already has been); it stays in the event's waiter list until
    /// [`Waiter::unsubscribe`] is called, regardless of whether it has resolved.
    pub fn subscribe(&self) -> Waiter {
        let already_set = self.inner.borrow().is_set;
        let state = Rc::new(RefCell::new(WaiterState {
            woken: already_set,
            waker: None,
        }));
        self.inner.borrow_mut().waiters.push(state.clone());
        Waiter {
            state,
            event: self.inner.clone(),
        }
    }
}

/// A single subscription to an [`Event`], returned by [`Event::subscribe`].
///
/// Awaiting a `Waiter` resolves once the event is set. [`Waiter::unsubscribe`] removes it from
/// the event's waiter list immediately, whether or not it has already resolved, and is safe to
/// call more than once. Cloning a `Waiter` does not create a new subscription; every clone
/// refers to the same entry in the event's waiter list, which is useful when one clone needs
/// to be awaited while another is kept aside purely to call `unsubscribe` later.
#[derive(Clone)]
pub struct Waiter {
    state: Rc<RefCell<WaiterState>>,
    event: Rc<RefCell<EventInner>>,
}

impl Waiter {
    /// Remove this waiter from the event's waiter list. Idempotent.
    pub fn unsubscribe(&self) {
        let mut inner = self.event.borrow_mut();
        inner.waiters.retain(|w| !Rc::ptr_eq(w, &self.state));
    }
}

impl Future for Waiter {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.state.borrow_mut();
        if state.woken {
            Poll::Ready(())
        } else {
            state.waker = Some(cx.waker().clone());
            Poll::Pending
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_before_subscribe_resolves_immediately() {
        let event = Event::new();
        event.set();
        event.subscribe().await;
    }

    #[tokio::test]
    async fn unsubscribe_removes_waiter_before_and_after_resolution() {
        let event = Event::new();
        let pending = event.subscribe();
        assert_eq!(event.inner.borrow().waiters.len(), 1);
        pending.unsubscribe();
        assert_eq!(event.inner.borrow().waiters.len(), 0);

        let resolved = event.subscribe();
        event.set();
        resolved.unsubscribe();
        assert_eq!(event.inner.borrow().waiters.len(), 0);
        // Idempotent.
        resolved.unsubscribe();
        assert_eq!(event.inner.borrow().waiters.len(), 0);
    }

    #[tokio::test]
    async fn setting_twice_does_not_rewake_stale_wakers() {
        let event = Event::new();
        event.set();
        event.set();
        assert!(event.is_set());
    }
}
