use crate::task::TaskHandle;
use crate::Cancelled;
use pin_project::pin_project;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Wraps a fenced body so that, at every poll where the body itself is not yet ready, the
/// task's pending cancel message (if any) is delivered in its place instead of returning
/// `Pending` again.
///
/// The body is polled first, so a body that completes synchronously never observes a cancel
/// that was merely scheduled, but a body that suspends hands control back to
/// [`TaskHandle::take_pending`] before it hands control back to the executor.
#[pin_project]
pub(crate) struct Watch<F> {
    #[pin]
    inner: F,
    task: TaskHandle,
}

impl<F> Watch<F> {
    pub(crate) fn new(inner: F, task: TaskHandle) -> Self {
        Watch { inner, task }
    }
}

impl<F: Future> Future for Watch<F> {
    type Output = Result<F::Output, Cancelled>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        match this.inner.poll(cx) {
            Poll::Ready(value) => Poll::Ready(Ok(value)),
            Poll::Pending => match this.task.take_pending() {
                Some(message) => Poll::Ready(Err(Cancelled::new(message))),
                None => {
                    this.task.set_waker(cx.waker());
                    Poll::Pending
                }
            },
        }
    }
}
