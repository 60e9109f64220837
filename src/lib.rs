//! `fence` arms a set of cancellation triggers for the duration of a lexical block on a
//! single-threaded, cooperative event loop. If any trigger fires while the block is running,
//! the block's task is cancelled at its next suspension point and the cancellation is
//! *contained*: it never escapes as something an outer scope could mistake for its own.
//!
//! The entire design effort goes into the cancellation-propagation state machine, not the
//! triggers themselves: a [`Fence`] cooperates with a per-task cancellation counter so that
//! nested fences, outer timeouts, and externally initiated cancellations all compose without
//! leaking cancels, double-cancelling a task, or swallowing a cancel that belongs to someone
//! else. See [`Fence::guard`] for the entry point most callers want, or [`Fence::enter`] /
//! [`Fence::exit`] for the literal two-phase protocol this crate is built around.
//!
//! ## Example
//!
//! ```rust
//! # let _ = env_logger::builder().is_test(true).try_init();
//! use std::time::Duration;
//! use fence::{Fence, task, triggers::TimeoutTrigger};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let local = tokio::task::LocalSet::new();
//! local
//!     .run_until(task::scope(async {
//!         let mut fence = Fence::new(vec![Box::new(TimeoutTrigger::new(Duration::ZERO))]);
//!         // `Duration::ZERO` pre-triggers at entry, so this body never actually runs.
//!         let result = fence.guard(std::future::pending::<()>()).await;
//!         assert!(result.is_ok());
//!         assert!(fence.cancelled());
//!         assert_eq!(fence.reasons().len(), 1);
//!     }))
//!     .await;
//! # }
//! ```
//!
//! ## Composing with an outer timeout
//!
//! Because a fence suppresses its own cancellation silently, an enclosing
//! `tokio::time::timeout` never observes spurious cancellations the fence already handled;
//! it only fires on its own deadline.
//!
//! ```rust
//! use std::time::Duration;
//! use fence::{Fence, task, triggers::TimeoutTrigger};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let local = tokio::task::LocalSet::new();
//! local
//!     .run_until(task::scope(async {
//!         let outcome = tokio::time::timeout(Duration::from_secs(10), async {
//!             let mut fence = Fence::new(vec![Box::new(TimeoutTrigger::new(Duration::ZERO))]);
//!             fence.guard(std::future::pending::<()>()).await.unwrap();
//!             "outer timeout never fires"
//!         })
//!         .await;
//!         assert_eq!(outcome.unwrap(), "outer timeout never fires");
//!     }))
//!     .await;
//! # }
//! ```

mod error;
mod fence;
mod token;
mod watch;

pub mod event;
pub mod task;
pub mod triggers;

pub use error::{CancelReason, CancelType, Cancelled, FenceError};
pub use fence::Fence;
