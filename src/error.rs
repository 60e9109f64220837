use std::fmt::{Display, Formatter};

/// Category of cancellation a [`crate::CancelReason`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CancelType {
    /// Raised by a [`crate::triggers::TimeoutTrigger`].
    Timeout,
    /// Raised by a [`crate::triggers::EventTrigger`].
    Event,
}

/// Immutable record describing why a [`crate::Fence`] cancelled its task.
///
/// Two reasons with identical fields are interchangeable; reason identity is never meaningful,
/// only the values are.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CancelReason {
    message: String,
    cancel_type: CancelType,
    code: Option<String>,
}

impl CancelReason {
    /// Create a new reason. Typically only called by [`crate::Trigger`] implementations.
    pub fn new(message: impl Into<String>, cancel_type: CancelType, code: Option<String>) -> Self {
        CancelReason {
            message: message.into(),
            cancel_type,
            code,
        }
    }

    /// Human-readable description of the cancellation, e.g. `"timed out after 500ms"`.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The category of the trigger that produced this reason.
    pub fn cancel_type(&self) -> CancelType {
        self.cancel_type
    }

    /// Opaque identifier for programmatic matching via [`crate::Fence::cancelled_by`].
    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }
}

impl Display for CancelReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// The value delivered to a fenced body when its task is cancelled.
///
/// A fence that suppresses this error never hands it to a caller; it only surfaces
/// [`Cancelled`] when some *other* scope (an external caller, an outer fence, an outer
/// timeout) owns the cancellation and the fence could not claim it as its own.
#[derive(Debug, Clone)]
pub struct Cancelled {
    message: String,
}

impl Cancelled {
    pub(crate) fn new(message: impl Into<String>) -> Self {
        Cancelled {
            message: message.into(),
        }
    }

    /// The message the cancelling side attached, if any.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for Cancelled {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "task cancelled: {}", self.message)
    }
}

impl std::error::Error for Cancelled {}

/// Programmer-error taxonomy produced by misusing a [`crate::Fence`].
///
/// These are never retried or recovered from; they indicate a bug at the call site.
#[derive(Debug, Clone)]
pub enum FenceError {
    /// The fence was entered a second time after already being entered (or exited) once.
    Reused,
    /// `Fence::guard` was called outside of [`crate::task::scope`].
    NoTask,
    /// A trigger's `arm` callback fired synchronously inside the fenced task's own poll
    /// chain instead of being dispatched through the event loop.
    InlineTrigger,
}

impl Display for FenceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            FenceError::Reused => write!(f, "fence cannot be entered more than once"),
            FenceError::NoTask => write!(f, "fence used outside of a task::scope"),
            FenceError::InlineTrigger => write!(
                f,
                "trigger callback fired synchronously inside the fenced task; \
                 Trigger::arm callbacks must be dispatched through the event loop"
            ),
        }
    }
}

impl std::error::Error for FenceError {}
