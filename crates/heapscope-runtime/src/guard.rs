//! Crash-safe memory probes.
//!
//! Every raw dereference the sweep performs on behalf of a remote viewer goes
//! through [`protect`]. Heap accessors already refuse stale or out-of-bounds
//! accesses by returning a [`Fault`]; `protect` additionally isolates panics
//! raised while decoding foreign storage so a single bad field can never take
//! down the inspected process.

use std::any::Any;
use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};

use thiserror::Error;

/// Class of invalid access intercepted by [`protect`].
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Fault {
    /// Decoding code trapped (a panic was raised inside the guarded closure).
    #[error("illegal instruction: {0}")]
    IllegalInstruction(String),
    /// Dereference of a reference whose object no longer exists.
    #[error("segmentation fault: {0}")]
    Segmentation(String),
    /// Access outside the object's storage or of the wrong shape.
    #[error("bus error: {0}")]
    Bus(String),
}

impl Fault {
    pub fn signal_name(&self) -> &'static str {
        match self {
            Fault::IllegalInstruction(_) => "SIGILL",
            Fault::Segmentation(_) => "SIGSEGV",
            Fault::Bus(_) => "SIGBUS",
        }
    }
}

thread_local! {
    static GUARD_DEPTH: Cell<u32> = const { Cell::new(0) };
}

/// Returns `true` while the current thread is executing inside [`protect`].
///
/// The process-wide panic hook consults this so panics that are about to be
/// intercepted are not reported as crashes.
pub fn in_guarded_scope() -> bool {
    GUARD_DEPTH.with(|depth| depth.get() > 0)
}

/// Restores the previous guard depth on every exit path, including unwinds.
struct GuardScope;

impl GuardScope {
    fn enter() -> Self {
        GUARD_DEPTH.with(|depth| depth.set(depth.get() + 1));
        GuardScope
    }
}

impl Drop for GuardScope {
    fn drop(&mut self) {
        GUARD_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

/// Run `op` with fault interception.
///
/// Faults reported by the closure are passed through unchanged; a panic is
/// converted into [`Fault::IllegalInstruction`]. Either way the caller gets a
/// status back and the process keeps running.
pub fn protect<T, F>(op: F) -> Result<T, Fault>
where
    F: FnOnce() -> Result<T, Fault>,
{
    let _scope = GuardScope::enter();
    match panic::catch_unwind(AssertUnwindSafe(op)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(fault)) => {
            tracing::debug!(
                target: "heapscope.guard",
                signal = fault.signal_name(),
                %fault,
                "intercepted invalid access"
            );
            Err(fault)
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            tracing::debug!(
                target: "heapscope.guard",
                signal = "SIGILL",
                message = %message,
                "intercepted trap in guarded probe"
            );
            Err(Fault::IllegalInstruction(message))
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
