//! Single-flight slots for backend futures.
//!
//! Runners are driven synchronously once or twice per host frame and never
//! block. Each category of asynchronous backend work (readback processing,
//! phase reads, baseline capture) owns one slot; while the slot is busy no
//! second request of that category may be issued. Slots are polled with a
//! no-op waker from the runner entry points, so a future that is not ready
//! simply stays parked until a later frame observes it complete.

use std::future::Future;
use std::task::{Context, Poll};

use futures::task::noop_waker_ref;
use ofs_core::Pending;

/// Outcome of a settled slot: the tag captured at launch and the resolved value.
pub(crate) struct Settled<T, G> {
    pub tag: G,
    pub value: Option<T>,
}

pub(crate) struct InFlight<T, G = ()> {
    slot: Option<(Pending<T>, G)>,
}

impl<T, G> Default for InFlight<T, G> {
    fn default() -> Self {
        Self { slot: None }
    }
}

impl<T, G> InFlight<T, G> {
    pub fn is_busy(&self) -> bool {
        self.slot.is_some()
    }

    /// Parks `future` in the slot. Callers check [`InFlight::is_busy`] first;
    /// a launch over a busy slot is ignored and returns `false`.
    pub fn launch(&mut self, future: Pending<T>, tag: G) -> bool {
        if self.slot.is_some() {
            return false;
        }
        self.slot = Some((future, tag));
        true
    }

    /// Polls the parked future once. Returns the settlement and frees the slot
    /// when it completed; `None` while still pending or idle.
    pub fn poll_settled(&mut self) -> Option<Settled<T, G>> {
        let (future, _) = self.slot.as_mut()?;
        let mut cx = Context::from_waker(noop_waker_ref());
        match future.as_mut().poll(&mut cx) {
            Poll::Pending => None,
            Poll::Ready(value) => {
                let (_, tag) = self.slot.take()?;
                Some(Settled { tag, value })
            }
        }
    }
}
