//! Suspension points for load bodies.
//!
//! Every awaitable is a predicate polled by [`Coroutine::resume`](crate::coroutine::Coroutine::resume).
//! `ready` may be called any number of times and must not block.

use crate::rc::RC;
use crate::resources::device::DeviceBackend;
use crate::resources::{LoadState, Resource};
use std::sync::Arc;

/// Polled readiness predicate
pub trait Awaitable: Send {
    fn ready(&mut self) -> bool;
}

/// Wraps an arbitrary zero-argument predicate
pub struct FnAwaitable<F> {
    predicate: F,
}

impl<F: FnMut() -> bool + Send> FnAwaitable<F> {
    pub fn new(predicate: F) -> Self {
        Self { predicate }
    }
}

impl<F: FnMut() -> bool + Send> Awaitable for FnAwaitable<F> {
    fn ready(&mut self) -> bool {
        (self.predicate)()
    }
}

/// Ready after a fixed number of unsuccessful polls
#[derive(Debug, Clone)]
pub struct Countdown {
    remaining: usize,
}

impl Countdown {
    /// `polls` calls to `ready` return false, the next returns true
    pub fn new(polls: usize) -> Self {
        Self { remaining: polls }
    }

    /// Give other coroutines one turn
    pub fn yield_once() -> Self {
        Self::new(1)
    }
}

impl Awaitable for Countdown {
    fn ready(&mut self) -> bool {
        if self.remaining == 0 {
            return true;
        }
        self.remaining -= 1;
        false
    }
}

/// Waits until another resource has left the in-flight states.
///
/// Ready for Loaded, Installed and Failed, and for Unloaded when no load is
/// scheduled. The awaiting body checks the final state itself; a failed
/// dependency is observed, never thrown.
pub struct ResourceAwaitable {
    dependency: RC<dyn Resource>,
}

impl ResourceAwaitable {
    pub fn new(dependency: RC<dyn Resource>) -> Self {
        Self { dependency }
    }

    pub fn dependency(&self) -> &RC<dyn Resource> {
        &self.dependency
    }
}

impl Awaitable for ResourceAwaitable {
    fn ready(&mut self) -> bool {
        !matches!(
            self.dependency.state(),
            LoadState::Pending | LoadState::Loading | LoadState::Unloading
        )
    }
}

/// Waits until a device has completed the given frame
pub struct FrameAwaitable {
    device: Arc<dyn DeviceBackend>,
    frame: u64,
}

impl FrameAwaitable {
    pub fn new(device: Arc<dyn DeviceBackend>, frame: u64) -> Self {
        Self { device, frame }
    }
}

impl Awaitable for FrameAwaitable {
    fn ready(&mut self) -> bool {
        self.device.frames_completed() >= self.frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::device::HeadlessDevice;

    #[test]
    fn test_countdown_counts_polls() {
        let mut countdown = Countdown::new(2);
        assert!(!countdown.ready());
        assert!(!countdown.ready());
        assert!(countdown.ready());
        // stays ready
        assert!(countdown.ready());
    }

    #[test]
    fn test_fn_awaitable_retry_counter() {
        let mut retries = 3;
        let mut awaitable = FnAwaitable::new(move || {
            retries -= 1;
            retries == 0
        });
        assert!(!awaitable.ready());
        assert!(!awaitable.ready());
        assert!(awaitable.ready());
    }

    #[test]
    fn test_frame_awaitable() {
        let device = Arc::new(HeadlessDevice::new());
        let mut awaitable = FrameAwaitable::new(device.clone(), 2);
        assert!(!awaitable.ready());

        device.end_frame();
        device.end_frame();
        assert!(!awaitable.ready());

        device.complete_through(2);
        assert!(awaitable.ready());
    }
}
