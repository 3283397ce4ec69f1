// Copyright 2024 Saptak Santra
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Poll-driven cooperative coroutines.
//!
//! A [`Task`] is an explicit state machine: every call to [`Task::step`] runs
//! the body up to its next suspension point and either hands back the
//! [`Awaitable`] it is waiting on or finishes with a value. A [`Coroutine`]
//! owns the task plus its promise slot (the currently pending awaitable) and
//! only advances the task once that awaitable reports ready.
//!
//! Nothing is ever notified. Whoever drives the coroutine calls
//! [`Coroutine::resume`] again later.
//!
//! ```
//! use resource_lifecycle::coroutine::{Coroutine, Step};
//! use resource_lifecycle::awaitable::Countdown;
//!
//! let mut waited = false;
//! let mut co = Coroutine::create(move || {
//!     move || {
//!         if !waited {
//!             waited = true;
//!             return Step::Await(Box::new(Countdown::new(1)));
//!         }
//!         Step::Done(42)
//!     }
//! });
//!
//! co.resume(); // runs to the first suspension
//! co.resume(); // countdown not ready yet
//! co.resume(); // ready: body finishes
//! assert!(co.done());
//! assert_eq!(co.take_output(), Some(42));
//! ```

use crate::awaitable::Awaitable;

/// What a task step produced
pub enum Step<T> {
    /// Suspend until the awaitable reports ready
    Await(Box<dyn Awaitable>),
    /// Terminal value
    Done(T),
}

impl<T> Step<T> {
    pub fn is_done(&self) -> bool {
        matches!(self, Step::Done(_))
    }
}

/// A resumable body
pub trait Task: Send {
    type Output: Send;

    /// Run until the next suspension point or completion.
    ///
    /// Never called again after returning [`Step::Done`].
    fn step(&mut self) -> Step<Self::Output>;
}

impl<T: Send, F> Task for F
where
    F: FnMut() -> Step<T> + Send,
{
    type Output = T;

    fn step(&mut self) -> Step<T> {
        self()
    }
}

/// Boxed task with a fixed output type
pub type BoxedTask<T> = Box<dyn Task<Output = T>>;

/// Holds the awaitable a suspended task is waiting on
#[derive(Default)]
pub struct Promise {
    pending: Option<Box<dyn Awaitable>>,
}

impl Promise {
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    fn set(&mut self, awaitable: Box<dyn Awaitable>) {
        self.pending = Some(awaitable);
    }

    /// Poll the pending awaitable; clears it once ready
    fn poll(&mut self) -> bool {
        match self.pending.as_mut() {
            Some(awaitable) => {
                if awaitable.ready() {
                    self.pending = None;
                    true
                } else {
                    false
                }
            }
            None => true,
        }
    }
}

/// Owned handle to a suspended task
///
/// Move-only. An unowned handle (after [`Coroutine::destroy`] or from
/// [`Coroutine::default`]) must not be resumed or destroyed again.
pub struct Coroutine<T> {
    task: Option<BoxedTask<T>>,
    promise: Promise,
    output: Option<T>,
    done: bool,
}

impl<T: Send + 'static> Coroutine<T> {
    /// Build an owned coroutine from a task factory.
    ///
    /// The factory runs immediately; the task itself does not run until the
    /// first [`resume`](Self::resume).
    pub fn create<F, K>(factory: F) -> Self
    where
        F: FnOnce() -> K,
        K: Task<Output = T> + 'static,
    {
        Self::from_task(Box::new(factory()))
    }

    /// Wrap an already boxed task
    pub fn from_task(task: BoxedTask<T>) -> Self {
        Self {
            task: Some(task),
            promise: Promise::default(),
            output: None,
            done: false,
        }
    }
}

impl<T: Send> Coroutine<T> {
    /// Whether this handle still owns a task or its result
    pub fn is_owned(&self) -> bool {
        self.task.is_some() || self.done
    }

    /// Whether the task reached its terminal point
    pub fn done(&self) -> bool {
        self.done
    }

    /// Whether the task is parked on an awaitable
    pub fn is_suspended(&self) -> bool {
        self.promise.is_pending()
    }

    /// Poll once. Returns true if the task body ran.
    pub fn resume(&mut self) -> bool {
        debug_assert!(self.is_owned(), "resume on an unowned coroutine");
        debug_assert!(!self.done, "resume on a finished coroutine");
        if self.done {
            return false;
        }
        let Some(task) = self.task.as_mut() else {
            return false;
        };

        if !self.promise.poll() {
            return false;
        }

        match task.step() {
            Step::Await(awaitable) => self.promise.set(awaitable),
            Step::Done(value) => {
                self.output = Some(value);
                self.done = true;
                self.task = None;
            }
        }
        true
    }

    /// Take the terminal value, once
    pub fn take_output(&mut self) -> Option<T> {
        self.output.take()
    }

    /// Tear down a still-suspended task. Shutdown only.
    pub fn destroy(&mut self) {
        debug_assert!(self.is_owned(), "destroy on an unowned coroutine");
        self.task = None;
        self.promise = Promise::default();
        self.output = None;
        self.done = false;
    }
}

impl<T: Send> Default for Coroutine<T> {
    /// An unowned handle
    fn default() -> Self {
        Self {
            task: None,
            promise: Promise::default(),
            output: None,
            done: false,
        }
    }
}

impl<T: Send> std::fmt::Debug for Coroutine<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coroutine")
            .field("owned", &self.is_owned())
            .field("suspended", &self.is_suspended())
            .field("done", &self.done)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::awaitable::{Countdown, FnAwaitable};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Counts steps and waits on one countdown of `polls` before finishing
    struct TwoPhase {
        polls: usize,
        steps: Arc<AtomicUsize>,
        phase: u8,
    }

    impl Task for TwoPhase {
        type Output = &'static str;

        fn step(&mut self) -> Step<&'static str> {
            self.steps.fetch_add(1, Ordering::SeqCst);
            match self.phase {
                0 => {
                    self.phase = 1;
                    Step::Await(Box::new(Countdown::new(self.polls)))
                }
                _ => Step::Done("finished"),
            }
        }
    }

    #[test]
    fn test_first_resume_runs_to_suspension() {
        let steps = Arc::new(AtomicUsize::new(0));
        let mut co = Coroutine::create(|| TwoPhase {
            polls: 3,
            steps: steps.clone(),
            phase: 0,
        });

        assert_eq!(steps.load(Ordering::SeqCst), 0);
        assert!(co.resume());
        assert_eq!(steps.load(Ordering::SeqCst), 1);
        assert!(co.is_suspended());
        assert!(!co.done());
    }

    #[test]
    fn test_resumes_on_n_plus_first_poll() {
        for n in 0..5 {
            let steps = Arc::new(AtomicUsize::new(0));
            let mut co = Coroutine::create(|| TwoPhase {
                polls: n,
                steps: steps.clone(),
                phase: 0,
            });
            co.resume();

            for _ in 0..n {
                assert!(!co.resume());
                assert_eq!(steps.load(Ordering::SeqCst), 1);
            }
            assert!(co.resume());
            assert_eq!(steps.load(Ordering::SeqCst), 2);
            assert!(co.done());
            assert_eq!(co.take_output(), Some("finished"));
        }
    }

    #[test]
    fn test_closure_task_with_predicate() {
        let flag = Arc::new(AtomicBool::new(false));
        let observed = flag.clone();
        let mut suspended = false;
        let mut co = Coroutine::create(move || {
            move || {
                if !suspended {
                    suspended = true;
                    let flag = observed.clone();
                    return Step::Await(Box::new(FnAwaitable::new(move || {
                        flag.load(Ordering::SeqCst)
                    })));
                }
                Step::Done(7)
            }
        });

        co.resume();
        assert!(!co.resume());
        assert!(!co.resume());
        flag.store(true, Ordering::SeqCst);
        assert!(co.resume());
        assert_eq!(co.take_output(), Some(7));
    }

    #[test]
    fn test_destroy_suspended() {
        let steps = Arc::new(AtomicUsize::new(0));
        let mut co = Coroutine::create(|| TwoPhase {
            polls: 100,
            steps: steps.clone(),
            phase: 0,
        });
        co.resume();
        co.destroy();
        assert!(!co.is_owned());
        assert!(!co.done());
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "destroy on an unowned coroutine")]
    fn test_double_destroy_asserts() {
        let mut co: Coroutine<()> = Coroutine::create(|| || Step::Done(()));
        co.destroy();
        co.destroy();
    }
}
