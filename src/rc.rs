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

//! Intrusive strong/weak reference counting.
//!
//! [`RC`] and [`RCWeak`] share one heap block holding both counters and the
//! object. The strong handles collectively own one implicit weak reference, so
//! the block outlives the object until the last weak handle is gone:
//!
//! - strong reaches zero: the object is dropped, then the implicit weak is released
//! - weak reaches zero: the block is freed
//!
//! Upgrading a weak handle is a single compare-and-increment loop that refuses
//! to move the strong count away from zero.

use std::fmt;
use std::mem::ManuallyDrop;
use std::ops::Deref;
use std::ptr::NonNull;
use std::sync::atomic::{self, AtomicUsize, Ordering};

/// Counts above this are treated as a leak and abort, mirroring `Arc`.
const MAX_REFCOUNT: usize = isize::MAX as usize;

/// Control block and object, allocated together
#[doc(hidden)]
pub struct RcInner<T: ?Sized> {
    strong: AtomicUsize,
    weak: AtomicUsize,
    value: ManuallyDrop<T>,
}

/// Strong, thread-safe reference-counted handle
pub struct RC<T: ?Sized> {
    ptr: NonNull<RcInner<T>>,
}

// SAFETY: same reasoning as `Arc<T>`; the counters are atomic and the value is
// only handed out as `&T`.
unsafe impl<T: ?Sized + Send + Sync> Send for RC<T> {}
unsafe impl<T: ?Sized + Send + Sync> Sync for RC<T> {}

/// Weak handle: observes without keeping the object alive
pub struct RCWeak<T: ?Sized> {
    ptr: Option<NonNull<RcInner<T>>>,
}

unsafe impl<T: ?Sized + Send + Sync> Send for RCWeak<T> {}
unsafe impl<T: ?Sized + Send + Sync> Sync for RCWeak<T> {}

impl<T> RC<T> {
    /// Allocate the object together with its control block
    pub fn new(value: T) -> Self {
        let inner = Box::new(RcInner {
            strong: AtomicUsize::new(1),
            // implicit weak owned by the strong handles
            weak: AtomicUsize::new(1),
            value: ManuallyDrop::new(value),
        });
        Self {
            ptr: NonNull::from(Box::leak(inner)),
        }
    }
}

impl<T: ?Sized> RC<T> {
    #[inline]
    fn inner(&self) -> &RcInner<T> {
        // SAFETY: the block stays allocated while any strong handle exists
        unsafe { self.ptr.as_ref() }
    }

    /// Create a weak handle to the same object
    pub fn downgrade(this: &Self) -> RCWeak<T> {
        let old = this.inner().weak.fetch_add(1, Ordering::Relaxed);
        if old > MAX_REFCOUNT {
            std::process::abort();
        }
        RCWeak {
            ptr: Some(this.ptr),
        }
    }

    /// Current number of strong handles
    pub fn strong_count(this: &Self) -> usize {
        this.inner().strong.load(Ordering::Acquire)
    }

    /// Current number of weak handles (excluding the implicit one)
    pub fn weak_count(this: &Self) -> usize {
        let weak = this.inner().weak.load(Ordering::Acquire);
        weak.saturating_sub(1)
    }

    /// Whether both handles point at the same allocation
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        this.ptr.cast::<()>() == other.ptr.cast::<()>()
    }

    /// Mutable access when this is the only handle, strong or weak
    pub fn get_mut(this: &mut Self) -> Option<&mut T> {
        let inner = this.inner();
        if inner.strong.load(Ordering::Acquire) == 1 && inner.weak.load(Ordering::Acquire) == 1 {
            // SAFETY: no other handle can observe the value
            Some(unsafe { &mut *(*this.ptr.as_ptr()).value })
        } else {
            None
        }
    }

    pub(crate) fn into_inner_ptr(this: Self) -> NonNull<RcInner<T>> {
        let ptr = this.ptr;
        std::mem::forget(this);
        ptr
    }

    /// # Safety
    /// `ptr` must come from [`RC::into_inner_ptr`] (possibly re-typed to a view
    /// of the same allocation) and carries the strong count that call released.
    pub(crate) unsafe fn from_inner_ptr(ptr: NonNull<RcInner<T>>) -> Self {
        Self { ptr }
    }
}

impl<T: ?Sized> Clone for RC<T> {
    fn clone(&self) -> Self {
        let old = self.inner().strong.fetch_add(1, Ordering::Relaxed);
        if old > MAX_REFCOUNT {
            std::process::abort();
        }
        Self { ptr: self.ptr }
    }
}

impl<T: ?Sized> Deref for RC<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner().value
    }
}

impl<T: ?Sized> Drop for RC<T> {
    fn drop(&mut self) {
        let old = self.inner().strong.fetch_sub(1, Ordering::Release);
        debug_assert!(old > 0, "RC strong count underflow");
        if old != 1 {
            return;
        }
        atomic::fence(Ordering::Acquire);

        // SAFETY: this was the last strong handle; nobody can reach the value
        // any more because `lock` refuses to upgrade from zero.
        unsafe {
            ManuallyDrop::drop(&mut (*self.ptr.as_ptr()).value);
        }

        // Release the implicit weak held by the strong group.
        drop(RCWeak {
            ptr: Some(self.ptr),
        });
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for RC<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

impl<T> RCWeak<T> {
    /// A weak handle that never upgrades
    pub const fn new() -> Self {
        Self { ptr: None }
    }
}

impl<T> Default for RCWeak<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> RCWeak<T> {
    /// Upgrade to a strong handle if the object is still alive.
    pub fn lock(&self) -> Option<RC<T>> {
        let ptr = self.ptr?;
        // SAFETY: this weak handle keeps the block allocated
        let inner = unsafe { ptr.as_ref() };

        let mut current = inner.strong.load(Ordering::Relaxed);
        loop {
            if current == 0 {
                return None;
            }
            if current > MAX_REFCOUNT {
                std::process::abort();
            }
            match inner.strong.compare_exchange_weak(
                current,
                current + 1,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Some(RC { ptr }),
                Err(observed) => current = observed,
            }
        }
    }

    /// Strong count of the target, zero once it has been dropped
    pub fn strong_count(&self) -> usize {
        match self.ptr {
            // SAFETY: this weak handle keeps the block allocated
            Some(ptr) => unsafe { ptr.as_ref() }.strong.load(Ordering::Acquire),
            None => 0,
        }
    }

    /// Whether the target is already gone
    pub fn is_expired(&self) -> bool {
        self.strong_count() == 0
    }

    pub(crate) fn into_inner_ptr(self) -> Option<NonNull<RcInner<T>>> {
        let ptr = self.ptr;
        std::mem::forget(self);
        ptr
    }

    /// # Safety
    /// Same contract as [`RC::from_inner_ptr`], for the weak count.
    pub(crate) unsafe fn from_inner_ptr(ptr: Option<NonNull<RcInner<T>>>) -> Self {
        Self { ptr }
    }
}

impl<T: ?Sized> Clone for RCWeak<T> {
    fn clone(&self) -> Self {
        if let Some(ptr) = self.ptr {
            // SAFETY: this weak handle keeps the block allocated
            let old = unsafe { ptr.as_ref() }.weak.fetch_add(1, Ordering::Relaxed);
            if old > MAX_REFCOUNT {
                std::process::abort();
            }
        }
        Self { ptr: self.ptr }
    }
}

impl<T: ?Sized> Drop for RCWeak<T> {
    fn drop(&mut self) {
        let Some(ptr) = self.ptr else {
            return;
        };
        // SAFETY: this weak handle keeps the block allocated until we decrement
        let old = unsafe { ptr.as_ref() }.weak.fetch_sub(1, Ordering::Release);
        debug_assert!(old > 0, "RCWeak weak count underflow");
        if old != 1 {
            return;
        }
        atomic::fence(Ordering::Acquire);

        // SAFETY: last reference of any kind; the value was already dropped
        // when the strong count reached zero and `ManuallyDrop` skips it here.
        unsafe {
            drop(Box::from_raw(ptr.as_ptr()));
        }
    }
}

impl<T: ?Sized> fmt::Debug for RCWeak<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(RCWeak)")
    }
}

impl<T: ?Sized> RC<T> {
    /// Re-type to a concrete type after a successful type check.
    ///
    /// # Safety
    /// The object behind `this` must really be a `U`.
    pub(crate) unsafe fn cast_unchecked<U>(this: Self) -> RC<U> {
        let raw = Self::into_inner_ptr(this).as_ptr() as *mut RcInner<U>;
        RC::from_inner_ptr(NonNull::new_unchecked(raw))
    }
}
