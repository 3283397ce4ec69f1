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

//! Resource base and lifecycle state machine.
//!
//! ```text
//! Unloaded/Failed --async_load_from_file--> Pending --first poll--> Loading
//! Loading --body Ok--> Loaded --init_device_resource--> Installed
//! Loading --body Err--> Failed
//! Loaded/Installed --unload--> Unloading --> Unloaded
//! ```
//!
//! The state sits behind a read-write lock so state checks share it. The
//! coroutine sits in its own mutex, always taken after the state lock, and
//! leaves it while it runs so a load body may freely inspect other resources.

use crate::coroutine::{BoxedTask, Coroutine};
use crate::error::{ResourceError, Result};
use crate::guid::Guid;
use crate::rc::{RcInner, RCWeak, RC};
use crate::registry::BaseObject;
use crate::resources::device::DeviceBackend;
use crate::resources::handle::{LoadHandle, LoadRequest};
use crate::resources::loader::{LoadContext, ResourceLoader};
use crossbeam::utils::Backoff;
use parking_lot::{Mutex, RwLock, RwLockUpgradableReadGuard};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

/// Lifecycle state of a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LoadState {
    #[default]
    Unloaded,
    /// Load scheduled, not yet picked up by a worker
    Pending,
    /// Load body running or suspended
    Loading,
    /// CPU side complete
    Loaded,
    /// Device objects registered
    Installed,
    Failed,
    Unloading,
}

impl LoadState {
    /// Pending or Loading
    pub fn is_in_flight(self) -> bool {
        matches!(self, LoadState::Pending | LoadState::Loading)
    }

    /// Loaded or Installed
    pub fn is_loaded(self) -> bool {
        matches!(self, LoadState::Loaded | LoadState::Installed)
    }
}

/// Where the payload lives: a file, optionally a window into a packed file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSource {
    pub path: String,
    #[serde(default)]
    pub offset: u64,
    /// Payload length, 0 meaning to the end of the file
    #[serde(default)]
    pub size: u64,
}

impl ResourceSource {
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            offset: 0,
            size: 0,
        }
    }

    pub fn packed(path: impl Into<String>, offset: u64, size: u64) -> Self {
        Self {
            path: path.into(),
            offset,
            size,
        }
    }
}

/// Metadata document of a resource: payload location plus type fields
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceDocument<D> {
    #[serde(default)]
    pub source: ResourceSource,
    pub desc: D,
}

/// Result of one `poll_load`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// No load in flight
    Idle,
    /// Still suspended; the pending awaitable was not ready
    Waiting,
    /// The body ran and suspended again
    Progressed,
    /// Load finished with Loaded
    Ready,
    /// Load finished with Failed
    Failed,
}

impl PollOutcome {
    pub fn is_pending(self) -> bool {
        matches!(self, PollOutcome::Waiting | PollOutcome::Progressed)
    }
}

pub(crate) type LoadCoroutine = Coroutine<Result<()>>;

#[derive(Default)]
struct LoadStatus {
    state: LoadState,
    last_error: Option<ResourceError>,
}

/// Fields shared by every resource type
pub struct ResourceBase {
    guid: Guid,
    source: ResourceSource,
    status: RwLock<LoadStatus>,
    coroutine: Mutex<Option<LoadCoroutine>>,
    submitted_frame: AtomicU64,
}

impl ResourceBase {
    pub fn new(guid: Guid) -> Self {
        Self {
            guid,
            source: ResourceSource::default(),
            status: RwLock::new(LoadStatus::default()),
            coroutine: Mutex::new(None),
            submitted_frame: AtomicU64::new(0),
        }
    }

    pub fn guid(&self) -> Guid {
        self.guid
    }

    pub fn source(&self) -> &ResourceSource {
        &self.source
    }

    pub fn set_source(&mut self, source: ResourceSource) {
        self.source = source;
    }

    pub fn state(&self) -> LoadState {
        self.status.read().state
    }

    /// Remember the frame an upload went into; the latest one wins
    pub fn record_submission(&self, frame: u64) {
        self.submitted_frame.fetch_max(frame, Ordering::AcqRel);
    }

    pub fn submitted_frame(&self) -> u64 {
        self.submitted_frame.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for ResourceBase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceBase")
            .field("guid", &self.guid)
            .field("source", &self.source)
            .field("state", &self.state())
            .finish()
    }
}

/// A loadable, installable object
pub trait Resource: BaseObject {
    fn base(&self) -> &ResourceBase;

    /// GUIDs this resource awaits while loading
    fn dependencies(&self) -> SmallVec<[Guid; 4]> {
        SmallVec::new()
    }

    /// Build the load body. Called once per scheduled load, under the
    /// resource's lock; must not inspect this resource's state.
    fn load_task(&self, this: RCWeak<dyn Resource>, ctx: LoadContext) -> BoxedTask<Result<()>>;

    /// Register device objects. Runs at most once per load.
    fn install(&self, _device: &dyn DeviceBackend) -> Result<()> {
        Ok(())
    }

    /// Drop the CPU payload and any device objects
    fn release_payload(&self) {}
}

impl dyn Resource {
    pub fn state(&self) -> LoadState {
        self.base().state()
    }

    /// CPU side done (Loaded or Installed)
    pub fn loaded(&self) -> bool {
        self.state().is_loaded()
    }

    pub fn failed(&self) -> bool {
        self.state() == LoadState::Failed
    }

    /// Why the last load failed
    pub fn last_error(&self) -> Option<ResourceError> {
        self.base().status.read().last_error.clone()
    }

    pub fn submitted_frame(&self) -> u64 {
        self.base().submitted_frame()
    }

    /// CPU load done and the upload frame has been submitted
    pub fn load_executed(&self, device: &dyn DeviceBackend) -> bool {
        self.loaded() && device.frames_submitted() >= self.submitted_frame()
    }

    /// CPU load done and the upload frame has completed on the GPU
    pub fn load_finished(&self, device: &dyn DeviceBackend) -> bool {
        self.loaded() && device.frames_completed() >= self.submitted_frame()
    }

    /// Block until the state leaves Pending/Loading. Synchronous call sites only.
    pub fn wait_load(&self) -> LoadState {
        let backoff = Backoff::new();
        loop {
            let state = self.state();
            if !state.is_in_flight() {
                return state;
            }
            backoff.snooze();
        }
    }

    /// Block until the upload frame has completed, or the load failed
    pub fn wait_finished(&self, device: &dyn DeviceBackend) -> LoadState {
        let state = self.wait_load();
        if !state.is_loaded() {
            return state;
        }
        let backoff = Backoff::new();
        while device.frames_completed() < self.submitted_frame() {
            backoff.snooze();
        }
        self.state()
    }

    /// Loaded -> Installed. Idempotent once Installed.
    pub fn init_device_resource(&self, device: &dyn DeviceBackend) -> Result<()> {
        let status = self.base().status.upgradable_read();
        match status.state {
            LoadState::Installed => return Ok(()),
            LoadState::Loaded => {}
            state => return Err(ResourceError::NotLoaded(state)),
        }
        self.install(device)?;
        let mut status = RwLockUpgradableReadGuard::upgrade(status);
        status.state = LoadState::Installed;
        debug!(guid = %self.guid(), type_name = self.type_name(), "resource installed");
        Ok(())
    }

    /// Loaded/Installed -> Unloading -> Unloaded. False in any other state.
    pub fn unload(&self) -> bool {
        {
            let mut status = self.base().status.write();
            if !status.state.is_loaded() {
                return false;
            }
            status.state = LoadState::Unloading;
        }
        self.release_payload();
        self.base().submitted_frame.store(0, Ordering::Release);
        self.base().status.write().state = LoadState::Unloaded;
        debug!(guid = %self.guid(), "resource unloaded");
        true
    }

    /// Advance the in-flight load by one resume.
    ///
    /// Exactly one caller runs the body at a time: the coroutine leaves its
    /// slot while it runs and concurrent pollers see `Waiting`.
    pub fn poll_load(&self) -> PollOutcome {
        let mut coroutine = {
            let mut status = self.base().status.write();
            match status.state {
                LoadState::Pending => {
                    status.state = LoadState::Loading;
                    debug!(guid = %self.guid(), type_name = self.type_name(), "load started");
                }
                LoadState::Loading => {}
                LoadState::Loaded | LoadState::Installed => return PollOutcome::Ready,
                LoadState::Failed => return PollOutcome::Failed,
                LoadState::Unloaded | LoadState::Unloading => return PollOutcome::Idle,
            }
            match self.base().coroutine.lock().take() {
                Some(coroutine) => coroutine,
                None => return PollOutcome::Waiting,
            }
        };

        #[cfg(feature = "profiling")]
        let _span = tracing::info_span!("poll_load", guid = %self.guid()).entered();

        let advanced = coroutine.resume();
        if !coroutine.done() {
            let status = self.base().status.read();
            if status.state.is_in_flight() {
                *self.base().coroutine.lock() = Some(coroutine);
            } else {
                // torn down while the body ran
                coroutine.destroy();
            }
            return if advanced {
                PollOutcome::Progressed
            } else {
                PollOutcome::Waiting
            };
        }

        match coroutine.take_output().unwrap_or(Err(ResourceError::Disposed)) {
            Ok(()) => {
                self.base().status.write().state = LoadState::Loaded;
                debug!(guid = %self.guid(), type_name = self.type_name(), "resource loaded");
                PollOutcome::Ready
            }
            Err(err) => {
                warn!(guid = %self.guid(), type_name = self.type_name(), error = %err, "resource load failed");
                self.release_payload();
                let mut status = self.base().status.write();
                status.state = LoadState::Failed;
                status.last_error = Some(err);
                PollOutcome::Failed
            }
        }
    }

    /// Tear down an in-flight load at shutdown
    pub(crate) fn abandon_load(&self) {
        let coroutine = {
            let mut status = self.base().status.write();
            if !status.state.is_in_flight() {
                return;
            }
            status.state = LoadState::Failed;
            status.last_error = Some(ResourceError::Disposed);
            self.base().coroutine.lock().take()
        };
        if let Some(mut coroutine) = coroutine {
            coroutine.destroy();
        }
        self.release_payload();
        debug!(guid = %self.guid(), "in-flight load destroyed");
    }
}

impl RC<dyn Resource> {
    /// Schedule a background load.
    ///
    /// Exactly one load is scheduled from Unloaded or Failed. While a load is
    /// in flight the existing one is shared; Loaded/Installed is a no-op.
    pub fn async_load_from_file(&self, loader: &ResourceLoader) -> LoadRequest {
        {
            let mut status = self.base().status.write();
            match status.state {
                LoadState::Pending | LoadState::Loading => {
                    return LoadRequest::InFlight(LoadHandle::new(self.clone()));
                }
                LoadState::Loaded | LoadState::Installed | LoadState::Unloading => {
                    return LoadRequest::Skipped(status.state);
                }
                LoadState::Unloaded | LoadState::Failed => {}
            }
            let task = self.load_task(RC::downgrade(self), loader.context());
            *self.base().coroutine.lock() = Some(Coroutine::from_task(task));
            status.state = LoadState::Pending;
            status.last_error = None;
        }
        debug!(guid = %self.guid(), type_name = self.type_name(), "load scheduled");
        loader.scheduler().submit(self.clone());
        LoadRequest::Scheduled(LoadHandle::new(self.clone()))
    }

    /// Recover the concrete handle
    pub fn downcast<T: Resource>(this: Self) -> std::result::Result<RC<T>, Self> {
        if this.as_any().is::<T>() {
            // SAFETY: type checked above
            Ok(unsafe { RC::cast_unchecked(this) })
        } else {
            Err(this)
        }
    }
}

impl<T: Resource> From<RC<T>> for RC<dyn Resource> {
    fn from(rc: RC<T>) -> Self {
        let raw: *mut RcInner<dyn Resource> = RC::into_inner_ptr(rc).as_ptr();
        // SAFETY: same allocation, only the pointer metadata changes
        unsafe { RC::from_inner_ptr(NonNull::new_unchecked(raw)) }
    }
}

impl<T: Resource> From<RCWeak<T>> for RCWeak<dyn Resource> {
    fn from(weak: RCWeak<T>) -> Self {
        let ptr = weak.into_inner_ptr().map(|ptr| {
            let raw: *mut RcInner<dyn Resource> = ptr.as_ptr();
            // SAFETY: derived from a non-null pointer
            unsafe { NonNull::new_unchecked(raw) }
        });
        // SAFETY: carries the weak count released by `into_inner_ptr`
        unsafe { RCWeak::from_inner_ptr(ptr) }
    }
}

impl RCWeak<dyn Resource> {
    /// Upgrade and downcast in one go
    pub fn lock_as<T: Resource>(&self) -> Option<RC<T>> {
        RC::<dyn Resource>::downcast::<T>(self.lock()?).ok()
    }
}

/// Upgrade a load body's back reference, or fail with `Disposed`
pub fn lock_resource<T: Resource>(this: &RCWeak<dyn Resource>) -> Result<RC<T>> {
    this.lock_as::<T>().ok_or(ResourceError::Disposed)
}
