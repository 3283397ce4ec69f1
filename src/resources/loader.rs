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

//! Resource directory: GUID to live handle.
//!
//! The directory only holds weak handles. A resource stays cached exactly as
//! long as something outside the loader keeps a strong handle; after that a
//! lookup goes back to its metadata file.

use crate::config::LoaderConfig;
use crate::error::{ResourceError, Result};
use crate::guid::Guid;
use crate::rc::{RCWeak, RC};
use crate::registry::{Registered, TypeRegistry};
use crate::resources::device::DeviceBackend;
use crate::resources::io::{FileIo, FsIo, IoQueue};
use crate::resources::scheduler::{LoadScheduler, PollReport};
use crate::resources::{LoadState, Resource};
use ahash::{AHashMap, AHashSet};
use parking_lot::{Mutex, RwLock};
use std::sync::{Arc, Weak};
use tracing::{debug, error, info, warn};

/// Loader statistics
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LoaderStats {
    /// Lookups answered from the directory
    pub cache_hits: u64,
    /// Lookups that read metadata
    pub cache_misses: u64,
    /// Lookups that produced nothing
    pub failed_lookups: u64,
    pub loads_scheduled: u64,
}

impl LoaderStats {
    pub fn cache_hit_ratio(&self) -> f32 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            self.cache_hits as f32 / total as f32
        }
    }
}

struct LoaderShared {
    config: LoaderConfig,
    registry: Arc<TypeRegistry>,
    entries: RwLock<AHashMap<Guid, RCWeak<dyn Resource>>>,
    known: RwLock<AHashSet<Guid>>,
    scheduler: LoadScheduler,
    io: IoQueue,
    device: Arc<dyn DeviceBackend>,
    stats: Mutex<LoaderStats>,
}

/// Everything a load body may touch besides its own resource
#[derive(Clone)]
pub struct LoadContext {
    loader: Weak<LoaderShared>,
    io: IoQueue,
    device: Arc<dyn DeviceBackend>,
}

impl LoadContext {
    pub fn io(&self) -> &IoQueue {
        &self.io
    }

    pub fn device(&self) -> &Arc<dyn DeviceBackend> {
        &self.device
    }

    /// The owning loader, unless it was dropped
    pub fn loader(&self) -> Option<ResourceLoader> {
        self.loader.upgrade().map(|shared| ResourceLoader { shared })
    }

    /// Look up a dependency and kick its load
    pub fn resolve(&self, guid: Guid) -> Result<RC<dyn Resource>> {
        let loader = self.loader().ok_or(ResourceError::Disposed)?;
        loader
            .load_resource(guid, true)
            .ok_or(ResourceError::DependencyFailed(guid))
    }
}

/// Resource loader and directory
#[derive(Clone)]
pub struct ResourceLoader {
    shared: Arc<LoaderShared>,
}

impl ResourceLoader {
    /// Loader over the filesystem directory named in `config`
    pub fn new(
        config: LoaderConfig,
        registry: Arc<TypeRegistry>,
        device: Arc<dyn DeviceBackend>,
    ) -> Result<Self> {
        let io: Arc<dyn FileIo> = Arc::new(FsIo::new(config.resource_dir.clone()));
        Self::with_io(config, registry, io, device)
    }

    /// Loader over arbitrary storage
    pub fn with_io(
        config: LoaderConfig,
        registry: Arc<TypeRegistry>,
        io: Arc<dyn FileIo>,
        device: Arc<dyn DeviceBackend>,
    ) -> Result<Self> {
        config.validate()?;
        let scheduler = LoadScheduler::new(config.worker_threads, config.backoff_limit);
        let io = IoQueue::new(io, config.io_threads);
        info!(
            resource_dir = %config.resource_dir.display(),
            workers = config.worker_threads,
            io_threads = config.io_threads,
            "resource loader created"
        );
        Ok(Self {
            shared: Arc::new(LoaderShared {
                config,
                registry,
                entries: RwLock::new(AHashMap::new()),
                known: RwLock::new(AHashSet::new()),
                scheduler,
                io,
                device,
                stats: Mutex::new(LoaderStats::default()),
            }),
        })
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.shared.config
    }

    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.shared.registry
    }

    pub fn scheduler(&self) -> &LoadScheduler {
        &self.shared.scheduler
    }

    pub fn io(&self) -> &IoQueue {
        &self.shared.io
    }

    pub fn device(&self) -> &Arc<dyn DeviceBackend> {
        &self.shared.device
    }

    /// Context handed to load bodies
    pub fn context(&self) -> LoadContext {
        LoadContext {
            loader: Arc::downgrade(&self.shared),
            io: self.shared.io.clone(),
            device: Arc::clone(&self.shared.device),
        }
    }

    /// Metadata file name for a GUID
    pub fn metadata_path(&self, guid: Guid) -> String {
        format!("{guid}.{}", self.shared.config.metadata_extension)
    }

    /// Get or create the live handle for `guid`.
    ///
    /// Failures (missing metadata, unknown type, corrupt document) are logged
    /// and give `None`; nothing is cached, so a later retry can succeed.
    pub fn load_resource(&self, guid: Guid, async_load: bool) -> Option<RC<dyn Resource>> {
        match self.try_load_resource(guid, async_load) {
            Ok(resource) => Some(resource),
            Err(err) => {
                self.shared.stats.lock().failed_lookups += 1;
                match err {
                    ResourceError::FileNotFound(_) => {
                        warn!(%guid, error = %err, "resource metadata missing")
                    }
                    _ => error!(%guid, error = %err, "resource metadata rejected"),
                }
                None
            }
        }
    }

    /// Like [`ResourceLoader::load_resource`], keeping the error
    pub fn try_load_resource(&self, guid: Guid, async_load: bool) -> Result<RC<dyn Resource>> {
        #[cfg(feature = "profiling")]
        let _span = tracing::info_span!("load_resource", %guid).entered();

        if let Some(resource) = self.lookup(guid) {
            self.shared.stats.lock().cache_hits += 1;
            self.kick(&resource, async_load);
            return Ok(resource);
        }

        let bytes = self.shared.io.read(&self.metadata_path(guid), 0, 0)?;
        let resource = self.shared.registry.deserialize_resource(&bytes)?;
        if resource.guid() != guid {
            return Err(ResourceError::CorruptPayload(format!(
                "metadata for {guid} describes {}",
                resource.guid()
            )));
        }

        {
            let mut entries = self.shared.entries.write();
            // another thread may have created it while we were reading
            if let Some(existing) = entries.get(&guid).and_then(|weak| weak.lock()) {
                drop(entries);
                self.shared.stats.lock().cache_hits += 1;
                self.kick(&existing, async_load);
                return Ok(existing);
            }
            entries.insert(guid, RC::downgrade(&resource));
        }

        self.shared.known.write().insert(guid);
        self.shared.stats.lock().cache_misses += 1;
        debug!(%guid, type_name = resource.type_name(), "resource created from metadata");
        self.kick(&resource, async_load);
        Ok(resource)
    }

    /// Typed lookup; `None` also when the stored type differs
    pub fn load_as<T: Resource>(&self, guid: Guid, async_load: bool) -> Option<RC<T>> {
        let resource = self.load_resource(guid, async_load)?;
        match RC::<dyn Resource>::downcast::<T>(resource) {
            Ok(typed) => Some(typed),
            Err(resource) => {
                warn!(%guid, actual = resource.type_name(), "resource has a different type");
                None
            }
        }
    }

    /// Live handle if one exists, without touching storage
    pub fn lookup(&self, guid: Guid) -> Option<RC<dyn Resource>> {
        self.shared.entries.read().get(&guid).and_then(|weak| weak.lock())
    }

    /// Unloaded and Failed resources get a fresh load; failures are never sticky
    fn kick(&self, resource: &RC<dyn Resource>, async_load: bool) {
        if async_load && matches!(resource.state(), LoadState::Unloaded | LoadState::Failed) {
            self.schedule(resource);
        }
    }

    /// Schedule a load and count it
    pub fn schedule(&self, resource: &RC<dyn Resource>) -> bool {
        let scheduled = resource.async_load_from_file(self).scheduled();
        if scheduled {
            self.shared.stats.lock().loads_scheduled += 1;
        }
        scheduled
    }

    /// Scan the resource directory for metadata files. Contents are not read.
    pub fn enumerate(&self) -> Result<usize> {
        let extension = &self.shared.config.metadata_extension;
        let names = self.shared.io.io().list(extension)?;
        let mut known = self.shared.known.write();
        let before = known.len();
        for name in names {
            let stem = name.strip_suffix(extension.as_str()).and_then(|s| s.strip_suffix('.'));
            match stem.map(str::parse::<Guid>) {
                Some(Ok(guid)) => {
                    known.insert(guid);
                }
                _ => debug!(file = %name, "skipping metadata file without a GUID name"),
            }
        }
        let found = known.len() - before;
        info!(found, total = known.len(), "resource directory enumerated");
        Ok(found)
    }

    /// Every GUID seen by `enumerate`, a lookup or a save, in order
    pub fn known_guids(&self) -> Vec<Guid> {
        let mut guids: Vec<_> = self.shared.known.read().iter().copied().collect();
        guids.sort();
        guids
    }

    /// Write the metadata document for a resource
    pub fn save_metadata(&self, resource: &dyn Resource) -> Result<()> {
        let bytes = self.shared.registry.serialize_object(resource)?;
        let guid = resource.guid();
        self.shared.io.io().write(&self.metadata_path(guid), &bytes)?;
        self.shared.known.write().insert(guid);
        debug!(%guid, bytes = bytes.len(), "metadata saved");
        Ok(())
    }

    /// Engine-created resource, registered in the directory
    pub fn create_empty<T: Registered + Resource>(&self) -> RC<T> {
        self.create_with::<T>(|_| {})
    }

    /// Engine-created resource configured before it becomes shared
    pub fn create_with<T: Registered + Resource>(&self, init: impl FnOnce(&mut T)) -> RC<T> {
        let mut object = T::construct(Guid::new());
        init(&mut object);
        let guid = object.guid();
        let typed = RC::new(object);
        let erased: RC<dyn Resource> = typed.clone().into();
        self.shared
            .entries
            .write()
            .insert(guid, RC::downgrade(&erased));
        debug!(%guid, type_name = T::TYPE_NAME, "resource created");
        typed
    }

    /// Directory entries whose target is still alive
    pub fn live_count(&self) -> usize {
        self.shared
            .entries
            .read()
            .values()
            .filter(|weak| !weak.is_expired())
            .count()
    }

    /// Drop expired entries; returns how many went
    pub fn prune(&self) -> usize {
        let mut entries = self.shared.entries.write();
        let before = entries.len();
        entries.retain(|_, weak| !weak.is_expired());
        before - entries.len()
    }

    /// Drive loads by hand (manual scheduler mode)
    pub fn poll(&self) -> PollReport {
        self.shared.scheduler.poll_all()
    }

    pub fn run_until_idle(&self) -> usize {
        self.shared.scheduler.run_until_idle()
    }

    pub fn stats(&self) -> LoaderStats {
        self.shared.stats.lock().clone()
    }

    /// Stop workers and destroy in-flight loads
    pub fn shutdown(&self) {
        self.shared.scheduler.shutdown();
        self.shared.io.shutdown();
        info!(live = self.live_count(), "resource loader shut down");
    }
}

impl std::fmt::Debug for ResourceLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceLoader")
            .field("resource_dir", &self.shared.config.resource_dir)
            .field("live", &self.live_count())
            .field("scheduler", &self.shared.scheduler)
            .finish()
    }
}
