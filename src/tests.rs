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

//! Lifecycle scenarios driven by hand over in-memory storage

use crate::awaitable::Countdown;
use crate::config::LoaderConfig;
use crate::coroutine::{BoxedTask, Step};
use crate::error::{ResourceError, Result};
use crate::guid::{Guid, TypeInfo};
use crate::rc::{RCWeak, RC};
use crate::registry::{BaseObject, TypeRegistry};
use crate::resources::types::{Material, MaterialDesc, Texture, TextureDesc, TextureFormat};
use crate::resources::{
    DeviceBackend, FileIo, HeadlessDevice, LoadContext, LoadRequest, LoadState, MemoryIo,
    PollOutcome, Resource, ResourceBase, ResourceLoader, ResourceSource,
};
use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct Fixture {
    io: Arc<MemoryIo>,
    device: Arc<HeadlessDevice>,
    loader: ResourceLoader,
}

fn fixture() -> Fixture {
    let registry = Arc::new(TypeRegistry::init_all().unwrap());
    let io = Arc::new(MemoryIo::new());
    let device = Arc::new(HeadlessDevice::new());
    let storage: Arc<dyn FileIo> = io.clone();
    let backend: Arc<dyn DeviceBackend> = device.clone();
    let loader =
        ResourceLoader::with_io(LoaderConfig::manual("res"), registry, storage, backend).unwrap();
    Fixture { io, device, loader }
}

/// Write texture metadata; the pixel file only when `with_pixels`
fn stage_texture(fx: &Fixture, with_pixels: bool) -> Guid {
    let guid = Guid::new();
    let payload = format!("{guid}.pixels");
    let mut texture = Texture::new(guid);
    texture.set_desc(TextureDesc::new(2, 2, TextureFormat::Rgba8));
    texture.set_source(ResourceSource::file(payload.clone()));
    fx.loader.save_metadata(&texture).unwrap();
    if with_pixels {
        fx.io.insert(payload, vec![0xAB; 16]);
    }
    guid
}

fn stage_material(fx: &Fixture, textures: Vec<Guid>) -> Guid {
    let guid = Guid::new();
    let mut material = Material::new(guid);
    material.set_desc(MaterialDesc {
        textures,
        ..Default::default()
    });
    fx.loader.save_metadata(&material).unwrap();
    guid
}

/// Load body that awaits a countdown once, counting body steps
struct Probe {
    base: ResourceBase,
    polls: usize,
    steps: Arc<AtomicUsize>,
}

impl Probe {
    fn new(polls: usize) -> Self {
        Self {
            base: ResourceBase::new(Guid::new()),
            polls,
            steps: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl BaseObject for Probe {
    fn guid(&self) -> Guid {
        self.base.guid()
    }

    fn type_info(&self) -> TypeInfo {
        TypeInfo::new("tests::Probe")
    }

    fn serialize(&self) -> Box<dyn erased_serde::Serialize + '_> {
        Box::new(self.polls)
    }

    fn deserialize(&mut self, input: &mut dyn erased_serde::Deserializer<'_>) -> Result<()> {
        self.polls = erased_serde::deserialize(input)?;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Resource for Probe {
    fn base(&self) -> &ResourceBase {
        &self.base
    }

    fn load_task(&self, _this: RCWeak<dyn Resource>, _ctx: LoadContext) -> BoxedTask<Result<()>> {
        let steps = self.steps.clone();
        let mut countdown = Some(Countdown::new(self.polls));
        Box::new(move || -> Step<Result<()>> {
            steps.fetch_add(1, Ordering::SeqCst);
            match countdown.take() {
                Some(countdown) => Step::Await(Box::new(countdown)),
                None => Step::Done(Ok(())),
            }
        })
    }
}

#[test]
fn test_missing_metadata_is_not_cached() {
    let fx = fixture();
    let guid = Guid::new();

    assert!(fx.loader.load_resource(guid, false).is_none());
    assert!(fx.loader.load_resource(guid, false).is_none());
    assert_eq!(fx.loader.stats().failed_lookups, 2);

    let mut texture = Texture::new(guid);
    texture.set_desc(TextureDesc::new(1, 1, TextureFormat::R8));
    fx.loader.save_metadata(&texture).unwrap();

    let resource = fx.loader.load_resource(guid, false).unwrap();
    assert_eq!(resource.guid(), guid);
    assert_eq!(resource.state(), LoadState::Unloaded);
    assert_eq!(fx.loader.stats().cache_misses, 1);

    // second lookup hits the directory
    let again = fx.loader.load_resource(guid, false).unwrap();
    assert!(RC::ptr_eq(&resource, &again));
    assert_eq!(fx.loader.stats().cache_hits, 1);
}

#[test]
fn test_unknown_type_yields_nothing() {
    let fx = fixture();
    let guid = Guid::new();
    let probe = Probe {
        base: ResourceBase::new(guid),
        polls: 0,
        steps: Arc::new(AtomicUsize::new(0)),
    };
    // Probe is never registered, so its metadata cannot be constructed
    fx.loader.save_metadata(&probe).unwrap();
    let err = fx.loader.try_load_resource(guid, false).err().unwrap();
    assert!(matches!(err, ResourceError::UnknownType(_)));
    assert!(fx.loader.lookup(guid).is_none());
}

#[test]
fn test_metadata_under_wrong_name_is_rejected() {
    let fx = fixture();
    let guid = stage_texture(&fx, false);
    let bytes = fx.io.read(&fx.loader.metadata_path(guid), 0, 0).unwrap();
    let other = Guid::new();
    fx.io.insert(fx.loader.metadata_path(other), bytes);

    let err = fx.loader.try_load_resource(other, false).err().unwrap();
    assert!(matches!(err, ResourceError::CorruptPayload(_)));
}

#[test]
fn test_weak_entry_expires_with_last_strong() {
    let fx = fixture();
    let texture = fx.loader.create_empty::<Texture>();
    let guid = texture.guid();
    let erased: RC<dyn Resource> = texture.clone().into();
    let weak = RC::downgrade(&erased);
    drop(erased);

    assert!(fx.loader.lookup(guid).is_some());
    assert_eq!(fx.loader.live_count(), 1);

    drop(texture);
    assert!(weak.lock().is_none());
    assert!(weak.is_expired());
    assert!(fx.loader.lookup(guid).is_none());
    assert_eq!(fx.loader.live_count(), 0);
    assert_eq!(fx.loader.prune(), 1);
    // stays empty
    assert!(weak.lock().is_none());
}

#[test]
fn test_install_requires_loaded() {
    let fx = fixture();
    let guid = stage_texture(&fx, true);
    let texture = fx.loader.load_resource(guid, false).unwrap();

    let err = texture.init_device_resource(&*fx.device).unwrap_err();
    assert!(matches!(err, ResourceError::NotLoaded(LoadState::Unloaded)));

    assert!(texture.async_load_from_file(&fx.loader).scheduled());
    let err = texture.init_device_resource(&*fx.device).unwrap_err();
    assert!(matches!(err, ResourceError::NotLoaded(LoadState::Pending)));

    fx.loader.run_until_idle();
    assert_eq!(texture.state(), LoadState::Loaded);
    texture.init_device_resource(&*fx.device).unwrap();
    assert_eq!(texture.state(), LoadState::Installed);
    // idempotent
    texture.init_device_resource(&*fx.device).unwrap();

    let typed = fx.loader.load_as::<Texture>(guid, false).unwrap();
    assert!(typed.bindless_slot().is_some());

    assert!(texture.unload());
    assert_eq!(texture.state(), LoadState::Unloaded);
    assert!(typed.device_handle().is_none());
    assert!(texture.init_device_resource(&*fx.device).is_err());
}

#[test]
fn test_failed_load_cannot_install() {
    let fx = fixture();
    let guid = stage_texture(&fx, false);
    let texture = fx.loader.load_resource(guid, true).unwrap();
    fx.loader.run_until_idle();

    assert!(texture.failed());
    assert!(matches!(
        texture.last_error(),
        Some(ResourceError::FileNotFound(_))
    ));
    assert!(matches!(
        texture.init_device_resource(&*fx.device),
        Err(ResourceError::NotLoaded(LoadState::Failed))
    ));

    // a later retry succeeds once the payload exists
    fx.io.insert(format!("{guid}.pixels"), vec![0; 16]);
    assert!(texture.async_load_from_file(&fx.loader).scheduled());
    fx.loader.run_until_idle();
    assert!(texture.loaded());
    assert!(texture.last_error().is_none());
}

#[test]
fn test_async_load_schedules_once() {
    let fx = fixture();
    let guid = stage_texture(&fx, true);
    let texture = fx.loader.load_resource(guid, false).unwrap();

    let first = texture.async_load_from_file(&fx.loader);
    let second = texture.async_load_from_file(&fx.loader);
    assert!(first.scheduled());
    assert!(!second.scheduled());
    assert!(matches!(second, LoadRequest::InFlight(_)));
    assert_eq!(fx.loader.scheduler().in_flight(), 1);

    // both callers observe the same load
    let shared = second.handle().unwrap();
    assert!(RC::ptr_eq(shared.resource(), first.handle().unwrap().resource()));

    fx.loader.run_until_idle();
    assert!(shared.is_complete());
    assert!(shared.result().is_ok());
    assert!(matches!(
        texture.async_load_from_file(&fx.loader),
        LoadRequest::Skipped(LoadState::Loaded)
    ));
    assert_eq!(fx.loader.scheduler().in_flight(), 0);
}

#[test]
fn test_serialize_round_trip_keeps_identity() {
    let fx = fixture();
    let mut texture = Texture::new(Guid::new());
    texture.set_desc(TextureDesc::new(8, 4, TextureFormat::Rgba16F));
    texture.set_source(ResourceSource::packed("atlas.pak", 128, 256));

    let registry = fx.loader.registry();
    let bytes = registry.serialize_object(&texture).unwrap();
    let restored = registry.deserialize_resource(&bytes).unwrap();
    assert_eq!(restored.guid(), texture.guid());
    assert_eq!(restored.type_hash(), texture.type_hash());
    assert_eq!(restored.state(), LoadState::Unloaded);

    let restored = RC::<dyn Resource>::downcast::<Texture>(restored)
        .ok()
        .unwrap();
    assert_eq!(restored.desc(), texture.desc());
}

#[test]
fn test_load_resumes_on_n_plus_first_poll() {
    let fx = fixture();
    for n in 0..4 {
        let probe = Probe::new(n);
        let steps = probe.steps.clone();
        let resource: RC<dyn Resource> = RC::new(probe).into();
        assert!(resource.async_load_from_file(&fx.loader).scheduled());

        assert_eq!(resource.poll_load(), PollOutcome::Progressed);
        assert_eq!(resource.state(), LoadState::Loading);
        for _ in 0..n {
            assert_eq!(resource.poll_load(), PollOutcome::Waiting);
            assert_eq!(steps.load(Ordering::SeqCst), 1);
        }
        assert_eq!(resource.poll_load(), PollOutcome::Ready);
        assert_eq!(steps.load(Ordering::SeqCst), 2);
        assert!(resource.loaded());
    }
}

#[test]
fn test_material_waits_for_texture() {
    let fx = fixture();
    let texture = stage_texture(&fx, true);
    let material = stage_material(&fx, vec![texture]);

    let handle = fx.loader.load_resource(material, true).unwrap();
    let mut rounds = 0;
    while fx.loader.scheduler().in_flight() > 0 {
        fx.loader.poll();
        if handle.loaded() {
            let dependency = fx.loader.lookup(texture).unwrap();
            assert!(dependency.loaded());
        }
        rounds += 1;
        assert!(rounds < 64, "loads did not settle");
    }

    assert!(handle.loaded());
    let typed = RC::<dyn Resource>::downcast::<Material>(handle.clone())
        .ok()
        .unwrap();
    assert_eq!(typed.textures().len(), 1);
    assert_eq!(typed.textures()[0].guid(), texture);

    handle.init_device_resource(&*fx.device).unwrap();
    assert_eq!(
        fx.loader.lookup(texture).unwrap().state(),
        LoadState::Installed
    );
}

#[test]
fn test_failed_texture_fails_material() {
    let fx = fixture();
    let texture = stage_texture(&fx, false);
    let material = stage_material(&fx, vec![texture]);
    // the material drops its dependencies when it fails
    let dependency = fx.loader.load_resource(texture, false).unwrap();

    let handle = fx.loader.load_resource(material, true).unwrap();
    fx.loader.run_until_idle();

    assert!(dependency.failed());
    assert!(handle.failed());
    assert!(matches!(
        handle.last_error(),
        Some(ResourceError::DependencyFailed(guid)) if guid == texture
    ));
}

#[test]
fn test_failed_resource_is_retried() {
    let fx = fixture();
    let texture = stage_texture(&fx, false);
    let held = fx.loader.load_resource(texture, true).unwrap();
    fx.loader.run_until_idle();
    assert!(held.failed());

    // payload shows up later; a dependent's lookup schedules a fresh load
    fx.io.insert(format!("{texture}.pixels"), vec![0xAB; 16]);
    let material = stage_material(&fx, vec![texture]);
    let handle = fx.loader.load_resource(material, true).unwrap();
    fx.loader.run_until_idle();
    assert!(handle.loaded());
    assert_eq!(held.state(), LoadState::Loaded);
    assert!(held.last_error().is_none());

    // and a direct async lookup does the same
    let other = stage_texture(&fx, false);
    let held = fx.loader.load_resource(other, true).unwrap();
    fx.loader.run_until_idle();
    assert!(held.failed());
    fx.io.insert(format!("{other}.pixels"), vec![0xCD; 16]);
    let again = fx.loader.load_resource(other, true).unwrap();
    assert!(RC::ptr_eq(&held, &again));
    fx.loader.run_until_idle();
    assert!(again.loaded());
}

#[test]
fn test_missing_dependency_metadata_fails_material() {
    let fx = fixture();
    let material = stage_material(&fx, vec![Guid::new()]);
    let handle = fx.loader.load_resource(material, true).unwrap();
    fx.loader.run_until_idle();
    assert!(handle.failed());
}

#[test]
fn test_upload_frames() {
    let fx = fixture();
    let guid = stage_texture(&fx, true);
    let texture = fx.loader.load_resource(guid, true).unwrap();
    fx.loader.run_until_idle();

    assert!(texture.loaded());
    assert_eq!(texture.submitted_frame(), 1);
    assert!(!texture.load_executed(&*fx.device));
    assert!(!texture.load_finished(&*fx.device));

    fx.device.end_frame();
    assert!(texture.load_executed(&*fx.device));
    assert!(!texture.load_finished(&*fx.device));

    fx.device.complete_through(1);
    assert!(texture.load_finished(&*fx.device));
    assert_eq!(texture.wait_finished(&*fx.device), LoadState::Loaded);
}
