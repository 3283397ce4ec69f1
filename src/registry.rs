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

//! Polymorphic construction keyed by type hash.
//!
//! Concrete types register a [`TypeRegistration`] statically through
//! [`register_type!`](crate::register_type); submissions form a process-wide
//! list that exists before any registry does. Runtime code can queue more with
//! [`TypeRegistry::defer`]. Nothing is looked up until bootstrap calls
//! [`TypeRegistry::init_all`], which builds an owned registry from both lists.

use crate::error::{ResourceError, Result};
use crate::guid::{Guid, TypeHash, TypeInfo};
use crate::rc::RC;
use crate::resources::Resource;
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use std::any::Any;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

/// Bytes before the document: type hash, then GUID
pub const OBJECT_HEADER_LEN: usize = 32;

/// Root of every registry-constructible object
pub trait BaseObject: Any + Send + Sync {
    /// Identity assigned at construction
    fn guid(&self) -> Guid;

    fn type_info(&self) -> TypeInfo;

    fn type_name(&self) -> &'static str {
        self.type_info().name()
    }

    fn type_hash(&self) -> TypeHash {
        self.type_info().hash()
    }

    /// Serializable document describing this object
    fn serialize(&self) -> Box<dyn erased_serde::Serialize + '_>;

    /// Restore fields from a document produced by [`BaseObject::serialize`]
    fn deserialize(&mut self, input: &mut dyn erased_serde::Deserializer<'_>) -> Result<()>;

    fn as_any(&self) -> &dyn Any;
}

/// Static identity and constructor of a registrable type
pub trait Registered: BaseObject + Sized {
    const TYPE_NAME: &'static str;

    /// Build an empty object owning `guid`
    fn construct(guid: Guid) -> Self;

    fn static_type_info() -> TypeInfo {
        TypeInfo::new(Self::TYPE_NAME)
    }
}

impl<T: BaseObject> From<RC<T>> for RC<dyn BaseObject> {
    fn from(rc: RC<T>) -> Self {
        let raw: *mut crate::rc::RcInner<dyn BaseObject> = RC::into_inner_ptr(rc).as_ptr();
        // SAFETY: same allocation, only the pointer metadata changes
        unsafe { RC::from_inner_ptr(NonNull::new_unchecked(raw)) }
    }
}

impl RC<dyn BaseObject> {
    /// Recover the concrete handle
    pub fn downcast<T: BaseObject>(this: Self) -> std::result::Result<RC<T>, Self> {
        if this.as_any().is::<T>() {
            // SAFETY: type checked above
            Ok(unsafe { RC::cast_unchecked(this) })
        } else {
            Err(this)
        }
    }
}

fn construct_object<T: Registered>(guid: Guid) -> RC<dyn BaseObject> {
    RC::new(T::construct(guid)).into()
}

fn construct_resource<T: Registered + Resource>(guid: Guid) -> RC<dyn Resource> {
    RC::new(T::construct(guid)).into()
}

/// Type registration data
#[derive(Clone, Copy)]
pub struct TypeRegistration {
    pub type_name: &'static str,
    pub create_object: fn(Guid) -> RC<dyn BaseObject>,
    pub create_resource: Option<fn(Guid) -> RC<dyn Resource>>,
}

impl TypeRegistration {
    /// Registration for a plain object
    pub const fn object<T: Registered>() -> Self {
        Self {
            type_name: T::TYPE_NAME,
            create_object: construct_object::<T>,
            create_resource: None,
        }
    }

    /// Registration for a loadable resource
    pub const fn resource<T: Registered + Resource>() -> Self {
        Self {
            type_name: T::TYPE_NAME,
            create_object: construct_object::<T>,
            create_resource: Some(construct_resource::<T>),
        }
    }

    pub fn type_info(&self) -> TypeInfo {
        TypeInfo::new(self.type_name)
    }
}

inventory::collect!(TypeRegistration);

/// Submit a static registration for a type.
///
/// ```ignore
/// register_type!(resource Mesh);
/// register_type!(object SceneSettings);
/// ```
#[macro_export]
macro_rules! register_type {
    (resource $t:ty) => {
        $crate::inventory::submit! {
            $crate::registry::TypeRegistration::resource::<$t>()
        }
    };
    (object $t:ty) => {
        $crate::inventory::submit! {
            $crate::registry::TypeRegistration::object::<$t>()
        }
    };
}

/// Registrations queued at runtime before `init_all`
static DEFERRED: Mutex<Vec<TypeRegistration>> = Mutex::new(Vec::new());

/// Registry for constructible types.
///
/// Registration needs `&mut self`; disposal works through a shared handle.
#[derive(Default)]
pub struct TypeRegistry {
    registrations: RwLock<FxHashMap<TypeHash, (TypeInfo, TypeRegistration)>>,
    disposed: AtomicBool,
}

impl TypeRegistry {
    /// Create an empty registry (no static registrations applied)
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a registration for the next `init_all`
    pub fn defer(registration: TypeRegistration) {
        DEFERRED.lock().push(registration);
    }

    /// Build the registry from every static and deferred registration.
    ///
    /// Call once from bootstrap. A hash registered twice is an error.
    pub fn init_all() -> Result<Self> {
        let mut registry = Self::new();
        for registration in inventory::iter::<TypeRegistration> {
            registry.register(*registration)?;
        }
        let deferred: Vec<_> = std::mem::take(&mut *DEFERRED.lock());
        for registration in deferred {
            registry.register(registration)?;
        }
        debug!(types = registry.len(), "type registry initialised");
        Ok(registry)
    }

    /// Drop every registration; later lookups find nothing
    pub fn dispose_all(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.registrations.write().clear();
        debug!("type registry disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Register a type
    pub fn register(&mut self, registration: TypeRegistration) -> Result<()> {
        let info = registration.type_info();
        let registrations = self.registrations.get_mut();
        if let Some((existing, _)) = registrations.get(&info.hash()) {
            warn!(type_name = info.name(), existing = existing.name(), "duplicate type registration");
            return Err(ResourceError::DuplicateType(info.name().to_string()));
        }
        registrations.insert(info.hash(), (info, registration));
        Ok(())
    }

    pub fn contains(&self, hash: TypeHash) -> bool {
        self.registrations.read().contains_key(&hash)
    }

    /// Get type info by hash
    pub fn get(&self, hash: TypeHash) -> Option<TypeInfo> {
        self.registrations.read().get(&hash).map(|(info, _)| *info)
    }

    /// Registered types in hash order
    pub fn types(&self) -> Vec<TypeInfo> {
        let mut infos: Vec<_> = self
            .registrations
            .read()
            .values()
            .map(|(info, _)| *info)
            .collect();
        infos.sort();
        infos
    }

    pub fn len(&self) -> usize {
        self.registrations.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.read().is_empty()
    }

    fn registration(&self, hash: TypeHash) -> Option<TypeRegistration> {
        self.registrations
            .read()
            .get(&hash)
            .map(|(_, registration)| *registration)
    }

    /// Construct an empty object; unknown hash (or a disposed registry) gives `None`
    pub fn create(&self, hash: TypeHash, guid: Guid) -> Option<RC<dyn BaseObject>> {
        self.registration(hash)
            .map(|registration| (registration.create_object)(guid))
    }

    /// Construct an empty resource; `None` for unknown or non-resource hashes
    pub fn create_resource(&self, hash: TypeHash, guid: Guid) -> Option<RC<dyn Resource>> {
        self.registration(hash)
            .and_then(|registration| registration.create_resource)
            .map(|create| create(guid))
    }

    /// Encode `[type hash][guid][json document]`
    pub fn serialize_object<O: BaseObject + ?Sized>(&self, object: &O) -> Result<Vec<u8>> {
        let mut bytes = Vec::with_capacity(256);
        bytes.extend_from_slice(&object.type_hash().to_le_bytes());
        bytes.extend_from_slice(&object.guid().to_bytes());
        let document = object.serialize();
        serde_json::to_writer_pretty(&mut bytes, &document)?;
        Ok(bytes)
    }

    /// Decode bytes produced by [`TypeRegistry::serialize_object`]
    pub fn deserialize_object(&self, bytes: &[u8]) -> Result<RC<dyn BaseObject>> {
        let header = ObjectHeader::parse(bytes)?;
        let mut object = self
            .create(header.type_hash, header.guid)
            .ok_or(ResourceError::UnknownType(header.type_hash))?;
        let target = RC::get_mut(&mut object).ok_or(ResourceError::Disposed)?;
        deserialize_document(target, header.document)?;
        Ok(object)
    }

    /// Like [`TypeRegistry::deserialize_object`] for resource types
    pub fn deserialize_resource(&self, bytes: &[u8]) -> Result<RC<dyn Resource>> {
        let header = ObjectHeader::parse(bytes)?;
        let mut resource = self
            .create_resource(header.type_hash, header.guid)
            .ok_or(ResourceError::UnknownType(header.type_hash))?;
        let target = RC::get_mut(&mut resource).ok_or(ResourceError::Disposed)?;
        deserialize_document(target, header.document)?;
        Ok(resource)
    }
}

/// Leading fields of a serialized object
#[derive(Debug, Clone, Copy)]
pub struct ObjectHeader<'a> {
    pub type_hash: TypeHash,
    pub guid: Guid,
    pub document: &'a [u8],
}

impl<'a> ObjectHeader<'a> {
    pub fn parse(bytes: &'a [u8]) -> Result<Self> {
        if bytes.len() < OBJECT_HEADER_LEN {
            return Err(ResourceError::CorruptPayload(format!(
                "object header needs {OBJECT_HEADER_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        let mut hash = [0u8; 16];
        hash.copy_from_slice(&bytes[..16]);
        let mut guid = [0u8; 16];
        guid.copy_from_slice(&bytes[16..32]);
        Ok(Self {
            type_hash: TypeHash::from_le_bytes(hash),
            guid: Guid::from_bytes(guid),
            document: &bytes[OBJECT_HEADER_LEN..],
        })
    }
}

fn deserialize_document<T: BaseObject + ?Sized>(target: &mut T, document: &[u8]) -> Result<()> {
    let mut json = serde_json::Deserializer::from_slice(document);
    {
        let mut erased = <dyn erased_serde::Deserializer>::erase(&mut json);
        target
            .deserialize(&mut erased)
            .map_err(|err| match err {
                ResourceError::Serialization(msg) => ResourceError::CorruptPayload(msg),
                other => other,
            })?;
    }
    json.end()
        .map_err(|err| ResourceError::CorruptPayload(err.to_string()))
}
