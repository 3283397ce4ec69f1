//! Concrete resource types.

/// Implements `BaseObject` and `Registered` for a resource type with `base`
/// and `desc` fields, and submits its registration.
macro_rules! resource_object {
    ($ty:ty, $desc:ty, $name:literal) => {
        impl $crate::registry::BaseObject for $ty {
            fn guid(&self) -> $crate::guid::Guid {
                self.base.guid()
            }

            fn type_info(&self) -> $crate::guid::TypeInfo {
                <Self as $crate::registry::Registered>::static_type_info()
            }

            fn serialize(&self) -> Box<dyn erased_serde::Serialize + '_> {
                Box::new($crate::resources::ResourceDocument {
                    source: self.base.source().clone(),
                    desc: self.desc.clone(),
                })
            }

            fn deserialize(
                &mut self,
                input: &mut dyn erased_serde::Deserializer<'_>,
            ) -> $crate::error::Result<()> {
                let document: $crate::resources::ResourceDocument<$desc> =
                    erased_serde::deserialize(input)?;
                self.base.set_source(document.source);
                self.desc = document.desc;
                Ok(())
            }

            fn as_any(&self) -> &dyn std::any::Any {
                self
            }
        }

        impl $crate::registry::Registered for $ty {
            const TYPE_NAME: &'static str = $name;

            fn construct(guid: $crate::guid::Guid) -> Self {
                Self::new(guid)
            }
        }

        $crate::register_type!(resource $ty);
    };
}

pub mod material;
pub mod mesh;
pub mod scene;
pub mod texture;

pub use material::{Material, MaterialDesc};
pub use mesh::{Aabb, Mesh, MeshData, MeshDesc};
pub use scene::{Scene, SceneDesc, SceneNode, SlotIndex};
pub use texture::{Texture, TextureDesc, TextureFormat};

use crate::awaitable::ResourceAwaitable;
use crate::error::{ResourceError, Result};
use crate::guid::Guid;
use crate::rc::RC;
use crate::resources::loader::LoadContext;
use crate::resources::Resource;

/// Sequential wait over a list of dependencies.
///
/// Each dependency is awaited in turn; one that does not end up loaded fails
/// the whole wait with `DependencyFailed`.
pub(crate) struct DependencyWait {
    dependencies: Vec<RC<dyn Resource>>,
    next: usize,
    awaiting: bool,
}

impl DependencyWait {
    /// Resolve every GUID through the loader, kicking their loads
    pub(crate) fn resolve(ctx: &LoadContext, guids: &[Guid]) -> Result<Self> {
        let dependencies = guids
            .iter()
            .map(|guid| ctx.resolve(*guid))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            dependencies,
            next: 0,
            awaiting: false,
        })
    }

    /// Next suspension point, or `None` once every dependency is loaded
    pub(crate) fn poll(&mut self) -> Result<Option<ResourceAwaitable>> {
        while let Some(dependency) = self.dependencies.get(self.next) {
            if !self.awaiting {
                self.awaiting = true;
                return Ok(Some(ResourceAwaitable::new(dependency.clone())));
            }
            self.awaiting = false;
            if !dependency.loaded() {
                return Err(ResourceError::DependencyFailed(dependency.guid()));
            }
            self.next += 1;
        }
        Ok(None)
    }

    pub(crate) fn into_resolved(self) -> Vec<RC<dyn Resource>> {
        self.dependencies
    }
}
