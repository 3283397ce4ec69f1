use super::DependencyWait;
use crate::coroutine::{BoxedTask, Step, Task};
use crate::error::{ResourceError, Result};
use crate::guid::Guid;
use crate::rc::{RCWeak, RC};
use crate::resources::device::DeviceBackend;
use crate::resources::loader::LoadContext;
use crate::resources::resource::lock_resource;
use crate::resources::types::Texture;
use crate::resources::{Resource, ResourceBase};
use glam::Vec4;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Material metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaterialDesc {
    pub base_color: Vec4,
    pub roughness: f32,
    pub metallic: f32,
    /// Textures in binding order
    pub textures: Vec<Guid>,
}

impl Default for MaterialDesc {
    fn default() -> Self {
        Self {
            base_color: Vec4::ONE,
            roughness: 0.5,
            metallic: 0.0,
            textures: Vec::new(),
        }
    }
}

/// Surface parameters plus the textures they sample
pub struct Material {
    base: ResourceBase,
    desc: MaterialDesc,
    textures: RwLock<Vec<RC<dyn Resource>>>,
}

impl Material {
    pub fn new(guid: Guid) -> Self {
        Self {
            base: ResourceBase::new(guid),
            desc: MaterialDesc::default(),
            textures: RwLock::new(Vec::new()),
        }
    }

    pub fn desc(&self) -> &MaterialDesc {
        &self.desc
    }

    pub fn set_desc(&mut self, desc: MaterialDesc) {
        self.desc = desc;
    }

    /// Loaded textures, in binding order
    pub fn textures(&self) -> Vec<RC<Texture>> {
        self.textures
            .read()
            .iter()
            .filter_map(|texture| RC::<dyn Resource>::downcast::<Texture>(texture.clone()).ok())
            .collect()
    }
}

resource_object!(Material, MaterialDesc, "resource_lifecycle::Material");

impl Resource for Material {
    fn base(&self) -> &ResourceBase {
        &self.base
    }

    fn dependencies(&self) -> SmallVec<[Guid; 4]> {
        self.desc.textures.iter().copied().collect()
    }

    fn load_task(&self, this: RCWeak<dyn Resource>, ctx: LoadContext) -> BoxedTask<Result<()>> {
        Box::new(MaterialLoad {
            this,
            ctx,
            wait: None,
        })
    }

    /// Installs every texture first
    fn install(&self, device: &dyn DeviceBackend) -> Result<()> {
        for texture in self.textures.read().iter() {
            texture.init_device_resource(device)?;
        }
        Ok(())
    }

    fn release_payload(&self) {
        self.textures.write().clear();
    }
}

/// resolve textures -> await each in order -> keep them alive
struct MaterialLoad {
    this: RCWeak<dyn Resource>,
    ctx: LoadContext,
    wait: Option<DependencyWait>,
}

impl MaterialLoad {
    fn advance(&mut self) -> Result<Option<Step<Result<()>>>> {
        if self.wait.is_none() {
            let material = lock_resource::<Material>(&self.this)?;
            self.wait = Some(DependencyWait::resolve(&self.ctx, &material.desc.textures)?);
        }
        let Some(wait) = self.wait.as_mut() else {
            return Err(ResourceError::Disposed);
        };
        if let Some(awaitable) = wait.poll()? {
            return Ok(Some(Step::Await(Box::new(awaitable))));
        }

        let textures = self
            .wait
            .take()
            .map(DependencyWait::into_resolved)
            .unwrap_or_default();
        for texture in &textures {
            if !texture.as_any().is::<Texture>() {
                return Err(ResourceError::CorruptPayload(format!(
                    "material texture {} is a {}",
                    texture.guid(),
                    texture.type_name()
                )));
            }
        }
        let material = lock_resource::<Material>(&self.this)?;
        *material.textures.write() = textures;
        Ok(None)
    }
}

impl Task for MaterialLoad {
    type Output = Result<()>;

    fn step(&mut self) -> Step<Result<()>> {
        match self.advance() {
            Ok(Some(step)) => step,
            Ok(None) => Step::Done(Ok(())),
            Err(err) => Step::Done(Err(err)),
        }
    }
}
