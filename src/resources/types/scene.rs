use super::DependencyWait;
use crate::awaitable::Awaitable;
use crate::coroutine::{BoxedTask, Step, Task};
use crate::error::{ResourceError, Result};
use crate::guid::Guid;
use crate::rc::{RCWeak, RC};
use crate::resources::device::DeviceBackend;
use crate::resources::loader::LoadContext;
use crate::resources::resource::lock_resource;
use crate::resources::types::{Material, Mesh};
use crate::resources::{Resource, ResourceBase};
use glam::{Mat4, Vec3};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// One entry of a scene
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SceneNode {
    Mesh {
        mesh: Guid,
        material: Guid,
        #[serde(default)]
        transform: Mat4,
    },
    Light {
        #[serde(default)]
        position: Vec3,
        color: Vec3,
        intensity: f32,
    },
    Procedural {
        name: String,
    },
}

/// Scene metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SceneDesc {
    pub nodes: Vec<SceneNode>,
}

impl SceneDesc {
    /// Referenced meshes and materials, first occurrence order, no repeats
    pub fn referenced(&self) -> Vec<Guid> {
        let mut guids: Vec<Guid> = Vec::new();
        for node in &self.nodes {
            if let SceneNode::Mesh { mesh, material, .. } = node {
                for guid in [*mesh, *material] {
                    if !guids.contains(&guid) {
                        guids.push(guid);
                    }
                }
            }
        }
        guids
    }
}

/// Per-node slot in the renderer's tables, assigned at install
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotIndex {
    /// Instance index in the top-level acceleration structure
    MeshTlas(u32),
    Light(u32),
    Procedural(u32),
}

/// Collection of meshes, lights and procedural nodes
pub struct Scene {
    base: ResourceBase,
    desc: SceneDesc,
    dependencies: RwLock<Vec<RC<dyn Resource>>>,
    slots: RwLock<Vec<SlotIndex>>,
}

impl Scene {
    pub fn new(guid: Guid) -> Self {
        Self {
            base: ResourceBase::new(guid),
            desc: SceneDesc::default(),
            dependencies: RwLock::new(Vec::new()),
            slots: RwLock::new(Vec::new()),
        }
    }

    pub fn desc(&self) -> &SceneDesc {
        &self.desc
    }

    pub fn set_desc(&mut self, desc: SceneDesc) {
        self.desc = desc;
    }

    /// Slot of every node, in node order; empty until installed
    pub fn slot_indices(&self) -> Vec<SlotIndex> {
        self.slots.read().clone()
    }

    pub fn slot(&self, node: usize) -> Option<SlotIndex> {
        self.slots.read().get(node).copied()
    }

    /// Loaded meshes and materials this scene holds on to
    pub fn resolved(&self) -> Vec<RC<dyn Resource>> {
        self.dependencies.read().clone()
    }
}

resource_object!(Scene, SceneDesc, "resource_lifecycle::Scene");

impl Resource for Scene {
    fn base(&self) -> &ResourceBase {
        &self.base
    }

    fn dependencies(&self) -> SmallVec<[Guid; 4]> {
        self.desc.referenced().into_iter().collect()
    }

    fn load_task(&self, this: RCWeak<dyn Resource>, ctx: LoadContext) -> BoxedTask<Result<()>> {
        Box::new(SceneLoad {
            this,
            ctx,
            wait: None,
        })
    }

    fn install(&self, device: &dyn DeviceBackend) -> Result<()> {
        for dependency in self.dependencies.read().iter() {
            dependency.init_device_resource(device)?;
        }

        let (mut meshes, mut lights, mut procedural) = (0u32, 0u32, 0u32);
        let slots = self
            .desc
            .nodes
            .iter()
            .map(|node| {
                let (counter, slot): (&mut u32, fn(u32) -> SlotIndex) = match node {
                    SceneNode::Mesh { .. } => (&mut meshes, SlotIndex::MeshTlas),
                    SceneNode::Light { .. } => (&mut lights, SlotIndex::Light),
                    SceneNode::Procedural { .. } => (&mut procedural, SlotIndex::Procedural),
                };
                let index = *counter;
                *counter += 1;
                slot(index)
            })
            .collect();
        *self.slots.write() = slots;
        Ok(())
    }

    fn release_payload(&self) {
        self.dependencies.write().clear();
        self.slots.write().clear();
    }
}

/// resolve meshes and materials -> await each -> keep them alive
struct SceneLoad {
    this: RCWeak<dyn Resource>,
    ctx: LoadContext,
    wait: Option<DependencyWait>,
}

impl SceneLoad {
    fn advance(&mut self) -> Result<Option<Box<dyn Awaitable>>> {
        if self.wait.is_none() {
            let scene = lock_resource::<Scene>(&self.this)?;
            let referenced = scene.desc.referenced();
            self.wait = Some(DependencyWait::resolve(&self.ctx, &referenced)?);
        }
        if let Some(wait) = self.wait.as_mut() {
            if let Some(awaitable) = wait.poll()? {
                return Ok(Some(Box::new(awaitable)));
            }
        }

        let resolved = self
            .wait
            .take()
            .map(DependencyWait::into_resolved)
            .unwrap_or_default();
        let scene = lock_resource::<Scene>(&self.this)?;
        check_node_types(&scene.desc, &resolved)?;
        *scene.dependencies.write() = resolved;
        Ok(None)
    }
}

fn check_node_types(desc: &SceneDesc, resolved: &[RC<dyn Resource>]) -> Result<()> {
    let find = |guid: Guid| resolved.iter().find(|resource| resource.guid() == guid);
    for node in &desc.nodes {
        if let SceneNode::Mesh { mesh, material, .. } = node {
            if !find(*mesh).is_some_and(|r| r.as_any().is::<Mesh>()) {
                return Err(ResourceError::CorruptPayload(format!(
                    "scene node mesh {mesh} is not a mesh"
                )));
            }
            if !find(*material).is_some_and(|r| r.as_any().is::<Material>()) {
                return Err(ResourceError::CorruptPayload(format!(
                    "scene node material {material} is not a material"
                )));
            }
        }
    }
    Ok(())
}

impl Task for SceneLoad {
    type Output = Result<()>;

    fn step(&mut self) -> Step<Result<()>> {
        match self.advance() {
            Ok(Some(awaitable)) => Step::Await(awaitable),
            Ok(None) => Step::Done(Ok(())),
            Err(err) => Step::Done(Err(err)),
        }
    }
}
