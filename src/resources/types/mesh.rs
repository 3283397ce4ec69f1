use crate::coroutine::{BoxedTask, Step, Task};
use crate::error::{ResourceError, Result};
use crate::guid::Guid;
use crate::rc::RCWeak;
use crate::resources::device::{DeviceBackend, DeviceHandle, DeviceUpload};
use crate::resources::io::PendingRead;
use crate::resources::loader::LoadContext;
use crate::resources::resource::lock_resource;
use crate::resources::{Resource, ResourceBase, ResourceSource};
use glam::Vec3;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use speedy::{LittleEndian, Readable, Writable};
use std::sync::Arc;

/// Mesh metadata
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeshDesc {
    pub vertex_count: u32,
    pub index_count: u32,
}

/// Binary vertex and index streams
#[derive(Debug, Clone, Default, PartialEq, Readable, Writable)]
pub struct MeshData {
    /// xyz triples
    pub positions: Vec<f32>,
    pub indices: Vec<u32>,
}

impl MeshData {
    pub fn new(positions: &[Vec3], indices: Vec<u32>) -> Self {
        Self {
            positions: positions.iter().flat_map(|p| p.to_array()).collect(),
            indices,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(self.write_to_vec_with_ctx(LittleEndian::default())?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(Self::read_from_buffer_with_ctx(LittleEndian::default(), bytes)?)
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len() / 3
    }

    pub fn vertex(&self, index: usize) -> Option<Vec3> {
        let at = index.checked_mul(3)?;
        self.positions
            .get(at..at + 3)
            .map(Vec3::from_slice)
    }

    /// Check the streams against the metadata
    pub fn validate(&self, desc: &MeshDesc) -> Result<()> {
        if self.positions.len() % 3 != 0 {
            return Err(ResourceError::CorruptPayload(format!(
                "position stream length {} is not a multiple of 3",
                self.positions.len()
            )));
        }
        if self.vertex_count() != desc.vertex_count as usize {
            return Err(ResourceError::CorruptPayload(format!(
                "mesh declares {} vertices, payload has {}",
                desc.vertex_count,
                self.vertex_count()
            )));
        }
        if self.indices.len() != desc.index_count as usize {
            return Err(ResourceError::CorruptPayload(format!(
                "mesh declares {} indices, payload has {}",
                desc.index_count,
                self.indices.len()
            )));
        }
        if self.indices.len() % 3 != 0 {
            return Err(ResourceError::CorruptPayload(format!(
                "index count {} is not a triangle list",
                self.indices.len()
            )));
        }
        if let Some(bad) = self.indices.iter().find(|&&i| i >= desc.vertex_count) {
            return Err(ResourceError::CorruptPayload(format!(
                "index {bad} out of range for {} vertices",
                desc.vertex_count
            )));
        }
        Ok(())
    }

    /// Bounding box; `None` for an empty mesh
    pub fn bounds(&self) -> Option<Aabb> {
        let mut vertices = (0..self.vertex_count()).filter_map(|i| self.vertex(i));
        let first = vertices.next()?;
        Some(vertices.fold(Aabb::point(first), |aabb, v| aabb.including(v)))
    }
}

/// Axis-aligned bounding box
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn point(p: Vec3) -> Self {
        Self { min: p, max: p }
    }

    pub fn including(self, p: Vec3) -> Self {
        Self {
            min: self.min.min(p),
            max: self.max.max(p),
        }
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn extents(&self) -> Vec3 {
        self.max - self.min
    }
}

struct MeshPayload {
    data: MeshData,
    bounds: Option<Aabb>,
    upload: DeviceUpload,
}

/// Triangle mesh
pub struct Mesh {
    base: ResourceBase,
    desc: MeshDesc,
    payload: RwLock<Option<MeshPayload>>,
}

impl Mesh {
    pub fn new(guid: Guid) -> Self {
        Self {
            base: ResourceBase::new(guid),
            desc: MeshDesc::default(),
            payload: RwLock::new(None),
        }
    }

    pub fn desc(&self) -> &MeshDesc {
        &self.desc
    }

    pub fn set_desc(&mut self, desc: MeshDesc) {
        self.desc = desc;
    }

    pub fn set_source(&mut self, source: ResourceSource) {
        self.base.set_source(source);
    }

    pub fn bounds(&self) -> Option<Aabb> {
        self.payload.read().as_ref().and_then(|payload| payload.bounds)
    }

    pub fn triangle_count(&self) -> usize {
        self.payload
            .read()
            .as_ref()
            .map_or(0, |payload| payload.data.indices.len() / 3)
    }

    pub fn device_handle(&self) -> Option<DeviceHandle> {
        self.payload.read().as_ref().map(|payload| payload.upload.handle())
    }

    pub fn bindless_slot(&self) -> Option<u32> {
        self.payload
            .read()
            .as_ref()
            .and_then(|payload| payload.upload.bindless_slot())
    }

    fn accept(&self, bytes: Vec<u8>, device: &Arc<dyn DeviceBackend>) -> Result<()> {
        let data = MeshData::decode(&bytes)?;
        data.validate(&self.desc)?;
        let bounds = data.bounds();

        let label = format!("mesh {}", self.base.guid());
        let upload = DeviceUpload::record(device, &label, &bytes)?;
        self.base.record_submission(upload.frame());
        *self.payload.write() = Some(MeshPayload {
            data,
            bounds,
            upload,
        });
        Ok(())
    }
}

resource_object!(Mesh, MeshDesc, "resource_lifecycle::Mesh");

impl Resource for Mesh {
    fn base(&self) -> &ResourceBase {
        &self.base
    }

    fn load_task(&self, this: RCWeak<dyn Resource>, ctx: LoadContext) -> BoxedTask<Result<()>> {
        Box::new(MeshLoad {
            this,
            ctx,
            read: None,
        })
    }

    fn install(&self, _device: &dyn DeviceBackend) -> Result<()> {
        let mut payload = self.payload.write();
        let payload = payload
            .as_mut()
            .ok_or_else(|| ResourceError::Device("mesh payload missing".to_string()))?;
        payload.upload.bind()?;
        Ok(())
    }

    fn release_payload(&self) {
        self.payload.write().take();
    }
}

/// read streams -> decode -> validate -> bounds -> record upload
struct MeshLoad {
    this: RCWeak<dyn Resource>,
    ctx: LoadContext,
    read: Option<PendingRead>,
}

impl MeshLoad {
    fn start(&self) -> Result<PendingRead> {
        let mesh = lock_resource::<Mesh>(&self.this)?;
        let source = mesh.base.source();
        Ok(self
            .ctx
            .io()
            .read_async(&source.path, source.offset, source.size))
    }

    fn finish(&self, read: PendingRead) -> Result<()> {
        let bytes = read.take()?;
        let mesh = lock_resource::<Mesh>(&self.this)?;
        mesh.accept(bytes, self.ctx.device())
    }
}

impl Task for MeshLoad {
    type Output = Result<()>;

    fn step(&mut self) -> Step<Result<()>> {
        if let Some(read) = self.read.take() {
            return Step::Done(self.finish(read));
        }
        match self.start() {
            Ok(read) => {
                let ready = read.awaitable();
                self.read = Some(read);
                Step::Await(Box::new(ready))
            }
            Err(err) => Step::Done(Err(err)),
        }
    }
}
