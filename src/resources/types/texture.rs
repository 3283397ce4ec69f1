use crate::coroutine::{BoxedTask, Step, Task};
use crate::error::{ResourceError, Result};
use crate::guid::Guid;
use crate::rc::RCWeak;
use crate::resources::device::{DeviceBackend, DeviceHandle, DeviceUpload};
use crate::resources::io::PendingRead;
use crate::resources::loader::LoadContext;
use crate::resources::resource::lock_resource;
use crate::resources::{Resource, ResourceBase, ResourceSource};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Pixel layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TextureFormat {
    R8,
    #[default]
    Rgba8,
    Rgba16F,
}

impl TextureFormat {
    pub fn bytes_per_pixel(self) -> u64 {
        match self {
            TextureFormat::R8 => 1,
            TextureFormat::Rgba8 => 4,
            TextureFormat::Rgba16F => 8,
        }
    }
}

/// Texture metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextureDesc {
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
}

impl TextureDesc {
    pub fn new(width: u32, height: u32, format: TextureFormat) -> Self {
        Self {
            width,
            height,
            format,
        }
    }

    /// Payload size implied by the dimensions
    pub fn expected_len(&self) -> Option<u64> {
        u64::from(self.width)
            .checked_mul(u64::from(self.height))?
            .checked_mul(self.format.bytes_per_pixel())
    }
}

struct TexturePayload {
    pixels: Vec<u8>,
    upload: DeviceUpload,
}

/// 2D texture
pub struct Texture {
    base: ResourceBase,
    desc: TextureDesc,
    payload: RwLock<Option<TexturePayload>>,
}

impl Texture {
    pub fn new(guid: Guid) -> Self {
        Self {
            base: ResourceBase::new(guid),
            desc: TextureDesc::default(),
            payload: RwLock::new(None),
        }
    }

    pub fn desc(&self) -> &TextureDesc {
        &self.desc
    }

    pub fn set_desc(&mut self, desc: TextureDesc) {
        self.desc = desc;
    }

    pub fn set_source(&mut self, source: ResourceSource) {
        self.base.set_source(source);
    }

    /// Run `f` over the loaded pixels
    pub fn with_pixels<R>(&self, f: impl FnOnce(&[u8]) -> R) -> Option<R> {
        self.payload.read().as_ref().map(|payload| f(&payload.pixels))
    }

    pub fn device_handle(&self) -> Option<DeviceHandle> {
        self.payload.read().as_ref().map(|payload| payload.upload.handle())
    }

    /// Bindless heap slot, once installed
    pub fn bindless_slot(&self) -> Option<u32> {
        self.payload
            .read()
            .as_ref()
            .and_then(|payload| payload.upload.bindless_slot())
    }

    fn accept(&self, pixels: Vec<u8>, device: &Arc<dyn DeviceBackend>) -> Result<()> {
        let expected = self.desc.expected_len().ok_or_else(|| {
            ResourceError::CorruptPayload("texture dimensions overflow".to_string())
        })?;
        if expected == 0 {
            return Err(ResourceError::CorruptPayload(format!(
                "texture {}x{} has no pixels",
                self.desc.width, self.desc.height
            )));
        }
        if pixels.len() as u64 != expected {
            return Err(ResourceError::CorruptPayload(format!(
                "texture {}x{} {:?} needs {expected} bytes, payload has {}",
                self.desc.width,
                self.desc.height,
                self.desc.format,
                pixels.len()
            )));
        }

        let label = format!("texture {}", self.base.guid());
        let upload = DeviceUpload::record(device, &label, &pixels)?;
        self.base.record_submission(upload.frame());
        *self.payload.write() = Some(TexturePayload { pixels, upload });
        Ok(())
    }
}

resource_object!(Texture, TextureDesc, "resource_lifecycle::Texture");

impl Resource for Texture {
    fn base(&self) -> &ResourceBase {
        &self.base
    }

    fn load_task(&self, this: RCWeak<dyn Resource>, ctx: LoadContext) -> BoxedTask<Result<()>> {
        Box::new(TextureLoad {
            this,
            ctx,
            stage: TextureStage::Start,
        })
    }

    fn install(&self, _device: &dyn DeviceBackend) -> Result<()> {
        let mut payload = self.payload.write();
        let payload = payload
            .as_mut()
            .ok_or_else(|| ResourceError::Device("texture payload missing".to_string()))?;
        payload.upload.bind()?;
        Ok(())
    }

    fn release_payload(&self) {
        self.payload.write().take();
    }
}

enum TextureStage {
    Start,
    Reading(PendingRead),
    Finished,
}

/// read pixels -> validate -> record upload
struct TextureLoad {
    this: RCWeak<dyn Resource>,
    ctx: LoadContext,
    stage: TextureStage,
}

impl TextureLoad {
    fn start(&mut self) -> Result<PendingRead> {
        let texture = lock_resource::<Texture>(&self.this)?;
        let source = texture.base.source();
        Ok(self
            .ctx
            .io()
            .read_async(&source.path, source.offset, source.size))
    }

    fn finish(&self, read: PendingRead) -> Result<()> {
        let pixels = read.take()?;
        let texture = lock_resource::<Texture>(&self.this)?;
        texture.accept(pixels, self.ctx.device())
    }
}

impl Task for TextureLoad {
    type Output = Result<()>;

    fn step(&mut self) -> Step<Result<()>> {
        match std::mem::replace(&mut self.stage, TextureStage::Finished) {
            TextureStage::Start => match self.start() {
                Ok(read) => {
                    let ready = read.awaitable();
                    self.stage = TextureStage::Reading(read);
                    Step::Await(Box::new(ready))
                }
                Err(err) => Step::Done(Err(err)),
            },
            TextureStage::Reading(read) => Step::Done(self.finish(read)),
            TextureStage::Finished => Step::Done(Err(ResourceError::Disposed)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expected_len() {
        assert_eq!(
            TextureDesc::new(4, 2, TextureFormat::Rgba8).expected_len(),
            Some(32)
        );
        assert_eq!(TextureDesc::new(3, 3, TextureFormat::R8).expected_len(), Some(9));
        assert_eq!(
            TextureDesc::new(u32::MAX, u32::MAX, TextureFormat::Rgba16F).expected_len(),
            None
        );
    }

    #[test]
    fn test_desc_json_shape() {
        let desc: TextureDesc =
            serde_json::from_str(r#"{"width":2,"height":2,"format":"R8"}"#).unwrap();
        assert_eq!(desc, TextureDesc::new(2, 2, TextureFormat::R8));
    }
}
