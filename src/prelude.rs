//! Convenient re-exports of commonly used types.
//!
//! The prelude can be imported with:
//! ```
//! use resource_lifecycle::prelude::*;
//! ```

pub use crate::app::App;
pub use crate::awaitable::{Awaitable, Countdown, FnAwaitable, FrameAwaitable, ResourceAwaitable};
pub use crate::config::LoaderConfig;
pub use crate::coroutine::{BoxedTask, Coroutine, Step, Task};
pub use crate::error::{ResourceError, Result};
pub use crate::guid::{Guid, TypeHash, TypeInfo};
pub use crate::rc::{RCWeak, RC};
pub use crate::registry::{BaseObject, Registered, TypeRegistration, TypeRegistry};
pub use crate::resources::types::{
    Material, MaterialDesc, Mesh, MeshData, MeshDesc, Scene, SceneDesc, SceneNode, SlotIndex,
    Texture, TextureDesc, TextureFormat,
};
pub use crate::resources::{
    DeviceBackend, HeadlessDevice, LoadContext, LoadHandle, LoadRequest, LoadState,
    Resource, ResourceLoader, ResourceSource,
};
