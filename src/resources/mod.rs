pub mod device;
pub mod handle;
pub mod io;
pub mod loader;
pub mod resource;
pub mod scheduler;
pub mod types;

pub use device::{DeviceBackend, DeviceHandle, DeviceUpload, HeadlessDevice, UploadTicket};
pub use handle::{LoadHandle, LoadRequest};
pub use io::{FileIo, FsIo, IoQueue, MemoryIo, PendingRead};
pub use loader::{LoadContext, LoaderStats, ResourceLoader};
pub use resource::{
    lock_resource, LoadState, PollOutcome, Resource, ResourceBase, ResourceDocument,
    ResourceSource,
};
pub use scheduler::{LoadScheduler, PollReport};
pub use types::{Material, Mesh, Scene, SlotIndex, Texture, TextureFormat};
