use crate::config::LoaderConfig;
use crate::error::Result;
use crate::registry::TypeRegistry;
use crate::resources::device::DeviceBackend;
use crate::resources::io::FileIo;
use crate::resources::loader::ResourceLoader;
use std::sync::Arc;
use tracing::info;

/// Application bootstrap: owns the type registry, the device and the loader.
///
/// `bootstrap` is the single place that initialises the registry and
/// enumerates the resource directory; `shutdown` stops the workers and tears
/// everything down in reverse order.
pub struct App {
    registry: Arc<TypeRegistry>,
    device: Arc<dyn DeviceBackend>,
    loader: ResourceLoader,
    shut_down: bool,
}

impl App {
    /// Initialise the registry and a filesystem loader
    pub fn bootstrap(config: LoaderConfig, device: Arc<dyn DeviceBackend>) -> Result<Self> {
        let registry = Arc::new(TypeRegistry::init_all()?);
        let loader = ResourceLoader::new(config, Arc::clone(&registry), Arc::clone(&device))?;
        Self::finish(registry, device, loader)
    }

    /// Same as [`App::bootstrap`] over arbitrary storage
    pub fn bootstrap_with_io(
        config: LoaderConfig,
        io: Arc<dyn FileIo>,
        device: Arc<dyn DeviceBackend>,
    ) -> Result<Self> {
        let registry = Arc::new(TypeRegistry::init_all()?);
        let loader =
            ResourceLoader::with_io(config, Arc::clone(&registry), io, Arc::clone(&device))?;
        Self::finish(registry, device, loader)
    }

    fn finish(
        registry: Arc<TypeRegistry>,
        device: Arc<dyn DeviceBackend>,
        loader: ResourceLoader,
    ) -> Result<Self> {
        let found = loader.enumerate()?;
        info!(types = registry.len(), resources = found, "app bootstrapped");
        Ok(Self {
            registry,
            device,
            loader,
            shut_down: false,
        })
    }

    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    pub fn device(&self) -> &Arc<dyn DeviceBackend> {
        &self.device
    }

    pub fn loader(&self) -> &ResourceLoader {
        &self.loader
    }

    /// One frame of manual driving: poll in-flight loads once
    pub fn update(&self) -> usize {
        self.loader.poll().pending
    }

    /// Stop loading, destroy in-flight coroutines, dispose the registry
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        self.loader.shutdown();
        self.registry.dispose_all();
        info!("app shut down");
    }
}

impl Drop for App {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::device::HeadlessDevice;
    use crate::guid::Guid;
    use crate::resources::io::MemoryIo;

    #[test]
    fn test_app_bootstrap_registers_builtin_types() {
        let app = App::bootstrap_with_io(
            LoaderConfig::manual("unused"),
            Arc::new(MemoryIo::new()),
            HeadlessDevice::shared(),
        )
        .unwrap();
        let names: Vec<_> = app.registry().types().iter().map(|t| t.name()).collect();
        for expected in [
            "resource_lifecycle::Texture",
            "resource_lifecycle::Mesh",
            "resource_lifecycle::Material",
            "resource_lifecycle::Scene",
        ] {
            assert!(names.contains(&expected), "{expected} not registered");
        }
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let mut app = App::bootstrap_with_io(
            LoaderConfig::manual("unused"),
            Arc::new(MemoryIo::new()),
            HeadlessDevice::shared(),
        )
        .unwrap();
        app.shutdown();
        app.shutdown();
        assert!(!app.loader().scheduler().is_running());
    }

    #[test]
    fn test_shutdown_disposes_shared_registry() {
        let mut app = App::bootstrap_with_io(
            LoaderConfig::manual("unused"),
            Arc::new(MemoryIo::new()),
            HeadlessDevice::shared(),
        )
        .unwrap();
        let registry = Arc::clone(app.registry());
        assert!(!registry.is_empty());

        app.shutdown();
        assert!(registry.is_disposed());
        assert!(registry.is_empty());
        assert!(app.loader().load_resource(Guid::new(), false).is_none());
    }
}
