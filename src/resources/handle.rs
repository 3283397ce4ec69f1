use crate::awaitable::ResourceAwaitable;
use crate::error::{ResourceError, Result};
use crate::guid::Guid;
use crate::rc::RC;
use crate::resources::{LoadState, Resource};

/// Shared view of one in-flight (or finished) load
#[derive(Clone)]
pub struct LoadHandle {
    resource: RC<dyn Resource>,
}

impl LoadHandle {
    pub(crate) fn new(resource: RC<dyn Resource>) -> Self {
        Self { resource }
    }

    pub fn resource(&self) -> &RC<dyn Resource> {
        &self.resource
    }

    pub fn guid(&self) -> Guid {
        self.resource.guid()
    }

    pub fn state(&self) -> LoadState {
        self.resource.state()
    }

    /// The load left Pending/Loading
    pub fn is_complete(&self) -> bool {
        !self.state().is_in_flight()
    }

    /// Block until complete
    pub fn wait(&self) -> LoadState {
        self.resource.wait_load()
    }

    /// Suspension point for a load body that depends on this load
    pub fn awaitable(&self) -> ResourceAwaitable {
        ResourceAwaitable::new(self.resource.clone())
    }

    /// Outcome of a completed load
    pub fn result(&self) -> Result<()> {
        match self.state() {
            LoadState::Loaded | LoadState::Installed => Ok(()),
            LoadState::Failed => Err(self
                .resource
                .last_error()
                .unwrap_or(ResourceError::NotLoaded(LoadState::Failed))),
            state => Err(ResourceError::NotLoaded(state)),
        }
    }
}

impl std::fmt::Debug for LoadHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadHandle")
            .field("guid", &self.guid())
            .field("state", &self.state())
            .finish()
    }
}

/// Answer to `async_load_from_file`
#[derive(Debug, Clone)]
pub enum LoadRequest {
    /// A new load was scheduled
    Scheduled(LoadHandle),
    /// A load was already in flight; this is that load
    InFlight(LoadHandle),
    /// Nothing to do in the current state
    Skipped(LoadState),
}

impl LoadRequest {
    /// Whether this call scheduled a load
    pub fn scheduled(&self) -> bool {
        matches!(self, LoadRequest::Scheduled(_))
    }

    /// Handle to the load, new or shared
    pub fn handle(&self) -> Option<&LoadHandle> {
        match self {
            LoadRequest::Scheduled(handle) | LoadRequest::InFlight(handle) => Some(handle),
            LoadRequest::Skipped(_) => None,
        }
    }
}
