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

//! Error types

use crate::guid::{Guid, TypeHash};
use crate::resources::LoadState;
use std::fmt;

/// Resource subsystem error type
///
/// Loader-level failures are local and recoverable: callers get an empty
/// handle and pick a placeholder. Only internal invariants are asserted.
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceError {
    /// Metadata or payload file is missing
    FileNotFound(String),

    /// Type hash is not present in the registry
    UnknownType(TypeHash),

    /// Structural invariant violated while decoding
    CorruptPayload(String),

    /// An awaited dependency did not reach Loaded
    DependencyFailed(Guid),

    /// A type hash was registered twice
    DuplicateType(String),

    /// Device-side install attempted before the CPU load finished
    NotLoaded(LoadState),

    /// The owning object went away while work was still referencing it
    Disposed,

    /// IO error (file operations, etc.)
    Io(String),

    /// Serialization error
    Serialization(String),

    /// GPU backend error
    Device(String),

    /// Invalid configuration
    Config(String),
}

impl fmt::Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceError::FileNotFound(path) => write!(f, "File not found: {path}"),
            ResourceError::UnknownType(hash) => write!(f, "Unknown type hash: {hash}"),
            ResourceError::CorruptPayload(msg) => write!(f, "Corrupt payload: {msg}"),
            ResourceError::DependencyFailed(guid) => write!(f, "Dependency failed to load: {guid}"),
            ResourceError::DuplicateType(name) => write!(f, "Type registered twice: {name}"),
            ResourceError::NotLoaded(state) => {
                write!(f, "Resource is not loaded (current state: {state:?})")
            }
            ResourceError::Disposed => write!(f, "Object was disposed"),
            ResourceError::Io(msg) => write!(f, "IO error: {msg}"),
            ResourceError::Serialization(msg) => write!(f, "Serialization error: {msg}"),
            ResourceError::Device(msg) => write!(f, "Device error: {msg}"),
            ResourceError::Config(msg) => write!(f, "Configuration error: {msg}"),
        }
    }
}

impl std::error::Error for ResourceError {}

impl From<std::io::Error> for ResourceError {
    fn from(err: std::io::Error) -> Self {
        ResourceError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for ResourceError {
    fn from(err: serde_json::Error) -> Self {
        ResourceError::Serialization(err.to_string())
    }
}

impl From<erased_serde::Error> for ResourceError {
    fn from(err: erased_serde::Error) -> Self {
        ResourceError::Serialization(err.to_string())
    }
}

impl From<speedy::Error> for ResourceError {
    fn from(err: speedy::Error) -> Self {
        ResourceError::CorruptPayload(err.to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, ResourceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err = ResourceError::FileNotFound("a/b.rbcmt".to_string());
        assert_eq!(err.to_string(), "File not found: a/b.rbcmt");

        let err = ResourceError::NotLoaded(LoadState::Pending);
        assert!(err.to_string().contains("Pending"));
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk on fire");
        let err: ResourceError = io.into();
        assert!(matches!(err, ResourceError::Io(msg) if msg.contains("disk on fire")));
    }
}
