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

//! Resource Lifecycle - asynchronous resource loading for engines
//!
//! Poll-driven load coroutines, intrusive strong/weak reference counting, a
//! GUID-keyed resource directory and a type registry keyed by 128-bit type
//! hash.

pub mod app;
pub mod awaitable;
pub mod config;
pub mod coroutine;
pub mod error;
pub mod guid;
#[cfg(feature = "profiling")]
pub mod logging;
pub mod prelude;
pub mod rc;
pub mod registry;
pub mod resources;

#[cfg(test)]
mod tests;

#[doc(hidden)]
pub use inventory;

pub use app::*;
pub use awaitable::*;
pub use config::*;
pub use coroutine::*;
pub use error::*;
pub use guid::*;
pub use rc::*;
pub use registry::*;
pub use resources::*;
