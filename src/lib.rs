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

//! Asset Registry - name-keyed, reference-counted resource cache
//!
//! Every asset kind is a [`Descriptor`] plugged into one shared [`Registry`]
//! implementation. Registries live in a [`Registries`] hub, record
//! cross-registry dependencies as listener handles, and propagate reloads
//! through the resulting graph.

pub mod assets;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod hot_reload;
pub mod id;
pub mod prelude;
pub mod registries;
pub mod registry;
pub mod slot;
pub mod stats;
pub mod store;

#[cfg(test)]
mod tests;

pub use config::*;
pub use descriptor::*;
pub use error::*;
pub use hot_reload::*;
pub use id::*;
pub use registries::*;
pub use registry::*;
pub use slot::*;
pub use stats::*;
pub use store::*;
