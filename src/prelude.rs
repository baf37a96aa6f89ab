//! Convenient re-exports of commonly used types.
//!
//! The prelude can be imported with:
//! ```
//! use asset_registry::prelude::*;
//! ```

pub use crate::assets::{AssetKeys, FileDescriptor, JsonDescriptor, TextDescriptor};
pub use crate::descriptor::{Descriptor, LoadContext, LoadOutcome};
pub use crate::error::{RegistryError, Result};
pub use crate::hot_reload::HotReloadWatcher;
pub use crate::id::{RegistryId, ResHandle, ResId};
pub use crate::registries::{Registries, ReloadSummary};
pub use crate::registry::{Registry, RegistryKey};
pub use crate::slot::SlotState;
