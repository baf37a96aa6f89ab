// Asset descriptors
//
// Concrete kinds built on the generic registry:
// - Files read from a root directory
// - UTF-8 text decoded from a file
// - JSON parsed from a text
//
// Each dependent kind finds its upstream registry through user-data slot
// `UPSTREAM_SLOT` and acquires with a listener, so reloading a file cascades
// through text into JSON.

pub mod file;
pub mod json;
pub mod text;

pub use file::{FileData, FileDescriptor};
pub use json::{JsonAsset, JsonDescriptor};
pub use text::{TextAsset, TextDescriptor};

use std::path::PathBuf;

use crate::config::RegistryConfig;
use crate::error::Result;
use crate::registries::Registries;
use crate::registry::RegistryKey;

/// User-data slot holding a dependent registry's upstream
pub const UPSTREAM_SLOT: usize = 0;

/// The three registries of a file → text → json pipeline
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AssetKeys {
    pub files: RegistryKey<FileDescriptor>,
    pub texts: RegistryKey<TextDescriptor>,
    pub json: RegistryKey<JsonDescriptor>,
}

impl AssetKeys {
    /// Register and wire the pipeline with default configs.
    pub fn register(registries: &mut Registries, root: impl Into<PathBuf>) -> Result<Self> {
        Self::register_with_config(registries, root, RegistryConfig::default())
    }

    pub fn register_with_config(
        registries: &mut Registries,
        root: impl Into<PathBuf>,
        config: RegistryConfig,
    ) -> Result<Self> {
        let files = registries.register_with_config("files", FileDescriptor::new(root), config.clone())?;
        let texts = registries.register_with_config("texts", TextDescriptor, config.clone())?;
        let json = registries.register_with_config("json", JsonDescriptor, config)?;

        registries.set_userdata(texts, UPSTREAM_SLOT, Some(files.id()))?;
        registries.set_userdata(json, UPSTREAM_SLOT, Some(texts.id()))?;
        Ok(Self { files, texts, json })
    }
}
