use tracing::{error, warn};

use super::file::FileDescriptor;
use super::UPSTREAM_SLOT;
use crate::descriptor::{Descriptor, LoadContext, LoadOutcome};
use crate::id::{RegistryId, ResId};
use crate::registry::RegistryKey;

/// UTF-8 contents of a file
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TextAsset {
    pub content: String,
    /// File registry holding our listener, if one was attached
    source: Option<RegistryId>,
}

impl TextAsset {
    pub fn as_str(&self) -> &str {
        &self.content
    }

    pub fn source(&self) -> Option<RegistryId> {
        self.source
    }
}

/// Decodes files from the registry in user-data slot 0
#[derive(Clone, Copy, Debug, Default)]
pub struct TextDescriptor;

fn decode(name: &str, bytes: &[u8]) -> Result<String, LoadOutcome> {
    std::str::from_utf8(bytes).map(str::to_owned).map_err(|err| {
        warn!(name, %err, "file is not valid UTF-8");
        LoadOutcome::Fatal
    })
}

impl Descriptor for TextDescriptor {
    type Payload = TextAsset;

    fn type_name(&self) -> &'static str {
        "text"
    }

    fn construct(&mut self, cx: &mut LoadContext<'_>, name: &str, id: ResId, dst: &mut TextAsset) -> LoadOutcome {
        let Some(files) = cx.userdata_key::<FileDescriptor>(UPSTREAM_SLOT) else {
            error!(name, "no file registry in user-data slot {UPSTREAM_SLOT}");
            return LoadOutcome::Fatal;
        };
        let handle = cx.handle(id);
        let decoded = match cx.registries().acquire_with_listener(files, name, handle) {
            Ok(file) => decode(name, &file.bytes),
            Err(err) => {
                warn!(name, %err, "upstream file unavailable");
                return LoadOutcome::from_error(&err);
            }
        };
        // Set before decoding so destroy drops the listener either way.
        dst.source = Some(files.id());

        match decoded {
            Ok(content) => {
                dst.content = content;
                LoadOutcome::Loaded
            }
            Err(outcome) => outcome,
        }
    }

    /// Re-decode the upstream file through the listener we already hold.
    /// A failure keeps the listener, so a later fix of the file still
    /// cascades here.
    fn reload(
        &mut self,
        cx: &mut LoadContext<'_>,
        name: &str,
        _id: ResId,
        dst: &mut TextAsset,
    ) -> Option<LoadOutcome> {
        // Never attached upstream: rebuild from scratch.
        let files = RegistryKey::<FileDescriptor>::from_id(dst.source?);
        let outcome = match cx.registries().get(files, name) {
            Ok(file) => match decode(name, &file.bytes) {
                Ok(content) => {
                    dst.content = content;
                    LoadOutcome::Loaded
                }
                Err(outcome) => outcome,
            },
            Err(err) => {
                warn!(name, %err, "upstream file unavailable");
                LoadOutcome::from_error(&err)
            }
        };
        Some(outcome)
    }

    fn destroy(&mut self, cx: &mut LoadContext<'_>, name: &str, id: ResId, dst: &mut TextAsset) {
        dst.content.clear();
        let Some(files) = dst.source.take() else {
            return;
        };
        let handle = cx.handle(id);
        if let Err(err) = cx.registries().release_with_listener(files, name, handle) {
            error!(name, %err, "releasing upstream file");
        }
    }
}
