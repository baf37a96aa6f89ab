use serde::de::DeserializeOwned;
use tracing::{error, warn};

use super::text::TextDescriptor;
use super::UPSTREAM_SLOT;
use crate::descriptor::{Descriptor, LoadContext, LoadOutcome};
use crate::error::{RegistryError, Result};
use crate::id::{RegistryId, ResId};
use crate::registry::RegistryKey;

/// Parsed JSON document
#[derive(Clone, Debug, Default, PartialEq)]
pub struct JsonAsset {
    pub value: serde_json::Value,
    source: Option<RegistryId>,
}

impl JsonAsset {
    /// Deserialize the document into a concrete type.
    pub fn to_typed<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.value.clone())
            .map_err(|err| RegistryError::DeserializationError(err.to_string()))
    }

    pub fn source(&self) -> Option<RegistryId> {
        self.source
    }
}

/// Parses texts from the registry in user-data slot 0
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonDescriptor;

fn parse(name: &str, text: &str) -> std::result::Result<serde_json::Value, LoadOutcome> {
    serde_json::from_str(text).map_err(|err| {
        warn!(name, %err, "JSON parse error");
        LoadOutcome::Fatal
    })
}

impl Descriptor for JsonDescriptor {
    type Payload = JsonAsset;

    fn type_name(&self) -> &'static str {
        "json"
    }

    fn construct(&mut self, cx: &mut LoadContext<'_>, name: &str, id: ResId, dst: &mut JsonAsset) -> LoadOutcome {
        let Some(texts) = cx.userdata_key::<TextDescriptor>(UPSTREAM_SLOT) else {
            error!(name, "no text registry in user-data slot {UPSTREAM_SLOT}");
            return LoadOutcome::Fatal;
        };
        let handle = cx.handle(id);
        let parsed = match cx.registries().acquire_with_listener(texts, name, handle) {
            Ok(text) => parse(name, text.as_str()),
            Err(err) => {
                warn!(name, %err, "upstream text unavailable");
                return LoadOutcome::from_error(&err);
            }
        };
        dst.source = Some(texts.id());

        match parsed {
            Ok(value) => {
                dst.value = value;
                LoadOutcome::Loaded
            }
            Err(outcome) => outcome,
        }
    }

    /// Re-parse the upstream text, keeping the listener that is already
    /// attached. The previous value survives a parse failure.
    fn reload(
        &mut self,
        cx: &mut LoadContext<'_>,
        name: &str,
        _id: ResId,
        dst: &mut JsonAsset,
    ) -> Option<LoadOutcome> {
        // Never attached upstream: rebuild from scratch.
        let texts = RegistryKey::<TextDescriptor>::from_id(dst.source?);
        let outcome = match cx.registries().get(texts, name) {
            Ok(text) => match parse(name, text.as_str()) {
                Ok(value) => {
                    dst.value = value;
                    LoadOutcome::Loaded
                }
                Err(outcome) => outcome,
            },
            Err(err) => LoadOutcome::from_error(&err),
        };
        Some(outcome)
    }

    fn destroy(&mut self, cx: &mut LoadContext<'_>, name: &str, id: ResId, dst: &mut JsonAsset) {
        dst.value = serde_json::Value::Null;
        let Some(texts) = dst.source.take() else {
            return;
        };
        let handle = cx.handle(id);
        if let Err(err) = cx.registries().release_with_listener(texts, name, handle) {
            error!(name, %err, "releasing upstream text");
        }
    }
}
