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

//! Descriptor contract: how one asset kind builds, rebuilds and tears down
//! its payloads.

use crate::error::RegistryError;
use crate::id::{RegistryId, ResHandle, ResId};
use crate::registries::Registries;
use crate::registry::{RegistryKey, UserData};

/// Result of a construct or reload callback
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Payload is valid
    Loaded,
    /// Transient failure; trying again later may succeed
    Retry,
    /// Payload cannot be built from the current source
    Fatal,
}

impl LoadOutcome {
    pub fn is_loaded(self) -> bool {
        self == LoadOutcome::Loaded
    }

    pub fn is_retryable(self) -> bool {
        self == LoadOutcome::Retry
    }

    /// Map an upstream registry failure onto the dependent's outcome.
    pub fn from_error(err: &RegistryError) -> Self {
        if err.is_retryable() {
            LoadOutcome::Retry
        } else {
            LoadOutcome::Fatal
        }
    }
}

impl From<bool> for LoadOutcome {
    fn from(loaded: bool) -> Self {
        if loaded {
            LoadOutcome::Loaded
        } else {
            LoadOutcome::Fatal
        }
    }
}

/// One asset kind plugged into a [`Registry`](crate::Registry).
///
/// Payloads start out as `Default` and are filled in place. `construct`
/// must leave `dst` safe to `destroy` even when it fails: the registry calls
/// `destroy` on every element it discards, including after a failed
/// construct.
pub trait Descriptor: 'static {
    type Payload: Default + 'static;

    /// Human-readable kind, used in logs
    fn type_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Size of one payload in bytes
    fn payload_size(&self) -> usize {
        std::mem::size_of::<Self::Payload>()
    }

    fn construct(
        &mut self,
        cx: &mut LoadContext<'_>,
        name: &str,
        id: ResId,
        dst: &mut Self::Payload,
    ) -> LoadOutcome;

    /// Rebuild `dst` in place. `None` means the kind has no in-place reload
    /// and the registry falls back to destroy + construct.
    fn reload(
        &mut self,
        _cx: &mut LoadContext<'_>,
        _name: &str,
        _id: ResId,
        _dst: &mut Self::Payload,
    ) -> Option<LoadOutcome> {
        None
    }

    fn destroy(&mut self, cx: &mut LoadContext<'_>, name: &str, id: ResId, dst: &mut Self::Payload);
}

/// What a descriptor callback can reach while it runs.
///
/// The owning registry is checked out of the hub for the duration of the
/// callback, so calls through [`registries`](Self::registries) that target
/// the owner fail with `RegistryBusy`.
pub struct LoadContext<'a> {
    registries: &'a mut Registries,
    owner: RegistryId,
    userdata: &'a UserData,
}

impl<'a> LoadContext<'a> {
    pub(crate) fn new(registries: &'a mut Registries, owner: RegistryId, userdata: &'a UserData) -> Self {
        Self {
            registries,
            owner,
            userdata,
        }
    }

    /// Registry whose callback is running
    pub fn owner(&self) -> RegistryId {
        self.owner
    }

    /// Dependent handle for one of the owner's resources
    pub fn handle(&self, id: ResId) -> ResHandle {
        ResHandle::new(self.owner, id)
    }

    pub fn userdata(&self, index: usize) -> Option<RegistryId> {
        self.userdata.get(index).copied().flatten()
    }

    /// Typed view of a user-data slot. The kind is checked when the key is used.
    pub fn userdata_key<D: Descriptor>(&self, index: usize) -> Option<RegistryKey<D>> {
        self.userdata(index).map(RegistryKey::from_id)
    }

    pub fn registries(&mut self) -> &mut Registries {
        self.registries
    }
}
