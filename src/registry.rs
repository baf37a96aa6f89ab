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

//! Registry: slot table, backing store and descriptor for one asset kind.

use ahash::AHashMap;
use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use tracing::{debug, error, warn};

use crate::config::RegistryConfig;
use crate::descriptor::{Descriptor, LoadContext, LoadOutcome};
use crate::error::{RegistryError, Result};
use crate::id::{RegistryId, ResHandle, ResId};
use crate::registries::Registries;
use crate::slot::{ListenerSet, Slot, SlotKey, SlotState, SlotTable};
use crate::stats::RegistryStats;
use crate::store::BackingStore;

/// Number of user-data slots per registry
pub const USERDATA_SLOTS: usize = 4;

pub type UserData = [Option<RegistryId>; USERDATA_SLOTS];

/// Typed registry id. The descriptor type is checked on every use.
pub struct RegistryKey<D> {
    id: RegistryId,
    _phantom: PhantomData<fn() -> D>,
}

impl<D> RegistryKey<D> {
    pub fn from_id(id: RegistryId) -> Self {
        Self {
            id,
            _phantom: PhantomData,
        }
    }

    pub fn id(&self) -> RegistryId {
        self.id
    }
}

impl<D> Clone for RegistryKey<D> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<D> Copy for RegistryKey<D> {}

impl<D> PartialEq for RegistryKey<D> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<D> Eq for RegistryKey<D> {}

impl<D> Hash for RegistryKey<D> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<D> fmt::Debug for RegistryKey<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RegistryKey({:?})", self.id)
    }
}

impl<D> From<RegistryKey<D>> for RegistryId {
    fn from(key: RegistryKey<D>) -> Self {
        key.id
    }
}

/// Result of reloading one node of a cascade
pub(crate) enum ReloadStep {
    Reloaded { listeners: ListenerSet },
    Failed { name: String, retryable: bool },
}

fn missing_slot(label: &str) -> RegistryError {
    RegistryError::NotFound(format!("stale slot key in registry '{label}'"))
}

/// Name-keyed, reference-counted cache for one asset kind
pub struct Registry<D: Descriptor> {
    label: String,
    descriptor: D,
    slots: SlotTable,
    store: BackingStore<D::Payload>,
    userdata: UserData,
    /// Next generation per name hash
    generations: AHashMap<u32, u32>,
    config: RegistryConfig,
    stats: RegistryStats,
}

impl<D: Descriptor> Registry<D> {
    pub(crate) fn new(label: String, descriptor: D, config: RegistryConfig) -> Self {
        Self {
            label,
            descriptor,
            slots: SlotTable::with_capacity(config.slot_capacity),
            store: BackingStore::with_capacity(config.store_capacity),
            userdata: [None; USERDATA_SLOTS],
            generations: AHashMap::new(),
            config,
            stats: RegistryStats::new(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn descriptor(&self) -> &D {
        &self.descriptor
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Number of resident slots
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slot(&self, name: &str) -> Option<&Slot> {
        self.slots.by_name(name)
    }

    pub fn slots(&self) -> impl Iterator<Item = &Slot> {
        self.slots.iter()
    }

    pub fn name_to_id(&self, name: &str) -> Result<ResId> {
        self.slots
            .by_name(name)
            .map(Slot::id)
            .ok_or_else(|| RegistryError::NotFound(format!("'{name}' in registry '{}'", self.label)))
    }

    pub fn id_to_name(&self, id: ResId) -> Result<&str> {
        self.slots
            .by_id(id)
            .map(Slot::name)
            .ok_or_else(|| RegistryError::NotFound(format!("{id:?} in registry '{}'", self.label)))
    }

    pub fn refcount(&self, name: &str) -> Result<u32> {
        Ok(self.slot_by_name(name)?.refcount())
    }

    /// Payload for `name` without touching its refcount.
    pub fn payload(&self, name: &str) -> Result<&D::Payload> {
        let slot = self.slot_by_name(name)?;
        if let SlotState::Failed { retryable } = slot.state() {
            return Err(RegistryError::ConstructFailed {
                name: name.to_string(),
                retryable,
            });
        }
        self.payload_at(slot.data_index())
    }

    pub(crate) fn payload_at(&self, index: u32) -> Result<&D::Payload> {
        self.store
            .get(index)
            .ok_or_else(|| RegistryError::NotFound(format!("backing store element {index}")))
    }

    pub fn userdata(&self, index: usize) -> Result<Option<RegistryId>> {
        self.userdata
            .get(index)
            .copied()
            .ok_or(RegistryError::InvalidUserDataSlot(index))
    }

    pub(crate) fn set_userdata(&mut self, index: usize, value: Option<RegistryId>) -> Result<()> {
        let slot = self
            .userdata
            .get_mut(index)
            .ok_or(RegistryError::InvalidUserDataSlot(index))?;
        *slot = value;
        Ok(())
    }

    pub fn stats(&self) -> RegistryStats {
        let mut stats = self.stats.clone();
        stats.live_slots = self.slots.len();
        stats.resident_bytes = self.slots.len() * self.descriptor.payload_size();
        stats
    }

    fn slot_by_name(&self, name: &str) -> Result<&Slot> {
        self.slots
            .by_name(name)
            .ok_or_else(|| RegistryError::NotFound(format!("'{name}' in registry '{}'", self.label)))
    }

    fn lookup(&self, name: &str) -> Result<SlotKey> {
        self.slots
            .find_by_name(name)
            .ok_or_else(|| RegistryError::NotFound(format!("'{name}' in registry '{}'", self.label)))
    }

    fn validate_name(&self, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(RegistryError::InvalidName("empty name".to_string()));
        }
        if name.len() > self.config.max_name_len {
            return Err(RegistryError::InvalidName(format!(
                "'{name}' exceeds {} bytes",
                self.config.max_name_len
            )));
        }
        Ok(())
    }

    /// Id for a new slot named `name`. Skips generations still held by a
    /// live slot whose name hashes the same.
    fn next_id(&self, name: &str) -> ResId {
        let base = ResId::from_name(name);
        let mut generation = self.generations.get(&base.hash()).copied().unwrap_or(0);
        let mut id = base.with_generation(generation);
        while self.slots.find_by_id(id).is_some() {
            generation = generation.wrapping_add(1);
            id = base.with_generation(generation);
        }
        id
    }

    pub(crate) fn acquire(
        &mut self,
        hub: &mut Registries,
        me: RegistryId,
        name: &str,
        listener: Option<ResHandle>,
    ) -> Result<u32> {
        if let Some(key) = self.slots.find_by_name(name) {
            return self.acquire_existing(hub, me, key, listener);
        }

        self.validate_name(name)?;
        self.stats.misses += 1;
        if self.slots.is_full() {
            return Err(RegistryError::CapacityExceeded {
                what: "slot table",
                capacity: self.slots.capacity(),
            });
        }

        let id = self.next_id(name);
        let mut slot = Slot::new(name, id, 0);
        slot.retain();
        if let Some(handle) = listener {
            slot.add_listener(handle)?;
        }

        let index = self.store.append_uninitialized()?;
        let mut cx = LoadContext::new(hub, me, &self.userdata);
        let dst = self.store.element_mut(index)?;
        let outcome = self.descriptor.construct(&mut cx, name, id, dst);
        if !outcome.is_loaded() {
            self.descriptor.destroy(&mut cx, name, id, dst);
            self.store.rollback(index);
            self.stats.failed_constructs += 1;
            error!(registry = %self.label, name, ?id, ?outcome, "construct failed");
            return Err(RegistryError::ConstructFailed {
                name: name.to_string(),
                retryable: outcome.is_retryable(),
            });
        }

        slot.place(index);
        if let Err(err) = self.slots.insert(slot) {
            let dst = self.store.element_mut(index)?;
            self.descriptor.destroy(&mut cx, name, id, dst);
            self.store.rollback(index);
            return Err(err);
        }
        self.generations
            .insert(id.hash(), id.generation().wrapping_add(1));
        debug!(registry = %self.label, name, ?id, index, "constructed");
        Ok(index)
    }

    fn acquire_existing(
        &mut self,
        hub: &mut Registries,
        me: RegistryId,
        key: SlotKey,
        listener: Option<ResHandle>,
    ) -> Result<u32> {
        let slot = self.slots.get(key).ok_or_else(|| missing_slot(&self.label))?;
        match slot.state() {
            SlotState::Ready => {}
            SlotState::Failed { retryable: false } => {
                return Err(RegistryError::ConstructFailed {
                    name: slot.name().to_string(),
                    retryable: false,
                });
            }
            SlotState::Failed { retryable: true } => {
                let outcome = self.rebuild(hub, me, key)?;
                let slot = self
                    .slots
                    .get_mut(key)
                    .ok_or_else(|| missing_slot(&self.label))?;
                if !outcome.is_loaded() {
                    slot.set_state(SlotState::Failed {
                        retryable: outcome.is_retryable(),
                    });
                    self.stats.failed_constructs += 1;
                    return Err(RegistryError::ConstructFailed {
                        name: slot.name().to_string(),
                        retryable: outcome.is_retryable(),
                    });
                }
                slot.set_state(SlotState::Ready);
                debug!(registry = %self.label, name = slot.name(), "rebuilt after failed reload");
            }
        }

        let slot = self
            .slots
            .get_mut(key)
            .ok_or_else(|| missing_slot(&self.label))?;
        if let Some(handle) = listener {
            slot.add_listener(handle)
                .inspect_err(|err| error!(registry = %self.label, %err, "listener misuse"))?;
        }
        slot.retain();
        self.stats.hits += 1;
        Ok(slot.data_index())
    }

    /// Rebuild a slot's payload in place. The descriptor's own reload wins
    /// over destroy + construct, so edges it already holds stay attached.
    fn rebuild(&mut self, hub: &mut Registries, me: RegistryId, key: SlotKey) -> Result<LoadOutcome> {
        let slot = self.slots.get(key).ok_or_else(|| missing_slot(&self.label))?;
        let (name, id) = (slot.name(), slot.id());
        let dst = self.store.element_mut(slot.data_index())?;
        let mut cx = LoadContext::new(hub, me, &self.userdata);

        if let Some(outcome) = self.descriptor.reload(&mut cx, name, id, dst) {
            return Ok(outcome);
        }
        self.descriptor.destroy(&mut cx, name, id, dst);
        *dst = D::Payload::default();
        Ok(self.descriptor.construct(&mut cx, name, id, dst))
    }

    pub(crate) fn release(&mut self, name: &str, listener: Option<ResHandle>) -> Result<u32> {
        let key = self.lookup(name)?;
        let slot = self
            .slots
            .get_mut(key)
            .ok_or_else(|| missing_slot(&self.label))?;
        if let Some(handle) = listener {
            if !slot.has_listener(handle) {
                error!(registry = %self.label, name, %handle, "release of an unknown listener");
                return Err(RegistryError::ListenerNotFound {
                    name: name.to_string(),
                    listener: handle,
                });
            }
        }
        let remaining = slot
            .release()
            .inspect_err(|err| error!(registry = %self.label, %err, "refcount underflow"))?;
        if let Some(handle) = listener {
            slot.remove_listener(handle)?;
        }
        self.stats.releases += 1;
        Ok(remaining)
    }

    pub(crate) fn evict(&mut self, hub: &mut Registries, me: RegistryId, name: &str) -> Result<bool> {
        let key = self.lookup(name)?;
        let slot = self.slots.get(key).ok_or_else(|| missing_slot(&self.label))?;
        if slot.refcount() != 0 {
            warn!(registry = %self.label, name, refcount = slot.refcount(), "refusing to evict a live resource");
            return Ok(false);
        }
        if !slot.listeners().is_empty() {
            let count = slot.listeners().len();
            error!(registry = %self.label, name, count, "evict with listeners still attached");
            return Err(RegistryError::ListenersAttached {
                name: name.to_string(),
                count,
            });
        }

        let index = slot.data_index();
        let dst = self.store.element_mut(index)?;
        let mut cx = LoadContext::new(hub, me, &self.userdata);
        self.descriptor.destroy(&mut cx, slot.name(), slot.id(), dst);
        self.store.reset(index);
        self.slots.remove(key);
        self.stats.evictions += 1;
        debug!(registry = %self.label, name, index, "evicted");
        Ok(true)
    }

    pub(crate) fn reload_by_id(
        &mut self,
        hub: &mut Registries,
        me: RegistryId,
        id: ResId,
    ) -> Result<ReloadStep> {
        let key = self
            .slots
            .find_by_id(id)
            .ok_or_else(|| RegistryError::NotFound(format!("{id:?} in registry '{}'", self.label)))?;
        let outcome = self.rebuild(hub, me, key)?;

        let slot = self
            .slots
            .get_mut(key)
            .ok_or_else(|| missing_slot(&self.label))?;
        if outcome.is_loaded() {
            slot.set_state(SlotState::Ready);
            self.stats.reloads += 1;
            debug!(registry = %self.label, name = slot.name(), ?id, "reloaded");
            Ok(ReloadStep::Reloaded {
                listeners: slot.listeners().iter().copied().collect(),
            })
        } else {
            let retryable = outcome.is_retryable();
            slot.set_state(SlotState::Failed { retryable });
            self.stats.failed_reloads += 1;
            warn!(registry = %self.label, name = slot.name(), ?id, retryable, "reload failed");
            Ok(ReloadStep::Failed {
                name: slot.name().to_string(),
                retryable,
            })
        }
    }

    /// Mark a slot a cascade could not rebuild. The next acquire retries it.
    pub(crate) fn mark_stale(&mut self, id: ResId) {
        let Some(key) = self.slots.find_by_id(id) else {
            return;
        };
        if let Some(slot) = self.slots.get_mut(key) {
            slot.set_state(SlotState::Failed { retryable: true });
            self.stats.failed_reloads += 1;
            warn!(registry = %self.label, name = slot.name(), ?id, "missed a cascading reload");
        }
    }

    /// Release and unlink `dependent` from every slot that lists it.
    pub(crate) fn clear_dependency(&mut self, dependent: ResHandle) -> usize {
        let mut cleared = 0;
        for slot in self.slots.iter_mut() {
            if !slot.has_listener(dependent) {
                continue;
            }
            if let Err(err) = slot.remove_listener(dependent).and_then(|_| slot.release()) {
                error!(registry = %self.label, %err, "clearing dependency");
                continue;
            }
            cleared += 1;
        }
        self.stats.releases += cleared as u64;
        cleared
    }

    /// Drop every listener owned by a registry that no longer exists.
    pub(crate) fn scrub_registry(&mut self, dead: RegistryId) -> usize {
        let mut scrubbed = 0;
        for slot in self.slots.iter_mut() {
            let removed = slot.remove_listeners_of(dead);
            for _ in 0..removed {
                if slot.release().is_err() {
                    break;
                }
            }
            scrubbed += removed;
        }
        self.stats.releases += scrubbed as u64;
        scrubbed
    }

    /// Destroy every resident payload and empty the table.
    pub(crate) fn teardown(&mut self, hub: &mut Registries, me: RegistryId) {
        let keys: Vec<SlotKey> = self.slots.keys().collect();
        let mut cx = LoadContext::new(hub, me, &self.userdata);
        for key in keys {
            let Some(slot) = self.slots.remove(key) else {
                continue;
            };
            if let Ok(dst) = self.store.element_mut(slot.data_index()) {
                self.descriptor.destroy(&mut cx, slot.name(), slot.id(), dst);
            }
            self.store.reset(slot.data_index());
        }
        debug!(registry = %self.label, "torn down");
    }
}

/// Object-safe view of a registry, used by the hub to store registries of
/// different kinds side by side and to walk the dependency graph.
pub(crate) trait ErasedRegistry: Any {
    fn label(&self) -> &str;
    fn kind(&self) -> &'static str;
    fn len(&self) -> usize;
    fn slot(&self, name: &str) -> Option<&Slot>;
    fn slot_by_id(&self, id: ResId) -> Option<&Slot>;
    fn names(&self) -> Vec<String>;
    fn userdata(&self, index: usize) -> Result<Option<RegistryId>>;
    fn set_userdata(&mut self, index: usize, value: Option<RegistryId>) -> Result<()>;
    fn release(&mut self, name: &str, listener: Option<ResHandle>) -> Result<u32>;
    fn evict(&mut self, hub: &mut Registries, me: RegistryId, name: &str) -> Result<bool>;
    fn reload_by_id(&mut self, hub: &mut Registries, me: RegistryId, id: ResId) -> Result<ReloadStep>;
    fn clear_dependency(&mut self, dependent: ResHandle) -> usize;
    fn mark_stale(&mut self, id: ResId);
    fn scrub_registry(&mut self, dead: RegistryId) -> usize;
    fn teardown(&mut self, hub: &mut Registries, me: RegistryId);
    fn stats(&self) -> RegistryStats;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<D: Descriptor> ErasedRegistry for Registry<D> {
    fn label(&self) -> &str {
        &self.label
    }

    fn kind(&self) -> &'static str {
        std::any::type_name::<D>()
    }

    fn len(&self) -> usize {
        self.slots.len()
    }

    fn slot(&self, name: &str) -> Option<&Slot> {
        self.slots.by_name(name)
    }

    fn slot_by_id(&self, id: ResId) -> Option<&Slot> {
        self.slots.by_id(id)
    }

    fn names(&self) -> Vec<String> {
        self.slots.iter().map(|slot| slot.name().to_string()).collect()
    }

    fn userdata(&self, index: usize) -> Result<Option<RegistryId>> {
        Registry::userdata(self, index)
    }

    fn set_userdata(&mut self, index: usize, value: Option<RegistryId>) -> Result<()> {
        Registry::set_userdata(self, index, value)
    }

    fn release(&mut self, name: &str, listener: Option<ResHandle>) -> Result<u32> {
        Registry::release(self, name, listener)
    }

    fn evict(&mut self, hub: &mut Registries, me: RegistryId, name: &str) -> Result<bool> {
        Registry::evict(self, hub, me, name)
    }

    fn reload_by_id(&mut self, hub: &mut Registries, me: RegistryId, id: ResId) -> Result<ReloadStep> {
        Registry::reload_by_id(self, hub, me, id)
    }

    fn clear_dependency(&mut self, dependent: ResHandle) -> usize {
        Registry::clear_dependency(self, dependent)
    }

    fn mark_stale(&mut self, id: ResId) {
        Registry::mark_stale(self, id)
    }

    fn scrub_registry(&mut self, dead: RegistryId) -> usize {
        Registry::scrub_registry(self, dead)
    }

    fn teardown(&mut self, hub: &mut Registries, me: RegistryId) {
        Registry::teardown(self, hub, me)
    }

    fn stats(&self) -> RegistryStats {
        Registry::stats(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
