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

//! Per-registry bookkeeping: one slot per resident name.

use ahash::AHashMap;
use slotmap::{new_key_type, SlotMap};
use smallvec::SmallVec;

use crate::error::{RegistryError, Result};
use crate::id::{RegistryId, ResHandle, ResId};

new_key_type! {
    /// Key of a slot inside its table.
    pub struct SlotKey;
}

/// Listener sets are tiny in practice (one or two dependents per producer)
pub type ListenerSet = SmallVec<[ResHandle; 4]>;

/// Whether a slot's payload may be handed out
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotState {
    Ready,
    /// The last reload failed. `retryable` failures are rebuilt on the next
    /// acquire; fatal ones wait for a successful reload.
    Failed { retryable: bool },
}

/// Bookkeeping record for one resident resource
#[derive(Debug)]
pub struct Slot {
    name: String,
    id: ResId,
    refcount: u32,
    data_index: u32,
    state: SlotState,
    listeners: ListenerSet,
}

impl Slot {
    pub(crate) fn new(name: &str, id: ResId, data_index: u32) -> Self {
        Self {
            name: name.to_string(),
            id,
            refcount: 0,
            data_index,
            state: SlotState::Ready,
            listeners: SmallVec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> ResId {
        self.id
    }

    pub fn refcount(&self) -> u32 {
        self.refcount
    }

    pub fn data_index(&self) -> u32 {
        self.data_index
    }

    pub fn state(&self) -> SlotState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == SlotState::Ready
    }

    pub fn listeners(&self) -> &[ResHandle] {
        &self.listeners
    }

    pub fn has_listener(&self, handle: ResHandle) -> bool {
        self.listeners.contains(&handle)
    }

    pub(crate) fn place(&mut self, data_index: u32) {
        self.data_index = data_index;
    }

    pub(crate) fn set_state(&mut self, state: SlotState) {
        self.state = state;
    }

    pub(crate) fn retain(&mut self) -> u32 {
        self.refcount += 1;
        self.refcount
    }

    pub(crate) fn release(&mut self) -> Result<u32> {
        if self.refcount == 0 {
            return Err(RegistryError::NotAcquired(self.name.clone()));
        }
        self.refcount -= 1;
        Ok(self.refcount)
    }

    pub(crate) fn add_listener(&mut self, handle: ResHandle) -> Result<()> {
        if self.has_listener(handle) {
            return Err(RegistryError::DuplicateListener {
                name: self.name.clone(),
                listener: handle,
            });
        }
        self.listeners.push(handle);
        Ok(())
    }

    /// Swap-remove; listener order carries no meaning.
    pub(crate) fn remove_listener(&mut self, handle: ResHandle) -> Result<()> {
        match self.listeners.iter().position(|h| *h == handle) {
            Some(pos) => {
                self.listeners.swap_remove(pos);
                Ok(())
            }
            None => Err(RegistryError::ListenerNotFound {
                name: self.name.clone(),
                listener: handle,
            }),
        }
    }

    /// Drop every listener owned by `registry`, returning how many went.
    pub(crate) fn remove_listeners_of(&mut self, registry: RegistryId) -> usize {
        let before = self.listeners.len();
        self.listeners.retain(|h| h.registry != registry);
        before - self.listeners.len()
    }
}

/// Bounded name → slot table with an id index
pub struct SlotTable {
    slots: SlotMap<SlotKey, Slot>,
    by_name: AHashMap<String, SlotKey>,
    by_id: AHashMap<ResId, SlotKey>,
    capacity: usize,
}

impl SlotTable {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: SlotMap::with_capacity_and_key(capacity),
            by_name: AHashMap::with_capacity(capacity),
            by_id: AHashMap::with_capacity(capacity),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.slots.len() >= self.capacity
    }

    pub fn find_by_name(&self, name: &str) -> Option<SlotKey> {
        self.by_name.get(name).copied()
    }

    pub fn find_by_id(&self, id: ResId) -> Option<SlotKey> {
        self.by_id.get(&id).copied()
    }

    pub fn get(&self, key: SlotKey) -> Option<&Slot> {
        self.slots.get(key)
    }

    pub fn get_mut(&mut self, key: SlotKey) -> Option<&mut Slot> {
        self.slots.get_mut(key)
    }

    pub fn by_name(&self, name: &str) -> Option<&Slot> {
        self.find_by_name(name).and_then(|key| self.slots.get(key))
    }

    pub fn by_id(&self, id: ResId) -> Option<&Slot> {
        self.find_by_id(id).and_then(|key| self.slots.get(key))
    }

    pub(crate) fn insert(&mut self, slot: Slot) -> Result<SlotKey> {
        if self.is_full() {
            return Err(RegistryError::CapacityExceeded {
                what: "slot table",
                capacity: self.capacity,
            });
        }
        debug_assert!(!self.by_name.contains_key(slot.name()));
        debug_assert!(!self.by_id.contains_key(&slot.id()));
        let name = slot.name.clone();
        let id = slot.id;
        let key = self.slots.insert(slot);
        self.by_name.insert(name, key);
        self.by_id.insert(id, key);
        Ok(key)
    }

    pub(crate) fn remove(&mut self, key: SlotKey) -> Option<Slot> {
        let slot = self.slots.remove(key)?;
        self.by_name.remove(slot.name());
        self.by_id.remove(&slot.id());
        Some(slot)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Slot> {
        self.slots.values()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Slot> {
        self.slots.values_mut()
    }

    pub fn keys(&self) -> impl Iterator<Item = SlotKey> + '_ {
        self.slots.keys()
    }
}
