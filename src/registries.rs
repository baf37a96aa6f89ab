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

//! Registry hub
//!
//! [`Registries`] owns every registry of one dependency graph. Registries
//! reach each other only through the hub, by [`RegistryId`], so a descriptor
//! can acquire from another registry while its own registry is mid-callback.
//!
//! # Reentrancy
//!
//! A registry is checked out of the hub while one of its operations runs
//! and checked back in afterwards. Any call that lands on a checked-out
//! registry fails with [`RegistryError::RegistryBusy`] instead of aliasing
//! it. A cascade that reaches a checked-out registry counts the node as
//! failed and marks it `Failed { retryable: true }` when the registry is
//! checked back in, so the next acquire rebuilds it.
//!
//! # Cascading reload
//!
//! `reload` rebuilds one resource and then walks its listeners breadth-first
//! with a visited set keyed by [`ResHandle`], so every node is rebuilt at
//! most once per pass and cycles terminate. Reloads requested while a pass
//! is running join that pass's queue.

use ahash::AHashSet;
use slotmap::SlotMap;
use std::collections::VecDeque;
use tracing::{debug, error, warn};

#[cfg(feature = "profiling")]
use tracing::info_span;

use crate::config::RegistryConfig;
use crate::descriptor::Descriptor;
use crate::error::{RegistryError, Result};
use crate::id::{RegistryId, ResHandle, ResId};
use crate::registry::{ErasedRegistry, Registry, RegistryKey, ReloadStep};
use crate::slot::{Slot, SlotState};
use crate::stats::RegistryStats;

struct Entry {
    label: String,
    /// `None` while checked out
    registry: Option<Box<dyn ErasedRegistry>>,
}

#[derive(Default)]
struct CascadePass {
    queue: VecDeque<ResHandle>,
    visited: AHashSet<ResHandle>,
}

impl CascadePass {
    fn enqueue(&mut self, handle: ResHandle) -> bool {
        if self.visited.insert(handle) {
            self.queue.push_back(handle);
            true
        } else {
            false
        }
    }
}

/// What one `reload` call did
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReloadSummary {
    /// Resources rebuilt, the root included
    pub reloaded: usize,
    /// Listeners whose rebuild failed; they are marked failed and not cascaded past
    pub failed: usize,
    /// Stale listener handles that no longer name a live slot
    pub skipped: usize,
    /// The request joined a pass that was already running
    pub deferred: bool,
}

impl ReloadSummary {
    fn deferred() -> Self {
        Self {
            deferred: true,
            ..Self::default()
        }
    }
}

/// Owner of every registry in one dependency graph
#[derive(Default)]
pub struct Registries {
    entries: SlotMap<RegistryId, Entry>,
    /// Registration order, oldest first
    order: Vec<RegistryId>,
    pass: Option<CascadePass>,
    /// Cascade nodes that were busy when reached; marked failed at checkin
    unreached: Vec<ResHandle>,
}

impl Registries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a registry with the default config.
    pub fn register<D: Descriptor>(&mut self, label: impl Into<String>, descriptor: D) -> RegistryKey<D> {
        let label = label.into();
        let id = self.insert(Registry::new(label.clone(), descriptor, RegistryConfig::default()), label);
        RegistryKey::from_id(id)
    }

    pub fn register_with_config<D: Descriptor>(
        &mut self,
        label: impl Into<String>,
        descriptor: D,
        config: RegistryConfig,
    ) -> Result<RegistryKey<D>> {
        config.validate()?;
        let label = label.into();
        let id = self.insert(Registry::new(label.clone(), descriptor, config), label);
        Ok(RegistryKey::from_id(id))
    }

    fn insert<D: Descriptor>(&mut self, registry: Registry<D>, label: String) -> RegistryId {
        debug!(registry = %label, kind = registry.descriptor().type_name(), "registered");
        let id = self.entries.insert(Entry {
            label,
            registry: Some(Box::new(registry)),
        });
        self.order.push(id);
        id
    }

    /// Number of registered registries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, registry: impl Into<RegistryId>) -> bool {
        self.entries.contains_key(registry.into())
    }

    pub fn label(&self, registry: impl Into<RegistryId>) -> Result<&str> {
        self.entries
            .get(registry.into())
            .map(|entry| entry.label.as_str())
            .ok_or(RegistryError::RegistryNotFound)
    }

    /// True while a cascading reload is running
    pub fn in_cascade(&self) -> bool {
        self.pass.is_some()
    }

    fn entry(&self, id: RegistryId) -> Result<&(dyn ErasedRegistry + 'static)> {
        let entry = self.entries.get(id).ok_or(RegistryError::RegistryNotFound)?;
        entry
            .registry
            .as_deref()
            .ok_or_else(|| RegistryError::RegistryBusy(entry.label.clone()))
    }

    fn entry_mut(&mut self, id: RegistryId) -> Result<&mut (dyn ErasedRegistry + 'static)> {
        let entry = self.entries.get_mut(id).ok_or(RegistryError::RegistryNotFound)?;
        match entry.registry.as_deref_mut() {
            Some(registry) => Ok(registry),
            None => Err(RegistryError::RegistryBusy(entry.label.clone())),
        }
    }

    fn checkout(&mut self, id: RegistryId) -> Result<Box<dyn ErasedRegistry>> {
        let entry = self.entries.get_mut(id).ok_or(RegistryError::RegistryNotFound)?;
        entry
            .registry
            .take()
            .ok_or_else(|| RegistryError::RegistryBusy(entry.label.clone()))
    }

    fn checkin(&mut self, id: RegistryId, mut registry: Box<dyn ErasedRegistry>) {
        self.unreached.retain(|handle| {
            if handle.registry != id {
                return true;
            }
            registry.mark_stale(handle.id);
            false
        });
        if let Some(entry) = self.entries.get_mut(id) {
            entry.registry = Some(registry);
        }
    }

    fn with_checked_out<R>(
        &mut self,
        id: RegistryId,
        f: impl FnOnce(&mut dyn ErasedRegistry, &mut Registries) -> R,
    ) -> Result<R> {
        let mut registry = self.checkout(id)?;
        let result = f(registry.as_mut(), self);
        self.checkin(id, registry);
        Ok(result)
    }

    fn with_typed<D: Descriptor, R>(
        &mut self,
        key: RegistryKey<D>,
        f: impl FnOnce(&mut Registry<D>, &mut Registries) -> Result<R>,
    ) -> Result<R> {
        self.with_checked_out(key.id(), |registry, hub| {
            let found = registry.kind();
            match registry.as_any_mut().downcast_mut::<Registry<D>>() {
                Some(typed) => f(typed, hub),
                None => Err(RegistryError::KindMismatch {
                    expected: std::any::type_name::<D>(),
                    found,
                }),
            }
        })?
    }

    /// Typed read access to a registry.
    pub fn registry<D: Descriptor>(&self, key: RegistryKey<D>) -> Result<&Registry<D>> {
        let registry = self.entry(key.id())?;
        registry
            .as_any()
            .downcast_ref::<Registry<D>>()
            .ok_or_else(|| RegistryError::KindMismatch {
                expected: std::any::type_name::<D>(),
                found: registry.kind(),
            })
    }

    /// Acquire `name`, constructing it on first use.
    pub fn acquire<D: Descriptor>(&mut self, key: RegistryKey<D>, name: &str) -> Result<&D::Payload> {
        self.acquire_inner(key, name, None)
    }

    /// Acquire `name` on behalf of `listener`, which is reloaded whenever
    /// `name` is.
    pub fn acquire_with_listener<D: Descriptor>(
        &mut self,
        key: RegistryKey<D>,
        name: &str,
        listener: ResHandle,
    ) -> Result<&D::Payload> {
        self.acquire_inner(key, name, Some(listener))
    }

    fn acquire_inner<D: Descriptor>(
        &mut self,
        key: RegistryKey<D>,
        name: &str,
        listener: Option<ResHandle>,
    ) -> Result<&D::Payload> {
        #[cfg(feature = "profiling")]
        let span = info_span!("registries.acquire", name, listener = listener.is_some());
        #[cfg(feature = "profiling")]
        let _span_guard = span.enter();

        let id = key.id();
        let index = self.with_typed(key, |registry, hub| registry.acquire(hub, id, name, listener))?;
        self.registry(key)?.payload_at(index)
    }

    /// Peek at a payload without touching its refcount.
    pub fn get<D: Descriptor>(&self, key: RegistryKey<D>, name: &str) -> Result<&D::Payload> {
        self.registry(key)?.payload(name)
    }

    /// Drop one reference to `name`. The payload stays resident until evicted.
    pub fn release(&mut self, registry: impl Into<RegistryId>, name: &str) -> Result<u32> {
        self.entry_mut(registry.into())?.release(name, None)
    }

    pub fn release_with_listener(
        &mut self,
        registry: impl Into<RegistryId>,
        name: &str,
        listener: ResHandle,
    ) -> Result<u32> {
        self.entry_mut(registry.into())?.release(name, Some(listener))
    }

    /// Destroy an unreferenced payload. Returns false, leaving the slot in
    /// place, while the refcount is non-zero.
    pub fn evict(&mut self, registry: impl Into<RegistryId>, name: &str) -> Result<bool> {
        let id = registry.into();
        self.with_checked_out(id, |registry, hub| registry.evict(hub, id, name))?
    }

    /// Reload `name` and everything that transitively listens to it.
    ///
    /// A name nobody has acquired is a no-op. A failure of `name` itself is
    /// returned; failures further down are counted in the summary.
    pub fn reload(&mut self, registry: impl Into<RegistryId>, name: &str) -> Result<ReloadSummary> {
        let id = registry.into();
        let registry = self.entry(id)?;
        let res_id = match registry.slot(name) {
            Some(slot) => slot.id(),
            None => {
                warn!(registry = registry.label(), name, "reload of a resource nobody holds");
                return Ok(ReloadSummary::default());
            }
        };
        self.reload_by_id(ResHandle::new(id, res_id))
    }

    pub fn reload_by_id(&mut self, handle: ResHandle) -> Result<ReloadSummary> {
        if let Some(pass) = self.pass.as_mut() {
            if pass.enqueue(handle) {
                debug!(%handle, "reload joined running cascade");
            }
            return Ok(ReloadSummary::deferred());
        }

        #[cfg(feature = "profiling")]
        let span = info_span!("registries.reload", %handle);
        #[cfg(feature = "profiling")]
        let _span_guard = span.enter();

        let mut pass = CascadePass::default();
        pass.visited.insert(handle);
        self.pass = Some(pass);

        let mut summary = ReloadSummary::default();
        let root = self.reload_node(handle);
        if let Ok(ReloadStep::Reloaded { listeners }) = &root {
            summary.reloaded += 1;
            self.enqueue_all(listeners);
        }
        self.run_pass(&mut summary);
        self.pass = None;

        match root {
            Ok(ReloadStep::Reloaded { .. }) => {
                debug!(%handle, reloaded = summary.reloaded, failed = summary.failed, "cascade finished");
                Ok(summary)
            }
            Ok(ReloadStep::Failed { name, retryable }) => Err(RegistryError::ReloadFailed { name, retryable }),
            Err(err) => Err(err),
        }
    }

    fn reload_node(&mut self, handle: ResHandle) -> Result<ReloadStep> {
        let owner = handle.registry;
        self.with_checked_out(owner, |registry, hub| registry.reload_by_id(hub, owner, handle.id))?
    }

    fn enqueue_all(&mut self, listeners: &[ResHandle]) {
        if let Some(pass) = self.pass.as_mut() {
            for &listener in listeners {
                pass.enqueue(listener);
            }
        }
    }

    fn run_pass(&mut self, summary: &mut ReloadSummary) {
        while let Some(next) = self.pass.as_mut().and_then(|pass| pass.queue.pop_front()) {
            match self.reload_node(next) {
                Ok(ReloadStep::Reloaded { listeners }) => {
                    summary.reloaded += 1;
                    self.enqueue_all(&listeners);
                }
                Ok(ReloadStep::Failed { .. }) => summary.failed += 1,
                Err(RegistryError::NotFound(_)) | Err(RegistryError::RegistryNotFound) => {
                    warn!(listener = %next, "stale listener handle");
                    summary.skipped += 1;
                }
                Err(RegistryError::RegistryBusy(label)) => {
                    warn!(listener = %next, registry = %label, "listener busy during cascade, marking failed");
                    self.unreached.push(next);
                    summary.failed += 1;
                }
                Err(err) => {
                    error!(listener = %next, %err, "cascade step failed");
                    summary.failed += 1;
                }
            }
        }
    }

    /// Unlink `dependent` from every slot of `registry` that lists it,
    /// releasing one reference per slot. Returns how many slots it left.
    pub fn clear_dependency(&mut self, registry: impl Into<RegistryId>, dependent: ResHandle) -> Result<usize> {
        if self.pass.is_some() {
            return Err(RegistryError::CascadeInProgress);
        }
        Ok(self.entry_mut(registry.into())?.clear_dependency(dependent))
    }

    /// `clear_dependency` on every registry. Checked-out registries are skipped.
    pub fn clear_dependency_everywhere(&mut self, dependent: ResHandle) -> Result<usize> {
        if self.pass.is_some() {
            return Err(RegistryError::CascadeInProgress);
        }
        let mut cleared = 0;
        for id in self.order.clone() {
            match self.entry_mut(id) {
                Ok(registry) => cleared += registry.clear_dependency(dependent),
                Err(err) => debug!(%err, %dependent, "skipping registry while clearing dependency"),
            }
        }
        Ok(cleared)
    }

    /// Tear a registry down, destroying every resident payload.
    ///
    /// Listener handles other registries still hold for it are dropped and
    /// their references released.
    pub fn unregister(&mut self, registry: impl Into<RegistryId>) -> Result<()> {
        if self.pass.is_some() {
            return Err(RegistryError::CascadeInProgress);
        }
        let id = registry.into();
        let mut registry = self.checkout(id)?;
        registry.teardown(self, id);
        let label = self
            .entries
            .remove(id)
            .map(|entry| entry.label)
            .unwrap_or_default();
        self.order.retain(|other| *other != id);
        self.unreached.retain(|handle| handle.registry != id);

        let mut scrubbed = 0;
        for entry in self.entries.values_mut() {
            if let Some(other) = entry.registry.as_deref_mut() {
                scrubbed += other.scrub_registry(id);
            }
        }
        if scrubbed > 0 {
            warn!(registry = %label, scrubbed, "dropped listeners of an unregistered registry");
        }
        debug!(registry = %label, "unregistered");
        Ok(())
    }

    /// Unregister everything, newest first.
    pub fn shutdown(&mut self) {
        for id in self.order.clone().into_iter().rev() {
            if let Err(err) = self.unregister(id) {
                error!(%err, "unregister during shutdown");
            }
        }
    }

    pub fn set_userdata(
        &mut self,
        registry: impl Into<RegistryId>,
        index: usize,
        value: Option<RegistryId>,
    ) -> Result<()> {
        self.entry_mut(registry.into())?.set_userdata(index, value)
    }

    pub fn get_userdata(&self, registry: impl Into<RegistryId>, index: usize) -> Result<Option<RegistryId>> {
        self.entry(registry.into())?.userdata(index)
    }

    pub fn name_to_id(&self, registry: impl Into<RegistryId>, name: &str) -> Result<ResId> {
        self.slot(registry.into(), name).map(Slot::id)
    }

    pub fn id_to_name(&self, registry: impl Into<RegistryId>, id: ResId) -> Result<&str> {
        self.entry(registry.into())?
            .slot_by_id(id)
            .map(Slot::name)
            .ok_or_else(|| RegistryError::NotFound(format!("{id:?}")))
    }

    /// Name a handle points at, in its own registry.
    pub fn handle_find_name(&self, handle: ResHandle) -> Result<&str> {
        self.id_to_name(handle.registry, handle.id)
    }

    fn slot(&self, id: RegistryId, name: &str) -> Result<&Slot> {
        let registry = self.entry(id)?;
        registry
            .slot(name)
            .ok_or_else(|| RegistryError::NotFound(format!("'{name}' in registry '{}'", registry.label())))
    }

    pub fn refcount(&self, registry: impl Into<RegistryId>, name: &str) -> Result<u32> {
        self.slot(registry.into(), name).map(Slot::refcount)
    }

    pub fn listeners(&self, registry: impl Into<RegistryId>, name: &str) -> Result<&[ResHandle]> {
        self.slot(registry.into(), name).map(Slot::listeners)
    }

    pub fn state(&self, registry: impl Into<RegistryId>, name: &str) -> Result<SlotState> {
        self.slot(registry.into(), name).map(Slot::state)
    }

    /// Resident names, in no particular order
    pub fn names(&self, registry: impl Into<RegistryId>) -> Result<Vec<String>> {
        Ok(self.entry(registry.into())?.names())
    }

    /// Number of resident slots in one registry
    pub fn slot_count(&self, registry: impl Into<RegistryId>) -> Result<usize> {
        Ok(self.entry(registry.into())?.len())
    }

    pub fn stats(&self, registry: impl Into<RegistryId>) -> Result<RegistryStats> {
        Ok(self.entry(registry.into())?.stats())
    }
}
