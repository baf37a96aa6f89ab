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

//! Registry and dependency-graph tests over in-memory descriptors

#[cfg(test)]
mod tests {
    #![allow(dead_code)]
    #![allow(clippy::module_inception)]
    use crate::{
        Descriptor, LoadContext, LoadOutcome, RegistryConfig, RegistryError, RegistryKey, Registries,
        ReloadSummary, ResHandle, ResId, Result, SlotState,
    };
    use ahash::AHashMap;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Default)]
    struct Script {
        constructs: usize,
        reloads: usize,
        destroys: usize,
        failing: AHashMap<String, LoadOutcome>,
    }

    type Shared = Rc<RefCell<Script>>;

    /// Payload counts builds. Acquires its upstream (user-data slot 0) with a
    /// listener when one is set.
    struct Node {
        script: Shared,
        upstream_name: Option<&'static str>,
    }

    impl Node {
        fn new() -> (Self, Shared) {
            let script = Shared::default();
            (
                Self {
                    script: script.clone(),
                    upstream_name: None,
                },
                script,
            )
        }

        fn reading(upstream_name: &'static str) -> (Self, Shared) {
            let (mut node, script) = Self::new();
            node.upstream_name = Some(upstream_name);
            (node, script)
        }
    }

    impl Descriptor for Node {
        type Payload = u32;

        fn construct(&mut self, cx: &mut LoadContext<'_>, name: &str, id: ResId, dst: &mut u32) -> LoadOutcome {
            if let Some(upstream) = cx.userdata_key::<Node>(0) {
                let source = self.upstream_name.unwrap_or(name);
                let handle = cx.handle(id);
                if let Err(err) = cx.registries().acquire_with_listener(upstream, source, handle) {
                    return LoadOutcome::from_error(&err);
                }
            }
            let mut script = self.script.borrow_mut();
            script.constructs += 1;
            if let Some(outcome) = script.failing.get(name) {
                return *outcome;
            }
            *dst += 1;
            LoadOutcome::Loaded
        }

        fn reload(&mut self, _cx: &mut LoadContext<'_>, name: &str, _id: ResId, dst: &mut u32) -> Option<LoadOutcome> {
            let mut script = self.script.borrow_mut();
            script.reloads += 1;
            if let Some(outcome) = script.failing.get(name) {
                return Some(*outcome);
            }
            *dst += 1;
            Some(LoadOutcome::Loaded)
        }

        fn destroy(&mut self, cx: &mut LoadContext<'_>, name: &str, id: ResId, dst: &mut u32) {
            self.script.borrow_mut().destroys += 1;
            *dst = 0;
            if let Some(upstream) = cx.userdata(0) {
                let source = self.upstream_name.unwrap_or(name);
                let handle = cx.handle(id);
                let _ = cx.registries().release_with_listener(upstream, source, handle);
            }
        }
    }

    fn handle_of<D: Descriptor>(hub: &Registries, key: RegistryKey<D>, name: &str) -> ResHandle {
        ResHandle::new(key.id(), hub.name_to_id(key, name).unwrap())
    }

    #[test]
    fn test_dependent_reloads_exactly_once() -> Result<()> {
        let mut hub = Registries::new();
        let (files, file_script) = Node::new();
        let (shaders, shader_script) = Node::reading("a.txt");
        let files = hub.register("Files", files);
        let shaders = hub.register("Shaders", shaders);
        hub.set_userdata(shaders, 0, Some(files.id()))?;

        hub.acquire(shaders, "s1")?;
        let s1 = handle_of(&hub, shaders, "s1");
        assert_eq!(hub.refcount(files, "a.txt")?, 1);
        assert_eq!(hub.listeners(files, "a.txt")?, &[s1]);

        let summary = hub.reload(files, "a.txt")?;
        assert_eq!(summary.reloaded, 2);
        assert_eq!(summary.failed, 0);
        assert_eq!(file_script.borrow().reloads, 1);
        assert_eq!(shader_script.borrow().reloads, 1);
        assert_eq!(*hub.get(shaders, "s1")?, 2);
        Ok(())
    }

    #[test]
    fn test_cycle_terminates() -> Result<()> {
        let mut hub = Registries::new();
        let (a, a_script) = Node::new();
        let (b, b_script) = Node::new();
        let a = hub.register("A", a);
        let b = hub.register("B", b);

        hub.acquire(a, "x")?;
        hub.acquire(b, "x")?;
        let ax = handle_of(&hub, a, "x");
        let bx = handle_of(&hub, b, "x");
        hub.acquire_with_listener(a, "x", bx)?;
        hub.acquire_with_listener(b, "x", ax)?;

        let summary = hub.reload(a, "x")?;
        assert_eq!(summary.reloaded, 2);
        assert_eq!(a_script.borrow().reloads, 1);
        assert_eq!(b_script.borrow().reloads, 1);
        Ok(())
    }

    #[test]
    fn test_self_listener_reloads_once() -> Result<()> {
        let mut hub = Registries::new();
        let (a, script) = Node::new();
        let a = hub.register("A", a);
        hub.acquire(a, "x")?;
        let ax = handle_of(&hub, a, "x");
        hub.acquire_with_listener(a, "x", ax)?;

        assert_eq!(hub.reload(a, "x")?.reloaded, 1);
        assert_eq!(script.borrow().reloads, 1);
        Ok(())
    }

    #[test]
    fn test_listener_failure_is_contained() -> Result<()> {
        let mut hub = Registries::new();
        let (p, _) = Node::new();
        let (c, c_script) = Node::reading("p");
        let (d, d_script) = Node::new();
        let p = hub.register("P", p);
        let c = hub.register("C", c);
        let d = hub.register("D", d);
        hub.set_userdata(c, 0, Some(p.id()))?;
        hub.set_userdata(d, 0, Some(c.id()))?;

        hub.acquire(p, "p")?;
        hub.acquire(c, "good")?;
        hub.acquire(c, "bad")?;
        hub.acquire(d, "bad")?;

        c_script
            .borrow_mut()
            .failing
            .insert("bad".to_string(), LoadOutcome::Fatal);

        let summary = hub.reload(p, "p")?;
        assert_eq!(summary.reloaded, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(hub.state(c, "bad")?, SlotState::Failed { retryable: false });
        assert_eq!(hub.state(c, "good")?, SlotState::Ready);
        assert_eq!(d_script.borrow().reloads, 0);
        Ok(())
    }

    #[test]
    fn test_root_failure_is_returned() -> Result<()> {
        let mut hub = Registries::new();
        let (p, p_script) = Node::new();
        let (c, c_script) = Node::new();
        let p = hub.register("P", p);
        let c = hub.register("C", c);
        hub.set_userdata(c, 0, Some(p.id()))?;
        hub.acquire(c, "x")?;

        p_script
            .borrow_mut()
            .failing
            .insert("x".to_string(), LoadOutcome::Fatal);
        assert_eq!(
            hub.reload(p, "x"),
            Err(RegistryError::ReloadFailed {
                name: "x".to_string(),
                retryable: false
            })
        );
        assert_eq!(c_script.borrow().reloads, 0);
        assert!(matches!(
            hub.acquire(p, "x"),
            Err(RegistryError::ConstructFailed { retryable: false, .. })
        ));
        assert!(hub.get(p, "x").is_err());

        p_script.borrow_mut().failing.clear();
        let summary = hub.reload(p, "x")?;
        assert_eq!(summary.reloaded, 2);
        assert_eq!(hub.state(p, "x")?, SlotState::Ready);
        assert!(hub.acquire(p, "x").is_ok());
        Ok(())
    }

    #[test]
    fn test_retryable_failure_rebuilds_on_acquire() -> Result<()> {
        let mut hub = Registries::new();
        let (a, script) = Node::new();
        let a = hub.register("A", a);
        hub.acquire(a, "x")?;

        script
            .borrow_mut()
            .failing
            .insert("x".to_string(), LoadOutcome::Retry);
        assert!(matches!(
            hub.reload(a, "x"),
            Err(RegistryError::ReloadFailed { retryable: true, .. })
        ));
        assert_eq!(hub.state(a, "x")?, SlotState::Failed { retryable: true });

        // Still failing: acquire reports it and leaves the refcount alone.
        assert!(matches!(
            hub.acquire(a, "x"),
            Err(RegistryError::ConstructFailed { retryable: true, .. })
        ));
        assert_eq!(hub.refcount(a, "x")?, 1);

        script.borrow_mut().failing.clear();
        // Rebuilt through the descriptor's reload, never torn down.
        assert_eq!(*hub.acquire(a, "x")?, 2);
        assert_eq!(hub.refcount(a, "x")?, 2);
        assert_eq!(hub.state(a, "x")?, SlotState::Ready);
        assert_eq!(script.borrow().reloads, 3);
        assert_eq!(script.borrow().constructs, 1);
        assert_eq!(script.borrow().destroys, 0);
        Ok(())
    }

    #[test]
    fn test_clear_dependency_releases_every_edge() -> Result<()> {
        let mut hub = Registries::new();
        let (p, _) = Node::new();
        let (c, _) = Node::new();
        let p = hub.register("P", p);
        let c = hub.register("C", c);

        hub.acquire(c, "consumer")?;
        let consumer = handle_of(&hub, c, "consumer");
        hub.acquire_with_listener(p, "one", consumer)?;
        hub.acquire_with_listener(p, "two", consumer)?;
        hub.acquire(p, "two")?;

        assert_eq!(hub.clear_dependency(p, consumer)?, 2);
        assert_eq!(hub.refcount(p, "one")?, 0);
        assert_eq!(hub.refcount(p, "two")?, 1);
        assert!(hub.listeners(p, "one")?.is_empty());
        assert!(hub.listeners(p, "two")?.is_empty());
        assert_eq!(hub.clear_dependency(p, consumer)?, 0);
        Ok(())
    }

    #[test]
    fn test_evict_rules() -> Result<()> {
        let mut hub = Registries::new();
        let (p, script) = Node::new();
        let p = hub.register("P", p);

        hub.acquire(p, "x")?;
        assert!(!hub.evict(p, "x")?);
        assert_eq!(hub.refcount(p, "x")?, 1);
        assert_eq!(script.borrow().destroys, 0);

        hub.release(p, "x")?;
        assert!(hub.evict(p, "x")?);
        assert_eq!(script.borrow().destroys, 1);
        assert!(matches!(hub.name_to_id(p, "x"), Err(RegistryError::NotFound(_))));
        assert!(matches!(hub.evict(p, "x"), Err(RegistryError::NotFound(_))));
        Ok(())
    }

    #[test]
    fn test_evict_with_listeners_fails() -> Result<()> {
        let mut hub = Registries::new();
        let (p, _) = Node::new();
        let (c, _) = Node::new();
        let p = hub.register("P", p);
        let c = hub.register("C", c);
        hub.acquire(c, "y")?;
        let y = handle_of(&hub, c, "y");
        hub.acquire_with_listener(p, "x", y)?;

        // Drop the reference but leave the edge in place.
        hub.release(p, "x")?;
        assert_eq!(
            hub.evict(p, "x"),
            Err(RegistryError::ListenersAttached {
                name: "x".to_string(),
                count: 1
            })
        );

        hub.acquire(p, "x")?;
        assert_eq!(hub.clear_dependency(p, y)?, 1);
        assert!(hub.evict(p, "x")?);
        Ok(())
    }

    #[test]
    fn test_recreated_slot_gets_new_generation() -> Result<()> {
        let mut hub = Registries::new();
        let (a, _) = Node::new();
        let a = hub.register("A", a);

        hub.acquire(a, "x")?;
        let first = hub.name_to_id(a, "x")?;
        assert_eq!(first, ResId::from_name("x"));
        hub.release(a, "x")?;
        hub.evict(a, "x")?;

        hub.acquire(a, "x")?;
        let second = hub.name_to_id(a, "x")?;
        assert_ne!(first, second);
        assert_eq!(first.hash(), second.hash());
        assert_eq!(second.generation(), 1);

        // The stale id no longer resolves.
        assert!(hub.id_to_name(a, first).is_err());
        assert_eq!(hub.id_to_name(a, second)?, "x");
        Ok(())
    }

    #[test]
    fn test_stale_listener_is_skipped() -> Result<()> {
        let mut hub = Registries::new();
        let (p, _) = Node::new();
        let (c, _) = Node::new();
        let p = hub.register("P", p);
        let c = hub.register("C", c);

        let ghost = ResHandle::new(c.id(), ResId::from_name("ghost"));
        hub.acquire_with_listener(p, "x", ghost)?;
        let summary = hub.reload(p, "x")?;
        assert_eq!(summary.reloaded, 1);
        assert_eq!(summary.skipped, 1);
        Ok(())
    }

    #[test]
    fn test_round_trip_lookup() -> Result<()> {
        let mut hub = Registries::new();
        let (a, _) = Node::new();
        let a = hub.register("A", a);
        for name in ["a.txt", "b.txt", "shaders/lit.glsl"] {
            hub.acquire(a, name)?;
        }
        for name in hub.names(a)? {
            let id = hub.name_to_id(a, &name)?;
            assert_eq!(hub.id_to_name(a, id)?, name);
            assert_eq!(hub.handle_find_name(ResHandle::new(a.id(), id))?, name);
        }
        assert!(matches!(hub.name_to_id(a, "missing"), Err(RegistryError::NotFound(_))));
        Ok(())
    }

    #[test]
    fn test_unregister_scrubs_listeners() -> Result<()> {
        let mut hub = Registries::new();
        let (p, _) = Node::new();
        let (c, _) = Node::new();
        let p = hub.register("P", p);
        let c = hub.register("C", c);

        hub.acquire(p, "x")?;
        hub.acquire(c, "y")?;
        let y = handle_of(&hub, c, "y");
        hub.acquire_with_listener(p, "x", y)?;
        assert_eq!(hub.refcount(p, "x")?, 2);

        hub.unregister(c)?;
        assert!(hub.listeners(p, "x")?.is_empty());
        assert_eq!(hub.refcount(p, "x")?, 1);
        Ok(())
    }

    #[test]
    fn test_shutdown_tears_down_dependents_first() -> Result<()> {
        let mut hub = Registries::new();
        let (p, p_script) = Node::new();
        let (c, c_script) = Node::reading("x");
        let p = hub.register("P", p);
        let c = hub.register("C", c);
        hub.set_userdata(c, 0, Some(p.id()))?;
        hub.acquire(c, "y")?;

        hub.shutdown();
        assert!(hub.is_empty());
        assert_eq!(c_script.borrow().destroys, 1);
        assert_eq!(p_script.borrow().destroys, 1);
        Ok(())
    }

    #[test]
    fn test_capacity_limits() -> Result<()> {
        let mut hub = Registries::new();
        let (a, _) = Node::new();
        let a = hub.register_with_config("A", a, RegistryConfig::new(2, 3))?;

        hub.acquire(a, "one")?;
        hub.acquire(a, "two")?;
        assert_eq!(
            hub.acquire(a, "three"),
            Err(RegistryError::CapacityExceeded {
                what: "slot table",
                capacity: 2
            })
        );

        hub.release(a, "one")?;
        hub.evict(a, "one")?;
        hub.acquire(a, "three")?;

        // Evicted indices are not reused.
        hub.release(a, "three")?;
        hub.evict(a, "three")?;
        assert_eq!(
            hub.acquire(a, "four"),
            Err(RegistryError::CapacityExceeded {
                what: "backing store",
                capacity: 3
            })
        );
        assert!(hub.name_to_id(a, "four").is_err());
        Ok(())
    }

    #[test]
    fn test_listener_misuse() -> Result<()> {
        let mut hub = Registries::new();
        let (a, _) = Node::new();
        let a = hub.register("A", a);
        let h = ResHandle::new(a.id(), ResId::from_name("dependent"));

        hub.acquire_with_listener(a, "x", h)?;
        assert!(matches!(
            hub.acquire_with_listener(a, "x", h),
            Err(RegistryError::DuplicateListener { .. })
        ));
        assert_eq!(hub.refcount(a, "x")?, 1);

        assert_eq!(hub.release_with_listener(a, "x", h)?, 0);
        assert!(matches!(hub.release(a, "x"), Err(RegistryError::NotAcquired(_))));
        assert!(matches!(hub.acquire(a, ""), Err(RegistryError::InvalidName(_))));
        Ok(())
    }

    /// Calls back into the hub while its own reload is part of a cascade.
    struct Prober {
        seen: Rc<RefCell<Vec<Result<bool>>>>,
        other: Option<RegistryKey<Node>>,
    }

    impl Descriptor for Prober {
        type Payload = ();

        fn construct(&mut self, _cx: &mut LoadContext<'_>, _name: &str, _id: ResId, _dst: &mut ()) -> LoadOutcome {
            LoadOutcome::Loaded
        }

        fn reload(&mut self, cx: &mut LoadContext<'_>, _name: &str, id: ResId, _dst: &mut ()) -> Option<LoadOutcome> {
            let handle = cx.handle(id);
            let mut seen = self.seen.borrow_mut();
            if let Some(other) = self.other {
                seen.push(cx.registries().clear_dependency(other, handle).map(|_| true));
                seen.push(cx.registries().reload(other, "side").map(|summary| summary.deferred));
            }
            Some(LoadOutcome::Loaded)
        }

        fn destroy(&mut self, _cx: &mut LoadContext<'_>, _name: &str, _id: ResId, _dst: &mut ()) {}
    }

    #[test]
    fn test_cascade_guards_reentrant_calls() -> Result<()> {
        let mut hub = Registries::new();
        let (p, p_script) = Node::new();
        let p = hub.register("P", p);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let prober = hub.register(
            "Prober",
            Prober {
                seen: seen.clone(),
                other: Some(p),
            },
        );

        hub.acquire(p, "root")?;
        hub.acquire(p, "side")?;
        hub.acquire(prober, "probe")?;
        let probe = handle_of(&hub, prober, "probe");
        hub.acquire_with_listener(p, "root", probe)?;

        let summary = hub.reload(p, "root")?;
        assert_eq!(
            *seen.borrow(),
            vec![Err(RegistryError::CascadeInProgress), Ok(true)]
        );
        // root, probe, then the deferred side reload
        assert_eq!(summary.reloaded, 3);
        assert_eq!(p_script.borrow().reloads, 2);
        assert!(!hub.in_cascade());
        Ok(())
    }

    /// Reloads a resource of another registry from inside its own construct.
    struct Trigger {
        upstream: RegistryKey<Node>,
        summary: Rc<RefCell<Option<Result<ReloadSummary>>>>,
    }

    impl Descriptor for Trigger {
        type Payload = u32;

        fn construct(&mut self, cx: &mut LoadContext<'_>, name: &str, _id: ResId, dst: &mut u32) -> LoadOutcome {
            if name == "trigger" {
                *self.summary.borrow_mut() = Some(cx.registries().reload(self.upstream, "p"));
            }
            *dst += 1;
            LoadOutcome::Loaded
        }

        fn reload(&mut self, _cx: &mut LoadContext<'_>, _name: &str, _id: ResId, dst: &mut u32) -> Option<LoadOutcome> {
            *dst += 1;
            Some(LoadOutcome::Loaded)
        }

        fn destroy(&mut self, _cx: &mut LoadContext<'_>, _name: &str, _id: ResId, dst: &mut u32) {
            *dst = 0;
        }
    }

    #[test]
    fn test_busy_listener_is_marked_failed() -> Result<()> {
        let mut hub = Registries::new();
        let (p, _) = Node::new();
        let p = hub.register("P", p);
        let summary = Rc::new(RefCell::new(None));
        let t = hub.register(
            "T",
            Trigger {
                upstream: p,
                summary: summary.clone(),
            },
        );

        hub.acquire(t, "watcher")?;
        let watcher = handle_of(&hub, t, "watcher");
        hub.acquire_with_listener(p, "p", watcher)?;

        // T is checked out while "trigger" constructs, so the cascade
        // cannot rebuild "watcher".
        hub.acquire(t, "trigger")?;
        let summary = summary.borrow_mut().take();
        let summary = summary.unwrap()?;
        assert_eq!(summary.reloaded, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(hub.state(t, "watcher")?, SlotState::Failed { retryable: true });
        assert!(matches!(
            hub.get(t, "watcher"),
            Err(RegistryError::ConstructFailed { retryable: true, .. })
        ));
        assert_eq!(hub.stats(t)?.failed_reloads, 1);

        // The next acquire catches up.
        assert_eq!(*hub.acquire(t, "watcher")?, 2);
        assert_eq!(hub.state(t, "watcher")?, SlotState::Ready);
        Ok(())
    }
}
