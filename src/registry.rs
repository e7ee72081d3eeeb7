//! Named velocity stores.
//!
//! A [`Registry`] maps backend kinds to constructors and store names to open
//! [`Velocity`] instances. Most programs use the process-wide one through the
//! free functions in this module; separate registries are useful in tests.
//!
//! Built-in kinds: `memory` ([`MemoryStore`]) and `ordered`
//! ([`BackendStore`] over [`OrderedBackend`]).

use std::collections::HashMap;
use std::io::BufRead;
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;

use crate::config::VelocityConfig;
use crate::engine::Velocity;
use crate::error::{Error, Result};
use crate::store::{BackendStore, MemoryStore, OrderedBackend, Store};
use crate::text::WireLine;

/// Builds the store for a named instance.
pub type Factory = fn(name: &str, config: &VelocityConfig) -> Result<Box<dyn Store>>;

fn memory_store(_: &str, _: &VelocityConfig) -> Result<Box<dyn Store>> {
    Ok(Box::new(MemoryStore::new()))
}

fn ordered_store(_: &str, _: &VelocityConfig) -> Result<Box<dyn Store>> {
    Ok(Box::new(BackendStore::new(OrderedBackend::new())))
}

pub struct Registry {
    factories: RwLock<HashMap<String, Factory>>,
    instances: RwLock<HashMap<String, Arc<Velocity>>>,
}

impl Registry {
    /// A registry with the built-in kinds.
    pub fn new() -> Self {
        let registry = Self {
            factories: RwLock::new(HashMap::new()),
            instances: RwLock::new(HashMap::new()),
        };
        registry.register("memory", memory_store);
        registry.register("ordered", ordered_store);
        registry
    }

    pub fn global() -> &'static Registry {
        static GLOBAL: OnceLock<Registry> = OnceLock::new();
        GLOBAL.get_or_init(Registry::new)
    }

    /// Add or replace a backend kind.
    pub fn register(&self, kind: &str, factory: Factory) {
        self.factories.write().insert(kind.to_owned(), factory);
    }

    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<_> = self.factories.read().keys().cloned().collect();
        kinds.sort();
        kinds
    }

    /// The instance called `name`, creating it with backend `kind` if needed.
    /// An existing instance is returned as is, whatever its kind.
    pub fn open(&self, name: &str, kind: &str, config: VelocityConfig) -> Result<Arc<Velocity>> {
        if let Some(vel) = self.context(name) {
            return Ok(vel);
        }

        let factory = self
            .factories
            .read()
            .get(kind)
            .copied()
            .ok_or_else(|| Error::unavailable(kind, "not registered"))?;

        let mut instances = self.instances.write();
        if let Some(vel) = instances.get(name) {
            return Ok(Arc::clone(vel));
        }

        let store = factory(name, &config)?;
        let vel = Arc::new(Velocity::open(name, store, config)?);
        instances.insert(name.to_owned(), Arc::clone(&vel));
        log::info!("opened {kind} store {name}");
        Ok(vel)
    }

    pub fn context(&self, name: &str) -> Option<Arc<Velocity>> {
        self.instances.read().get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.instances.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Close and forget one instance. Returns whether it existed.
    pub fn close(&self, name: &str) -> Result<bool> {
        let Some(vel) = self.instances.write().remove(name) else {
            return Ok(false);
        };
        vel.close()?;
        log::info!("closed store {name}");
        Ok(true)
    }

    /// Close every instance. Failures are logged; returns how many closed
    /// cleanly.
    pub fn shutdown(&self) -> usize {
        let instances: Vec<_> = self.instances.write().drain().collect();
        let mut closed = 0;
        for (name, vel) in instances {
            match vel.close() {
                Ok(()) => closed += 1,
                Err(e) => log::error!("closing store {name}: {e}"),
            }
        }
        log::info!("shut down {closed} stores");
        closed
    }

    /// Merge one `kind:name:key:items` line into the store it names, opening
    /// the store if needed. Returns whether the stored record changed.
    pub fn apply_remote(&self, line: &str) -> Result<bool> {
        let wire = WireLine::parse(line)?;
        let vel = self.open(wire.name, wire.kind, VelocityConfig::default())?;
        vel.merge_wire(&wire)
    }

    /// Apply every line of `reader`. Lines that fail are logged and skipped;
    /// returns how many applied.
    pub fn apply_remote_lines(&self, reader: impl BufRead) -> Result<usize> {
        let mut applied = 0;
        for (n, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match self.apply_remote(&line) {
                Ok(_) => applied += 1,
                Err(e) => log::error!("remote line {}: {e}", n + 1),
            }
        }
        Ok(applied)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

/// Add a backend kind to the process-wide registry.
pub fn register(kind: &str, factory: Factory) {
    Registry::global().register(kind, factory)
}

/// Open a store in the process-wide registry.
pub fn open(name: &str, kind: &str, config: VelocityConfig) -> Result<Arc<Velocity>> {
    Registry::global().open(name, kind, config)
}

/// Look up an open store in the process-wide registry.
pub fn context(name: &str) -> Option<Arc<Velocity>> {
    Registry::global().context(name)
}

pub fn close(name: &str) -> Result<bool> {
    Registry::global().close(name)
}

pub fn shutdown() -> usize {
    Registry::global().shutdown()
}

pub fn names() -> Vec<String> {
    Registry::global().names()
}

pub fn apply_remote(line: &str) -> Result<bool> {
    Registry::global().apply_remote(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Record;

    fn init() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn unavailable(_: &str, _: &VelocityConfig) -> Result<Box<dyn Store>> {
        Err(Error::unavailable("offheap", "no mapping available"))
    }

    #[test]
    fn test_open_and_context() {
        init();
        let reg = Registry::new();
        assert_eq!(reg.kinds(), vec!["memory", "ordered"]);
        assert!(reg.context("cards").is_none());

        let a = reg.open("cards", "memory", VelocityConfig::default()).unwrap();
        let b = reg.open("cards", "ordered", VelocityConfig::default()).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.store().kind(), "memory");

        let c = reg.open("devices", "ordered", VelocityConfig::default()).unwrap();
        assert_eq!(c.store().kind(), "backend");
        assert_eq!(reg.names(), vec!["cards", "devices"]);

        a.vel_count("k", 60, 25_000_000u32);
        assert_eq!(reg.context("cards").unwrap().get_count("k"), 1);
    }

    #[test]
    fn test_unknown_and_failing_kinds() {
        init();
        let reg = Registry::new();
        assert!(matches!(
            reg.open("x", "lmdb", VelocityConfig::default()),
            Err(Error::BackendUnavailable { .. })
        ));

        reg.register("offheap", unavailable);
        assert!(matches!(
            reg.open("x", "offheap", VelocityConfig::default()),
            Err(Error::BackendUnavailable { .. })
        ));
        assert!(reg.names().is_empty());
    }

    #[test]
    fn test_close_and_shutdown() {
        init();
        let reg = Registry::new();
        reg.open("a", "memory", VelocityConfig::default()).unwrap();
        reg.open("b", "memory", VelocityConfig::default()).unwrap();
        reg.open("c", "ordered", VelocityConfig::default()).unwrap();

        assert!(reg.close("a").unwrap());
        assert!(!reg.close("a").unwrap());
        assert_eq!(reg.shutdown(), 2);
        assert!(reg.names().is_empty());
    }

    #[test]
    fn test_apply_remote() {
        init();
        let reg = Registry::new();
        assert!(reg.apply_remote("memory:replica:7:25000002|1,25000001|3").unwrap());
        assert!(!reg.apply_remote("memory:replica:7:25000002|1,25000001|3").unwrap());

        let vel = reg.context("replica").unwrap();
        assert_eq!(vel.store().get(7).unwrap().map(|r| r.total()), Some(4));

        assert!(reg.apply_remote("memory:replica:7:25000003").unwrap());
        assert_eq!(vel.store().get(7).unwrap().map(|r| r.len()), Some(3));

        assert!(reg.apply_remote("memory:replica:seven:1|1").is_err());
        assert!(reg.apply_remote("nosuch:replica2:7:1|1").is_err());
    }

    #[test]
    fn test_apply_remote_lines() {
        init();
        let reg = Registry::new();
        let lines = b"ordered:r:1:25000000|2\n\ngarbage\nordered:r:2:25000000\nordered:r:x:1\n" as &[u8];
        assert_eq!(reg.apply_remote_lines(lines).unwrap(), 2);

        let vel = reg.context("r").unwrap();
        assert_eq!(vel.store().get(1).unwrap(), Some(Record::single(25_000_000, 2)));
        assert_eq!(vel.store().get(2).unwrap(), Some(Record::single(25_000_000, 1)));
    }

    #[test]
    fn test_global_registry() {
        init();
        let vel = open("registry-global-test", "memory", VelocityConfig::default()).unwrap();
        assert!(Arc::ptr_eq(&vel, &context("registry-global-test").unwrap()));
        assert!(names().contains(&"registry-global-test".to_string()));
        assert!(close("registry-global-test").unwrap());
        assert!(context("registry-global-test").is_none());
    }
}
