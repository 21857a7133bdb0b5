use std::collections::{BTreeMap, btree_map::Values};

use bpf_common::Probe;
use thiserror::Error;

use super::KernelEvent;

pub type EventFactory = fn() -> Box<dyn KernelEvent>;

/// A registered event kind.
#[derive(Clone, Copy)]
pub struct RegistryEntry {
    pub id: u32,
    pub name: &'static str,
    factory: EventFactory,
}

impl RegistryEntry {
    /// New empty instance, ready to decode one record.
    pub fn create(&self) -> Box<dyn KernelEvent> {
        (self.factory)()
    }

    pub fn create_fn(&self) -> EventFactory {
        self.factory
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RegistryError {
    #[error("event type {id} already registered by {existing}, cannot register {new}")]
    DuplicateType {
        id: u32,
        existing: &'static str,
        new: &'static str,
    },
}

/// Type code to event factory map. Built once at startup, read only after.
#[derive(Default)]
pub struct Registry {
    entries: BTreeMap<u32, RegistryEntry>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<E>(&mut self) -> Result<(), RegistryError>
    where
        E: KernelEvent + Default,
    {
        fn factory<E: KernelEvent + Default>() -> Box<dyn KernelEvent> {
            Box::new(E::default())
        }

        let prototype = E::default();
        let (id, name) = (prototype.id(), prototype.name());
        if let Some(existing) = self.entries.get(&id) {
            return Err(RegistryError::DuplicateType {
                id,
                existing: existing.name,
                new: name,
            });
        }
        log::debug!("registered event {name} ({id})");
        self.entries.insert(
            id,
            RegistryEntry {
                id,
                name,
                factory: factory::<E>,
            },
        );
        Ok(())
    }

    pub fn get(&self, id: u32) -> Option<&RegistryEntry> {
        self.entries.get(&id)
    }

    /// Entries sorted by type code.
    pub fn iter(&self) -> Values<'_, u32, RegistryEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every program the loader has to attach.
    pub fn probes(&self) -> Vec<Probe> {
        self.iter().flat_map(|entry| entry.create().probes()).collect()
    }
}
