//! Named buffer and query-set registries.
//!
//! Names are interned into stable slot keys the first time they are mentioned, whether by
//! creation or by a pass that depends on them. A slot holds at most one live handle and a
//! generation counter that is bumped every time the handle is replaced.

use std::collections::HashMap;
use std::marker::PhantomData;

use super::backend::Backend;

/// Stable handle for a named buffer.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct BufferKey(u32);

/// Stable handle for a named timestamp query set.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct QueryKey(u32);

pub(crate) trait SlotKey: Copy {
    fn from_index(index: usize) -> Self;
    fn index(self) -> usize;
}

impl SlotKey for BufferKey {
    fn from_index(index: usize) -> Self {
        Self(index as u32)
    }

    fn index(self) -> usize {
        self.0 as usize
    }
}

impl SlotKey for QueryKey {
    fn from_index(index: usize) -> Self {
        Self(index as u32)
    }

    fn index(self) -> usize {
        self.0 as usize
    }
}

struct Slot<T> {
    name: String,
    live: Option<T>,
    generation: u32,
}

/// Name → slot arena. String hashing only happens in [`NameTable::intern`] and
/// [`NameTable::lookup`]; per-frame access goes through keys.
pub(crate) struct NameTable<K, T> {
    slots: Vec<Slot<T>>,
    by_name: HashMap<String, usize>,
    _key: PhantomData<K>,
}

impl<K: SlotKey, T> NameTable<K, T> {
    pub(crate) fn new() -> Self {
        Self {
            slots: Vec::new(),
            by_name: HashMap::new(),
            _key: PhantomData,
        }
    }

    /// Returns the key for `name`, reserving an empty slot if it was never seen.
    pub(crate) fn intern(&mut self, name: &str) -> K {
        if let Some(&index) = self.by_name.get(name) {
            return K::from_index(index);
        }
        let index = self.slots.len();
        self.slots.push(Slot {
            name: name.to_string(),
            live: None,
            generation: 0,
        });
        self.by_name.insert(name.to_string(), index);
        K::from_index(index)
    }

    pub(crate) fn lookup(&self, name: &str) -> Option<K> {
        self.by_name.get(name).map(|&i| K::from_index(i))
    }

    pub(crate) fn get(&self, key: K) -> Option<&T> {
        self.slots.get(key.index()).and_then(|s| s.live.as_ref())
    }

    pub(crate) fn name(&self, key: K) -> &str {
        self.slots
            .get(key.index())
            .map_or("<unknown>", |s| s.name.as_str())
    }

    /// Generation of the slot's current handle; 0 means never created.
    pub(crate) fn generation(&self, key: K) -> u32 {
        self.slots.get(key.index()).map_or(0, |s| s.generation)
    }

    /// Installs `value` under `key`, returning the handle it displaced.
    pub(crate) fn replace(&mut self, key: K, value: T) -> Option<T> {
        let slot = &mut self.slots[key.index()];
        slot.generation = slot.generation.wrapping_add(1).max(1);
        slot.live.replace(value)
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }
}

/// A live GPU buffer and the parameters it was allocated with.
pub(crate) struct BufferEntry<B: Backend> {
    pub handle: B::Buffer,
    pub size: u64,
    pub usage: wgpu::BufferUsages,
}

/// A live timestamp query set.
pub(crate) struct QueryEntry<B: Backend> {
    pub handle: B::QuerySet,
    pub capacity: u32,
}

/// Named buffers. Owns every buffer handle the graph binds or copies.
pub(crate) struct ResourceTable<B: Backend> {
    table: NameTable<BufferKey, BufferEntry<B>>,
}

impl<B: Backend> ResourceTable<B> {
    pub(crate) fn new() -> Self {
        Self {
            table: NameTable::new(),
        }
    }

    pub(crate) fn intern(&mut self, name: &str) -> BufferKey {
        self.table.intern(name)
    }

    pub(crate) fn lookup(&self, name: &str) -> Option<BufferKey> {
        self.table.lookup(name)
    }

    /// Allocates a buffer under `key`, destroying the handle it replaces.
    pub(crate) fn create(
        &mut self,
        backend: &B,
        key: BufferKey,
        size: u64,
        usage: wgpu::BufferUsages,
    ) {
        let label = format!("attractor buffer {}", self.table.name(key));
        let handle = backend.create_buffer(&label, size, usage);
        if let Some(old) = self.table.replace(key, BufferEntry { handle, size, usage }) {
            backend.destroy_buffer(&old.handle);
        }
    }

    pub(crate) fn get(&self, key: BufferKey) -> Option<&BufferEntry<B>> {
        self.table.get(key)
    }

    pub(crate) fn name(&self, key: BufferKey) -> &str {
        self.table.name(key)
    }

    pub(crate) fn generation(&self, key: BufferKey) -> u32 {
        self.table.generation(key)
    }

    pub(crate) fn len(&self) -> usize {
        self.table.len()
    }
}

/// Named timestamp query sets. No coupling to passes: measured passes and resolve
/// passes look their query set up when they are encoded.
pub(crate) struct QueryTable<B: Backend> {
    table: NameTable<QueryKey, QueryEntry<B>>,
}

impl<B: Backend> QueryTable<B> {
    pub(crate) fn new() -> Self {
        Self {
            table: NameTable::new(),
        }
    }

    pub(crate) fn intern(&mut self, name: &str) -> QueryKey {
        self.table.intern(name)
    }

    pub(crate) fn lookup(&self, name: &str) -> Option<QueryKey> {
        self.table.lookup(name)
    }

    pub(crate) fn create(
        &mut self,
        backend: &B,
        key: QueryKey,
        capacity: u32,
    ) -> Result<(), super::GraphError> {
        let label = format!("attractor query set {}", self.table.name(key));
        let handle = backend.create_query_set(&label, capacity)?;
        // Query sets have no explicit destroy; the old one drops here.
        self.table.replace(key, QueryEntry { handle, capacity });
        Ok(())
    }

    pub(crate) fn get(&self, key: QueryKey) -> Option<&QueryEntry<B>> {
        self.table.get(key)
    }

    pub(crate) fn name(&self, key: QueryKey) -> &str {
        self.table.name(key)
    }
}
