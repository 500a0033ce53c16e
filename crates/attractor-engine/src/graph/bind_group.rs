use super::backend::Backend;
use super::resources::{BufferKey, ResourceTable};
use super::GraphError;

/// One `name → slot` entry of a pass's binding map, resolved to a key.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) struct Binding {
    pub key: BufferKey,
    pub slot: u32,
}

/// Bind group derived from a pass's bindings and cached on the pass.
///
/// The cached group is usable iff every bound name resolves to a live buffer and none of
/// them has been replaced since the group was built (tracked through slot generations).
pub(crate) struct BindGroupCache<B: Backend> {
    layout: B::BindGroupLayout,
    bindings: Vec<Binding>,
    built_from: Vec<u32>,
    cached: Option<B::BindGroup>,
}

impl<B: Backend> BindGroupCache<B> {
    /// Later entries for the same buffer override earlier ones, like a map insert.
    pub(crate) fn new(layout: B::BindGroupLayout, bindings: Vec<Binding>) -> Self {
        let mut deduped: Vec<Binding> = Vec::with_capacity(bindings.len());
        for b in bindings {
            match deduped.iter_mut().find(|d| d.key == b.key) {
                Some(existing) => existing.slot = b.slot,
                None => deduped.push(b),
            }
        }
        Self {
            layout,
            bindings: deduped,
            built_from: Vec::new(),
            cached: None,
        }
    }

    pub(crate) fn keys(&self) -> impl Iterator<Item = BufferKey> + '_ {
        self.bindings.iter().map(|b| b.key)
    }

    /// Rebuilds the group from the current buffers.
    ///
    /// On an unresolved name the cache is left empty and the error names the first
    /// missing buffer; the pass stays inert until that buffer is created.
    pub(crate) fn rebuild(
        &mut self,
        backend: &B,
        buffers: &ResourceTable<B>,
        label: &str,
    ) -> Result<(), GraphError> {
        self.cached = None;
        self.built_from.clear();

        let mut entries = Vec::with_capacity(self.bindings.len());
        for b in &self.bindings {
            let Some(entry) = buffers.get(b.key) else {
                return Err(GraphError::missing_buffer(buffers.name(b.key)));
            };
            entries.push((b.slot, &entry.handle));
        }

        let group = backend.create_bind_group(label, &self.layout, &entries);
        self.built_from = self
            .bindings
            .iter()
            .map(|b| buffers.generation(b.key))
            .collect();
        self.cached = Some(group);
        Ok(())
    }

    /// Returns the cached group if it is still valid for the current buffers.
    pub(crate) fn current(&self, buffers: &ResourceTable<B>) -> Result<&B::BindGroup, GraphError> {
        let stale = self
            .bindings
            .iter()
            .zip(self.built_from.iter())
            .find(|&(b, &generation)| {
                buffers.get(b.key).is_none() || buffers.generation(b.key) != generation
            });

        match (&self.cached, stale) {
            (Some(group), None) => Ok(group),
            (_, Some((b, _))) => Err(GraphError::missing_buffer(buffers.name(b.key))),
            (None, None) => {
                // Never built: report the first name that is still missing.
                let missing = self
                    .bindings
                    .iter()
                    .find(|b| buffers.get(b.key).is_none())
                    .map_or("<bindings>", |b| buffers.name(b.key));
                Err(GraphError::missing_buffer(missing))
            }
        }
    }
}
