//! Frame graph: named GPU resources plus an ordered list of passes replayed every frame.
//!
//! Setup registers buffers and query sets and appends passes. Each frame the host
//! uploads uniforms, then [`FrameGraph::execute`] encodes every pass, in insertion
//! order, into a single submission and starts any due readbacks.
//!
//! Passes may name resources that do not exist yet. Such a pass is inert (it records
//! nothing) until the resource is created, which lets a host wire passes before it knows
//! the final size of a resize-driven buffer.

mod backend;
mod bind_group;
mod download;
mod error;
mod executor;
mod pass;
mod resources;
mod wgpu_backend;

#[cfg(test)]
mod mock;

use crossbeam_channel::{Receiver, Sender};

pub use backend::{
    Backend, ComputeCommand, Dispatch, Headless, MapCallback, RenderCommand, Timestamps,
    ViewSource,
};
pub use download::{DownloadCallback, DownloadStatus};
pub use error::{DependencyKind, GraphError};
pub use pass::{FrameReport, Invocations, Measure, PassId, PassKind, PassOutcome};
pub use resources::{BufferKey, QueryKey};
pub use wgpu_backend::WgpuBackend;

use bind_group::{BindGroupCache, Binding};
use download::{Completion, DownloadPass};
use pass::{ComputePass, InvocationSource, MeasureSlots, Pass, RenderPass};
use resources::{QueryTable, ResourceTable, SlotKey};

/// GPU command-graph runtime.
pub struct FrameGraph<B: Backend> {
    backend: B,
    buffers: ResourceTable<B>,
    queries: QueryTable<B>,
    passes: Vec<Pass<B>>,

    /// Indexed by buffer slot: passes whose bind group names that buffer.
    dependents: Vec<Vec<usize>>,

    completions_tx: Sender<Completion>,
    completions_rx: Receiver<Completion>,

    /// Last inert reason per pass, so each transition is logged once.
    last_inert: Vec<Option<GraphError>>,
}

impl<B: Backend> FrameGraph<B> {
    pub fn new(backend: B) -> Self {
        let (completions_tx, completions_rx) = crossbeam_channel::unbounded();
        Self {
            backend,
            buffers: ResourceTable::new(),
            queries: QueryTable::new(),
            passes: Vec::new(),
            dependents: Vec::new(),
            completions_tx,
            completions_rx,
            last_inert: Vec::new(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    // ── resources ─────────────────────────────────────────────────────────

    /// Creates (or replaces) the buffer registered under `name`.
    ///
    /// Replacing destroys the previous handle and rebuilds the bind group of every pass
    /// that binds `name`. If downloads sourced from the old buffer are still in flight,
    /// the device is drained first and their results are delivered before replacement.
    pub fn create_buffer(&mut self, name: &str, size: u64, usage: wgpu::BufferUsages) -> BufferKey {
        let key = self.intern_buffer(name);
        self.drain_before_replace(key);

        self.buffers.create(&self.backend, key, size, usage);
        log::debug!(
            "buffer \"{name}\" created: {size} bytes, {usage:?} (generation {})",
            self.buffers.generation(key)
        );

        self.rebuild_dependents(key);
        key
    }

    /// Creates (or replaces) a timestamp query set with `capacity` slots.
    ///
    /// Fails only when the device cannot record timestamps, which is a setup error.
    pub fn create_query_set(&mut self, name: &str, capacity: u32) -> Result<QueryKey, GraphError> {
        let key = self.queries.intern(name);
        self.queries.create(&self.backend, key, capacity)?;
        log::debug!("query set \"{name}\" created with {capacity} slots");
        Ok(key)
    }

    pub fn buffer_key(&self, name: &str) -> Option<BufferKey> {
        self.buffers.lookup(name)
    }

    pub fn query_key(&self, name: &str) -> Option<QueryKey> {
        self.queries.lookup(name)
    }

    /// Size in bytes of the live buffer under `key`.
    pub fn buffer_size(&self, key: BufferKey) -> Option<u64> {
        self.buffers.get(key).map(|e| e.size)
    }

    /// Capacity of the live query set under `key`.
    pub fn query_capacity(&self, key: QueryKey) -> Option<u32> {
        self.queries.get(key).map(|e| e.capacity)
    }

    /// Writes `bytes` at offset 0 of the buffer under `key` through the queue.
    pub fn update_buffer(&self, key: BufferKey, bytes: &[u8]) -> Result<(), GraphError> {
        let name = self.buffers.name(key);
        let entry = self
            .buffers
            .get(key)
            .ok_or_else(|| GraphError::missing_buffer(name))?;

        if !entry.usage.contains(wgpu::BufferUsages::COPY_DST) {
            return Err(GraphError::UsageMismatch {
                name: name.to_string(),
                required: wgpu::BufferUsages::COPY_DST,
            });
        }
        if bytes.len() as u64 % wgpu::COPY_BUFFER_ALIGNMENT != 0 {
            return Err(GraphError::Misaligned {
                name: name.to_string(),
                size: bytes.len() as u64,
            });
        }
        if bytes.len() as u64 > entry.size {
            return Err(GraphError::CapacityExceeded {
                name: name.to_string(),
                needed: bytes.len() as u64,
                available: entry.size,
            });
        }

        self.backend.write_buffer(&entry.handle, 0, bytes);
        Ok(())
    }

    /// Uploads a plain-old-data value (typically a uniform block).
    pub fn update_buffer_with<T: bytemuck::Pod>(&self, key: BufferKey, value: &T) -> Result<(), GraphError> {
        self.update_buffer(key, bytemuck::bytes_of(value))
    }

    // ── passes ────────────────────────────────────────────────────────────

    /// Zero-fills `buffer` each frame.
    pub fn add_clear(&mut self, buffer: &str) -> PassId {
        let buffer = self.intern_buffer(buffer);
        self.push(Pass::Clear { buffer })
    }

    /// Adds a compute pass dispatching `invocations` workgroups, either a fixed count or
    /// the indirect argument triple stored in a named buffer.
    ///
    /// `bindings` maps buffer names to binding slots of group 0.
    pub fn add_compute_pass(
        &mut self,
        program: &B::Program,
        entry_point: &str,
        invocations: impl Into<Invocations>,
        bindings: &[(&str, u32)],
        measure: Option<Measure>,
    ) -> PassId {
        let (pipeline, layout) = self.backend.create_compute_pipeline(program, entry_point);
        let invocations = match invocations.into() {
            Invocations::Workgroups(n) => InvocationSource::Direct(n),
            Invocations::Indirect(name) => InvocationSource::Indirect(self.intern_buffer(&name)),
        };
        let bind_group = BindGroupCache::new(layout, self.intern_bindings(bindings));
        let measure = measure.map(|m| self.intern_measure(m));

        self.push_bound(Pass::Compute(ComputePass {
            label: format!("attractor compute {entry_point}"),
            pipeline,
            bind_group,
            invocations,
            measure,
        }))
    }

    /// Shorthand for [`add_compute_pass`](Self::add_compute_pass) with an indirect buffer.
    pub fn add_compute_pass_indirect(
        &mut self,
        program: &B::Program,
        entry_point: &str,
        indirect_buffer: &str,
        bindings: &[(&str, u32)],
        measure: Option<Measure>,
    ) -> PassId {
        self.add_compute_pass(
            program,
            entry_point,
            Invocations::Indirect(indirect_buffer.to_string()),
            bindings,
            measure,
        )
    }

    /// Adds a non-indexed draw of `vertex_count` vertices into the frame's surface view.
    pub fn add_render_pass(
        &mut self,
        program: &B::Program,
        vs_entry: &str,
        fs_entry: &str,
        vertex_count: u32,
        bindings: &[(&str, u32)],
        measure: Option<Measure>,
    ) -> PassId {
        let (pipeline, layout) = self.backend.create_render_pipeline(program, vs_entry, fs_entry);
        let bind_group = BindGroupCache::new(layout, self.intern_bindings(bindings));
        let measure = measure.map(|m| self.intern_measure(m));

        self.push_bound(Pass::Render(RenderPass {
            label: format!("attractor render {vs_entry}/{fs_entry}"),
            pipeline,
            bind_group,
            vertex_count,
            measure,
        }))
    }

    /// Copies every slot of `query` into `target` each frame.
    pub fn add_resolve_query(&mut self, query: &str, target: &str) -> PassId {
        let query = self.queries.intern(query);
        let target = self.intern_buffer(target);
        self.push(Pass::Resolve { query, target })
    }

    /// Reads `buffer` back to the host every frame, with at most `max_in_flight`
    /// readbacks outstanding. Frames at the bound skip the copy.
    ///
    /// `on_complete` runs on the thread that calls [`execute`](Self::execute) or
    /// [`poll`](Self::poll), in the order the copies were submitted.
    pub fn add_buffer_download(
        &mut self,
        buffer: &str,
        max_in_flight: usize,
        on_complete: impl FnMut(&[u8]) + 'static,
    ) -> PassId {
        if max_in_flight == 0 {
            log::warn!("download of \"{buffer}\" requested with max_in_flight = 0; using 1");
        }
        let source = self.intern_buffer(buffer);
        self.push(Pass::Download(DownloadPass::new(
            source,
            max_in_flight.max(1),
            Box::new(on_complete),
        )))
    }

    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    pub fn pass_kind(&self, id: PassId) -> Option<PassKind> {
        self.passes.get(id.0).map(Pass::kind)
    }

    // ── downloads ─────────────────────────────────────────────────────────

    /// Drives the device and delivers finished downloads without encoding a frame.
    pub fn poll(&mut self) {
        self.backend.poll();
        self.drain_completions();
    }

    /// Outstanding readbacks of a download pass; `None` for other pass kinds.
    pub fn in_flight(&self, id: PassId) -> Option<usize> {
        match self.passes.get(id.0) {
            Some(Pass::Download(d)) => Some(d.in_flight_count()),
            _ => None,
        }
    }

    pub fn download_status(&self) -> DownloadStatus {
        self.passes
            .iter()
            .filter_map(|p| match p {
                Pass::Download(d) => Some(d),
                _ => None,
            })
            .fold(DownloadStatus::default(), |acc, d| DownloadStatus {
                pending_in_pool: acc.pending_in_pool + d.idle_count(),
                in_flight: acc.in_flight + d.in_flight_count(),
            })
    }

    fn drain_completions(&mut self) {
        while let Ok(Completion { pass, ticket, ok }) = self.completions_rx.try_recv() {
            if let Some(Pass::Download(d)) = self.passes.get_mut(pass) {
                let name = self.buffers.name(d.source);
                d.complete(&self.backend, ticket, ok, name);
            }
        }
    }

    fn drain_before_replace(&mut self, key: BufferKey) {
        if self.buffers.get(key).is_none() {
            return;
        }
        let busy = self.passes.iter().any(|p| {
            matches!(p, Pass::Download(d) if d.source == key && d.in_flight_count() > 0)
        });
        if busy {
            log::debug!(
                "draining downloads of \"{}\" before replacing it",
                self.buffers.name(key)
            );
            self.backend.wait_idle();
            self.drain_completions();
        }
    }

    // ── construction helpers ──────────────────────────────────────────────

    fn intern_buffer(&mut self, name: &str) -> BufferKey {
        let key = self.buffers.intern(name);
        if self.dependents.len() < self.buffers.len() {
            self.dependents.resize_with(self.buffers.len(), Vec::new);
        }
        key
    }

    fn intern_bindings(&mut self, bindings: &[(&str, u32)]) -> Vec<Binding> {
        bindings
            .iter()
            .map(|&(name, slot)| Binding {
                key: self.intern_buffer(name),
                slot,
            })
            .collect()
    }

    fn intern_measure(&mut self, measure: Measure) -> MeasureSlots {
        MeasureSlots {
            query: self.queries.intern(&measure.query),
            begin: measure.begin,
            end: measure.end,
        }
    }

    fn push(&mut self, pass: Pass<B>) -> PassId {
        let id = PassId(self.passes.len());
        self.passes.push(pass);
        self.last_inert.push(None);
        id
    }

    /// Registers the pass as a dependent of each bound buffer, then eagerly tries to
    /// build its bind group.
    fn push_bound(&mut self, mut pass: Pass<B>) -> PassId {
        let index = self.passes.len();
        if let Some((cache, label)) = pass.bind_group_mut() {
            for key in cache.keys() {
                self.dependents[key.index()].push(index);
            }
            if let Err(e) = cache.rebuild(&self.backend, &self.buffers, label) {
                log::debug!("{label}: bind group deferred ({e})");
            }
        }
        self.push(pass)
    }

    fn rebuild_dependents(&mut self, key: BufferKey) {
        let Some(dependents) = self.dependents.get(key.index()) else { return };
        for &index in dependents {
            let Some((cache, label)) = self.passes[index].bind_group_mut() else {
                continue;
            };
            match cache.rebuild(&self.backend, &self.buffers, label) {
                Ok(()) => log::debug!("{label}: bind group rebuilt"),
                Err(e) => log::debug!("{label}: bind group deferred ({e})"),
            }
        }
    }
}

#[cfg(test)]
mod tests;
