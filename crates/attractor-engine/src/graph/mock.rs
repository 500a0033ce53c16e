//! Recording backend for graph tests.
//!
//! Buffers carry byte contents so copies, clears and readbacks can be checked end to end.
//! Maps stay pending until a test completes them, in any order.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashSet};

use super::backend::{Backend, ComputeCommand, Dispatch, MapCallback, RenderCommand, ViewSource};
use super::GraphError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct MockBuffer {
    pub id: u32,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct MockQuerySet {
    pub id: u32,
    pub capacity: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct MockBindGroup {
    /// `(slot, buffer id)` in the order they were bound.
    pub entries: Vec<(u32, u32)>,
}

/// Timestamp writes as `(query set id, begin, end)`.
pub(crate) type Writes = Option<(u32, Option<u32>, Option<u32>)>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Command {
    Clear { buffer: u32 },
    Compute {
        label: String,
        bound: Vec<(u32, u32)>,
        workgroups: Option<u32>,
        indirect: Option<u32>,
        timestamps: Writes,
    },
    Render {
        label: String,
        bound: Vec<(u32, u32)>,
        view: u32,
        vertex_count: u32,
        timestamps: Writes,
    },
    Resolve { query: u32, count: u32, target: u32 },
    Copy { src: u32, dst: u32, size: u64 },
}

impl Command {
    pub(crate) fn label(&self) -> &str {
        match self {
            Command::Clear { .. } => "clear",
            Command::Compute { label, .. } | Command::Render { label, .. } => label,
            Command::Resolve { .. } => "resolve",
            Command::Copy { .. } => "copy",
        }
    }
}

struct PendingMap {
    buffer: u32,
    done: MapCallback,
}

#[derive(Default)]
struct State {
    next_id: u32,
    contents: BTreeMap<u32, Vec<u8>>,
    usages: BTreeMap<u32, wgpu::BufferUsages>,
    labels: BTreeMap<u32, String>,
    destroyed: HashSet<u32>,
    mapped: HashSet<u32>,
    pending: Vec<PendingMap>,
    submissions: Vec<Vec<Command>>,
    bind_groups_built: usize,
    polls: usize,
    waits: usize,
}

impl State {
    fn alloc_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    fn check_usable(&self, id: u32) {
        assert!(!self.destroyed.contains(&id), "buffer {id} used after destroy");
        assert!(!self.mapped.contains(&id), "buffer {id} used while mapped");
        assert!(
            !self.pending.iter().any(|p| p.buffer == id),
            "buffer {id} used while a map is pending"
        );
    }
}

pub(crate) struct MockBackend {
    state: RefCell<State>,
    timestamps: bool,
}

impl MockBackend {
    pub(crate) fn new() -> Self {
        Self {
            state: RefCell::new(State::default()),
            timestamps: true,
        }
    }

    pub(crate) fn without_timestamps() -> Self {
        Self {
            timestamps: false,
            ..Self::new()
        }
    }

    pub(crate) fn submissions(&self) -> Vec<Vec<Command>> {
        self.state.borrow().submissions.clone()
    }

    pub(crate) fn last_submission(&self) -> Vec<Command> {
        self.state
            .borrow()
            .submissions
            .last()
            .cloned()
            .unwrap_or_default()
    }

    pub(crate) fn is_destroyed(&self, id: u32) -> bool {
        self.state.borrow().destroyed.contains(&id)
    }

    /// Buffers allocated with `label`, destroyed or not.
    pub(crate) fn buffers_labelled(&self, label: &str) -> Vec<u32> {
        self.state
            .borrow()
            .labels
            .iter()
            .filter(|(_, l)| l.as_str() == label)
            .map(|(&id, _)| id)
            .collect()
    }

    pub(crate) fn live_buffers_labelled(&self, label: &str) -> usize {
        let state = self.state.borrow();
        state
            .labels
            .iter()
            .filter(|(id, l)| l.as_str() == label && !state.destroyed.contains(id))
            .count()
    }

    pub(crate) fn bind_groups_built(&self) -> usize {
        self.state.borrow().bind_groups_built
    }

    pub(crate) fn pending_maps(&self) -> usize {
        self.state.borrow().pending.len()
    }

    pub(crate) fn waits(&self) -> usize {
        self.state.borrow().waits
    }

    pub(crate) fn polls(&self) -> usize {
        self.state.borrow().polls
    }

    /// Completes the `index`-th pending map (in request order).
    pub(crate) fn complete_map(&self, index: usize, ok: bool) {
        let pending = {
            let mut state = self.state.borrow_mut();
            let pending = state.pending.remove(index);
            if ok {
                state.mapped.insert(pending.buffer);
            }
            pending
        };
        (pending.done)(ok);
    }

    pub(crate) fn complete_all_maps(&self) {
        while self.pending_maps() > 0 {
            self.complete_map(0, true);
        }
    }
}

impl Backend for MockBackend {
    type Buffer = MockBuffer;
    type QuerySet = MockQuerySet;
    type Program = ();
    type ComputePipeline = String;
    type RenderPipeline = String;
    type BindGroupLayout = ();
    type BindGroup = MockBindGroup;
    type Encoder = Vec<Command>;
    type View = u32;

    fn create_buffer(&self, label: &str, size: u64, usage: wgpu::BufferUsages) -> MockBuffer {
        let mut state = self.state.borrow_mut();
        let id = state.alloc_id();
        state.contents.insert(id, vec![0; size as usize]);
        state.usages.insert(id, usage);
        state.labels.insert(id, label.to_string());
        MockBuffer { id, size }
    }

    fn destroy_buffer(&self, buffer: &MockBuffer) {
        let mut state = self.state.borrow_mut();
        assert!(state.destroyed.insert(buffer.id), "buffer {} destroyed twice", buffer.id);
    }

    fn create_query_set(&self, _label: &str, capacity: u32) -> Result<MockQuerySet, GraphError> {
        if !self.timestamps {
            return Err(GraphError::Configuration("timestamps unsupported".to_string()));
        }
        let id = self.state.borrow_mut().alloc_id();
        Ok(MockQuerySet { id, capacity })
    }

    fn create_compute_pipeline(&self, _program: &(), entry_point: &str) -> (String, ()) {
        (entry_point.to_string(), ())
    }

    fn create_render_pipeline(&self, _program: &(), vs_entry: &str, fs_entry: &str) -> (String, ()) {
        (format!("{vs_entry}/{fs_entry}"), ())
    }

    fn create_bind_group(&self, _label: &str, _layout: &(), entries: &[(u32, &MockBuffer)]) -> MockBindGroup {
        let mut state = self.state.borrow_mut();
        for (_, b) in entries {
            assert!(!state.destroyed.contains(&b.id), "bind group over destroyed buffer {}", b.id);
        }
        state.bind_groups_built += 1;
        MockBindGroup {
            entries: entries.iter().map(|(slot, b)| (*slot, b.id)).collect(),
        }
    }

    fn create_encoder(&self) -> Vec<Command> {
        Vec::new()
    }

    fn clear_buffer(&self, encoder: &mut Vec<Command>, buffer: &MockBuffer) {
        self.state.borrow().check_usable(buffer.id);
        encoder.push(Command::Clear { buffer: buffer.id });
    }

    fn encode_compute(&self, encoder: &mut Vec<Command>, cmd: ComputeCommand<'_, Self>) {
        let state = self.state.borrow();
        for (_, id) in &cmd.bind_group.entries {
            state.check_usable(*id);
        }
        let (workgroups, indirect) = match cmd.dispatch {
            Dispatch::Direct(n) => (Some(n), None),
            Dispatch::Indirect(b) => (None, Some(b.id)),
        };
        encoder.push(Command::Compute {
            label: cmd.pipeline.clone(),
            bound: cmd.bind_group.entries.clone(),
            workgroups,
            indirect,
            timestamps: cmd.timestamps.map(|t| (t.query_set.id, t.begin, t.end)),
        });
    }

    fn encode_render(&self, encoder: &mut Vec<Command>, cmd: RenderCommand<'_, Self>) {
        let state = self.state.borrow();
        for (_, id) in &cmd.bind_group.entries {
            state.check_usable(*id);
        }
        encoder.push(Command::Render {
            label: cmd.pipeline.clone(),
            bound: cmd.bind_group.entries.clone(),
            view: *cmd.view,
            vertex_count: cmd.vertex_count,
            timestamps: cmd.timestamps.map(|t| (t.query_set.id, t.begin, t.end)),
        });
    }

    fn resolve_query_set(
        &self,
        encoder: &mut Vec<Command>,
        query_set: &MockQuerySet,
        count: u32,
        target: &MockBuffer,
    ) {
        self.state.borrow().check_usable(target.id);
        encoder.push(Command::Resolve {
            query: query_set.id,
            count,
            target: target.id,
        });
    }

    fn copy_buffer(&self, encoder: &mut Vec<Command>, src: &MockBuffer, dst: &MockBuffer, size: u64) {
        let state = self.state.borrow();
        state.check_usable(src.id);
        state.check_usable(dst.id);
        assert!(size <= src.size && size <= dst.size, "copy of {size} bytes out of bounds");
        encoder.push(Command::Copy {
            src: src.id,
            dst: dst.id,
            size,
        });
    }

    fn submit(&self, encoder: Vec<Command>) {
        let mut state = self.state.borrow_mut();
        for cmd in &encoder {
            match *cmd {
                Command::Clear { buffer } => {
                    if let Some(bytes) = state.contents.get_mut(&buffer) {
                        bytes.fill(0);
                    }
                }
                Command::Copy { src, dst, size } => {
                    let bytes = state.contents[&src][..size as usize].to_vec();
                    if let Some(target) = state.contents.get_mut(&dst) {
                        target[..size as usize].copy_from_slice(&bytes);
                    }
                }
                _ => {}
            }
        }
        state.submissions.push(encoder);
    }

    fn write_buffer(&self, buffer: &MockBuffer, offset: u64, bytes: &[u8]) {
        let mut state = self.state.borrow_mut();
        let usage = state.usages[&buffer.id];
        assert!(usage.contains(wgpu::BufferUsages::COPY_DST));
        let start = offset as usize;
        if let Some(target) = state.contents.get_mut(&buffer.id) {
            target[start..start + bytes.len()].copy_from_slice(bytes);
        }
    }

    fn map_read(&self, buffer: &MockBuffer, _size: u64, done: MapCallback) {
        let mut state = self.state.borrow_mut();
        assert!(
            state.usages[&buffer.id].contains(wgpu::BufferUsages::MAP_READ),
            "mapping a buffer without MAP_READ"
        );
        state.check_usable(buffer.id);
        state.pending.push(PendingMap {
            buffer: buffer.id,
            done,
        });
    }

    fn read_mapped(&self, buffer: &MockBuffer, size: u64, f: &mut dyn FnMut(&[u8])) {
        let bytes = {
            let mut state = self.state.borrow_mut();
            assert!(state.mapped.remove(&buffer.id), "reading buffer {} that is not mapped", buffer.id);
            state.contents[&buffer.id][..size as usize].to_vec()
        };
        f(&bytes);
    }

    fn poll(&self) {
        self.state.borrow_mut().polls += 1;
    }

    fn wait_idle(&self) {
        self.state.borrow_mut().waits += 1;
        self.complete_all_maps();
    }
}

/// Hands out a fresh view id per acquisition.
#[derive(Default)]
pub(crate) struct MockViews {
    pub acquired: u32,
}

impl ViewSource<MockBackend> for MockViews {
    fn acquire_view(&mut self) -> Option<u32> {
        self.acquired += 1;
        Some(self.acquired)
    }
}
