//! Asynchronous buffer readback with a bounded, recycling staging pool.
//!
//! Lifecycle of a staging buffer: allocated lazily, copied into during a frame, mapped
//! after submission, handed to the callback, unmapped, then returned to the idle pool.
//! Map completions arrive on a channel and are applied by the frame loop only, so the
//! in-flight accounting and the pool are never touched from the device's callback context.

use std::collections::VecDeque;

use crossbeam_channel::Sender;

use super::backend::Backend;
use super::pass::PassOutcome;
use super::resources::{BufferKey, ResourceTable};
use super::GraphError;

/// Receives the bytes of one completed download.
pub type DownloadCallback = Box<dyn FnMut(&[u8])>;

/// Aggregate download state across all download passes.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct DownloadStatus {
    /// Idle staging buffers waiting in pools.
    pub pending_in_pool: usize,
    /// Copies submitted whose callback has not run yet.
    pub in_flight: usize,
}

/// Message sent from a map callback to the frame loop.
#[derive(Debug, Copy, Clone)]
pub(crate) struct Completion {
    pub pass: usize,
    pub ticket: u64,
    pub ok: bool,
}

struct StagingBuffer<B: Backend> {
    handle: B::Buffer,
    size: u64,
}

struct InFlight<B: Backend> {
    ticket: u64,
    staging: StagingBuffer<B>,
    /// Bytes copied from the source (the source size at copy time).
    len: u64,
    /// Set once the map callback has reported; delivery waits for earlier tickets.
    result: Option<bool>,
}

pub(crate) struct DownloadPass<B: Backend> {
    pub source: BufferKey,
    max_in_flight: usize,
    in_flight: VecDeque<InFlight<B>>,
    idle: Vec<StagingBuffer<B>>,
    selected: Option<u64>,
    next_ticket: u64,
    on_complete: DownloadCallback,
}

impl<B: Backend> DownloadPass<B> {
    pub(crate) fn new(source: BufferKey, max_in_flight: usize, on_complete: DownloadCallback) -> Self {
        Self {
            source,
            max_in_flight,
            in_flight: VecDeque::new(),
            idle: Vec::new(),
            selected: None,
            next_ticket: 0,
            on_complete,
        }
    }

    pub(crate) fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    pub(crate) fn idle_count(&self) -> usize {
        self.idle.len()
    }

    /// Records this frame's copy, or nothing if the pass is at its bound or the source
    /// is unusable. Always clears the previous frame's selection first.
    pub(crate) fn schedule(
        &mut self,
        backend: &B,
        encoder: &mut B::Encoder,
        buffers: &ResourceTable<B>,
    ) -> PassOutcome {
        self.selected = None;

        let name = buffers.name(self.source);
        let Some(src) = buffers.get(self.source) else {
            return PassOutcome::Inert(GraphError::CapacityExceeded {
                name: name.to_string(),
                needed: wgpu::COPY_BUFFER_ALIGNMENT,
                available: 0,
            });
        };
        if !src.usage.contains(wgpu::BufferUsages::COPY_SRC) {
            return PassOutcome::Inert(GraphError::UsageMismatch {
                name: name.to_string(),
                required: wgpu::BufferUsages::COPY_SRC,
            });
        }
        if src.size % wgpu::COPY_BUFFER_ALIGNMENT != 0 {
            return PassOutcome::Inert(GraphError::Misaligned {
                name: name.to_string(),
                size: src.size,
            });
        }
        let len = src.size;
        if len == 0 {
            return PassOutcome::Inert(GraphError::CapacityExceeded {
                name: name.to_string(),
                needed: wgpu::COPY_BUFFER_ALIGNMENT,
                available: src.size,
            });
        }
        if self.in_flight.len() >= self.max_in_flight {
            return PassOutcome::Throttled;
        }

        let staging = self.take_staging(backend, len, name);
        backend.copy_buffer(encoder, &src.handle, &staging.handle, len);

        let ticket = self.next_ticket;
        self.next_ticket += 1;
        self.in_flight.push_back(InFlight {
            ticket,
            staging,
            len,
            result: None,
        });
        self.selected = Some(ticket);
        PassOutcome::Encoded
    }

    /// Reuses an idle staging buffer large enough for `len`, otherwise allocates one.
    /// An undersized idle buffer is destroyed so the pool never outgrows the bound.
    fn take_staging(&mut self, backend: &B, len: u64, name: &str) -> StagingBuffer<B> {
        if let Some(pos) = self.idle.iter().rposition(|s| s.size >= len) {
            return self.idle.remove(pos);
        }
        if let Some(small) = self.idle.pop() {
            log::debug!(
                "staging buffer for \"{name}\" too small ({} < {len}); reallocating",
                small.size
            );
            backend.destroy_buffer(&small.handle);
        }
        let handle = backend.create_buffer(
            &format!("attractor staging {name}"),
            len,
            wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        );
        StagingBuffer { handle, size: len }
    }

    /// Starts mapping this frame's staging buffer, if one was selected.
    pub(crate) fn start_map(&mut self, backend: &B, pass: usize, completions: &Sender<Completion>) {
        let Some(ticket) = self.selected else { return };
        let Some(flight) = self.in_flight.iter().find(|f| f.ticket == ticket) else {
            return;
        };

        let tx = completions.clone();
        backend.map_read(
            &flight.staging.handle,
            flight.len,
            Box::new(move |ok| {
                // The receiver only disappears with the graph itself.
                let _ = tx.send(Completion { pass, ticket, ok });
            }),
        );
    }

    /// Applies a map completion and delivers every leading finished download in
    /// submission order.
    pub(crate) fn complete(&mut self, backend: &B, ticket: u64, ok: bool, name: &str) {
        match self.in_flight.iter_mut().find(|f| f.ticket == ticket) {
            Some(flight) => flight.result = Some(ok),
            None => {
                log::warn!("completion for unknown download ticket {ticket} of \"{name}\"");
                return;
            }
        }

        while self.in_flight.front().is_some_and(|f| f.result.is_some()) {
            let Some(flight) = self.in_flight.pop_front() else { break };
            if flight.result == Some(true) {
                let on_complete = &mut self.on_complete;
                backend.read_mapped(&flight.staging.handle, flight.len, &mut |bytes| on_complete(bytes));
            } else {
                log::warn!("failed to map staging buffer for \"{name}\"; result dropped");
            }
            self.idle.push(flight.staging);
        }
    }

    #[cfg(test)]
    pub(crate) fn selected(&self) -> bool {
        self.selected.is_some()
    }
}
