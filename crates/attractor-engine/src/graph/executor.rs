//! Per-frame replay of the pass list into one command batch.

use super::backend::{Backend, ComputeCommand, Dispatch, RenderCommand, Timestamps, ViewSource};
use super::error::DependencyKind;
use super::pass::{ComputePass, InvocationSource, MeasureSlots, Pass, RenderPass};
use super::resources::{BufferKey, QueryKey, QueryTable, ResourceTable};
use super::{FrameGraph, FrameReport, GraphError, PassOutcome};

/// Size of an indirect dispatch argument triple (`[x, y, z]` as `u32`).
const INDIRECT_ARGS_SIZE: u64 = 3 * 4;

impl<B: Backend> FrameGraph<B> {
    /// Encodes every pass in insertion order, submits once, then starts mapping the
    /// staging buffers selected this frame.
    ///
    /// Downloads that finished since the last call are delivered first, so their
    /// in-flight slots are free for this frame. Never blocks on the device.
    pub fn execute(&mut self, views: &mut dyn ViewSource<B>) -> FrameReport {
        self.poll();

        let mut report = FrameReport::default();
        {
            let Self {
                backend,
                buffers,
                queries,
                passes,
                completions_tx,
                ..
            } = self;

            let mut encoder = backend.create_encoder();
            for pass in passes.iter_mut() {
                let kind = pass.kind();
                let outcome = match pass {
                    Pass::Clear { buffer } => encode_clear(backend, &mut encoder, buffers, *buffer),
                    Pass::Compute(p) => encode_compute(backend, &mut encoder, buffers, queries, p),
                    Pass::Render(p) => encode_render(backend, &mut encoder, buffers, queries, p, views),
                    Pass::Resolve { query, target } => {
                        encode_resolve(backend, &mut encoder, buffers, queries, *query, *target)
                    }
                    Pass::Download(d) => d.schedule(backend, &mut encoder, buffers),
                };
                if kind == super::PassKind::Download && outcome == PassOutcome::Encoded {
                    report.copies += 1;
                }
                report.outcomes.push((kind, outcome));
            }
            backend.submit(encoder);

            for (index, pass) in passes.iter_mut().enumerate() {
                if let Pass::Download(d) = pass {
                    d.start_map(backend, index, completions_tx);
                }
            }
        }

        self.log_transitions(&report);
        report
    }

    /// Logs a pass once when it turns inert (or changes reason) and once when it recovers.
    fn log_transitions(&mut self, report: &FrameReport) {
        for (index, (kind, outcome)) in report.outcomes.iter().enumerate() {
            let current = match outcome {
                PassOutcome::Inert(e) => Some(e),
                PassOutcome::Encoded | PassOutcome::Throttled => None,
            };
            let Some(last) = self.last_inert.get_mut(index) else { continue };
            if last.as_ref() == current {
                continue;
            }
            match current {
                Some(e) => log::debug!("pass {index} ({kind:?}) inert: {e}"),
                None => log::debug!("pass {index} ({kind:?}) active"),
            }
            *last = current.cloned();
        }
    }
}

fn encode_clear<B: Backend>(
    backend: &B,
    encoder: &mut B::Encoder,
    buffers: &ResourceTable<B>,
    key: BufferKey,
) -> PassOutcome {
    let Some(entry) = buffers.get(key) else {
        return PassOutcome::Inert(GraphError::missing_buffer(buffers.name(key)));
    };
    if !entry.usage.contains(wgpu::BufferUsages::COPY_DST) {
        return PassOutcome::Inert(GraphError::UsageMismatch {
            name: buffers.name(key).to_string(),
            required: wgpu::BufferUsages::COPY_DST,
        });
    }
    if entry.size % wgpu::COPY_BUFFER_ALIGNMENT != 0 {
        return PassOutcome::Inert(GraphError::Misaligned {
            name: buffers.name(key).to_string(),
            size: entry.size,
        });
    }
    backend.clear_buffer(encoder, &entry.handle);
    PassOutcome::Encoded
}

fn encode_compute<B: Backend>(
    backend: &B,
    encoder: &mut B::Encoder,
    buffers: &ResourceTable<B>,
    queries: &QueryTable<B>,
    pass: &ComputePass<B>,
) -> PassOutcome {
    let bind_group = match pass.bind_group.current(buffers) {
        Ok(group) => group,
        Err(e) => return PassOutcome::Inert(e),
    };

    let dispatch = match pass.invocations {
        InvocationSource::Direct(count) => Dispatch::Direct(count),
        InvocationSource::Indirect(key) => match indirect_args(buffers, key) {
            Ok(buffer) => Dispatch::Indirect(buffer),
            Err(e) => return PassOutcome::Inert(e),
        },
    };

    backend.encode_compute(
        encoder,
        ComputeCommand {
            label: &pass.label,
            pipeline: &pass.pipeline,
            bind_group,
            dispatch,
            timestamps: timestamps(queries, pass.measure),
        },
    );
    PassOutcome::Encoded
}

fn encode_render<B: Backend>(
    backend: &B,
    encoder: &mut B::Encoder,
    buffers: &ResourceTable<B>,
    queries: &QueryTable<B>,
    pass: &RenderPass<B>,
    views: &mut dyn ViewSource<B>,
) -> PassOutcome {
    let bind_group = match pass.bind_group.current(buffers) {
        Ok(group) => group,
        Err(e) => return PassOutcome::Inert(e),
    };

    // The swapchain view changes every frame; never reuse one across frames.
    let Some(view) = views.acquire_view() else {
        return PassOutcome::Inert(GraphError::UnresolvedDependency {
            kind: DependencyKind::SurfaceView,
            name: "surface".to_string(),
        });
    };

    backend.encode_render(
        encoder,
        RenderCommand {
            label: &pass.label,
            pipeline: &pass.pipeline,
            bind_group,
            view: &view,
            vertex_count: pass.vertex_count,
            timestamps: timestamps(queries, pass.measure),
        },
    );
    PassOutcome::Encoded
}

fn encode_resolve<B: Backend>(
    backend: &B,
    encoder: &mut B::Encoder,
    buffers: &ResourceTable<B>,
    queries: &QueryTable<B>,
    query: QueryKey,
    target: BufferKey,
) -> PassOutcome {
    let Some(query_set) = queries.get(query) else {
        return PassOutcome::Inert(GraphError::missing_query_set(queries.name(query)));
    };
    let Some(entry) = buffers.get(target) else {
        return PassOutcome::Inert(GraphError::missing_buffer(buffers.name(target)));
    };
    let name = buffers.name(target);
    if !entry.usage.contains(wgpu::BufferUsages::QUERY_RESOLVE) {
        return PassOutcome::Inert(GraphError::UsageMismatch {
            name: name.to_string(),
            required: wgpu::BufferUsages::QUERY_RESOLVE,
        });
    }
    let needed = u64::from(query_set.capacity) * u64::from(wgpu::QUERY_SIZE);
    if needed > entry.size {
        return PassOutcome::Inert(GraphError::CapacityExceeded {
            name: name.to_string(),
            needed,
            available: entry.size,
        });
    }

    backend.resolve_query_set(encoder, &query_set.handle, query_set.capacity, &entry.handle);
    PassOutcome::Encoded
}

/// Resolves the indirect argument buffer of a compute pass at encode time.
fn indirect_args<B: Backend>(buffers: &ResourceTable<B>, key: BufferKey) -> Result<&B::Buffer, GraphError> {
    let name = buffers.name(key);
    let Some(entry) = buffers.get(key) else {
        return Err(GraphError::CapacityExceeded {
            name: name.to_string(),
            needed: INDIRECT_ARGS_SIZE,
            available: 0,
        });
    };
    if !entry.usage.contains(wgpu::BufferUsages::INDIRECT) {
        return Err(GraphError::UsageMismatch {
            name: name.to_string(),
            required: wgpu::BufferUsages::INDIRECT,
        });
    }
    if entry.size < INDIRECT_ARGS_SIZE {
        return Err(GraphError::CapacityExceeded {
            name: name.to_string(),
            needed: INDIRECT_ARGS_SIZE,
            available: entry.size,
        });
    }
    Ok(&entry.handle)
}

/// Timestamp writes for a measured pass. A measure whose query set is missing or too
/// small, or whose begin and end share a slot, is dropped for the frame; the pass itself
/// still runs.
fn timestamps<B: Backend>(
    queries: &QueryTable<B>,
    measure: Option<MeasureSlots>,
) -> Option<Timestamps<'_, B::QuerySet>> {
    let measure = measure.filter(MeasureSlots::writes_anything)?;
    if measure.begin.is_some() && measure.begin == measure.end {
        return None;
    }
    let entry = queries.get(measure.query)?;
    if measure.highest_slot().is_some_and(|slot| slot >= entry.capacity) {
        return None;
    }
    Some(Timestamps {
        query_set: &entry.handle,
        begin: measure.begin,
        end: measure.end,
    })
}
