use super::backend::{Backend, ComputeCommand, Dispatch, MapCallback, RenderCommand, ViewSource};
use super::GraphError;
use crate::device::{Gpu, SurfaceFrame};

/// [`Backend`] over a wgpu device and queue.
///
/// Pipelines use automatic layouts; bind groups are built against group 0 of the
/// pipeline they were compiled for.
pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    surface_format: wgpu::TextureFormat,
}

impl WgpuBackend {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue, surface_format: wgpu::TextureFormat) -> Self {
        Self {
            device,
            queue,
            surface_format,
        }
    }

    /// Shares the device and queue of an initialized [`Gpu`].
    pub fn from_gpu(gpu: &Gpu<'_>) -> Self {
        Self::new(gpu.device().clone(), gpu.queue().clone(), gpu.surface_format())
    }

    /// Compiles WGSL source into a shader program for the pass constructors.
    pub fn create_program(&self, label: &str, wgsl: &str) -> wgpu::ShaderModule {
        self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(label),
            source: wgpu::ShaderSource::Wgsl(wgsl.into()),
        })
    }
}

fn compute_timestamps<'a>(
    t: Option<super::Timestamps<'a, wgpu::QuerySet>>,
) -> Option<wgpu::ComputePassTimestampWrites<'a>> {
    t.map(|t| wgpu::ComputePassTimestampWrites {
        query_set: t.query_set,
        beginning_of_pass_write_index: t.begin,
        end_of_pass_write_index: t.end,
    })
}

fn render_timestamps<'a>(
    t: Option<super::Timestamps<'a, wgpu::QuerySet>>,
) -> Option<wgpu::RenderPassTimestampWrites<'a>> {
    t.map(|t| wgpu::RenderPassTimestampWrites {
        query_set: t.query_set,
        beginning_of_pass_write_index: t.begin,
        end_of_pass_write_index: t.end,
    })
}

impl Backend for WgpuBackend {
    type Buffer = wgpu::Buffer;
    type QuerySet = wgpu::QuerySet;
    type Program = wgpu::ShaderModule;
    type ComputePipeline = wgpu::ComputePipeline;
    type RenderPipeline = wgpu::RenderPipeline;
    type BindGroupLayout = wgpu::BindGroupLayout;
    type BindGroup = wgpu::BindGroup;
    type Encoder = wgpu::CommandEncoder;
    type View = wgpu::TextureView;

    fn create_buffer(&self, label: &str, size: u64, usage: wgpu::BufferUsages) -> wgpu::Buffer {
        self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage,
            mapped_at_creation: false,
        })
    }

    fn destroy_buffer(&self, buffer: &wgpu::Buffer) {
        buffer.destroy();
    }

    fn create_query_set(&self, label: &str, capacity: u32) -> Result<wgpu::QuerySet, GraphError> {
        if !self.device.features().contains(wgpu::Features::TIMESTAMP_QUERY) {
            return Err(GraphError::Configuration(
                "device was created without TIMESTAMP_QUERY".to_string(),
            ));
        }
        if capacity == 0 || capacity > wgpu::QUERY_SET_MAX_QUERIES {
            return Err(GraphError::Configuration(format!(
                "query set capacity {capacity} outside 1..={}",
                wgpu::QUERY_SET_MAX_QUERIES
            )));
        }
        Ok(self.device.create_query_set(&wgpu::QuerySetDescriptor {
            label: Some(label),
            ty: wgpu::QueryType::Timestamp,
            count: capacity,
        }))
    }

    fn create_compute_pipeline(
        &self,
        program: &wgpu::ShaderModule,
        entry_point: &str,
    ) -> (wgpu::ComputePipeline, wgpu::BindGroupLayout) {
        let pipeline = self.device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(&format!("attractor compute pipeline {entry_point}")),
            layout: None,
            module: program,
            entry_point: Some(entry_point),
            compilation_options: Default::default(),
            cache: None,
        });
        let layout = pipeline.get_bind_group_layout(0);
        (pipeline, layout)
    }

    fn create_render_pipeline(
        &self,
        program: &wgpu::ShaderModule,
        vs_entry: &str,
        fs_entry: &str,
    ) -> (wgpu::RenderPipeline, wgpu::BindGroupLayout) {
        let pipeline = self.device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(&format!("attractor render pipeline {vs_entry}/{fs_entry}")),
            layout: None,
            vertex: wgpu::VertexState {
                module: program,
                entry_point: Some(vs_entry),
                compilation_options: Default::default(),
                buffers: &[],
            },
            fragment: Some(wgpu::FragmentState {
                module: program,
                entry_point: Some(fs_entry),
                compilation_options: Default::default(),
                targets: &[Some(wgpu::ColorTargetState {
                    format: self.surface_format,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview_mask: None,
            cache: None,
        });
        let layout = pipeline.get_bind_group_layout(0);
        (pipeline, layout)
    }

    fn create_bind_group(
        &self,
        label: &str,
        layout: &wgpu::BindGroupLayout,
        entries: &[(u32, &wgpu::Buffer)],
    ) -> wgpu::BindGroup {
        let entries: Vec<wgpu::BindGroupEntry<'_>> = entries
            .iter()
            .map(|&(binding, buffer)| wgpu::BindGroupEntry {
                binding,
                resource: buffer.as_entire_binding(),
            })
            .collect();

        self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(label),
            layout,
            entries: &entries,
        })
    }

    fn create_encoder(&self) -> wgpu::CommandEncoder {
        self.device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("attractor frame encoder"),
            })
    }

    fn clear_buffer(&self, encoder: &mut wgpu::CommandEncoder, buffer: &wgpu::Buffer) {
        encoder.clear_buffer(buffer, 0, None);
    }

    fn encode_compute(&self, encoder: &mut wgpu::CommandEncoder, cmd: ComputeCommand<'_, Self>) {
        let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(cmd.label),
            timestamp_writes: compute_timestamps(cmd.timestamps),
        });
        cpass.set_pipeline(cmd.pipeline);
        cpass.set_bind_group(0, cmd.bind_group, &[]);
        match cmd.dispatch {
            Dispatch::Direct(x) => cpass.dispatch_workgroups(x, 1, 1),
            Dispatch::Indirect(args) => cpass.dispatch_workgroups_indirect(args, 0),
        }
    }

    fn encode_render(&self, encoder: &mut wgpu::CommandEncoder, cmd: RenderCommand<'_, Self>) {
        let mut rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(cmd.label),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: cmd.view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })],
            depth_stencil_attachment: None,
            timestamp_writes: render_timestamps(cmd.timestamps),
            occlusion_query_set: None,
            multiview_mask: None,
        });
        rpass.set_pipeline(cmd.pipeline);
        rpass.set_bind_group(0, cmd.bind_group, &[]);
        rpass.draw(0..cmd.vertex_count, 0..1);
    }

    fn resolve_query_set(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        query_set: &wgpu::QuerySet,
        count: u32,
        target: &wgpu::Buffer,
    ) {
        encoder.resolve_query_set(query_set, 0..count, target, 0);
    }

    fn copy_buffer(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        src: &wgpu::Buffer,
        dst: &wgpu::Buffer,
        size: u64,
    ) {
        encoder.copy_buffer_to_buffer(src, 0, dst, 0, size);
    }

    fn submit(&self, encoder: wgpu::CommandEncoder) {
        self.queue.submit(std::iter::once(encoder.finish()));
    }

    fn write_buffer(&self, buffer: &wgpu::Buffer, offset: u64, bytes: &[u8]) {
        self.queue.write_buffer(buffer, offset, bytes);
    }

    fn map_read(&self, buffer: &wgpu::Buffer, size: u64, done: MapCallback) {
        buffer
            .slice(..size)
            .map_async(wgpu::MapMode::Read, move |result| done(result.is_ok()));
    }

    fn read_mapped(&self, buffer: &wgpu::Buffer, size: u64, f: &mut dyn FnMut(&[u8])) {
        {
            let mapped = buffer.slice(..size).get_mapped_range();
            f(&mapped);
        }
        buffer.unmap();
    }

    fn poll(&self) {
        if let Err(e) = self.device.poll(wgpu::PollType::Poll) {
            log::warn!("device poll failed: {e}");
        }
    }

    fn wait_idle(&self) {
        if let Err(e) = self.device.poll(wgpu::PollType::Wait {
            submission_index: None,
            timeout: None,
        }) {
            log::warn!("device wait failed: {e}");
        }
    }
}

impl ViewSource<WgpuBackend> for SurfaceFrame {
    fn acquire_view(&mut self) -> Option<wgpu::TextureView> {
        Some(
            self.surface_texture
                .texture
                .create_view(&wgpu::TextureViewDescriptor::default()),
        )
    }
}
