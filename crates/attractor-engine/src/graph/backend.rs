//! GPU capability set consumed by the frame graph.
//!
//! The graph never talks to wgpu directly. Everything it needs from a device is listed
//! here, which keeps resource bookkeeping testable against a recording backend.

use super::GraphError;

/// Workgroup source for a compute dispatch.
pub enum Dispatch<'a, Buf> {
    /// Fixed workgroup count along x.
    Direct(u32),
    /// `[x, y, z]` workgroup counts read from the buffer at offset 0.
    Indirect(&'a Buf),
}

/// Timestamp writes attached to a compute or render scope.
pub struct Timestamps<'a, Q> {
    pub query_set: &'a Q,
    pub begin: Option<u32>,
    pub end: Option<u32>,
}

/// One compute scope: pipeline, bind group, dispatch.
pub struct ComputeCommand<'a, B: Backend + ?Sized> {
    pub label: &'a str,
    pub pipeline: &'a B::ComputePipeline,
    pub bind_group: &'a B::BindGroup,
    pub dispatch: Dispatch<'a, B::Buffer>,
    pub timestamps: Option<Timestamps<'a, B::QuerySet>>,
}

/// One render scope: a non-indexed draw into `view`.
pub struct RenderCommand<'a, B: Backend + ?Sized> {
    pub label: &'a str,
    pub pipeline: &'a B::RenderPipeline,
    pub bind_group: &'a B::BindGroup,
    pub view: &'a B::View,
    pub vertex_count: u32,
    pub timestamps: Option<Timestamps<'a, B::QuerySet>>,
}

/// Map-for-read completion hook. Called from whatever context the device reports
/// completions on; implementations must only forward the result.
pub type MapCallback = Box<dyn FnOnce(bool) + Send + 'static>;

/// Abstract GPU device used by [`FrameGraph`](super::FrameGraph).
pub trait Backend {
    type Buffer;
    type QuerySet;
    /// Compiled shader program (opaque to the graph).
    type Program;
    type ComputePipeline;
    type RenderPipeline;
    type BindGroupLayout;
    type BindGroup;
    type Encoder;
    type View;

    fn create_buffer(&self, label: &str, size: u64, usage: wgpu::BufferUsages) -> Self::Buffer;

    /// Releases the buffer's memory. The handle is not used afterwards.
    fn destroy_buffer(&self, buffer: &Self::Buffer);

    fn create_query_set(&self, label: &str, capacity: u32) -> Result<Self::QuerySet, GraphError>;

    /// Compiles a compute pipeline and returns it with its bind group 0 layout.
    fn create_compute_pipeline(
        &self,
        program: &Self::Program,
        entry_point: &str,
    ) -> (Self::ComputePipeline, Self::BindGroupLayout);

    /// Compiles a render pipeline targeting the surface format.
    fn create_render_pipeline(
        &self,
        program: &Self::Program,
        vs_entry: &str,
        fs_entry: &str,
    ) -> (Self::RenderPipeline, Self::BindGroupLayout);

    /// `entries` are `(binding slot, buffer)` pairs.
    fn create_bind_group(
        &self,
        label: &str,
        layout: &Self::BindGroupLayout,
        entries: &[(u32, &Self::Buffer)],
    ) -> Self::BindGroup;

    fn create_encoder(&self) -> Self::Encoder;

    fn clear_buffer(&self, encoder: &mut Self::Encoder, buffer: &Self::Buffer);

    fn encode_compute(&self, encoder: &mut Self::Encoder, cmd: ComputeCommand<'_, Self>);

    fn encode_render(&self, encoder: &mut Self::Encoder, cmd: RenderCommand<'_, Self>);

    /// Copies slots `0..count` of `query_set` into `target` at offset 0.
    fn resolve_query_set(
        &self,
        encoder: &mut Self::Encoder,
        query_set: &Self::QuerySet,
        count: u32,
        target: &Self::Buffer,
    );

    fn copy_buffer(
        &self,
        encoder: &mut Self::Encoder,
        src: &Self::Buffer,
        dst: &Self::Buffer,
        size: u64,
    );

    fn submit(&self, encoder: Self::Encoder);

    fn write_buffer(&self, buffer: &Self::Buffer, offset: u64, bytes: &[u8]);

    /// Starts mapping `buffer[..size]` for reading. `done` receives `true` on success.
    fn map_read(&self, buffer: &Self::Buffer, size: u64, done: MapCallback);

    /// Hands the mapped bytes of `buffer[..size]` to `f`, then unmaps the buffer.
    fn read_mapped(&self, buffer: &Self::Buffer, size: u64, f: &mut dyn FnMut(&[u8]));

    /// Gives the device a chance to report finished work without blocking.
    fn poll(&self);

    /// Blocks until all submitted work (including pending maps) has finished.
    fn wait_idle(&self);
}

/// Per-frame source of the current swapchain view.
///
/// Render passes ask for a view each time they are encoded, never at construction.
pub trait ViewSource<B: Backend> {
    fn acquire_view(&mut self) -> Option<B::View>;
}

/// A frame without a surface: render passes stay inert.
pub struct Headless;

impl<B: Backend> ViewSource<B> for Headless {
    fn acquire_view(&mut self) -> Option<B::View> {
        None
    }
}
