/// The swapchain texture acquired for one frame.
///
/// Holding it blocks acquisition of the next frame; hand it back through
/// [`Gpu::present`](super::Gpu::present) once the frame's commands are submitted.
pub struct SurfaceFrame {
    pub surface_texture: wgpu::SurfaceTexture,
}
