//! GPU device + surface management.
//!
//! This module is responsible for:
//! - creating the wgpu Instance/Adapter/Device/Queue
//! - creating & configuring the Surface (swapchain)
//! - acquiring and presenting swapchain frames

mod error;
mod frame;
mod gpu;
mod surface;

pub use error::SurfaceErrorAction;
pub use frame::SurfaceFrame;
pub use gpu::{Gpu, GpuInit};
