use winit::window::{Window, WindowId};

use crate::device::{Gpu, SurfaceErrorAction, SurfaceFrame};
use crate::time::FrameTime;
use crate::window::RuntimeCtx;

use super::app::AppControl;

/// Per-window handles and immutable window metadata.
pub struct WindowCtx<'a> {
    pub id: WindowId,
    pub window: &'a Window,
}

impl<'a> WindowCtx<'a> {
    pub fn set_title(&self, title: &str) {
        self.window.set_title(title);
    }
}

/// Per-frame context passed to `core::App::on_frame`.
///
/// Lifetimes:
/// - `'a` is the duration of the callback invocation
/// - `'w` is the window-borrow lifetime carried by `Gpu<'w>`
pub struct FrameCtx<'a, 'w> {
    pub window: WindowCtx<'a>,
    pub gpu: &'a mut Gpu<'w>,
    pub time: FrameTime,
    pub runtime: &'a mut RuntimeCtx,
}

impl<'a, 'w> FrameCtx<'a, 'w> {
    /// Acquires the swapchain frame, calls `draw` with it, then presents it.
    ///
    /// `draw` must submit everything that targets the frame before returning. Surface
    /// errors are handled here: a lost or outdated surface is reconfigured and the frame
    /// skipped; running out of memory ends the app.
    pub fn present_with<F>(&mut self, draw: F) -> AppControl
    where
        F: FnOnce(&mut SurfaceFrame),
    {
        let mut frame = match self.gpu.acquire_frame() {
            Ok(f) => f,
            Err(err) => {
                log::debug!("surface frame unavailable: {err}");
                return match self.gpu.handle_surface_error(err) {
                    SurfaceErrorAction::Fatal => {
                        log::error!("surface out of memory; exiting");
                        AppControl::Exit
                    }
                    SurfaceErrorAction::Reconfigured | SurfaceErrorAction::SkipFrame => {
                        AppControl::Continue
                    }
                };
            }
        };

        draw(&mut frame);

        self.window.window.pre_present_notify();
        self.gpu.present(frame);
        AppControl::Continue
    }
}
