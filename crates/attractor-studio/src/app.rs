use std::cell::RefCell;
use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};

use attractor_engine::core::{App, AppControl, FrameCtx};
use winit::event::{ElementState, WindowEvent};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::WindowId;

use crate::config::AttractorConfig;
use crate::params::Uniforms;
use crate::readback::TimingStats;
use crate::scene::Scene;

/// Animates the attractor and reports GPU timings.
pub struct DeJongApp {
    config: AttractorConfig,
    /// Built on the first frame, once the device exists.
    scene: Option<Scene>,
    stats: Rc<RefCell<TimingStats>>,
    t: f64,
    frame: u64,
}

impl DeJongApp {
    pub fn new(config: AttractorConfig) -> Self {
        let t = config.initial_t.unwrap_or_else(clock_seed);
        log::info!("starting at t = {t:.3}");
        Self {
            config,
            scene: None,
            stats: Rc::new(RefCell::new(TimingStats::default())),
            t,
            frame: 0,
        }
    }

    fn report(&self, ctx: &FrameCtx<'_, '_>) {
        let stats = self.stats.borrow();
        if stats.readbacks() == 0 {
            log::info!("waiting for the first frameinfo readback");
            return;
        }
        let downloads = self
            .scene
            .as_ref()
            .map(Scene::download_status)
            .unwrap_or_default();
        log::info!(
            "{stats} | readbacks {} in flight, {} pooled",
            downloads.in_flight,
            downloads.pending_in_pool
        );
        ctx.window
            .set_title(&format!("de Jong attractor | {:.1} fps", stats.fps()));
    }
}

/// A start point in [0, 1000) that differs between runs.
fn clock_seed() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| f64::from(d.subsec_nanos()) * 1e-6)
        .unwrap_or(0.0)
}

impl App for DeJongApp {
    fn on_window_event(&mut self, _window_id: WindowId, event: &WindowEvent) -> AppControl {
        match event {
            WindowEvent::KeyboardInput { event, .. }
                if event.state == ElementState::Pressed
                    && event.physical_key == PhysicalKey::Code(KeyCode::Escape) =>
            {
                AppControl::Exit
            }
            _ => AppControl::Continue,
        }
    }

    fn on_frame(&mut self, ctx: &mut FrameCtx<'_, '_>) -> AppControl {
        if self.scene.is_none() {
            match Scene::new(ctx.gpu, &self.config, Rc::clone(&self.stats)) {
                Ok(scene) => self.scene = Some(scene),
                Err(e) => {
                    ctx.runtime.fail(e.context("de Jong setup failed"));
                    return AppControl::Exit;
                }
            }
        }
        let Some(scene) = self.scene.as_mut() else {
            return AppControl::Exit;
        };

        let canvas = scene.fit(ctx.gpu.size(), self.config.scale_percent);
        self.t += self.config.speed * 1e-6;
        self.frame += 1;
        if let Err(e) = scene.upload(&Uniforms::new(&self.config, self.t, self.frame, canvas)) {
            log::warn!("{e:#}");
        }

        let mut presented = false;
        let control = ctx.present_with(|frame| {
            scene.render(frame);
            presented = true;
        });
        if !presented {
            scene.poll();
        }

        self.stats.borrow_mut().record_frame(ctx.time.dt);
        if self.frame % self.config.report_interval == 0 {
            self.report(ctx);
        }
        control
    }
}
