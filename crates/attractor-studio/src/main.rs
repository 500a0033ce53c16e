//! de Jong point-cloud attractor driven by the attractor-engine frame graph.
//!
//! Tunables come from `ATTRACTOR_*` environment variables (see `AttractorConfig`);
//! logging follows `RUST_LOG`. Escape or closing the window exits.

mod app;
mod config;
mod params;
mod readback;
mod scene;

use attractor_engine::device::GpuInit;
use attractor_engine::logging::{LoggingConfig, init_logging};
use attractor_engine::window::{Runtime, RuntimeConfig};

use crate::app::DeJongApp;
use crate::config::AttractorConfig;

fn main() -> anyhow::Result<()> {
    init_logging(LoggingConfig::default());

    let config = AttractorConfig::from_env();
    log::debug!("{config:?}");

    Runtime::run(
        RuntimeConfig {
            title: "de Jong attractor".to_string(),
            ..RuntimeConfig::default()
        },
        GpuInit {
            required_features: wgpu::Features::TIMESTAMP_QUERY,
            ..GpuInit::default()
        },
        DeJongApp::new(config),
    )
}
