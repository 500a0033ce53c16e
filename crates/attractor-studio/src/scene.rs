//! The de Jong frame graph: resources, the fixed pass list and the frame-info readback.

use std::cell::RefCell;
use std::rc::Rc;

use anyhow::{Context, Result};
use attractor_engine::device::{Gpu, SurfaceFrame};
use attractor_engine::graph::{BufferKey, DownloadStatus, FrameGraph, FrameReport, Measure, WgpuBackend};
use wgpu::BufferUsages;
use winit::dpi::PhysicalSize;

use crate::config::AttractorConfig;
use crate::params::{Canvas, UNIFORM_WORDS, Uniforms, words};
use crate::readback::{FRAME_INFO_WORDS, FrameInfo, TimingStats};

const SHADER: &str = include_str!("shaders/dejong.wgsl");

/// Workgroups of the first, directly dispatched point pass (`FIRST_PASS_GROUPS` in WGSL).
const FIRST_PASS_GROUPS: u32 = 16;

const TSQUERY: &str = "tsquery";
const UNIFORM: &str = "uniform";
const TIMESTAMP: &str = "timestamp";
const FRAMEINFO: &str = "frameinfo";
const INDIRECT: &str = "indirect";
const DATA: &str = "data";

pub struct Scene {
    graph: FrameGraph<WgpuBackend>,
    uniform: BufferKey,
    canvas: Option<Canvas>,
    /// Largest `data` buffer the device can bind.
    max_data_bytes: u64,
    /// Inert passes of the last executed frame.
    inert: Vec<String>,
}

impl Scene {
    /// Creates the fixed resources and wires every pass.
    ///
    /// `data` is created by the first [`fit`](Self::fit); until then the passes that bind
    /// it stay inert.
    pub fn new(gpu: &Gpu<'_>, config: &AttractorConfig, stats: Rc<RefCell<TimingStats>>) -> Result<Self> {
        let mut graph = FrameGraph::new(WgpuBackend::from_gpu(gpu));
        let program = graph.backend().create_program("dejong.wgsl", SHADER);

        graph
            .create_query_set(TSQUERY, 2)
            .context("pass timing needs timestamp queries")?;
        let uniform = graph.create_buffer(
            UNIFORM,
            words(UNIFORM_WORDS),
            BufferUsages::UNIFORM | BufferUsages::COPY_DST,
        );
        graph.create_buffer(
            FRAMEINFO,
            words(FRAME_INFO_WORDS),
            BufferUsages::STORAGE | BufferUsages::COPY_SRC,
        );
        graph.create_buffer(
            TIMESTAMP,
            words(4),
            BufferUsages::QUERY_RESOLVE | BufferUsages::STORAGE,
        );
        graph.create_buffer(INDIRECT, words(3), BufferUsages::INDIRECT | BufferUsages::STORAGE);

        let measured = || Some(Measure::span(TSQUERY, 0, 1));
        let plot = [(UNIFORM, 0), (FRAMEINFO, 2), (DATA, 4)];
        let schedule = [(UNIFORM, 0), (TIMESTAMP, 1), (FRAMEINFO, 2), (INDIRECT, 3)];
        let record = [(TIMESTAMP, 1), (FRAMEINFO, 2)];

        graph.add_clear(DATA);

        graph.add_compute_pass(&program, "deJong", FIRST_PASS_GROUPS, &plot, measured());
        graph.add_resolve_query(TSQUERY, TIMESTAMP);
        graph.add_compute_pass(&program, "pass1t", 1u32, &schedule, None);

        graph.add_compute_pass_indirect(&program, "deJong", INDIRECT, &plot, measured());
        graph.add_resolve_query(TSQUERY, TIMESTAMP);
        graph.add_compute_pass(&program, "pass2t", 1u32, &schedule, None);

        graph.add_compute_pass_indirect(&program, "deJong", INDIRECT, &plot, measured());
        graph.add_resolve_query(TSQUERY, TIMESTAMP);
        graph.add_compute_pass(&program, "pass3t", 1u32, &record, None);

        graph.add_render_pass(
            &program,
            "vs",
            "fs",
            3,
            &[(UNIFORM, 0), (FRAMEINFO, 2), (DATA, 5)],
            measured(),
        );
        graph.add_resolve_query(TSQUERY, TIMESTAMP);
        graph.add_compute_pass(&program, "passrt", 1u32, &record, None);

        let tsres = config.timestamp_resolution;
        graph.add_buffer_download(FRAMEINFO, config.download_depth, move |bytes| {
            match FrameInfo::decode(bytes) {
                Some(info) => stats.borrow_mut().record(&info, tsres),
                None => log::warn!("short frameinfo readback ({} bytes)", bytes.len()),
            }
        });

        let limits = gpu.limits();
        let max_data_bytes =
            u64::from(limits.max_storage_buffer_binding_size).min(limits.max_buffer_size);

        log::info!(
            "de Jong graph ready: {} passes, data buffer up to {} MiB",
            graph.pass_count(),
            max_data_bytes >> 20
        );

        Ok(Self {
            graph,
            uniform,
            canvas: None,
            max_data_bytes,
            inert: Vec::new(),
        })
    }

    /// Sizes the data image for a surface of `size`, recreating `data` when it changes.
    pub fn fit(&mut self, size: PhysicalSize<u32>, scale_percent: f32) -> Canvas {
        let canvas = Canvas::fit(size.width, size.height, scale_percent, self.max_data_bytes);
        let resized = self
            .canvas
            .is_none_or(|c| (c.width, c.height) != (canvas.width, canvas.height));

        if resized {
            self.graph.create_buffer(
                DATA,
                canvas.data_bytes(),
                BufferUsages::STORAGE | BufferUsages::COPY_DST,
            );
            log::info!(
                "data image {}x{} for a {}x{} surface",
                canvas.width,
                canvas.height,
                size.width,
                size.height
            );
        }
        self.canvas = Some(canvas);
        canvas
    }

    pub fn upload(&self, uniforms: &Uniforms) -> Result<()> {
        self.graph
            .update_buffer_with(self.uniform, uniforms)
            .context("uniform upload failed")
    }

    /// Executes the graph into `frame`, logging whenever the set of inert passes changes.
    pub fn render(&mut self, frame: &mut SurfaceFrame) {
        let inert = inert_passes(&self.graph.execute(frame));
        if inert != self.inert {
            if inert.is_empty() {
                log::info!("all {} passes active", self.graph.pass_count());
            } else {
                log::warn!("inert passes: {}", inert.join("; "));
            }
            self.inert = inert;
        }
    }

    /// Delivers finished readbacks on frames that had nothing to present.
    pub fn poll(&mut self) {
        self.graph.poll();
    }

    pub fn download_status(&self) -> DownloadStatus {
        self.graph.download_status()
    }
}

fn inert_passes(report: &FrameReport) -> Vec<String> {
    report
        .inert()
        .map(|(id, e)| format!("#{} {e}", id.index()))
        .collect()
}
