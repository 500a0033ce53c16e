//! Decoding of the per-frame `frameinfo` readback and the rolling timing summary.

use std::collections::VecDeque;
use std::fmt;

use bytemuck::{Pod, Zeroable};

/// Word count of the `frameinfo` buffer.
pub const FRAME_INFO_WORDS: u64 = 13;

/// Layout of the `frameinfo` buffer as written by the timing passes.
#[repr(C)]
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct FrameInfo {
    /// Begin/end tick pairs (low 32 bits): pass 1, pass 2, pass 3, render.
    pub ticks: [u32; 8],
    /// Points plotted by pass 1, pass 2, pass 3, and in total.
    pub points: [u32; 4],
    /// Points scheduled for the most recent indirect pass.
    pub scheduled: u32,
}

impl FrameInfo {
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        let len = std::mem::size_of::<Self>();
        (bytes.len() >= len).then(|| bytemuck::pod_read_unaligned(&bytes[..len]))
    }

    /// Milliseconds between two tick slots. Tick counters wrap; the difference is taken
    /// as a signed 32-bit value.
    fn span_ms(&self, begin: usize, end: usize, tsres: f32) -> f64 {
        let ticks = self.ticks[end].wrapping_sub(self.ticks[begin]) as i32;
        f64::from(ticks) * f64::from(tsres) / 1e6
    }

    /// Time of measured pass `pass` (0..4: the three point passes, then render).
    pub fn pass_ms(&self, pass: usize, tsres: f32) -> f64 {
        self.span_ms(2 * pass, 2 * pass + 1, tsres)
    }

    /// Time from the start of pass 1 to the end of the render pass.
    pub fn total_ms(&self, tsres: f32) -> f64 {
        self.span_ms(0, 7, tsres)
    }
}

/// Mean over the last `capacity` samples.
#[derive(Debug, Clone)]
pub struct RollingAverage {
    samples: VecDeque<f64>,
    capacity: usize,
    sum: f64,
}

impl RollingAverage {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            sum: 0.0,
        }
    }

    pub fn add(&mut self, sample: f64) {
        if self.samples.len() == self.capacity {
            self.sum -= self.samples.pop_front().unwrap_or(0.0);
        }
        self.samples.push_back(sample);
        self.sum += sample;
    }

    pub fn get(&self) -> f64 {
        if self.samples.is_empty() {
            0.0
        } else {
            self.sum / self.samples.len() as f64
        }
    }
}

const WINDOW: usize = 60;

/// Rolling GPU timings fed by the `frameinfo` readback, plus host frame times.
#[derive(Debug, Clone)]
pub struct TimingStats {
    /// Pass 1..3, render, total.
    gpu_ms: [RollingAverage; 5],
    /// Pass 1..3, total.
    points: [RollingAverage; 4],
    frame_ms: RollingAverage,
    readbacks: u64,
}

impl Default for TimingStats {
    fn default() -> Self {
        Self {
            gpu_ms: std::array::from_fn(|_| RollingAverage::new(WINDOW)),
            points: std::array::from_fn(|_| RollingAverage::new(WINDOW)),
            frame_ms: RollingAverage::new(WINDOW),
            readbacks: 0,
        }
    }
}

impl TimingStats {
    pub fn record(&mut self, info: &FrameInfo, tsres: f32) {
        for pass in 0..4 {
            self.gpu_ms[pass].add(info.pass_ms(pass, tsres));
        }
        self.gpu_ms[4].add(info.total_ms(tsres));
        for (avg, &n) in self.points.iter_mut().zip(info.points.iter()) {
            avg.add(f64::from(n));
        }
        self.readbacks += 1;
    }

    pub fn record_frame(&mut self, dt_seconds: f32) {
        self.frame_ms.add(f64::from(dt_seconds) * 1000.0);
    }

    pub fn readbacks(&self) -> u64 {
        self.readbacks
    }

    pub fn fps(&self) -> f64 {
        let frame = self.frame_ms.get();
        if frame > 0.0 { 1000.0 / frame } else { 0.0 }
    }
}

impl fmt::Display for TimingStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let frame = self.frame_ms.get();
        let fps = self.fps();
        let mpoints = |i: usize| self.points[i].get() / 1e6;
        write!(
            f,
            "frame {frame:.2}ms ({fps:.1}fps) | pass 1 {:.2}ms {:.1}M | pass 2 {:.2}ms {:.1}M | \
             pass 3 {:.2}ms {:.1}M | render {:.2}ms | total {:.2}ms {:.1}M",
            self.gpu_ms[0].get(),
            mpoints(0),
            self.gpu_ms[1].get(),
            mpoints(1),
            self.gpu_ms[2].get(),
            mpoints(2),
            self.gpu_ms[3].get(),
            self.gpu_ms[4].get(),
            mpoints(3),
        )
    }
}
