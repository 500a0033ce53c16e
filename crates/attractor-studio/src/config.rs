use std::str::FromStr;

/// Largest texture edge the data buffer may be sized for, in pixels.
pub const MAX_DIMENSION: u32 = 8192;

/// Tunables of the de Jong demo.
///
/// Every field can be overridden through an `ATTRACTOR_*` environment variable
/// (e.g. `ATTRACTOR_BUDGET=8`). Unparsable or out-of-range values are logged and the
/// default is kept.
#[derive(Debug, Clone, PartialEq)]
pub struct AttractorConfig {
    /// Animation speed; `t` advances by `speed * 1e-6` per frame.
    pub speed: f64,
    /// Map iterations per invocation.
    pub loops: u32,
    /// Output brightness multiplier.
    pub brightness: f32,
    /// GPU time budget per frame for the point passes, in milliseconds.
    pub budget_ms: f32,
    /// Nanoseconds per timestamp tick.
    pub timestamp_resolution: f32,
    /// Data resolution relative to the window, in percent.
    pub scale_percent: f32,
    /// Outstanding frame-info readbacks.
    pub download_depth: usize,
    /// Frames between timing reports.
    pub report_interval: u64,
    /// Starting value of `t`; derived from the clock when unset.
    pub initial_t: Option<f64>,
}

impl Default for AttractorConfig {
    fn default() -> Self {
        Self {
            speed: 100.0,
            loops: 32,
            brightness: 1.0,
            budget_ms: 12.0,
            timestamp_resolution: 1.0,
            scale_percent: 100.0,
            download_depth: 4,
            report_interval: 60,
            initial_t: None,
        }
    }
}

impl AttractorConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from `lookup`, which maps variable names to raw values.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let d = Self::default();
        Self {
            speed: read(&lookup, "ATTRACTOR_SPEED", d.speed, |v| v.is_finite()),
            loops: read(&lookup, "ATTRACTOR_LOOP", d.loops, |v| *v > 4),
            brightness: read(&lookup, "ATTRACTOR_BRIGHT", d.brightness, |v| *v > 0.0),
            budget_ms: read(&lookup, "ATTRACTOR_BUDGET", d.budget_ms, |v| v.is_finite())
                .clamp(0.01, 100.0),
            timestamp_resolution: read(&lookup, "ATTRACTOR_TSRES", d.timestamp_resolution, |v| {
                *v > 0.0
            }),
            scale_percent: read(&lookup, "ATTRACTOR_SCALE", d.scale_percent, |v| {
                *v > 0.0 && *v <= 400.0
            }),
            download_depth: read(&lookup, "ATTRACTOR_DOWNLOAD_DEPTH", d.download_depth, |v| *v > 0),
            report_interval: read(&lookup, "ATTRACTOR_REPORT_INTERVAL", d.report_interval, |v| {
                *v > 0
            }),
            initial_t: lookup("ATTRACTOR_T").and_then(|raw| match raw.trim().parse::<f64>() {
                Ok(t) if t.is_finite() => Some(t),
                _ => {
                    log::warn!("ignoring ATTRACTOR_T={raw:?}");
                    None
                }
            }),
        }
    }
}

fn read<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
    valid: impl Fn(&T) -> bool,
) -> T
where
    T: FromStr + std::fmt::Debug,
{
    let Some(raw) = lookup(key) else {
        return default;
    };
    match raw.trim().parse::<T>() {
        Ok(v) if valid(&v) => v,
        _ => {
            log::warn!("ignoring {key}={raw:?}; using {default:?}");
            default
        }
    }
}
