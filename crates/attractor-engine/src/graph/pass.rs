use super::backend::Backend;
use super::bind_group::BindGroupCache;
use super::download::DownloadPass;
use super::resources::{BufferKey, QueryKey};
use super::GraphError;

/// Position of a pass in the graph. Passes are never removed, so ids stay valid.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct PassId(pub(crate) usize);

impl PassId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Timestamp measurement request for a compute or render pass.
///
/// Either slot may be omitted. A measure with neither slot writes nothing.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Measure {
    pub query: String,
    pub begin: Option<u32>,
    pub end: Option<u32>,
}

impl Measure {
    /// Writes begin and end timestamps into slots `begin` and `end` of `query`.
    pub fn span(query: impl Into<String>, begin: u32, end: u32) -> Self {
        Self {
            query: query.into(),
            begin: Some(begin),
            end: Some(end),
        }
    }
}

/// How many workgroups a compute pass dispatches.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Invocations {
    Workgroups(u32),
    /// Name of a buffer holding an indirect-dispatch argument triple at offset 0.
    Indirect(String),
}

impl From<u32> for Invocations {
    fn from(count: u32) -> Self {
        Invocations::Workgroups(count)
    }
}

impl From<&str> for Invocations {
    fn from(buffer: &str) -> Self {
        Invocations::Indirect(buffer.to_string())
    }
}

#[derive(Debug, Copy, Clone)]
pub(crate) struct MeasureSlots {
    pub query: QueryKey,
    pub begin: Option<u32>,
    pub end: Option<u32>,
}

impl MeasureSlots {
    pub(crate) fn writes_anything(&self) -> bool {
        self.begin.is_some() || self.end.is_some()
    }

    pub(crate) fn highest_slot(&self) -> Option<u32> {
        self.begin.max(self.end)
    }
}

#[derive(Debug, Copy, Clone)]
pub(crate) enum InvocationSource {
    Direct(u32),
    Indirect(BufferKey),
}

pub(crate) struct ComputePass<B: Backend> {
    pub label: String,
    pub pipeline: B::ComputePipeline,
    pub bind_group: BindGroupCache<B>,
    pub invocations: InvocationSource,
    pub measure: Option<MeasureSlots>,
}

pub(crate) struct RenderPass<B: Backend> {
    pub label: String,
    pub pipeline: B::RenderPipeline,
    pub bind_group: BindGroupCache<B>,
    pub vertex_count: u32,
    pub measure: Option<MeasureSlots>,
}

/// A pass record. One variant per pass kind; execution order is insertion order.
pub(crate) enum Pass<B: Backend> {
    Clear { buffer: BufferKey },
    Compute(ComputePass<B>),
    Render(RenderPass<B>),
    Resolve { query: QueryKey, target: BufferKey },
    Download(DownloadPass<B>),
}

impl<B: Backend> Pass<B> {
    pub(crate) fn bind_group_mut(&mut self) -> Option<(&mut BindGroupCache<B>, &str)> {
        match self {
            Pass::Compute(p) => Some((&mut p.bind_group, p.label.as_str())),
            Pass::Render(p) => Some((&mut p.bind_group, p.label.as_str())),
            Pass::Clear { .. } | Pass::Resolve { .. } | Pass::Download(_) => None,
        }
    }

    pub(crate) fn kind(&self) -> PassKind {
        match self {
            Pass::Clear { .. } => PassKind::Clear,
            Pass::Compute(_) => PassKind::Compute,
            Pass::Render(_) => PassKind::Render,
            Pass::Resolve { .. } => PassKind::Resolve,
            Pass::Download(_) => PassKind::Download,
        }
    }
}

/// Pass kind, for diagnostics.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum PassKind {
    Clear,
    Compute,
    Render,
    Resolve,
    Download,
}

/// What happened to one pass during [`FrameGraph::execute`](super::FrameGraph::execute).
#[derive(Debug, Clone, PartialEq)]
pub enum PassOutcome {
    /// Commands were recorded into this frame's batch.
    Encoded,
    /// A download pass is at its in-flight bound and skipped this frame.
    Throttled,
    /// The pass recorded nothing this frame.
    Inert(GraphError),
}

/// Result of one frame: one outcome per pass, in pass order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameReport {
    pub outcomes: Vec<(PassKind, PassOutcome)>,
    /// Staging copies scheduled this frame across all download passes.
    pub copies: usize,
}

impl FrameReport {
    pub fn encoded(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| *o == PassOutcome::Encoded)
            .count()
    }

    pub fn inert(&self) -> impl Iterator<Item = (PassId, &GraphError)> + '_ {
        self.outcomes
            .iter()
            .enumerate()
            .filter_map(|(i, (_, o))| match o {
                PassOutcome::Inert(e) => Some((PassId(i), e)),
                _ => None,
            })
    }
}
