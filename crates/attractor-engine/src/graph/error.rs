use std::fmt;

/// What kind of named object a pass was waiting for.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum DependencyKind {
    Buffer,
    QuerySet,
    /// The swapchain view supplied by the host for render passes.
    SurfaceView,
}

impl fmt::Display for DependencyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DependencyKind::Buffer => "buffer",
            DependencyKind::QuerySet => "query set",
            DependencyKind::SurfaceView => "surface view",
        };
        f.write_str(s)
    }
}

/// Errors produced by the frame graph.
///
/// Only [`GraphError::Configuration`] is fatal. Every other variant describes a pass
/// that is inert for the current frame and recovers on its own once the missing or
/// undersized resource is (re)created.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphError {
    /// The device cannot provide a capability the graph was asked to use.
    Configuration(String),

    /// A pass names a resource that has not been created yet.
    UnresolvedDependency { kind: DependencyKind, name: String },

    /// A resource exists but is too small (or empty) for the requested operation.
    CapacityExceeded {
        name: String,
        needed: u64,
        available: u64,
    },

    /// A buffer lacks a usage flag the operation requires.
    UsageMismatch {
        name: String,
        required: wgpu::BufferUsages,
    },

    /// A clear, copy or write length is not a multiple of `wgpu::COPY_BUFFER_ALIGNMENT`.
    Misaligned { name: String, size: u64 },
}

impl GraphError {
    pub(crate) fn missing_buffer(name: &str) -> Self {
        Self::UnresolvedDependency {
            kind: DependencyKind::Buffer,
            name: name.to_string(),
        }
    }

    pub(crate) fn missing_query_set(name: &str) -> Self {
        Self::UnresolvedDependency {
            kind: DependencyKind::QuerySet,
            name: name.to_string(),
        }
    }

    /// Returns `true` for errors that abort setup.
    pub fn is_fatal(&self) -> bool {
        matches!(self, GraphError::Configuration(_))
    }
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphError::Configuration(msg) => write!(f, "graph configuration error: {msg}"),
            GraphError::UnresolvedDependency { kind, name } => {
                write!(f, "unresolved {kind} dependency \"{name}\"")
            }
            GraphError::CapacityExceeded {
                name,
                needed,
                available,
            } => write!(
                f,
                "\"{name}\" too small: needs {needed}, has {available}"
            ),
            GraphError::UsageMismatch { name, required } => {
                write!(f, "buffer \"{name}\" is missing usage {required:?}")
            }
            GraphError::Misaligned { name, size } => write!(
                f,
                "\"{name}\": {size} bytes is not a multiple of {}",
                wgpu::COPY_BUFFER_ALIGNMENT
            ),
        }
    }
}

impl std::error::Error for GraphError {}
