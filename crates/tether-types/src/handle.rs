//! Handle to a running session's process.

use std::sync::Arc;

/// Something the admission controller can stop on behalf of an operator.
///
/// Implemented by the agent process adapter. Both methods must be idempotent:
/// stopping an already-stopped process and disposing twice are no-ops.
pub trait SessionHandle: Send + Sync {
    /// Best-effort signal/kill of the underlying process.
    fn stop(&self);

    /// Release OS handles held for the process.
    fn dispose(&self);
}

/// Shared session handle type.
pub type SharedSessionHandle = Arc<dyn SessionHandle>;
