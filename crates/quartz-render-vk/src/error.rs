use ash::vk;
use thiserror::Error;

/// Failures raised by the Vulkan presentation core.
///
/// Every variant is fatal to the operation that produced it; the one
/// recoverable per-frame outcome (a stale swapchain) is not an error and is
/// reported as [`crate::FrameStatus::SwapchainStale`] instead.
#[derive(Debug, Error)]
pub enum RenderError {
    /// A backend call returned a non-success status during setup or the
    /// per-frame protocol.
    #[error("{op} failed: {source:?}")]
    Backend {
        op: &'static str,
        source: vk::Result,
    },

    /// No enumerated physical device has complete queue families, the
    /// required extensions, and an adequate swapchain. Terminal; there is
    /// nothing to retry.
    #[error("no suitable physical device")]
    NoSuitableDevice,

    /// Diagnostics were requested but the validation layer is not installed.
    #[error("diagnostics requested but the validation layer is unavailable")]
    DiagnosticsUnavailable,

    /// A bounded fence wait expired before the GPU signaled.
    #[error("timed out waiting on {op}")]
    Timeout { op: &'static str },

    /// The supplied shader blob is not valid SPIR-V.
    #[error("shader blob for the {stage} stage is not valid SPIR-V")]
    InvalidShader { stage: &'static str },

    #[error("window handle unavailable: {0}")]
    Handle(#[from] raw_window_handle::HandleError),
}

pub type Result<T> = std::result::Result<T, RenderError>;

/// Tags a raw `VkResult` with the operation that produced it, the way the
/// rest of this crate reports backend failures.
pub(crate) trait VkOp<T> {
    fn op(self, op: &'static str) -> Result<T>;
}

impl<T> VkOp<T> for std::result::Result<T, vk::Result> {
    fn op(self, op: &'static str) -> Result<T> {
        self.map_err(|source| RenderError::Backend { op, source })
    }
}
