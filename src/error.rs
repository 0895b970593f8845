// ============================================================================
// PIPELINE ERRORS — one error type for construction, draw and readback
// ============================================================================

pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("no gpu adapter available")]
    NoAdapter,

    #[error("device request failed: {0}")]
    Device(String),

    #[error("resource creation failed for '{label}': {reason}")]
    ResourceCreation { label: String, reason: String },

    #[error("render target '{label}' is incomplete: {reason}")]
    FrameBuffer { label: String, reason: String },

    #[error("color attachment index {index} exceeds the guaranteed maximum of {max}")]
    InvalidAttachmentIndex { index: usize, max: usize },

    #[error("shader compile error in '{label}':\n{log}")]
    ShaderCompile { label: String, log: String },

    #[error("shader link error in '{label}':\n{log}")]
    ShaderLink { label: String, log: String },

    #[error("program '{program}' has no binding named '{name}'")]
    UnknownBinding { program: String, name: String },

    #[error("stage '{stage}' was drawn without its '{input}' input")]
    MissingInput { stage: &'static str, input: &'static str },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("gpu error during '{label}': {reason}")]
    Gpu { label: String, reason: String },

    #[error("readback error: {0}")]
    Readback(String),

    #[error("image encode error: {0}")]
    Encode(#[from] image::ImageError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    pub fn resource(label: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ResourceCreation {
            label: label.into(),
            reason: reason.into(),
        }
    }

    pub fn frame_buffer(label: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::FrameBuffer {
            label: label.into(),
            reason: reason.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn gpu(label: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Gpu {
            label: label.into(),
            reason: reason.into(),
        }
    }

    pub fn readback(msg: impl Into<String>) -> Self {
        Self::Readback(msg.into())
    }

    /// Whether this error belongs to pipeline construction (as opposed to a
    /// failure while drawing an already-built pipeline).
    pub fn is_construction_error(&self) -> bool {
        matches!(
            self,
            Self::NoAdapter
                | Self::Device(_)
                | Self::ResourceCreation { .. }
                | Self::FrameBuffer { .. }
                | Self::InvalidAttachmentIndex { .. }
                | Self::ShaderCompile { .. }
                | Self::ShaderLink { .. }
                | Self::UnknownBinding { .. }
                | Self::Config(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_prefixes_are_stable() {
        assert_eq!(PipelineError::NoAdapter.to_string(), "no gpu adapter available");
        assert!(
            PipelineError::resource("sim", "oom")
                .to_string()
                .contains("resource creation failed for 'sim'")
        );
        assert!(
            PipelineError::frame_buffer("accumulate", "size mismatch")
                .to_string()
                .contains("is incomplete")
        );
        assert!(
            PipelineError::config("steps")
                .to_string()
                .starts_with("configuration error:")
        );
    }

    #[test]
    fn shader_errors_carry_the_compiler_log() {
        let err = PipelineError::ShaderCompile {
            label: "luma".into(),
            log: "error: expected ';'".into(),
        };
        let text = err.to_string();
        assert!(text.contains("luma"));
        assert!(text.contains("expected ';'"));
    }

    #[test]
    fn draw_errors_are_not_construction_errors() {
        assert!(PipelineError::InvalidAttachmentIndex { index: 8, max: 8 }.is_construction_error());
        assert!(!PipelineError::gpu("frame", "lost").is_construction_error());
        assert!(!PipelineError::readback("map failed").is_construction_error());
    }

    #[test]
    fn io_errors_convert() {
        let err: PipelineError = std::io::Error::other("disk full").into();
        assert!(err.to_string().contains("disk full"));
    }
}
