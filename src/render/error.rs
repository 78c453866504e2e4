use thiserror::Error;

use crate::render::backend::{ProgramHandle, TextureHandle};

/// Filter graph and render backend errors.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("filter graph is not loaded")]
    NotReady,

    #[error("filter chain is empty")]
    EmptyChain,

    #[error("GPU resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("unknown texture {0:?}")]
    InvalidTexture(TextureHandle),

    #[error("unknown program {0:?}")]
    InvalidProgram(ProgramHandle),

    #[error("pixel data size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("texture size mismatch: {src_size:?} -> {dst_size:?}")]
    TextureSizeMismatch {
        src_size: (u32, u32),
        dst_size: (u32, u32),
    },

    #[error("region of interest is empty")]
    EmptyRoi,

    #[error("frame buffer carries no pixels")]
    EmptyFrame,

    #[error("backend initialisation failed: {0}")]
    BackendInit(String),

    #[error("backend operation failed: {0}")]
    Backend(String),
}

/// Convenience Result alias.
pub type Result<T> = std::result::Result<T, RenderError>;
