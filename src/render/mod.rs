// Render: filter graph over a pluggable GPU or CPU backend.

pub mod backend;
pub mod error;
pub mod filters;
pub mod gpu;
pub mod graph;
pub mod renderer;
pub mod software;
pub mod target;

pub use backend::{create_backend, BackendKind, RenderBackend, TextureHandle};
pub use error::RenderError;
pub use filters::{FilterKind, FilterStage};
pub use renderer::FilterGraphRenderer;
pub use software::SoftwareBackend;
pub use target::{DisplayTarget, ExportReader, ExportedFrame, PresentedFrame, TerminalSource};
