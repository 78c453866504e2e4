//! Camera frame hand-off and filter-graph rendering.
//!
//! Capture threads [`push`](exchange::FrameExchangeQueue::push) raw frames
//! into a small bounded [`FrameExchangeQueue`]; an export consumer pops them
//! (waiting briefly when asked to) and feeds them to a
//! [`FilterGraphRenderer`], which runs an ordered chain of filters on a wgpu
//! or software backend.

pub mod diagnostics;
pub mod exchange;
pub mod render;
pub mod settings;

pub use exchange::{ExportWorker, FrameBuffer, FrameExchangeQueue, FrameMetadata, Roi};
pub use render::{
    BackendKind, DisplayTarget, ExportReader, FilterGraphRenderer, FilterKind, FilterStage,
    RenderError, TextureHandle,
};
pub use settings::{PipelineSettings, SettingsStore};
