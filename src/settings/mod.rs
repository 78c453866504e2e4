// Settings: JSON-backed pipeline configuration.

pub mod store;
pub mod types;

pub use store::{SettingsError, SettingsStore};
pub use types::{ExchangeSettings, PipelineSettings, RendererSettings};
