use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::render::backend::BackendKind;
use crate::render::filters::FilterStage;

/// Frame exchange tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ExchangeSettings {
    /// Frames held before the oldest is evicted.
    pub capacity: usize,
    /// Upper bound on the export wait in `pop`.
    pub wait_timeout_ms: u64,
}

impl ExchangeSettings {
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }
}

impl Default for ExchangeSettings {
    fn default() -> Self {
        Self {
            capacity: 2,
            wait_timeout_ms: 500,
        }
    }
}

/// Filter graph configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct RendererSettings {
    pub backend: BackendKind,
    /// Ordered filter stages; the last one is the terminal node.
    pub chain: Vec<FilterStage>,
    /// Off-screen output size used when no display surface is bound.
    pub output_size: Option<(u32, u32)>,
}

impl Default for RendererSettings {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            chain: FilterStage::default_chain(),
            output_size: None,
        }
    }
}

/// Top-level settings file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineSettings {
    pub exchange: ExchangeSettings,
    pub renderer: RendererSettings,
}
