use crate::common::*;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Channels of the full resolution stem.
    #[serde(default = "default_base_channels")]
    pub base_channels: usize,
    /// Number of stride-2 encoder stages.
    #[serde(default = "default_depth")]
    pub depth: usize,
    /// Upper bound of channels of any stage.
    #[serde(default = "default_max_channels")]
    pub max_channels: usize,
    #[serde(default)]
    pub upsampling: Upsampling,
    #[serde(default = "default_batch_norm")]
    pub batch_norm: bool,
}

/// Whether the assignments share one decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Upsampling {
    Shared,
    PerTask,
}

impl Default for Upsampling {
    fn default() -> Self {
        Self::Shared
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_channels: default_base_channels(),
            depth: default_depth(),
            max_channels: default_max_channels(),
            upsampling: Upsampling::default(),
            batch_norm: default_batch_norm(),
        }
    }
}

impl ModelConfig {
    /// Input sizes must be multiples of this value.
    pub fn size_unit(&self) -> usize {
        1 << self.depth
    }

    /// Channels of the feature map at stride `2^level`.
    pub fn level_channels(&self, level: usize) -> usize {
        (self.base_channels << level).min(self.max_channels)
    }
}

fn default_base_channels() -> usize {
    32
}

fn default_depth() -> usize {
    4
}

fn default_max_channels() -> usize {
    512
}

fn default_batch_norm() -> bool {
    true
}
