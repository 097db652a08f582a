use crate::common::*;

/// One ground-truth map type together with its network head.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingAssignment {
    /// Output strides the head is trained at.
    pub ds_factors: Vec<usize>,
    /// Scale the object geometry to the map instead of subsampling a
    /// full resolution stamp.
    #[serde(default = "default_downsample_marker")]
    pub downsample_marker: bool,
    #[serde(default)]
    pub overlap_solution: OverlapSolution,
    pub stamp: StampKind,
    #[serde(default)]
    pub marker: MarkerConfig,
    #[serde(default)]
    pub layer_loss_aggregate: LayerAggregate,
    #[serde(default)]
    pub balance_mask: BalanceMask,
    /// The share of the loss given to background pixels.
    #[serde(default = "default_balance_coef")]
    pub balance_coef: R64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StampKind {
    Energy {
        num_levels: usize,
        #[serde(default)]
        energy_shape: EnergyShape,
        #[serde(default)]
        loss: StampLoss,
    },
    Class {
        #[serde(default)]
        class_resolution: ClassResolution,
    },
    BBox,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EnergyShape {
    Linear,
    Quadratic,
}

impl Default for EnergyShape {
    fn default() -> Self {
        Self::Quadratic
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StampLoss {
    Softmax,
    Regression,
}

impl Default for StampLoss {
    fn default() -> Self {
        Self::Softmax
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClassResolution {
    Class,
    Binary,
}

impl Default for ClassResolution {
    fn default() -> Self {
        Self::Class
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OverlapSolution {
    /// The object with the stronger marker response owns the pixel.
    Max,
    /// The object with the closest center owns the pixel.
    Nearest,
    /// Objects are stamped from large to small and overwrite each other.
    Last,
}

impl Default for OverlapSolution {
    fn default() -> Self {
        Self::Max
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarkerShape {
    Oval,
    Square,
}

impl Default for MarkerShape {
    fn default() -> Self {
        Self::Oval
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkerConfig {
    #[serde(default)]
    pub shape: MarkerShape,
    /// Marker extent relative to the object box.
    #[serde(default = "default_size_percentage")]
    pub size_percentage: R64,
    /// Resolution of the canonical marker template.
    #[serde(default)]
    pub marker_dim: Option<[usize; 2]>,
}

impl Default for MarkerConfig {
    fn default() -> Self {
        Self {
            shape: MarkerShape::default(),
            size_percentage: default_size_percentage(),
            marker_dim: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LayerAggregate {
    Avg,
    Sum,
}

impl Default for LayerAggregate {
    fn default() -> Self {
        Self::Avg
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BalanceMask {
    None,
    MaskBg,
    FgBgBalanced,
    ByObject,
    ByClass,
}

impl Default for BalanceMask {
    fn default() -> Self {
        Self::None
    }
}

impl TrainingAssignment {
    pub fn validate(&self) -> Result<()> {
        ensure!(!self.ds_factors.is_empty(), "ds_factors must not be empty");
        ensure!(
            self.ds_factors
                .iter()
                .all(|factor| factor.is_power_of_two()),
            "ds_factors must be powers of two, but get {:?}",
            self.ds_factors
        );
        ensure!(
            self.ds_factors.iter().all_unique(),
            "ds_factors must not contain duplicates"
        );
        ensure!(
            self.marker.size_percentage > 0.0,
            "size_percentage must be positive"
        );
        if let Some([h, w]) = self.marker.marker_dim {
            ensure!(h > 0 && w > 0, "marker_dim must be positive");
        }
        ensure!(
            (0.0..=1.0).contains(&self.balance_coef.raw()),
            "balance_coef must be within [0, 1]"
        );
        if let StampKind::Energy { num_levels, .. } = self.stamp {
            ensure!(num_levels >= 2, "num_levels must be at least 2");
        }
        Ok(())
    }

    /// The number of output channels the head of this assignment needs.
    pub fn head_channels(&self, num_classes: usize) -> usize {
        match self.stamp {
            StampKind::Energy {
                num_levels,
                loss: StampLoss::Softmax,
                ..
            } => num_levels,
            StampKind::Energy {
                loss: StampLoss::Regression,
                ..
            } => 1,
            StampKind::Class {
                class_resolution: ClassResolution::Class,
            } => num_classes + 1,
            StampKind::Class {
                class_resolution: ClassResolution::Binary,
            } => 2,
            StampKind::BBox => 2,
        }
    }

    /// Whether the head is trained with a softmax over its channels.
    pub fn is_softmax(&self) -> bool {
        matches!(
            self.stamp,
            StampKind::Energy {
                loss: StampLoss::Softmax,
                ..
            } | StampKind::Class { .. }
        )
    }

    pub fn max_ds_factor(&self) -> usize {
        self.ds_factors.iter().copied().max().unwrap_or(1)
    }
}

fn default_downsample_marker() -> bool {
    true
}

fn default_size_percentage() -> R64 {
    r64(0.8)
}

fn default_balance_coef() -> R64 {
    r64(0.5)
}
