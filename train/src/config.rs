//! Training program configuration format.

use crate::common::*;
use dwd::{
    data_layer::DataLayerConfig, dws::DwsConfig, groundtruth::TrainingAssignment,
    model::ModelConfig,
};

pub use dataset::*;
pub use logging::*;
pub use training::*;

/// The main training configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,
    pub dataset: DatasetConfig,
    #[serde(default)]
    pub data_layer: DataLayerConfig,
    #[serde(default)]
    pub prefetch: PrefetchConfig,
    /// Ground-truth maps and heads trained by the network.
    pub assignments: Vec<TrainingAssignment>,
    pub training: TrainingConfig,
    pub logging: LoggingConfig,
    #[serde(default)]
    pub dws: DwsConfig,
}

impl Config {
    pub fn open<P>(path: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let text = std::fs::read_to_string(path)?;
        let config: Self = json5::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(!self.assignments.is_empty(), "assignments must not be empty");
        self.assignments
            .iter()
            .enumerate()
            .try_for_each(|(index, assign)| {
                assign
                    .validate()
                    .with_context(|| format!("invalid assignment {}", index))
            })?;
        self.data_layer.validate()?;
        ensure!(
            self.logging.print_interval > 0,
            "print_interval must be positive"
        );
        self.training
            .schedule
            .validate(self.assignments.len())?;

        let size_unit = self.model.size_unit();
        if let Some(assign) = self
            .assignments
            .iter()
            .find(|assign| assign.max_ds_factor() > size_unit)
        {
            bail!(
                "ds_factors {:?} exceed the coarsest model stride {}",
                assign.ds_factors,
                size_unit
            );
        }
        Ok(())
    }
}

/// Background batch loading options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrefetchConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_num_workers")]
    pub num_workers: usize,
    /// The maximum number of waiting batches.
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            num_workers: default_num_workers(),
            capacity: default_capacity(),
        }
    }
}

mod dataset {
    use super::*;

    /// Dataset options.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct DatasetConfig {
        pub train: DatasetKind,
        pub validation: Option<DatasetKind>,
        /// Optional list of whitelisted classes.
        #[serde(default)]
        pub class_whitelist: Option<HashSet<String>>,
        #[serde(default)]
        pub sanitizer: SanitizerConfig,
        /// Append horizontally mirrored copies of the training images.
        #[serde(default)]
        pub use_flipped: bool,
        /// Drop training images without objects.
        #[serde(default = "default_filter_empty")]
        pub filter_empty: bool,
    }

    /// Variants of dataset and options.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(tag = "type")]
    pub enum DatasetKind {
        /// PASCAL VOC layout, also used by DeepScores.
        Voc {
            dataset_dir: PathBuf,
            split: String,
            classes_file: PathBuf,
            #[serde(default = "default_image_dir_name")]
            image_dir_name: String,
            /// Box coordinates are relative to the image size.
            #[serde(default)]
            normalized_coordinates: bool,
            #[serde(default = "default_input_channels")]
            input_channels: usize,
        },
        /// Microsoft COCO dataset options.
        Coco {
            annotation_file: PathBuf,
            image_dir: PathBuf,
            classes_file: PathBuf,
        },
        /// CSV dataset options.
        Csv {
            image_dir: PathBuf,
            label_file: PathBuf,
            classes_file: PathBuf,
            #[serde(default = "default_input_channels")]
            input_channels: usize,
        },
    }

    impl DatasetKind {
        pub fn classes_file(&self) -> &Path {
            match self {
                Self::Voc { classes_file, .. }
                | Self::Coco { classes_file, .. }
                | Self::Csv { classes_file, .. } => classes_file,
            }
        }

        /// The number of image channels fed to the network.
        pub fn input_channels(&self) -> usize {
            match *self {
                Self::Voc { input_channels, .. } | Self::Csv { input_channels, .. } => {
                    input_channels
                }
                Self::Coco { .. } => 3,
            }
        }
    }

    /// Bounding box cleanup options.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct SanitizerConfig {
        /// Boxes reaching further outside the image, in pixels, are dropped.
        #[serde(default = "default_out_of_bound_tolerance")]
        pub out_of_bound_tolerance: R64,
        /// The minimum box height and width in pixels.
        #[serde(default = "default_min_bbox_size")]
        pub min_bbox_size: R64,
    }

    impl Default for SanitizerConfig {
        fn default() -> Self {
            Self {
                out_of_bound_tolerance: default_out_of_bound_tolerance(),
                min_bbox_size: default_min_bbox_size(),
            }
        }
    }

    fn default_filter_empty() -> bool {
        true
    }

    fn default_image_dir_name() -> String {
        "JPEGImages".into()
    }

    fn default_input_channels() -> usize {
        3
    }

    fn default_out_of_bound_tolerance() -> R64 {
        r64(4.0)
    }

    fn default_min_bbox_size() -> R64 {
        r64(1.0)
    }
}

mod logging {
    use super::*;

    /// Data logging options.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct LoggingConfig {
        pub dir: PathBuf,
        /// Print losses every this many steps.
        #[serde(default = "default_print_interval")]
        pub print_interval: usize,
        /// Write losses and overlay images every this many steps.
        pub log_interval: Option<NonZeroUsize>,
        #[serde(default)]
        pub validation: ValidationConfig,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct ValidationConfig {
        /// Compute the validation loss of the current task every this many steps.
        pub task_interval: Option<NonZeroUsize>,
        #[serde(default = "default_task_batches")]
        pub task_batches: usize,
        /// Evaluate detections against the ground truth every this many steps.
        pub final_interval: Option<NonZeroUsize>,
        #[serde(default = "default_final_batches")]
        pub final_batches: usize,
        #[serde(default = "default_iou_threshold")]
        pub iou_threshold: R64,
    }

    impl Default for ValidationConfig {
        fn default() -> Self {
            Self {
                task_interval: None,
                task_batches: default_task_batches(),
                final_interval: None,
                final_batches: default_final_batches(),
                iou_threshold: default_iou_threshold(),
            }
        }
    }

    fn default_print_interval() -> usize {
        10
    }

    fn default_task_batches() -> usize {
        10
    }

    fn default_final_batches() -> usize {
        20
    }

    fn default_iou_threshold() -> R64 {
        r64(0.5)
    }
}

mod training {
    use super::*;

    /// The training options.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct TrainingConfig {
        #[serde(with = "tch_serde::serde_device")]
        pub device: Device,
        pub optimizer: OptimizerConfig,
        /// The weight decay of the optimizer.
        #[serde(default = "default_regularization")]
        pub regularization_coefficient: R64,
        /// Learning rate scheduling strategy.
        pub lr_schedule: LearningRateSchedule,
        pub schedule: ScheduleConfig,
        /// If set, it saves a checkpoint file per this steps.
        pub save_checkpoint_steps: Option<NonZeroUsize>,
        /// Checkpoint file loading method.
        #[serde(default)]
        pub load_checkpoint: LoadCheckpoint,
        /// Weights loaded by name before training, tensors missing in the
        /// file are left untouched.
        pub pretrained_weights: Option<PathBuf>,
        /// If enabled, it overrides the initial training step.
        pub override_initial_step: Option<usize>,
        /// Give up when this many batches in a row have no objects.
        #[serde(default = "default_max_nonempty_attempts")]
        pub max_nonempty_attempts: usize,
        pub seed: Option<u64>,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(tag = "type")]
    pub enum OptimizerConfig {
        Adam {
            #[serde(default = "default_beta1")]
            beta1: R64,
            #[serde(default = "default_beta2")]
            beta2: R64,
        },
        RmsProp {
            #[serde(default = "default_alpha")]
            alpha: R64,
            #[serde(default)]
            momentum: Option<R64>,
        },
        Momentum {
            #[serde(default = "default_momentum")]
            momentum: R64,
            #[serde(default)]
            nesterov: bool,
        },
    }

    /// The order in which assignments are trained.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct ScheduleConfig {
        /// Phases training a single assignment each.
        #[serde(default)]
        pub do_assign: Vec<AssignPhase>,
        /// Phases training a weighted sum of assignment losses, run after
        /// the single assignment phases.
        #[serde(default)]
        pub combined: Vec<CombinedPhase>,
        /// Skip the single assignment phases.
        #[serde(default)]
        pub train_only_combined: bool,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct AssignPhase {
        pub assign: usize,
        pub iterations: usize,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct CombinedPhase {
        pub assigns: Vec<usize>,
        pub loss_factors: Vec<R64>,
        pub iterations: usize,
    }

    /// The learning rate scheduling strategy.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(tag = "type")]
    pub enum LearningRateSchedule {
        /// Use constant learning rate.
        Constant { lr: R64 },
        /// Use specific learning rate at specified steps.
        StepWise { steps: Vec<(usize, R64)> },
    }

    /// Checkpoint file loading method.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(tag = "type")]
    pub enum LoadCheckpoint {
        /// Disable checkpoint file loading.
        Disabled,
        /// Load the most recent checkpoint file.
        FromRecent,
        /// Load the checkpoint file at specified path.
        FromFile { file: PathBuf },
    }

    impl Default for LoadCheckpoint {
        fn default() -> Self {
            Self::Disabled
        }
    }

    impl ScheduleConfig {
        pub fn validate(&self, num_assignments: usize) -> Result<()> {
            let check = |assign: usize| {
                ensure!(
                    assign < num_assignments,
                    "assignment index {} out of range, there are {} assignments",
                    assign,
                    num_assignments
                );
                Ok(())
            };

            self.do_assign
                .iter()
                .try_for_each(|phase| check(phase.assign))?;
            self.combined.iter().try_for_each(|phase| {
                ensure!(
                    !phase.assigns.is_empty(),
                    "a combined phase needs at least one assignment"
                );
                ensure!(
                    phase.assigns.len() == phase.loss_factors.len(),
                    "assigns and loss_factors must have the same length"
                );
                phase.assigns.iter().try_for_each(|&assign| check(assign))
            })?;
            Ok(())
        }
    }

    fn default_regularization() -> R64 {
        r64(0.0)
    }

    fn default_max_nonempty_attempts() -> usize {
        100
    }

    fn default_beta1() -> R64 {
        r64(0.9)
    }

    fn default_beta2() -> R64 {
        r64(0.999)
    }

    fn default_alpha() -> R64 {
        r64(0.99)
    }

    fn default_momentum() -> R64 {
        r64(0.9)
    }
}

fn default_num_workers() -> usize {
    2
}

fn default_capacity() -> usize {
    4
}
