//! Dataset loading and batch feeding.

use crate::{
    common::*,
    config::{Config, DatasetConfig, DatasetKind, PrefetchConfig},
};
use dwd::{
    data_layer::{Blob, DataLayerConfig, RoiDataLayer},
    dataset::{CocoDataset, CsvDataset, FileDataset, SanitizedDataset, VocDatasetInit},
    groundtruth::GroundTruthBuilder,
    prefetch::PrefetchWrapper,
    roidb::{filter_roidb, prepare_roidb, RoiEntry},
    utils::lcm,
};

/// The databases of the training run.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct TrainingData {
    pub classes: IndexSet<String>,
    pub input_channels: usize,
    #[derivative(Debug = "ignore")]
    pub train_roidb: Vec<Arc<RoiEntry>>,
    #[derivative(Debug = "ignore")]
    pub validation_roidb: Option<Vec<Arc<RoiEntry>>>,
}

impl TrainingData {
    pub async fn load(config: &DatasetConfig) -> Result<Self> {
        let train = load_dataset(config, &config.train)
            .await
            .with_context(|| "unable to load the training dataset")?;
        let classes = train.classes().clone();
        let input_channels = train.input_channels();

        let train_roidb = {
            let roidb = prepare_roidb(&train, config.use_flipped);
            let roidb = if config.filter_empty {
                filter_roidb(roidb)
            } else {
                roidb
            };
            ensure!(!roidb.is_empty(), "no training images left");
            roidb
        };

        let validation_roidb = match &config.validation {
            Some(kind) => {
                let validation = load_dataset(config, kind)
                    .await
                    .with_context(|| "unable to load the validation dataset")?;
                ensure!(
                    validation.classes().iter().eq(classes.iter()),
                    "the validation dataset must have the same classes as the training dataset"
                );
                ensure!(
                    validation.input_channels() == input_channels,
                    "the validation dataset must have the same input channels as the training dataset"
                );
                let roidb = filter_roidb(prepare_roidb(&validation, false));
                if roidb.is_empty() {
                    warn!("the validation dataset has no annotated images, validation is disabled");
                    None
                } else {
                    Some(roidb)
                }
            }
            None => None,
        };

        info!(
            "{} classes, {} training entries, {} validation entries",
            classes.len(),
            train_roidb.len(),
            validation_roidb.as_ref().map(|roidb| roidb.len()).unwrap_or(0)
        );

        Ok(Self {
            classes,
            input_channels,
            train_roidb,
            validation_roidb,
        })
    }
}

async fn load_dataset(config: &DatasetConfig, kind: &DatasetKind) -> Result<Box<dyn FileDataset>> {
    let DatasetConfig {
        ref class_whitelist,
        ref sanitizer,
        ..
    } = *config;

    let dataset: Box<dyn FileDataset> = match kind {
        DatasetKind::Voc {
            dataset_dir,
            split,
            classes_file,
            image_dir_name,
            normalized_coordinates,
            input_channels,
        } => {
            let dataset = VocDatasetInit {
                dataset_dir,
                split,
                image_dir_name,
                classes_file,
                class_whitelist: class_whitelist.clone(),
                normalized_coordinates: *normalized_coordinates,
                input_channels: *input_channels,
            }
            .load()
            .await?;
            Box::new(dataset)
        }
        DatasetKind::Coco {
            annotation_file,
            image_dir,
            classes_file,
        } => {
            let dataset =
                CocoDataset::load(annotation_file, image_dir, classes_file, class_whitelist.clone())
                    .await?;
            Box::new(dataset)
        }
        DatasetKind::Csv {
            image_dir,
            label_file,
            classes_file,
            input_channels,
        } => {
            let dataset = CsvDataset::load(
                image_dir,
                label_file,
                classes_file,
                *input_channels,
                class_whitelist.clone(),
            )
            .await?;
            Box::new(dataset)
        }
    };

    let dataset = SanitizedDataset::new(
        dataset,
        sanitizer.out_of_bound_tolerance,
        sanitizer.min_bbox_size,
    )?;
    Ok(Box::new(dataset))
}

/// The data layer options with padding aligned to the model strides.
pub fn aligned_data_layer_config(config: &Config) -> DataLayerConfig {
    let unit = config.model.size_unit();
    let pad_to = match config.data_layer.pad_to {
        0 => unit,
        pad_to => lcm(pad_to, unit),
    };
    DataLayerConfig {
        pad_to,
        ..config.data_layer.clone()
    }
}

/// Produces training batches, optionally on background threads.
///
/// Prefetch workers split the roidb into disjoint shards, so one epoch of
/// every worker visits each entry once.
#[derive(Debug)]
pub enum BatchSource {
    Direct {
        layer: RoiDataLayer,
        max_attempts: usize,
    },
    Prefetch(PrefetchWrapper<Blob>),
}

impl BatchSource {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        roidb: Vec<Arc<RoiEntry>>,
        num_classes: usize,
        input_channels: usize,
        builder: Arc<GroundTruthBuilder>,
        config: DataLayerConfig,
        prefetch: &PrefetchConfig,
        max_attempts: usize,
        seed: Option<u64>,
    ) -> Result<Self> {
        let source = if prefetch.enabled {
            let num_workers = prefetch.num_workers.min(roidb.len());
            info!("prefetch batches with {} workers", num_workers);
            let wrapper = PrefetchWrapper::new(num_workers, prefetch.capacity, |index| {
                let mut layer = RoiDataLayer::new(
                    shard(&roidb, index, num_workers),
                    num_classes,
                    input_channels,
                    builder.clone(),
                    config.clone(),
                    false,
                    seed.map(|seed| seed + index as u64),
                )?;
                Ok(move || layer.forward_nonempty(max_attempts))
            })?;
            Self::Prefetch(wrapper)
        } else {
            let layer = RoiDataLayer::new(
                roidb,
                num_classes,
                input_channels,
                builder,
                config,
                false,
                seed,
            )?;
            Self::Direct {
                layer,
                max_attempts,
            }
        };
        Ok(source)
    }

    pub fn next_batch(&mut self) -> Result<Blob> {
        match self {
            Self::Direct {
                layer,
                max_attempts,
            } => layer.forward_nonempty(*max_attempts),
            Self::Prefetch(wrapper) => wrapper.get_item(),
        }
    }
}

/// Every `num_shards`-th item starting at `index`.
fn shard<T>(items: &[T], index: usize, num_shards: usize) -> Vec<T>
where
    T: Clone,
{
    items
        .iter()
        .skip(index)
        .step_by(num_shards)
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shards_cover_items_once() {
        let items: Vec<usize> = (0..10).collect();
        let shards: Vec<Vec<usize>> = (0..3).map(|index| shard(&items, index, 3)).collect();

        assert_eq!(shards[0], vec![0, 3, 6, 9]);
        assert_eq!(shards[2], vec![2, 5, 8]);
        let mut all: Vec<usize> = shards.into_iter().flatten().collect();
        all.sort_unstable();
        assert_eq!(all, items);
    }
}
