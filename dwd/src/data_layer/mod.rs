//! The RoI data layer serving shuffled, augmented training batches.

mod blob;
mod config;
mod minibatch;

pub use blob::*;
pub use config::*;
pub use minibatch::*;

use crate::{common::*, groundtruth::GroundTruthBuilder, roidb::RoiEntry, utils::lcm};

/// Serves batches of images with their stamped ground truth.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct RoiDataLayer {
    #[derivative(Debug = "ignore")]
    roidb: Vec<Arc<RoiEntry>>,
    config: DataLayerConfig,
    input_channels: usize,
    builder: Arc<GroundTruthBuilder>,
    /// Draw every batch at random instead of walking through epochs.
    random: bool,
    size_unit: usize,
    #[derivative(Debug = "ignore")]
    rng: StdRng,
    perm: Vec<usize>,
    cursor: usize,
    epoch: usize,
    step: usize,
}

impl RoiDataLayer {
    pub fn new(
        roidb: Vec<Arc<RoiEntry>>,
        num_classes: usize,
        input_channels: usize,
        builder: Arc<GroundTruthBuilder>,
        config: DataLayerConfig,
        random: bool,
        seed: Option<u64>,
    ) -> Result<Self> {
        config.validate()?;
        ensure!(!roidb.is_empty(), "the roidb is empty");
        ensure!(
            matches!(input_channels, 1 | 3),
            "input_channels must be either 1 or 3"
        );
        if let Some(entry) = roidb
            .iter()
            .find(|entry| entry.labels.iter().any(|label| label.class >= num_classes))
        {
            bail!(
                "'{}' has a class index out of range for {} classes",
                entry.path.display(),
                num_classes
            );
        }

        let size_unit = {
            let unit = builder.size_unit();
            match config.pad_to {
                0 => unit,
                pad_to => lcm(pad_to, unit),
            }
        };
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let mut layer = Self {
            roidb,
            config,
            input_channels,
            builder,
            random,
            size_unit,
            rng,
            perm: vec![],
            cursor: 0,
            epoch: 0,
            step: 0,
        };
        layer.shuffle_roidb_inds();
        Ok(layer)
    }

    pub fn len(&self) -> usize {
        self.roidb.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roidb.is_empty()
    }

    /// The number of completed passes over the roidb.
    pub fn epoch(&self) -> usize {
        self.epoch
    }

    pub fn size_unit(&self) -> usize {
        self.size_unit
    }

    /// Draws a fresh permutation of the roidb and rewinds the cursor.
    pub fn shuffle_roidb_inds(&mut self) {
        let mut perm: Vec<_> = (0..self.roidb.len()).collect();
        perm.shuffle(&mut self.rng);
        self.perm = perm;
        self.cursor = 0;
    }

    fn next_minibatch_inds(&mut self) -> Vec<usize> {
        let batch_size = self.config.batch_size;

        if self.random {
            let len = self.roidb.len();
            return (0..batch_size)
                .map(|_| self.rng.gen_range(0..len))
                .collect();
        }

        if self.cursor + batch_size > self.perm.len() {
            self.shuffle_roidb_inds();
            self.epoch += 1;
        }
        let end = (self.cursor + batch_size).min(self.perm.len());
        let inds = self.perm[self.cursor..end].to_vec();
        self.cursor = end;
        inds
    }

    /// Produces the next batch.
    pub fn forward(&mut self) -> Result<Blob> {
        let inds = self.next_minibatch_inds();
        let samples: Vec<Sample> = inds
            .iter()
            .map(|&index| {
                let entry = &self.roidb[index];
                load_sample(entry, &self.config, self.input_channels, &mut self.rng)
            })
            .try_collect()?;

        let blob = self.assemble(samples, inds)?;
        self.step += 1;
        Ok(blob)
    }

    /// Produces the next batch that contains at least one object.
    pub fn forward_nonempty(&mut self, max_attempts: usize) -> Result<Blob> {
        for _ in 0..max_attempts {
            let blob = self.forward()?;
            if blob.num_boxes() > 0 {
                return Ok(blob);
            }
        }
        bail!(
            "unable to load a batch with objects after {} attempts",
            max_attempts
        )
    }

    fn assemble(&self, samples: Vec<Sample>, indexes: Vec<usize>) -> Result<Blob> {
        let batch_size = samples.len();
        let channels = self.input_channels;
        let pad_with = self.config.pad_with.raw() as f32;

        // pad every image to the largest one, rounded to the size unit
        let size = samples
            .iter()
            .map(|sample| sample.size())
            .fold(HW::new(1, 1), |max, size| max.max(&size))
            .round_up_to(self.size_unit);
        let [height, width] = size.hw();

        let mut data = Array4::from_elem((batch_size, channels, height, width), pad_with);
        samples.iter().enumerate().for_each(|(index, sample)| {
            let [h, w] = sample.size().hw();
            data.slice_mut(s![index, .., 0..h, 0..w])
                .assign(&sample.image);
        });

        let per_sample: Vec<Vec<Vec<_>>> = samples
            .iter()
            .map(|sample| self.builder.build(&size, &sample.labels))
            .collect();

        let targets: Vec<Vec<BatchTarget>> = self
            .builder
            .assignments()
            .iter()
            .enumerate()
            .map(|(assign_index, assignment)| {
                (0..assignment.ds_factors.len())
                    .map(|factor_index| {
                        let maps: Vec<_> = per_sample
                            .iter()
                            .map(|targets| &targets[assign_index][factor_index])
                            .collect();
                        BatchTarget::stack(&maps)
                    })
                    .try_collect()
            })
            .try_collect()?;

        let gt_boxes = samples.into_iter().map(|sample| sample.labels).collect();

        Ok(Blob {
            data,
            gt_boxes,
            targets,
            indexes,
            epoch: self.epoch,
            step: self.step,
        })
    }
}
