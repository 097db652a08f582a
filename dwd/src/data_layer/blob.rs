use crate::{
    common::*,
    groundtruth::{Target, TargetMap},
    utils::array_to_tensor,
};

/// A batch produced by the data layer.
#[derive(Debug, Clone)]
pub struct Blob {
    /// Padded images in `[batch, channel, y, x]` layout.
    pub data: Array4<f32>,
    /// Objects of each image in padded image pixels.
    pub gt_boxes: Vec<Vec<PixelLabel>>,
    /// `targets[assignment][ds_factor_index]`.
    pub targets: Vec<Vec<BatchTarget>>,
    /// Roidb indexes of the images.
    pub indexes: Vec<usize>,
    pub epoch: usize,
    pub step: usize,
}

#[derive(Debug, Clone)]
pub struct BatchTarget {
    pub values: BatchValues,
    /// Loss weights in `[batch, y, x]` layout.
    pub weights: Array3<f32>,
}

#[derive(Debug, Clone)]
pub enum BatchValues {
    /// `[batch, channel, y, x]`
    Dense(Array4<f32>),
    /// `[batch, y, x]`
    Sparse(Array3<i64>),
}

/// Tensors of a [Blob], ready for the network.
#[derive(Debug, TensorLike)]
pub struct BlobTensors {
    pub image: Tensor,
    pub targets: Vec<Vec<TargetTensors>>,
    #[tensor_like(clone)]
    pub gt_boxes: Vec<Vec<PixelLabel>>,
    #[tensor_like(copy)]
    pub step: usize,
}

#[derive(Debug, TensorLike)]
pub struct TargetTensors {
    /// Float values for dense targets, int64 indexes for sparse targets.
    pub target: Tensor,
    pub weights: Tensor,
}

impl Blob {
    pub fn batch_size(&self) -> usize {
        self.data.dim().0
    }

    pub fn image_size(&self) -> HW<usize> {
        let (_, _, h, w) = self.data.dim();
        HW::new(h, w)
    }

    pub fn num_boxes(&self) -> usize {
        self.gt_boxes.iter().map(Vec::len).sum()
    }

    /// Converts the batch to CPU tensors.
    pub fn to_tensors(&self) -> Result<BlobTensors> {
        let targets = self
            .targets
            .iter()
            .map(|per_factor| {
                per_factor
                    .iter()
                    .map(|target| -> Result<_> {
                        let tensor = match &target.values {
                            BatchValues::Dense(array) => array_to_tensor(array)?,
                            BatchValues::Sparse(array) => array_to_tensor(array)?,
                        };
                        Ok(TargetTensors {
                            target: tensor,
                            weights: array_to_tensor(&target.weights)?,
                        })
                    })
                    .try_collect()
            })
            .try_collect()?;

        Ok(BlobTensors {
            image: array_to_tensor(&self.data)?,
            targets,
            gt_boxes: self.gt_boxes.clone(),
            step: self.step,
        })
    }
}

impl BatchTarget {
    /// Stacks per-image maps along a new batch axis.
    pub fn stack(maps: &[&TargetMap]) -> Result<Self> {
        let weights = {
            let views: Vec<_> = maps.iter().map(|map| map.weights.view()).collect();
            ndarray::stack(Axis(0), &views)?
        };

        let values = match maps.first().map(|map| &map.target) {
            Some(Target::Sparse(_)) => {
                let views: Vec<_> = maps
                    .iter()
                    .map(|map| match &map.target {
                        Target::Sparse(array) => Ok(array.view()),
                        Target::Dense(_) => Err(format_err!("mixed target kinds in a batch")),
                    })
                    .try_collect()?;
                BatchValues::Sparse(ndarray::stack(Axis(0), &views)?)
            }
            Some(Target::Dense(_)) => {
                let views: Vec<_> = maps
                    .iter()
                    .map(|map| match &map.target {
                        Target::Dense(array) => Ok(array.view()),
                        Target::Sparse(_) => Err(format_err!("mixed target kinds in a batch")),
                    })
                    .try_collect()?;
                BatchValues::Dense(ndarray::stack(Axis(0), &views)?)
            }
            None => bail!("cannot stack an empty batch"),
        };

        Ok(Self { values, weights })
    }
}
