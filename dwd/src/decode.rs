//! Turns network outputs into detections.

use crate::{
    common::*,
    dws::{classes_from_logits, energy_levels_from_logits, perform_dws, Detection, DwsConfig},
    groundtruth::{StampKind, TrainingAssignment},
    model::DwdModelOutput,
    utils::tensor_to_array,
};
use ndarray::Ix4;

/// Output location of one head at one stride.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HeadIndex {
    pub assignment: usize,
    pub layer: usize,
}

/// The energy, class and bbox heads the watershed transform reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DwsHeads {
    pub energy: HeadIndex,
    pub class: HeadIndex,
    pub bbox: HeadIndex,
    pub ds_factor: usize,
}

/// Decoded maps of one image.
#[derive(Debug, Clone)]
pub struct DecodedMaps {
    pub energy: Array2<f32>,
    pub classes: Array2<i64>,
    /// `[2, y, x]` box heights and widths.
    pub bbox: Array3<f32>,
}

impl DwsHeads {
    /// Picks the finest stride at which energy, class and bbox heads all exist.
    pub fn from_assignments(assignments: &[TrainingAssignment]) -> Result<Self> {
        let find = |ds_factor: usize, pred: &dyn Fn(&StampKind) -> bool| {
            assignments
                .iter()
                .enumerate()
                .filter(|(_, assign)| pred(&assign.stamp))
                .find_map(|(assignment, assign)| {
                    let layer = assign.ds_factors.iter().position(|&f| f == ds_factor)?;
                    Some(HeadIndex { assignment, layer })
                })
        };

        assignments
            .iter()
            .flat_map(|assign| assign.ds_factors.iter().copied())
            .sorted()
            .dedup()
            .find_map(|ds_factor| {
                Some(Self {
                    energy: find(ds_factor, &|stamp: &StampKind| matches!(stamp, StampKind::Energy { .. }))?,
                    class: find(ds_factor, &|stamp: &StampKind| matches!(stamp, StampKind::Class { .. }))?,
                    bbox: find(ds_factor, &|stamp: &StampKind| matches!(stamp, StampKind::BBox))?,
                    ds_factor,
                })
            })
            .ok_or_else(|| {
                format_err!(
                    "the watershed transform requires energy, class and bbox assignments sharing a ds_factor"
                )
            })
    }

    /// Copies the relevant head outputs to the CPU and decodes them per image.
    pub fn decode_maps(&self, output: &DwdModelOutput) -> Result<Vec<DecodedMaps>> {
        let head = |index: HeadIndex| -> Result<_> {
            let tensor = output
                .maps
                .get(index.assignment)
                .and_then(|layers| layers.get(index.layer))
                .ok_or_else(|| format_err!("missing model output for {:?}", index))?;
            tensor_to_array::<f32, Ix4>(&tensor.detach())
        };
        let energy = head(self.energy)?;
        let classes = head(self.class)?;
        let bbox = head(self.bbox)?;
        ensure!(
            bbox.dim().1 == 2,
            "bbox head must have 2 channels, but get {}",
            bbox.dim().1
        );

        let maps = izip!(energy.outer_iter(), classes.outer_iter(), bbox.outer_iter())
            .map(|(energy, classes, bbox)| DecodedMaps {
                energy: energy_levels_from_logits(energy),
                classes: classes_from_logits(classes),
                bbox: bbox.to_owned(),
            })
            .collect();
        Ok(maps)
    }

    /// Runs the watershed transform on every image of the batch.
    pub fn decode(
        &self,
        output: &DwdModelOutput,
        config: &DwsConfig,
    ) -> Result<Vec<Vec<Detection>>> {
        self.decode_maps(output)?
            .iter()
            .map(|maps| {
                perform_dws(
                    maps.energy.view(),
                    maps.classes.view(),
                    maps.bbox.view(),
                    self.ds_factor,
                    config,
                )
            })
            .try_collect()
    }
}
