//! Ground-truth stamping.
//!
//! Object annotations are rasterized into dense per-pixel targets, one set of
//! maps per [TrainingAssignment] and downsampling factor.

mod balance;
mod config;
mod marker;
mod stamp;

pub use balance::*;
pub use config::*;
pub use marker::*;
pub use stamp::*;

use crate::common::*;

/// Target of one head at one stride.
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    /// Continuous values in `[channel, y, x]` layout.
    Dense(Array3<f32>),
    /// Class indexes for softmax heads.
    Sparse(Array2<i64>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TargetMap {
    pub target: Target,
    pub weights: Array2<f32>,
}

/// Produces the targets of all assignments for a padded image.
#[derive(Debug, Clone)]
pub struct GroundTruthBuilder {
    assignments: Vec<TrainingAssignment>,
    templates: Vec<Option<MarkerTemplate>>,
}

impl Target {
    pub fn size(&self) -> HW<usize> {
        match self {
            Self::Dense(array) => {
                let (_, h, w) = array.dim();
                HW::new(h, w)
            }
            Self::Sparse(array) => {
                let (h, w) = array.dim();
                HW::new(h, w)
            }
        }
    }
}

impl GroundTruthBuilder {
    pub fn new(assignments: Vec<TrainingAssignment>) -> Result<Self> {
        ensure!(
            !assignments.is_empty(),
            "at least one assignment is required"
        );
        assignments
            .iter()
            .enumerate()
            .try_for_each(|(index, assignment)| {
                assignment
                    .validate()
                    .with_context(|| format!("invalid training assignment {}", index))
            })?;

        let templates = assignments
            .iter()
            .map(|assignment| {
                let MarkerConfig {
                    shape, marker_dim, ..
                } = assignment.marker;
                marker_dim.map(|dim| MarkerTemplate::new(shape, dim))
            })
            .collect();

        Ok(Self {
            assignments,
            templates,
        })
    }

    pub fn assignments(&self) -> &[TrainingAssignment] {
        &self.assignments
    }

    /// The image side must be a multiple of this unit so that every map
    /// has an integral size.
    pub fn size_unit(&self) -> usize {
        self.assignments
            .iter()
            .map(|assignment| assignment.max_ds_factor())
            .max()
            .unwrap_or(1)
    }

    /// Builds `targets[assignment][ds_factor_index]` for an image of `size`.
    pub fn build(&self, size: &HW<usize>, labels: &[PixelLabel]) -> Vec<Vec<TargetMap>> {
        // stamping order matters only for the Last overlap solution
        let by_area_desc: Vec<&PixelLabel> = labels
            .iter()
            .sorted_by_key(|label| cmp::Reverse(label.rect.area()))
            .collect();
        let object_classes: Vec<usize> = by_area_desc.iter().map(|label| label.class).collect();

        izip!(&self.assignments, &self.templates)
            .map(|(assignment, template)| {
                let ordered: &[&PixelLabel] = &by_area_desc;

                assignment
                    .ds_factors
                    .iter()
                    .map(|&factor| {
                        let canvas = if assignment.downsample_marker {
                            stamp_assignment(
                                assignment,
                                template.as_ref(),
                                &size.ceil_div(factor),
                                factor as f64,
                                ordered,
                            )
                        } else {
                            stamp_assignment(assignment, template.as_ref(), size, 1.0, ordered)
                                .subsample(factor)
                        };
                        to_target_map(assignment, canvas, &object_classes)
                    })
                    .collect()
            })
            .collect()
    }
}

/// Builds the targets of one image without keeping a builder around.
pub fn build_targets(
    image_size: &HW<usize>,
    labels: &[PixelLabel],
    assignments: &[TrainingAssignment],
) -> Result<Vec<Vec<TargetMap>>> {
    let builder = GroundTruthBuilder::new(assignments.to_vec())?;
    Ok(builder.build(image_size, labels))
}

fn stamp_assignment(
    assignment: &TrainingAssignment,
    template: Option<&MarkerTemplate>,
    map_size: &HW<usize>,
    scale: f64,
    labels: &[&PixelLabel],
) -> StampCanvas {
    let channels = match assignment.stamp {
        StampKind::BBox => 2,
        _ => 1,
    };
    let mut canvas = StampCanvas::new(map_size, channels, assignment.overlap_solution);

    labels.iter().enumerate().for_each(|(object, label)| {
        let marker = Marker::new(&label.rect, scale, &assignment.marker, template);

        match assignment.stamp {
            StampKind::Energy { energy_shape, .. } => {
                stamp_energy(&mut canvas, &marker, object, energy_shape);
            }
            StampKind::Class { class_resolution } => {
                let value = match class_resolution {
                    ClassResolution::Class => label.class + 1,
                    ClassResolution::Binary => 1,
                };
                stamp_class(&mut canvas, &marker, object, value);
            }
            StampKind::BBox => {
                let hw = [label.rect.h().raw() as f32, label.rect.w().raw() as f32];
                stamp_bbox(&mut canvas, &marker, object, hw);
            }
        }
    });

    canvas
}

fn to_target_map(
    assignment: &TrainingAssignment,
    canvas: StampCanvas,
    object_classes: &[usize],
) -> TargetMap {
    let weights = balance_weights(
        canvas.owner.view(),
        object_classes,
        assignment.balance_mask,
        assignment.balance_coef.raw(),
    );

    let StampCanvas { values, .. } = canvas;
    let target = match assignment.stamp {
        StampKind::Energy {
            num_levels,
            loss: StampLoss::Softmax,
            ..
        } => {
            let max_level = (num_levels - 1) as f32;
            Target::Sparse(
                values
                    .index_axis(Axis(0), 0)
                    .mapv(|energy| (energy * max_level).round() as i64),
            )
        }
        StampKind::Class { .. } => {
            Target::Sparse(values.index_axis(Axis(0), 0).mapv(|class| class as i64))
        }
        StampKind::Energy {
            loss: StampLoss::Regression,
            ..
        }
        | StampKind::BBox => Target::Dense(values),
    };

    TargetMap { target, weights }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn label(t: f64, l: f64, b: f64, r: f64, class: usize) -> PixelLabel {
        Label {
            rect: TLBR::try_from_tlbr([r64(t), r64(l), r64(b), r64(r)]).unwrap(),
            class,
        }
    }

    fn energy_assignment(ds_factors: Vec<usize>, downsample_marker: bool) -> TrainingAssignment {
        TrainingAssignment {
            ds_factors,
            downsample_marker,
            overlap_solution: OverlapSolution::Max,
            stamp: StampKind::Energy {
                num_levels: 5,
                energy_shape: EnergyShape::Linear,
                loss: StampLoss::Softmax,
            },
            marker: MarkerConfig::default(),
            layer_loss_aggregate: LayerAggregate::Avg,
            balance_mask: BalanceMask::FgBgBalanced,
            balance_coef: r64(0.5),
        }
    }

    #[test]
    fn build_targets_matches_builder() {
        let assignments = vec![energy_assignment(vec![1, 2], true)];
        let size = HW::new(8, 8);
        let labels = vec![label(1.0, 1.0, 7.0, 7.0, 0)];
        let targets = build_targets(&size, &labels, &assignments).unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].len(), 2);
        assert_eq!(targets[0][1].target.size(), HW::new(4, 4));
    }

    #[test]
    fn builds_maps_for_every_factor() {
        let builder = GroundTruthBuilder::new(vec![
            energy_assignment(vec![1, 4], true),
            TrainingAssignment {
                stamp: StampKind::Class {
                    class_resolution: ClassResolution::Class,
                },
                ..energy_assignment(vec![2], false)
            },
            TrainingAssignment {
                stamp: StampKind::BBox,
                balance_mask: BalanceMask::MaskBg,
                ..energy_assignment(vec![1], true)
            },
        ])
        .unwrap();
        assert_eq!(builder.size_unit(), 4);

        let size = HW::new(32, 32);
        let labels = vec![
            label(4.0, 4.0, 15.0, 15.0, 2),
            label(20.0, 18.0, 30.0, 26.0, 0),
        ];
        let targets = builder.build(&size, &labels);

        assert_eq!(targets.len(), 3);
        assert_eq!(targets[0].len(), 2);
        assert_eq!(targets[0][0].target.size().hw(), [32, 32]);
        assert_eq!(targets[0][1].target.size().hw(), [8, 8]);
        assert_eq!(targets[1][0].target.size().hw(), [16, 16]);

        match &targets[0][0].target {
            Target::Sparse(levels) => {
                assert_eq!(levels[[9, 9]], 4);
                assert_eq!(levels[[0, 0]], 0);
                assert!(levels.iter().all(|&level| (0..5).contains(&level)));
            }
            _ => panic!("energy softmax target must be sparse"),
        }

        match &targets[1][0].target {
            Target::Sparse(classes) => {
                assert_eq!(classes[[4, 4]], 3);
                assert_eq!(classes[[12, 11]], 1);
                assert_eq!(classes[[0, 15]], 0);
            }
            _ => panic!("class target must be sparse"),
        }

        match &targets[2][0].target {
            Target::Dense(sizes) => {
                assert_abs_diff_eq!(sizes[[0, 9, 9]], 11.0);
                assert_abs_diff_eq!(sizes[[1, 25, 22]], 8.0);
                assert_abs_diff_eq!(sizes[[0, 0, 0]], 0.0);
            }
            _ => panic!("bbox target must be dense"),
        }
        assert_abs_diff_eq!(targets[2][0].weights[[0, 0]], 0.0);
    }

    #[test]
    fn tiny_objects_survive_subsampling() {
        let class_assignment = |downsample_marker| TrainingAssignment {
            stamp: StampKind::Class {
                class_resolution: ClassResolution::Class,
            },
            ..energy_assignment(vec![4], downsample_marker)
        };
        let size = HW::new(16, 16);
        let labels = vec![label(0.0, 0.0, 2.0, 2.0, 1)];

        [false, true].iter().for_each(|&downsample_marker| {
            let targets =
                build_targets(&size, &labels, &[class_assignment(downsample_marker)]).unwrap();
            match &targets[0][0].target {
                Target::Sparse(classes) => {
                    assert_eq!(classes.dim(), (4, 4));
                    assert_eq!(classes.iter().filter(|&&class| class > 0).count(), 1);
                    assert_eq!(classes[[0, 0]], 2);
                }
                _ => panic!("class target must be sparse"),
            }
        });
    }

    #[test]
    fn quadratic_energy_levels() {
        let assignment = TrainingAssignment {
            stamp: StampKind::Energy {
                num_levels: 8,
                energy_shape: EnergyShape::Quadratic,
                loss: StampLoss::Softmax,
            },
            ..energy_assignment(vec![1], true)
        };
        let size = HW::new(16, 16);
        let labels = vec![label(0.0, 0.0, 16.0, 16.0, 0)];
        let targets = build_targets(&size, &labels, &[assignment]).unwrap();

        match &targets[0][0].target {
            Target::Sparse(levels) => {
                let row: Vec<i64> = levels.row(8).to_vec();
                assert_eq!(row, vec![0, 0, 2, 3, 5, 6, 7, 7, 7, 7, 6, 5, 3, 2, 0, 0]);
            }
            _ => panic!("energy softmax target must be sparse"),
        }
    }

    #[test]
    fn regression_energy_is_dense() {
        let assignment = TrainingAssignment {
            stamp: StampKind::Energy {
                num_levels: 8,
                energy_shape: EnergyShape::Quadratic,
                loss: StampLoss::Regression,
            },
            ..energy_assignment(vec![1], true)
        };
        assert_eq!(assignment.head_channels(3), 1);

        let size = HW::new(16, 16);
        let labels = vec![label(0.0, 0.0, 16.0, 16.0, 0)];
        let targets = build_targets(&size, &labels, &[assignment]).unwrap();

        match &targets[0][0].target {
            Target::Dense(energy) => {
                assert_eq!(energy.dim(), (1, 16, 16));
                assert_abs_diff_eq!(energy[[0, 8, 8]], 0.99, epsilon = 0.01);
                assert_abs_diff_eq!(energy[[0, 0, 0]], 0.0);
                assert!(energy.iter().all(|&value| (0.0..=1.0).contains(&value)));
            }
            _ => panic!("energy regression target must be dense"),
        }
    }

    #[test]
    fn reject_invalid_assignment() {
        let mut assignment = energy_assignment(vec![3], true);
        assert!(GroundTruthBuilder::new(vec![assignment.clone()]).is_err());
        assignment.ds_factors = vec![2];
        assignment.balance_coef = r64(1.5);
        assert!(GroundTruthBuilder::new(vec![assignment]).is_err());
    }

    #[test]
    fn head_channels_follow_stamp_kind() {
        let energy = energy_assignment(vec![1], true);
        assert_eq!(energy.head_channels(10), 5);
        let class = TrainingAssignment {
            stamp: StampKind::Class {
                class_resolution: ClassResolution::Binary,
            },
            ..energy.clone()
        };
        assert_eq!(class.head_channels(10), 2);
        let bbox = TrainingAssignment {
            stamp: StampKind::BBox,
            ..energy
        };
        assert_eq!(bbox.head_channels(10), 2);
    }
}
