//! Weighted per-pixel losses of the network heads.

use crate::{
    common::*,
    data_layer::TargetTensors,
    groundtruth::{LayerAggregate, TrainingAssignment},
    model::DwdModelOutput,
    utils::f_sum_tensors,
};

const WEIGHT_EPSILON: f64 = 1e-6;

#[derive(Debug, Clone)]
pub struct DwdLoss {
    assignments: Vec<TrainingAssignment>,
}

#[derive(Debug, TensorLike)]
pub struct DwdLossOutput {
    /// Scalar loss of each assignment, aggregated over strides.
    pub task_losses: Vec<Tensor>,
    /// `layer_losses[assignment][ds_factor_index]`
    pub layer_losses: Vec<Vec<Tensor>>,
}

impl DwdLoss {
    pub fn new(assignments: Vec<TrainingAssignment>) -> Self {
        Self { assignments }
    }

    pub fn assignments(&self) -> &[TrainingAssignment] {
        &self.assignments
    }

    pub fn forward(
        &self,
        output: &DwdModelOutput,
        targets: &[Vec<TargetTensors>],
    ) -> Result<DwdLossOutput> {
        ensure!(
            output.maps.len() == self.assignments.len() && targets.len() == self.assignments.len(),
            "expect {} assignments, but get {} outputs and {} targets",
            self.assignments.len(),
            output.maps.len(),
            targets.len()
        );

        let (task_losses, layer_losses) = itertools::process_results(
            izip!(&self.assignments, &output.maps, targets)
                .enumerate()
                .map(|(index, (assign, preds, targets))| -> Result<_> {
                    ensure!(
                        preds.len() == assign.ds_factors.len()
                            && targets.len() == assign.ds_factors.len(),
                        "assignment {} has {} strides, but get {} outputs and {} targets",
                        index,
                        assign.ds_factors.len(),
                        preds.len(),
                        targets.len()
                    );

                    let layer_losses: Vec<Tensor> = izip!(preds, targets)
                        .map(|(pred, target)| {
                            let TargetTensors { target, weights } = target;
                            let target = target.to_device(pred.device());
                            let weights = weights.to_device(pred.device());

                            if assign.is_softmax() {
                                weighted_cross_entropy(pred, &target, &weights)
                            } else {
                                weighted_l2(pred, &target, &weights)
                            }
                        })
                        .try_collect()?;

                    let sum = f_sum_tensors(&layer_losses)?;
                    let task_loss = match assign.layer_loss_aggregate {
                        LayerAggregate::Sum => sum,
                        LayerAggregate::Avg => sum / layer_losses.len() as f64,
                    };

                    Ok((task_loss, layer_losses))
                }),
            |iter| iter.unzip(),
        )?;

        Ok(DwdLossOutput {
            task_losses,
            layer_losses,
        })
    }
}

impl DwdLossOutput {
    pub fn task_loss(&self, assignment: usize) -> Result<&Tensor> {
        self.task_losses.get(assignment).ok_or_else(|| {
            format_err!(
                "assignment index {} out of range, the model has {} assignments",
                assignment,
                self.task_losses.len()
            )
        })
    }

    /// Weighted sum of the losses of several assignments.
    pub fn combined(&self, assigns: &[usize], loss_factors: &[R64]) -> Result<Tensor> {
        ensure!(
            assigns.len() == loss_factors.len(),
            "{} assignments but {} loss factors",
            assigns.len(),
            loss_factors.len()
        );
        ensure!(!assigns.is_empty(), "no assignment to combine");

        let terms: Vec<_> = izip!(assigns, loss_factors)
            .map(|(&assign, factor)| -> Result<_> { Ok(self.task_loss(assign)? * factor.raw()) })
            .try_collect()?;
        f_sum_tensors(terms)
    }

    /// Sum of all assignment losses.
    pub fn total(&self) -> Result<Tensor> {
        f_sum_tensors(&self.task_losses)
    }
}

/// Softmax cross entropy of `[b, c, h, w]` logits against `[b, h, w]` int64 targets.
fn weighted_cross_entropy(logits: &Tensor, target: &Tensor, weights: &Tensor) -> Result<Tensor> {
    let (batch, _, height, width) = logits.size4()?;
    ensure!(
        target.size() == [batch, height, width],
        "target shape {:?} does not match logits shape {:?}",
        target.size(),
        logits.size()
    );
    ensure!(
        weights.size() == target.size(),
        "weights shape {:?} does not match target shape {:?}",
        weights.size(),
        target.size()
    );

    let nll = -logits
        .log_softmax(1, Kind::Float)
        .f_gather(1, &target.unsqueeze(1), false)?
        .squeeze_dim(1);
    Ok(weighted_mean(&nll, weights))
}

/// Squared error of `[b, c, h, w]` predictions against targets of the same shape.
fn weighted_l2(pred: &Tensor, target: &Tensor, weights: &Tensor) -> Result<Tensor> {
    let (batch, channels, height, width) = pred.size4()?;
    ensure!(
        target.size() == pred.size(),
        "target shape {:?} does not match prediction shape {:?}",
        target.size(),
        pred.size()
    );
    ensure!(
        weights.size() == [batch, height, width],
        "weights shape {:?} does not match prediction shape {:?}",
        weights.size(),
        pred.size()
    );

    let diff = pred - target;
    let squared_error = (&diff * &diff).sum_dim_intlist(&[1], false, Kind::Float) / channels as f64;
    Ok(weighted_mean(&squared_error, weights))
}

fn weighted_mean(loss: &Tensor, weights: &Tensor) -> Tensor {
    let total_weight = weights.sum(Kind::Float).clamp_min(WEIGHT_EPSILON);
    (loss * weights).sum(Kind::Float) / total_weight
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::groundtruth::StampKind;

    fn assignment(stamp: StampKind, ds_factors: Vec<usize>) -> TrainingAssignment {
        serde_json::from_value(serde_json::json!({
            "ds_factors": ds_factors,
            "stamp": serde_json::to_value(&stamp).unwrap(),
        }))
        .unwrap()
    }

    #[test]
    fn cross_entropy_respects_weights() -> Result<()> {
        // pixel 0 is predicted confidently right, pixel 1 confidently wrong
        let logits = Tensor::of_slice(&[10f32, -10.0, -10.0, 10.0]).view([1, 2, 1, 2]);
        let target = Tensor::of_slice(&[0i64, 0]).view([1, 1, 2]);

        let right_only = Tensor::of_slice(&[1f32, 0.0]).view([1, 1, 2]);
        let loss = weighted_cross_entropy(&logits, &target, &right_only)?;
        assert!(f64::from(&loss) < 1e-6);

        let wrong_only = Tensor::of_slice(&[0f32, 1.0]).view([1, 1, 2]);
        let loss = weighted_cross_entropy(&logits, &target, &wrong_only)?;
        assert_abs_diff_eq!(f64::from(&loss), 20.0, epsilon = 1e-3);

        Ok(())
    }

    #[test]
    fn l2_of_zero_weights_is_zero() -> Result<()> {
        let pred = Tensor::ones(&[1, 2, 3, 3], (Kind::Float, Device::Cpu));
        let target = Tensor::zeros(&[1, 2, 3, 3], (Kind::Float, Device::Cpu));
        let weights = Tensor::zeros(&[1, 3, 3], (Kind::Float, Device::Cpu));
        let loss = weighted_l2(&pred, &target, &weights)?;
        assert_abs_diff_eq!(f64::from(&loss), 0.0);

        let weights = Tensor::ones(&[1, 3, 3], (Kind::Float, Device::Cpu));
        let loss = weighted_l2(&pred, &target, &weights)?;
        assert_abs_diff_eq!(f64::from(&loss), 1.0, epsilon = 1e-6);
        Ok(())
    }

    #[test]
    fn aggregate_and_combine() -> Result<()> {
        let mut bbox = assignment(StampKind::BBox, vec![1, 2]);
        bbox.layer_loss_aggregate = LayerAggregate::Sum;
        let class = assignment(
            StampKind::Class {
                class_resolution: Default::default(),
            },
            vec![1],
        );
        let loss_fn = DwdLoss::new(vec![bbox, class]);

        let dense = |value: f64, size: i64| {
            Tensor::full(&[1, 2, size, size], value, (Kind::Float, Device::Cpu))
        };
        let ones = |size: i64| Tensor::ones(&[1, size, size], (Kind::Float, Device::Cpu));

        let output = DwdModelOutput {
            maps: vec![
                vec![dense(1.0, 4), dense(2.0, 2)],
                vec![Tensor::zeros(&[1, 3, 4, 4], (Kind::Float, Device::Cpu))],
            ],
        };
        let targets = vec![
            vec![
                TargetTensors {
                    target: dense(0.0, 4),
                    weights: ones(4),
                },
                TargetTensors {
                    target: dense(0.0, 2),
                    weights: ones(2),
                },
            ],
            vec![TargetTensors {
                target: Tensor::zeros(&[1, 4, 4], (Kind::Int64, Device::Cpu)),
                weights: ones(4),
            }],
        ];

        let losses = loss_fn.forward(&output, &targets)?;
        // 1^2 + 2^2 summed over strides
        assert_abs_diff_eq!(f64::from(losses.task_loss(0)?), 5.0, epsilon = 1e-5);
        // uniform logits over 3 classes
        assert_abs_diff_eq!(f64::from(losses.task_loss(1)?), 3f64.ln(), epsilon = 1e-5);

        let combined = losses.combined(&[0, 1], &[r64(0.5), r64(2.0)])?;
        assert_abs_diff_eq!(f64::from(&combined), 2.5 + 2.0 * 3f64.ln(), epsilon = 1e-5);
        assert!(losses.task_loss(2).is_err());
        assert!(loss_fn.forward(&output, &targets[..1]).is_err());
        Ok(())
    }
}
