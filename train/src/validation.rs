//! Validation metrics.

use crate::common::*;
use bbox::prelude::*;
use dwd::dws::Detection;

/// Box level matching counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DetectionStats {
    pub true_positives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
}

impl DetectionStats {
    /// Matches detections to ground truth boxes of the same class.
    ///
    /// Detections are visited in descending score order and take the
    /// unmatched ground truth box with the largest IoU, if it reaches
    /// `iou_threshold`.
    pub fn accumulate(
        &mut self,
        detections: &[Detection],
        ground_truth: &[PixelLabel],
        iou_threshold: R64,
    ) {
        let mut matched = vec![false; ground_truth.len()];
        let detections = detections
            .iter()
            .sorted_by(|lhs, rhs| rhs.score.cmp(&lhs.score));

        for detection in detections {
            let best = ground_truth
                .iter()
                .enumerate()
                .filter(|(index, label)| !matched[*index] && label.class == detection.class)
                .map(|(index, label)| (index, detection.rect.iou_with(&label.rect, r64(1e-8))))
                .filter(|(_, iou)| *iou >= iou_threshold)
                .max_by_key(|(_, iou)| *iou);

            match best {
                Some((index, _)) => {
                    matched[index] = true;
                    self.true_positives += 1;
                }
                None => self.false_positives += 1,
            }
        }

        self.false_negatives += matched.iter().filter(|&&matched| !matched).count();
    }

    pub fn precision(&self) -> f64 {
        let predicted = self.true_positives + self.false_positives;
        if predicted == 0 {
            0.0
        } else {
            self.true_positives as f64 / predicted as f64
        }
    }

    pub fn recall(&self) -> f64 {
        let expected = self.true_positives + self.false_negatives;
        if expected == 0 {
            0.0
        } else {
            self.true_positives as f64 / expected as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bbox::TLBR;
    use label::Label;

    fn rect(t: f64, l: f64, b: f64, r: f64) -> TLBR<R64> {
        TLBR::try_from_tlbr([r64(t), r64(l), r64(b), r64(r)]).unwrap()
    }

    fn detection(rect: TLBR<R64>, class: usize, score: f64) -> Detection {
        Detection {
            rect,
            class,
            score: r64(score),
            area: 1,
        }
    }

    #[test]
    fn greedy_matching() {
        let ground_truth = vec![
            Label {
                rect: rect(0.0, 0.0, 10.0, 10.0),
                class: 0,
            },
            Label {
                rect: rect(20.0, 20.0, 30.0, 30.0),
                class: 1,
            },
            Label {
                rect: rect(40.0, 40.0, 50.0, 50.0),
                class: 1,
            },
        ];
        let detections = vec![
            // duplicate with a lower score
            detection(rect(0.0, 0.0, 10.0, 9.0), 0, 0.5),
            detection(rect(0.0, 0.0, 10.0, 10.0), 0, 0.9),
            // wrong class
            detection(rect(20.0, 20.0, 30.0, 30.0), 0, 0.8),
            detection(rect(41.0, 41.0, 50.0, 50.0), 1, 0.7),
        ];

        let mut stats = DetectionStats::default();
        stats.accumulate(&detections, &ground_truth, r64(0.5));
        assert_eq!(
            stats,
            DetectionStats {
                true_positives: 2,
                false_positives: 2,
                false_negatives: 1,
            }
        );
        assert_abs_diff_eq!(stats.precision(), 0.5);
        assert_abs_diff_eq!(stats.recall(), 2.0 / 3.0);
    }

    #[test]
    fn empty_stats() {
        let stats = DetectionStats::default();
        assert_eq!(stats.precision(), 0.0);
        assert_eq!(stats.recall(), 0.0);
    }
}
