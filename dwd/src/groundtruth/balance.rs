use super::BalanceMask;
use crate::common::*;

/// Computes per-pixel loss weights from the pixel ownership map.
///
/// `object_classes[i]` is the class of the object with index `i`. Weights are
/// scaled so that they average to one over the map.
pub fn balance_weights(
    owner: ArrayView2<i64>,
    object_classes: &[usize],
    mode: BalanceMask,
    coef: f64,
) -> Array2<f32> {
    let num_pixels = owner.len();
    let num_bg = owner.iter().filter(|&&index| index < 0).count();
    let num_fg = num_pixels - num_bg;

    let bg_weight = |share: f64| {
        if num_bg == 0 {
            0.0
        } else {
            share / num_bg as f64
        }
    };

    let weights: Array2<f64> = match mode {
        BalanceMask::None => return Array2::ones(owner.dim()),
        BalanceMask::MaskBg => owner.mapv(|index| if index < 0 { 0.0 } else { 1.0 }),
        _ if num_fg == 0 => return Array2::ones(owner.dim()),
        BalanceMask::FgBgBalanced => {
            let (bg_share, fg_share) = shares(coef, num_bg);
            let bg = bg_weight(bg_share);
            let fg = fg_share / num_fg as f64;
            owner.mapv(|index| if index < 0 { bg } else { fg })
        }
        BalanceMask::ByObject => {
            let counts = owner
                .iter()
                .filter(|&&index| index >= 0)
                .counts_by(|&index| index as usize);
            let (bg_share, fg_share) = shares(coef, num_bg);
            let bg = bg_weight(bg_share);
            let per_object = fg_share / counts.len() as f64;
            owner.mapv(|index| {
                if index < 0 {
                    bg
                } else {
                    per_object / counts[&(index as usize)] as f64
                }
            })
        }
        BalanceMask::ByClass => {
            let class_of = |index: i64| object_classes.get(index as usize).copied().unwrap_or(0);
            let counts = owner
                .iter()
                .filter(|&&index| index >= 0)
                .counts_by(|&index| class_of(index));
            let (bg_share, fg_share) = shares(coef, num_bg);
            let bg = bg_weight(bg_share);
            let per_class = fg_share / counts.len() as f64;
            owner.mapv(|index| {
                if index < 0 {
                    bg
                } else {
                    per_class / counts[&class_of(index)] as f64
                }
            })
        }
    };

    let total: f64 = weights.sum();
    if total <= 0.0 {
        return Array2::zeros(owner.dim());
    }
    let scale = num_pixels as f64 / total;
    weights.mapv(|weight| (weight * scale) as f32)
}

/// Splits the loss between background and foreground. The foreground takes
/// everything when there is no background.
fn shares(coef: f64, num_bg: usize) -> (f64, f64) {
    if num_bg == 0 {
        (0.0, 1.0)
    } else {
        (coef, 1.0 - coef)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn fg_bg_balanced_splits_by_coef() {
        let owner = array![[-1, -1, -1], [0, -1, -1]];
        let weights = balance_weights(owner.view(), &[0], BalanceMask::FgBgBalanced, 0.5);
        let fg: f32 = weights[[1, 0]];
        let bg: f32 = weights.iter().sum::<f32>() - fg;
        assert_abs_diff_eq!(fg, bg, epsilon = 1e-5);
        assert_abs_diff_eq!(weights.mean().unwrap(), 1.0, epsilon = 1e-5);
    }

    #[test]
    fn by_object_equalizes_objects() {
        let owner = array![[0, 0, 0, 1], [-1, -1, -1, -1]];
        let weights = balance_weights(owner.view(), &[0, 0], BalanceMask::ByObject, 0.0);
        let first: f32 = weights.slice(s![0, 0..3]).sum();
        assert_abs_diff_eq!(first, weights[[0, 3]], epsilon = 1e-5);
        assert_abs_diff_eq!(weights[[1, 0]], 0.0);
    }

    #[test]
    fn by_class_merges_objects_of_same_class() {
        let owner = array![[0, 1, 2, -1]];
        let weights = balance_weights(owner.view(), &[4, 4, 7], BalanceMask::ByClass, 0.0);
        assert_abs_diff_eq!(
            weights[[0, 0]] + weights[[0, 1]],
            weights[[0, 2]],
            epsilon = 1e-5
        );
    }

    #[test]
    fn mask_bg_and_empty_maps() {
        let owner = array![[0, -1]];
        let weights = balance_weights(owner.view(), &[0], BalanceMask::MaskBg, 0.5);
        assert_abs_diff_eq!(weights[[0, 1]], 0.0);
        assert!(weights[[0, 0]] > 0.0);

        let empty = array![[-1, -1]];
        let weights = balance_weights(empty.view(), &[], BalanceMask::FgBgBalanced, 0.9);
        assert!(weights.iter().all(|&weight| weight == 1.0));
    }
}
