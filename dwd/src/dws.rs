//! The deep watershed transform.
//!
//! Object instances are recovered from the predicted energy surface by
//! thresholding it and labeling the connected components. Class and box size
//! are read from the other predicted maps inside each component.

use crate::common::*;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DwsConfig {
    /// Pixels with energy strictly above the cutoff are foreground.
    #[serde(default = "default_cutoff")]
    pub cutoff: R64,
    /// Components with fewer pixels are discarded.
    #[serde(default = "default_min_component_size")]
    pub min_component_size: usize,
    #[serde(default)]
    pub connectivity: Connectivity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Connectivity {
    Four,
    Eight,
}

/// An object instance found by the watershed transform.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Detection {
    /// Box in input image pixels.
    pub rect: TLBR<R64>,
    /// Zero-based dataset class.
    pub class: usize,
    /// Peak energy inside the component.
    pub score: R64,
    /// Component size in map pixels.
    pub area: usize,
}

impl Default for DwsConfig {
    fn default() -> Self {
        Self {
            cutoff: default_cutoff(),
            min_component_size: default_min_component_size(),
            connectivity: Connectivity::default(),
        }
    }
}

impl Default for Connectivity {
    fn default() -> Self {
        Self::Four
    }
}

/// Runs the watershed transform on maps of one image.
///
/// `energy` is the energy level (or continuous energy) per pixel,
/// `class_map` the predicted class with 0 for background and `bbox_map` the
/// predicted `[h, w]` in input pixels. Maps are downsampled by `downsample`
/// relative to the input image.
pub fn perform_dws(
    energy: ArrayView2<f32>,
    class_map: ArrayView2<i64>,
    bbox_map: ArrayView3<f32>,
    downsample: usize,
    config: &DwsConfig,
) -> Result<Vec<Detection>> {
    let (height, width) = energy.dim();
    ensure!(
        class_map.dim() == (height, width),
        "class map size {:?} does not match energy map size {:?}",
        class_map.dim(),
        energy.dim()
    );
    ensure!(
        bbox_map.dim() == (2, height, width),
        "bbox map must have shape [2, {}, {}], but get {:?}",
        height,
        width,
        bbox_map.dim()
    );
    ensure!(downsample > 0, "downsample must be positive");

    let cutoff = config.cutoff.raw() as f32;
    let mask = energy.mapv(|value| value > cutoff);
    let (labels, num_labels) = label_components(mask.view(), config.connectivity);
    if num_labels == 0 {
        return Ok(vec![]);
    }

    // accumulate per component statistics
    let mut area = vec![0usize; num_labels];
    let mut sum_y = vec![0f64; num_labels];
    let mut sum_x = vec![0f64; num_labels];
    let mut sum_h = vec![0f64; num_labels];
    let mut sum_w = vec![0f64; num_labels];
    let mut peak = vec![f32::MIN; num_labels];
    let mut votes: Vec<HashMap<i64, usize>> = vec![HashMap::new(); num_labels];

    labels.indexed_iter().for_each(|((y, x), &label)| {
        if label == 0 {
            return;
        }
        let index = (label - 1) as usize;
        area[index] += 1;
        sum_y[index] += y as f64;
        sum_x[index] += x as f64;
        sum_h[index] += bbox_map[[0, y, x]] as f64;
        sum_w[index] += bbox_map[[1, y, x]] as f64;
        peak[index] = peak[index].max(energy[[y, x]]);

        let class = class_map[[y, x]];
        if class > 0 {
            *votes[index].entry(class).or_default() += 1;
        }
    });

    let scale = downsample as f64;
    let detections = (0..num_labels)
        .filter(|&index| area[index] >= config.min_component_size)
        .filter_map(|index| {
            // the most voted class, ties broken by the smaller class index
            let (&class, _) = votes[index]
                .iter()
                .max_by_key(|&(&class, &count)| (count, cmp::Reverse(class)))?;

            let count = area[index] as f64;
            let cy = (sum_y[index] / count + 0.5) * scale;
            let cx = (sum_x[index] / count + 0.5) * scale;
            let h = (sum_h[index] / count).max(0.0);
            let w = (sum_w[index] / count).max(0.0);
            let rect = TLBR::try_from_cycxhw([r64(cy), r64(cx), r64(h), r64(w)]).ok()?;

            Some(Detection {
                rect,
                class: (class - 1) as usize,
                score: r64(peak[index] as f64),
                area: area[index],
            })
        })
        .collect();

    Ok(detections)
}

/// Labels connected foreground regions with a two-pass union-find.
///
/// Returns the label image, where 0 is background and components are
/// numbered from 1 in scan order, and the number of components.
pub fn label_components(
    mask: ArrayView2<bool>,
    connectivity: Connectivity,
) -> (Array2<u32>, usize) {
    let (height, width) = mask.dim();
    let mut labels = Array2::<u32>::zeros((height, width));
    let mut parent: Vec<u32> = vec![];

    // first pass: provisional labels
    for y in 0..height {
        for x in 0..width {
            if !mask[[y, x]] {
                continue;
            }

            let mut neighbors = Vec::with_capacity(4);
            if x > 0 && mask[[y, x - 1]] {
                neighbors.push(labels[[y, x - 1]]);
            }
            if y > 0 && mask[[y - 1, x]] {
                neighbors.push(labels[[y - 1, x]]);
            }
            if connectivity == Connectivity::Eight && y > 0 {
                if x > 0 && mask[[y - 1, x - 1]] {
                    neighbors.push(labels[[y - 1, x - 1]]);
                }
                if x + 1 < width && mask[[y - 1, x + 1]] {
                    neighbors.push(labels[[y - 1, x + 1]]);
                }
            }

            match neighbors.iter().copied().min() {
                None => {
                    let label = parent.len() as u32 + 1;
                    parent.push(label);
                    labels[[y, x]] = label;
                }
                Some(min_label) => {
                    labels[[y, x]] = min_label;
                    neighbors
                        .iter()
                        .for_each(|&label| union(&mut parent, min_label, label));
                }
            }
        }
    }

    // second pass: resolve roots and renumber densely
    let mut label_map = vec![0u32; parent.len() + 1];
    let mut num_labels = 0u32;
    labels.iter_mut().for_each(|label| {
        if *label == 0 {
            return;
        }
        let root = find(&parent, *label);
        if label_map[root as usize] == 0 {
            num_labels += 1;
            label_map[root as usize] = num_labels;
        }
        *label = label_map[root as usize];
    });

    (labels, num_labels as usize)
}

fn find(parent: &[u32], mut label: u32) -> u32 {
    while parent[(label - 1) as usize] != label {
        label = parent[(label - 1) as usize];
    }
    label
}

fn union(parent: &mut [u32], lhs: u32, rhs: u32) {
    let root_lhs = find(parent, lhs);
    let root_rhs = find(parent, rhs);
    match root_lhs.cmp(&root_rhs) {
        Ordering::Less => parent[(root_rhs - 1) as usize] = root_lhs,
        Ordering::Greater => parent[(root_lhs - 1) as usize] = root_rhs,
        Ordering::Equal => {}
    }
}

/// Takes the argmax over the channel axis of `[channel, y, x]` scores.
pub fn argmax_channels(scores: ArrayView3<f32>) -> Array2<i64> {
    let (_, height, width) = scores.dim();
    Array2::from_shape_fn((height, width), |(y, x)| {
        scores
            .slice(s![.., y, x])
            .iter()
            .enumerate()
            .fold((0, f32::MIN), |(best, best_score), (channel, &score)| {
                if score > best_score {
                    (channel, score)
                } else {
                    (best, best_score)
                }
            })
            .0 as i64
    })
}

/// Energy per pixel of a `[channel, y, x]` energy head output.
///
/// Regression heads have a single channel holding the energy, softmax heads
/// yield the most likely level.
pub fn energy_levels_from_logits(logits: ArrayView3<f32>) -> Array2<f32> {
    if logits.dim().0 == 1 {
        logits.index_axis(Axis(0), 0).to_owned()
    } else {
        argmax_channels(logits).mapv(|level| level as f32)
    }
}

/// Class per pixel of a `[channel, y, x]` class head output, 0 for background.
pub fn classes_from_logits(logits: ArrayView3<f32>) -> Array2<i64> {
    argmax_channels(logits)
}

fn default_cutoff() -> R64 {
    r64(0.0)
}

fn default_min_component_size() -> usize {
    2
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn four_and_eight_connectivity() {
        let mask = array![
            [true, false, false, true],
            [false, true, false, true],
            [false, false, false, false],
            [true, true, false, false],
        ];

        let (labels, num) = label_components(mask.view(), Connectivity::Four);
        assert_eq!(num, 4);
        assert_eq!(labels[[0, 3]], labels[[1, 3]]);
        assert_ne!(labels[[0, 0]], labels[[1, 1]]);

        let (labels, num) = label_components(mask.view(), Connectivity::Eight);
        assert_eq!(num, 3);
        assert_eq!(labels[[0, 0]], labels[[1, 1]]);
        assert_eq!(labels[[3, 0]], labels[[3, 1]]);
    }

    #[test]
    fn u_shape_merges_into_one_component() {
        let mask = array![[true, false, true], [true, false, true], [true, true, true],];
        let (labels, num) = label_components(mask.view(), Connectivity::Four);
        assert_eq!(num, 1);
        assert!(labels
            .iter()
            .filter(|&&label| label > 0)
            .all(|&label| label == 1));
    }

    #[test]
    fn recover_two_objects() {
        let mut energy = Array2::<f32>::zeros((8, 8));
        let mut class_map = Array2::<i64>::zeros((8, 8));
        let mut bbox_map = Array3::<f32>::zeros((2, 8, 8));

        // object at rows 1..3, cols 1..3 of class 2
        energy.slice_mut(s![1..3, 1..3]).fill(3.0);
        energy[[1, 1]] = 4.0;
        class_map.slice_mut(s![1..3, 1..3]).fill(3);
        class_map[[2, 2]] = 1;
        bbox_map.slice_mut(s![0, 1..3, 1..3]).fill(8.0);
        bbox_map.slice_mut(s![1, 1..3, 1..3]).fill(12.0);

        // object at rows 5..8, cols 4..6 of class 0
        energy.slice_mut(s![5..8, 4..6]).fill(2.0);
        class_map.slice_mut(s![5..8, 4..6]).fill(1);
        bbox_map.slice_mut(s![.., 5..8, 4..6]).fill(4.0);

        // a single noisy pixel
        energy[[0, 7]] = 5.0;
        class_map[[0, 7]] = 2;

        let config = DwsConfig {
            cutoff: r64(1.0),
            min_component_size: 2,
            connectivity: Connectivity::Four,
        };
        let detections =
            perform_dws(energy.view(), class_map.view(), bbox_map.view(), 4, &config).unwrap();
        assert_eq!(detections.len(), 2);

        let first = &detections[0];
        assert_eq!(first.class, 2);
        assert_eq!(first.area, 4);
        assert_abs_diff_eq!(first.score.raw(), 4.0);
        assert_abs_diff_eq!(first.rect.cy().raw(), 8.0);
        assert_abs_diff_eq!(first.rect.cx().raw(), 8.0);
        assert_abs_diff_eq!(first.rect.h().raw(), 8.0);
        assert_abs_diff_eq!(first.rect.w().raw(), 12.0);

        let second = &detections[1];
        assert_eq!(second.class, 0);
        assert_abs_diff_eq!(second.rect.cy().raw(), 26.0);
        assert_abs_diff_eq!(second.rect.cx().raw(), 20.0);
    }

    #[test]
    fn background_only_components_are_dropped() {
        let energy = Array2::from_elem((3, 3), 2.0f32);
        let class_map = Array2::<i64>::zeros((3, 3));
        let bbox_map = Array3::<f32>::ones((2, 3, 3));
        let detections = perform_dws(
            energy.view(),
            class_map.view(),
            bbox_map.view(),
            1,
            &DwsConfig::default(),
        )
        .unwrap();
        assert!(detections.is_empty());
    }

    #[test]
    fn mismatched_maps_are_rejected() {
        let energy = Array2::<f32>::zeros((3, 3));
        let class_map = Array2::<i64>::zeros((3, 4));
        let bbox_map = Array3::<f32>::zeros((2, 3, 3));
        assert!(perform_dws(
            energy.view(),
            class_map.view(),
            bbox_map.view(),
            1,
            &DwsConfig::default()
        )
        .is_err());
    }

    #[test]
    fn argmax_over_channels() {
        let scores = array![[[0.1f32, 0.9]], [[0.5, 0.2]], [[0.4, 0.0]]];
        assert_eq!(argmax_channels(scores.view()), array![[1i64, 0]]);
    }

    #[test]
    fn energy_from_regression_and_softmax_heads() {
        let regression = array![[[0.5f32, 2.5]]];
        assert_eq!(
            energy_levels_from_logits(regression.view()),
            array![[0.5f32, 2.5]]
        );

        let softmax = array![[[3.0f32, 0.0]], [[1.0, 0.0]], [[0.0, 1.0]]];
        assert_eq!(
            energy_levels_from_logits(softmax.view()),
            array![[0f32, 2.0]]
        );
    }
}
