use super::{EnergyShape, Marker, MarkerPixel, OverlapSolution};
use crate::common::*;
use ndarray::ArrayViewMut1;

/// Label map under construction.
///
/// Besides the target values, the canvas remembers which object owns each
/// pixel and how strongly, so that overlapping markers are resolved
/// consistently across the energy, class and box maps.
#[derive(Debug, Clone)]
pub struct StampCanvas {
    /// Index of the owning object, `-1` for background.
    pub owner: Array2<i64>,
    /// Target values in `[channel, y, x]` layout.
    pub values: Array3<f32>,
    priority: Array2<f64>,
    overlap: OverlapSolution,
    num_stamps: usize,
    /// Center pixel of every stamped object.
    centers: Vec<(usize, [usize; 2])>,
}

impl StampCanvas {
    pub fn new(size: &HW<usize>, channels: usize, overlap: OverlapSolution) -> Self {
        let [h, w] = size.hw();
        Self {
            owner: Array2::from_elem((h, w), -1),
            values: Array3::zeros((channels, h, w)),
            priority: Array2::from_elem((h, w), f64::NEG_INFINITY),
            overlap,
            num_stamps: 0,
            centers: vec![],
        }
    }

    pub fn size(&self) -> HW<usize> {
        let (h, w) = self.owner.dim();
        HW::new(h, w)
    }

    /// Writes the marker of one object, resolving overlaps with earlier stamps.
    pub fn stamp_with<F>(&mut self, marker: &Marker, object: usize, mut write: F)
    where
        F: FnMut(&MarkerPixel, ArrayViewMut1<f32>),
    {
        let size = self.size();
        let order = self.num_stamps as f64;
        self.num_stamps += 1;
        if let Some(center) = marker.center_pixel(&size) {
            self.centers.push((object, center));
        }

        for pixel in marker.pixels(&size) {
            let MarkerPixel { y, x, .. } = pixel;
            let priority = match self.overlap {
                OverlapSolution::Max => 1.0 - pixel.distance,
                OverlapSolution::Nearest => -pixel.pixel_distance,
                OverlapSolution::Last => order,
            };

            let owned = self.owner[[y, x]] >= 0;
            if owned && priority <= self.priority[[y, x]] {
                continue;
            }

            self.owner[[y, x]] = object as i64;
            self.priority[[y, x]] = priority;
            write(&pixel, self.values.slice_mut(s![.., y, x]));
        }
    }

    /// Picks the pixel at `y * factor + factor / 2` of every cell.
    ///
    /// An object missed by every sampled pixel gets the cell containing its
    /// center, unless that cell holds the last cell of another object.
    pub fn subsample(&self, factor: usize) -> Self {
        let size = self.size();
        let [h, w] = size.hw();
        let small = size.ceil_div(factor);
        let src_index = |index: usize, len: usize| (index * factor + factor / 2).min(len - 1);

        let owner = Array2::from_shape_fn((small.h(), small.w()), |(y, x)| {
            self.owner[[src_index(y, h), src_index(x, w)]]
        });
        let priority = Array2::from_shape_fn((small.h(), small.w()), |(y, x)| {
            self.priority[[src_index(y, h), src_index(x, w)]]
        });
        let values =
            Array3::from_shape_fn((self.values.dim().0, small.h(), small.w()), |(c, y, x)| {
                self.values[[c, src_index(y, h), src_index(x, w)]]
            });

        let mut canvas = Self {
            owner,
            values,
            priority,
            overlap: self.overlap,
            num_stamps: self.num_stamps,
            centers: self
                .centers
                .iter()
                .map(|&(object, [y, x])| (object, [y / factor, x / factor]))
                .collect(),
        };

        let mut cell_counts: HashMap<i64, usize> = HashMap::new();
        canvas
            .owner
            .iter()
            .for_each(|&owner| *cell_counts.entry(owner).or_default() += 1);

        self.centers.iter().for_each(|&(object, [cy, cx])| {
            let object = object as i64;
            // objects that lost their center at full resolution stay hidden
            if self.owner[[cy, cx]] != object || cell_counts.contains_key(&object) {
                return;
            }
            let (y, x) = (cy / factor, cx / factor);
            let previous = canvas.owner[[y, x]];
            if previous >= 0 && cell_counts.get(&previous).copied().unwrap_or(0) <= 1 {
                return;
            }

            if let Some(count) = cell_counts.get_mut(&previous) {
                *count -= 1;
            }
            *cell_counts.entry(object).or_default() += 1;
            canvas.owner[[y, x]] = object;
            canvas.priority[[y, x]] = self.priority[[cy, cx]];
            canvas
                .values
                .slice_mut(s![.., y, x])
                .assign(&self.values.slice(s![.., cy, cx]));
        });

        canvas
    }
}

impl EnergyShape {
    /// Energy at a normalized distance from the marker center.
    pub fn energy(&self, distance: f64) -> f64 {
        let distance = distance.clamp(0.0, 1.0);
        match self {
            Self::Linear => 1.0 - distance,
            Self::Quadratic => 1.0 - distance * distance,
        }
    }
}

/// Stamps the energy surface of an object, peaking at its center.
pub fn stamp_energy(canvas: &mut StampCanvas, marker: &Marker, object: usize, shape: EnergyShape) {
    canvas.stamp_with(marker, object, |pixel, mut values| {
        values[0] = shape.energy(pixel.distance) as f32;
    });
}

/// Stamps the class value of an object over its marker.
pub fn stamp_class(canvas: &mut StampCanvas, marker: &Marker, object: usize, class_value: usize) {
    canvas.stamp_with(marker, object, |_, mut values| {
        values[0] = class_value as f32;
    });
}

/// Stamps the object height and width over its marker.
pub fn stamp_bbox(canvas: &mut StampCanvas, marker: &Marker, object: usize, [h, w]: [f32; 2]) {
    canvas.stamp_with(marker, object, |_, mut values| {
        values[0] = h;
        values[1] = w;
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::groundtruth::{MarkerConfig, MarkerShape};

    fn marker_of(t: f64, l: f64, b: f64, r: f64, config: &MarkerConfig) -> Marker<'_> {
        let rect = TLBR::try_from_tlbr([r64(t), r64(l), r64(b), r64(r)]).unwrap();
        Marker::new(&rect, 1.0, config, None)
    }

    fn square() -> MarkerConfig {
        MarkerConfig {
            shape: MarkerShape::Square,
            size_percentage: r64(1.0),
            marker_dim: None,
        }
    }

    #[test]
    fn energy_peaks_at_center() {
        let config = square();
        let size = HW::try_from_hw([9, 9]).unwrap();
        let mut canvas = StampCanvas::new(&size, 1, OverlapSolution::Max);
        stamp_energy(
            &mut canvas,
            &marker_of(0.0, 0.0, 9.0, 9.0, &config),
            0,
            EnergyShape::Linear,
        );

        assert_abs_diff_eq!(canvas.values[[0, 4, 4]], 1.0);
        assert!(canvas.values[[0, 4, 4]] > canvas.values[[0, 4, 6]]);
        assert!(canvas.values[[0, 4, 6]] > canvas.values[[0, 4, 8]]);
        assert!(canvas.owner.iter().all(|&owner| owner == 0));
    }

    #[test]
    fn max_overlap_prefers_stronger_marker() {
        let config = square();
        let size = HW::try_from_hw([4, 12]).unwrap();
        let mut canvas = StampCanvas::new(&size, 1, OverlapSolution::Max);
        stamp_class(&mut canvas, &marker_of(0.0, 0.0, 4.0, 8.0, &config), 0, 1);
        stamp_class(&mut canvas, &marker_of(0.0, 4.0, 4.0, 12.0, &config), 1, 2);

        // both markers cover columns 4 to 7
        assert_eq!(canvas.owner[[2, 5]], 0);
        assert_eq!(canvas.owner[[2, 7]], 1);
        assert_abs_diff_eq!(canvas.values[[0, 2, 7]], 2.0);
        // pixel 2 is only covered by the first object
        assert_eq!(canvas.owner[[2, 2]], 0);
    }

    #[test]
    fn last_overlap_overwrites() {
        let config = square();
        let size = HW::try_from_hw([8, 8]).unwrap();
        let mut canvas = StampCanvas::new(&size, 2, OverlapSolution::Last);
        stamp_bbox(
            &mut canvas,
            &marker_of(0.0, 0.0, 8.0, 8.0, &config),
            0,
            [8.0, 8.0],
        );
        stamp_bbox(
            &mut canvas,
            &marker_of(0.0, 0.0, 2.0, 2.0, &config),
            1,
            [2.0, 2.0],
        );

        assert_eq!(canvas.owner[[0, 0]], 1);
        assert_abs_diff_eq!(canvas.values[[1, 0, 0]], 2.0);
        assert_abs_diff_eq!(canvas.values[[1, 5, 5]], 8.0);
    }

    #[test]
    fn nearest_overlap_prefers_closer_center() {
        let config = square();
        let size = HW::try_from_hw([20, 20]).unwrap();

        // the result does not depend on the stamping order
        [[0, 1], [1, 0]].iter().for_each(|order| {
            let mut canvas = StampCanvas::new(&size, 1, OverlapSolution::Nearest);
            order.iter().for_each(|&object| {
                let marker = match object {
                    0 => marker_of(0.0, 0.0, 20.0, 20.0, &config),
                    _ => marker_of(12.0, 12.0, 16.0, 16.0, &config),
                };
                stamp_class(&mut canvas, &marker, object, object + 1);
            });

            assert_eq!(canvas.owner[[13, 13]], 1);
            assert_abs_diff_eq!(canvas.values[[0, 13, 13]], 2.0);
            assert_eq!(canvas.owner[[11, 11]], 0);
            assert_eq!(canvas.owner[[2, 2]], 0);
        });
    }

    #[test]
    fn subsample_restores_missed_objects() {
        let config = square();
        let size = HW::try_from_hw([16, 16]).unwrap();
        let mut canvas = StampCanvas::new(&size, 1, OverlapSolution::Max);
        stamp_class(&mut canvas, &marker_of(0.0, 0.0, 2.0, 2.0, &config), 0, 3);

        let small = canvas.subsample(4);
        assert_eq!(small.size().hw(), [4, 4]);
        assert_eq!(small.owner[[0, 0]], 0);
        assert_abs_diff_eq!(small.values[[0, 0, 0]], 3.0);
        assert_eq!(small.owner.iter().filter(|&&owner| owner >= 0).count(), 1);
    }

    #[test]
    fn subsample_keeps_last_cell_of_other_objects() {
        let config = square();
        let size = HW::try_from_hw([8, 8]).unwrap();
        let mut canvas = StampCanvas::new(&size, 1, OverlapSolution::Max);
        // covers the sampled pixel (2, 2) of cell (0, 0) only
        stamp_class(&mut canvas, &marker_of(1.0, 1.0, 4.0, 4.0, &config), 0, 1);
        // misses every sampled pixel, centered in cell (0, 0)
        stamp_class(&mut canvas, &marker_of(0.0, 0.0, 2.0, 2.0, &config), 1, 2);

        let small = canvas.subsample(4);
        assert_eq!(small.owner[[0, 0]], 0);
        assert_abs_diff_eq!(small.values[[0, 0, 0]], 1.0);
    }

    #[test]
    fn subsample_picks_cell_centers() {
        let size = HW::try_from_hw([4, 4]).unwrap();
        let mut canvas = StampCanvas::new(&size, 1, OverlapSolution::Max);
        canvas
            .values
            .indexed_iter_mut()
            .for_each(|((_, y, x), value)| *value = (y * 4 + x) as f32);
        let small = canvas.subsample(2);
        assert_eq!(small.size().hw(), [2, 2]);
        assert_abs_diff_eq!(small.values[[0, 0, 0]], 5.0);
        assert_abs_diff_eq!(small.values[[0, 1, 1]], 15.0);
    }
}
