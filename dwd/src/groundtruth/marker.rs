use super::{MarkerConfig, MarkerShape};
use crate::common::*;

/// The marker of one object rasterized onto a map.
#[derive(Debug, Clone)]
pub struct Marker<'a> {
    /// Marker center and extent in map pixels.
    pub cy: f64,
    pub cx: f64,
    pub h: f64,
    pub w: f64,
    shape: MarkerShape,
    template: Option<&'a MarkerTemplate>,
}

/// Normalized distances sampled on a fixed grid.
#[derive(Debug, Clone)]
pub struct MarkerTemplate {
    distances: Array2<f64>,
}

/// A pixel covered by a marker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarkerPixel {
    pub y: usize,
    pub x: usize,
    /// Normalized distance to the marker center in `[0, 1]`.
    pub distance: f64,
    /// Euclidean distance to the marker center in map pixels.
    pub pixel_distance: f64,
}

impl MarkerShape {
    /// Distance of a point given in half-extent units. Points inside the
    /// marker are at most 1.
    pub fn distance(&self, dy: f64, dx: f64) -> f64 {
        match self {
            Self::Oval => (dy * dy + dx * dx).sqrt(),
            Self::Square => dy.abs().max(dx.abs()),
        }
    }
}

impl MarkerTemplate {
    pub fn new(shape: MarkerShape, [dim_h, dim_w]: [usize; 2]) -> Self {
        let distances = Array2::from_shape_fn((dim_h, dim_w), |(row, col)| {
            let dy = ((row as f64 + 0.5) / dim_h as f64) * 2.0 - 1.0;
            let dx = ((col as f64 + 0.5) / dim_w as f64) * 2.0 - 1.0;
            shape.distance(dy, dx)
        });
        Self { distances }
    }

    /// Looks up the distance at a position relative to the marker box in `[0, 1)`.
    fn lookup(&self, ry: f64, rx: f64) -> f64 {
        let (dim_h, dim_w) = self.distances.dim();
        let row = ((ry * dim_h as f64).floor().max(0.0) as usize).min(dim_h - 1);
        let col = ((rx * dim_w as f64).floor().max(0.0) as usize).min(dim_w - 1);
        self.distances[[row, col]]
    }
}

impl<'a> Marker<'a> {
    /// Places the marker of `rect` on a map downsampled by `scale`.
    pub fn new(
        rect: &TLBR<R64>,
        scale: f64,
        config: &MarkerConfig,
        template: Option<&'a MarkerTemplate>,
    ) -> Self {
        let size_percentage = config.size_percentage.raw();
        Self {
            cy: rect.cy().raw() / scale,
            cx: rect.cx().raw() / scale,
            h: rect.h().raw() * size_percentage / scale,
            w: rect.w().raw() * size_percentage / scale,
            shape: config.shape,
            template,
        }
    }

    fn normalized_distance(&self, py: f64, px: f64) -> f64 {
        let half_h = (self.h / 2.0).max(f64::EPSILON);
        let half_w = (self.w / 2.0).max(f64::EPSILON);

        match self.template {
            Some(template) => {
                let ry = (py - (self.cy - half_h)) / self.h.max(f64::EPSILON);
                let rx = (px - (self.cx - half_w)) / self.w.max(f64::EPSILON);
                if !(0.0..1.0).contains(&ry) || !(0.0..1.0).contains(&rx) {
                    return f64::INFINITY;
                }
                template.lookup(ry, rx)
            }
            None => self
                .shape
                .distance((py - self.cy) / half_h, (px - self.cx) / half_w),
        }
    }

    /// The pixel containing the marker center, clamped to the map.
    pub fn center_pixel(&self, map_size: &HW<usize>) -> Option<[usize; 2]> {
        let [map_h, map_w] = map_size.hw();
        if map_h == 0 || map_w == 0 {
            return None;
        }
        let clamp_index =
            |value: f64, len: usize| -> usize { (value.max(0.0) as usize).min(len - 1) };
        Some([
            clamp_index(self.cy.floor(), map_h),
            clamp_index(self.cx.floor(), map_w),
        ])
    }

    /// Enumerates the pixels of a `map_size` map covered by the marker.
    ///
    /// The pixel containing the marker center is always covered.
    pub fn pixels(&self, map_size: &HW<usize>) -> Vec<MarkerPixel> {
        let [map_h, map_w] = map_size.hw();
        let [center_y, center_x] = match self.center_pixel(map_size) {
            Some(center) => center,
            None => return vec![],
        };

        let y_range = {
            let start = (self.cy - self.h / 2.0 - 0.5).ceil().max(0.0) as usize;
            let end = ((self.cy + self.h / 2.0 - 0.5).floor() + 1.0).max(0.0) as usize;
            start.min(map_h)..end.min(map_h)
        };
        let x_range = {
            let start = (self.cx - self.w / 2.0 - 0.5).ceil().max(0.0) as usize;
            let end = ((self.cx + self.w / 2.0 - 0.5).floor() + 1.0).max(0.0) as usize;
            start.min(map_w)..end.min(map_w)
        };

        let mut pixels: Vec<_> = y_range
            .flat_map(|y| x_range.clone().map(move |x| (y, x)))
            .filter_map(|(y, x)| {
                let py = y as f64 + 0.5;
                let px = x as f64 + 0.5;
                let distance = self.normalized_distance(py, px);
                (distance <= 1.0).then(|| MarkerPixel {
                    y,
                    x,
                    distance,
                    pixel_distance: self.pixel_distance(py, px),
                })
            })
            .collect();

        let has_center = pixels
            .iter()
            .any(|pixel| pixel.y == center_y && pixel.x == center_x);
        if !has_center {
            pixels.push(MarkerPixel {
                y: center_y,
                x: center_x,
                distance: 0.0,
                pixel_distance: self.pixel_distance(center_y as f64 + 0.5, center_x as f64 + 0.5),
            });
        }

        pixels
    }

    fn pixel_distance(&self, py: f64, px: f64) -> f64 {
        let dy = py - self.cy;
        let dx = px - self.cx;
        (dy * dy + dx * dx).sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rect(t: f64, l: f64, b: f64, r: f64) -> TLBR<R64> {
        TLBR::try_from_tlbr([r64(t), r64(l), r64(b), r64(r)]).unwrap()
    }

    fn config(shape: MarkerShape) -> MarkerConfig {
        MarkerConfig {
            shape,
            size_percentage: r64(1.0),
            marker_dim: None,
        }
    }

    #[test]
    fn square_marker_covers_box() {
        let config = config(MarkerShape::Square);
        let marker = Marker::new(&rect(2.0, 2.0, 6.0, 8.0), 1.0, &config, None);
        let size = HW::try_from_hw([10, 10]).unwrap();
        let pixels = marker.pixels(&size);
        assert_eq!(pixels.len(), 4 * 6);
        assert!(pixels
            .iter()
            .all(|p| (2..6).contains(&p.y) && (2..8).contains(&p.x)));
    }

    #[test]
    fn oval_marker_skips_corners() {
        let config = config(MarkerShape::Oval);
        let marker = Marker::new(&rect(0.0, 0.0, 8.0, 8.0), 1.0, &config, None);
        let size = HW::try_from_hw([8, 8]).unwrap();
        let pixels = marker.pixels(&size);
        assert!(pixels.len() < 64);
        assert!(!pixels.iter().any(|p| p.y == 0 && p.x == 0));
        assert!(pixels.iter().any(|p| p.y == 3 && p.x == 4));
    }

    #[test]
    fn tiny_marker_keeps_center_pixel() {
        let config = config(MarkerShape::Oval);
        let marker = Marker::new(&rect(4.2, 4.2, 4.4, 4.4), 4.0, &config, None);
        let size = HW::try_from_hw([4, 4]).unwrap();
        let pixels = marker.pixels(&size);
        assert_eq!(pixels.len(), 1);
        assert_eq!((pixels[0].y, pixels[0].x), (1, 1));
        assert_eq!(pixels[0].distance, 0.0);
    }

    #[test]
    fn template_matches_analytic_marker() {
        let config = MarkerConfig {
            marker_dim: Some([16, 16]),
            ..config(MarkerShape::Oval)
        };
        let template = MarkerTemplate::new(MarkerShape::Oval, [16, 16]);
        let size = HW::try_from_hw([16, 16]).unwrap();
        let rect = rect(0.0, 0.0, 16.0, 16.0);

        let analytic = Marker::new(&rect, 1.0, &config, None).pixels(&size);
        let sampled = Marker::new(&rect, 1.0, &config, Some(&template)).pixels(&size);

        assert_eq!(analytic.len(), sampled.len());
        izip!(analytic, sampled).for_each(|(lhs, rhs)| {
            assert_eq!((lhs.y, lhs.x), (rhs.y, rhs.x));
            assert_abs_diff_eq!(lhs.distance, rhs.distance, epsilon = 1e-9);
        });
    }
}
