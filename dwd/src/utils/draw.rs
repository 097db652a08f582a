use crate::common::*;
use image::{GrayImage, Luma, Rgb, RgbImage};

pub const GT_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
pub const DETECTION_COLOR: Rgb<u8> = Rgb([255, 0, 0]);

/// Converts a `[channel, y, x]` network input back to an RGB image.
///
/// `means` are added back when the input was mean subtracted.
pub fn input_to_image(input: ArrayView3<f32>, means: Option<&[f32]>) -> Result<RgbImage> {
    let (channels, height, width) = input.dim();
    ensure!(
        matches!(channels, 1 | 3),
        "expect 1 or 3 channels, but get {}",
        channels
    );
    let mean_of = |channel: usize| -> f32 {
        means
            .and_then(|means| means.get(channel).copied())
            .unwrap_or(0.0)
    };

    let image = RgbImage::from_fn(width as u32, height as u32, |x, y| {
        let (x, y) = (x as usize, y as usize);
        let value =
            |channel: usize| (input[[channel, y, x]] + mean_of(channel)).clamp(0.0, 255.0) as u8;
        match channels {
            1 => {
                let gray = value(0);
                Rgb([gray, gray, gray])
            }
            _ => Rgb([value(0), value(1), value(2)]),
        }
    });
    Ok(image)
}

/// Draws the outline of a box, clipped to the image.
pub fn draw_rect(image: &mut RgbImage, rect: &TLBR<R64>, color: Rgb<u8>, stroke: usize) {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return;
    }
    let clamp_y = |value: R64| (value.raw().round().max(0.0) as u32).min(height - 1);
    let clamp_x = |value: R64| (value.raw().round().max(0.0) as u32).min(width - 1);
    let [t, l, b, r] = rect.tlbr();
    let (t, b) = (clamp_y(t), clamp_y(b));
    let (l, r) = (clamp_x(l), clamp_x(r));
    let stroke = stroke as u32;

    for y in t..=b {
        for x in l..=r {
            let on_border = y < t + stroke || y + stroke > b || x < l + stroke || x + stroke > r;
            if on_border {
                image.put_pixel(x, y, color);
            }
        }
    }
}

/// Renders a map of energy levels as a gray image spanning `[0, max_level]`.
pub fn energy_to_image(levels: ArrayView2<f32>, max_level: f32) -> GrayImage {
    let (height, width) = levels.dim();
    let max_level = max_level.max(f32::EPSILON);
    GrayImage::from_fn(width as u32, height as u32, |x, y| {
        let level = levels[[y as usize, x as usize]];
        Luma([((level / max_level).clamp(0.0, 1.0) * 255.0) as u8])
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rect_outline() {
        let mut image = RgbImage::new(10, 10);
        let rect = TLBR::try_from_tlbr([r64(2.0), r64(2.0), r64(6.0), r64(7.0)]).unwrap();
        draw_rect(&mut image, &rect, GT_COLOR, 1);

        assert_eq!(*image.get_pixel(2, 2), GT_COLOR);
        assert_eq!(*image.get_pixel(7, 6), GT_COLOR);
        assert_eq!(*image.get_pixel(4, 4), Rgb([0, 0, 0]));
        assert_eq!(*image.get_pixel(8, 4), Rgb([0, 0, 0]));
    }

    #[test]
    fn gray_input_restores_means() {
        let input = Array3::from_elem((1, 2, 3), -10.0f32);
        let image = input_to_image(input.view(), Some(&[110.0])).unwrap();
        assert_eq!(image.dimensions(), (3, 2));
        assert_eq!(*image.get_pixel(1, 1), Rgb([100, 100, 100]));
    }
}
