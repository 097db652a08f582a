use super::DataLayerConfig;
use crate::{common::*, roidb::RoiEntry};
use image::{imageops::FilterType, DynamicImage, GenericImageView as _};

/// One image after augmentation, before padding.
#[derive(Debug, Clone)]
pub struct Sample {
    /// Pixels in `[channel, y, x]` layout.
    pub image: Array3<f32>,
    pub labels: Vec<PixelLabel>,
}

impl Sample {
    pub fn size(&self) -> HW<usize> {
        let (_, h, w) = self.image.dim();
        HW::new(h, w)
    }
}

/// Loads an entry and applies flipping, scaling, cropping and mean subtraction.
pub fn load_sample<R>(
    entry: &RoiEntry,
    config: &DataLayerConfig,
    input_channels: usize,
    rng: &mut R,
) -> Result<Sample>
where
    R: Rng + ?Sized,
{
    let image = image::open(&entry.path)
        .with_context(|| format!("unable to open image '{}'", entry.path.display()))?;
    let image = if entry.flipped { image.fliph() } else { image };

    // labels are given in the recorded size, which may differ from the file
    let labels: Vec<PixelLabel> = {
        let (width, height) = image.dimensions();
        let recorded = size_r64(entry.size.h(), entry.size.w())?;
        let actual = size_r64(height as usize, width as usize)?;
        let transform = Transform::from_sizes(&recorded, &actual);
        entry
            .labels
            .iter()
            .map(|label| &transform * label)
            .collect()
    };

    let scale = config
        .scale_list
        .choose(rng)
        .map(|scale| scale.raw())
        .unwrap_or(1.0);

    let (image, labels) = match &config.crop {
        Some(crop) => {
            let (image, labels) = resize_by(image, labels, scale)?;
            crop_window(
                image,
                labels,
                crop.size,
                crop.top_left_bias.raw(),
                config.min_visible_ratio,
                rng,
            )?
        }
        None if config.max_edge > 0 => {
            let (width, height) = image.dimensions();
            let longest = width.max(height) as f64;
            resize_by(image, labels, config.max_edge as f64 * scale / longest)?
        }
        None => resize_by(image, labels, scale)?,
    };

    let mut pixels = to_array(&image, input_channels)?;
    if config.subtract_mean {
        subtract_means(&mut pixels, config);
    }

    Ok(Sample {
        image: pixels,
        labels,
    })
}

/// Preprocesses an unlabeled image the way the data layer does, without
/// random augmentation.
pub fn prepare_image(
    image: DynamicImage,
    config: &DataLayerConfig,
    input_channels: usize,
) -> Result<Array3<f32>> {
    let image = if config.max_edge > 0 {
        let (width, height) = image.dimensions();
        let longest = width.max(height) as f64;
        resize_by(image, vec![], config.max_edge as f64 / longest)?.0
    } else {
        image
    };

    let mut pixels = to_array(&image, input_channels)?;
    if config.subtract_mean {
        subtract_means(&mut pixels, config);
    }
    Ok(pixels)
}

/// Places the image in a single-image batch padded to a multiple of `unit`.
pub fn pad_image(image: ArrayView3<f32>, unit: usize, pad_with: f32) -> Array4<f32> {
    let (channels, h, w) = image.dim();
    let [height, width] = HW::new(h, w).round_up_to(unit).hw();
    let mut data = Array4::from_elem((1, channels, height, width), pad_with);
    data.slice_mut(s![0, .., 0..h, 0..w]).assign(&image);
    data
}

fn subtract_means(pixels: &mut Array3<f32>, config: &DataLayerConfig) {
    let means = config.channel_means(pixels.dim().0);
    pixels
        .axis_iter_mut(Axis(0))
        .zip(means)
        .for_each(|(mut channel, mean)| channel -= mean);
}

fn size_r64(h: usize, w: usize) -> Result<HW<R64>> {
    HW::try_from_hw([r64(h as f64), r64(w as f64)])
}

fn resize_by(
    image: DynamicImage,
    labels: Vec<PixelLabel>,
    scale: f64,
) -> Result<(DynamicImage, Vec<PixelLabel>)> {
    if (scale - 1.0).abs() < 1e-9 {
        return Ok((image, labels));
    }
    let (width, height) = image.dimensions();
    let new_w = ((width as f64 * scale).round() as u32).max(1);
    let new_h = ((height as f64 * scale).round() as u32).max(1);
    let image = image.resize_exact(new_w, new_h, FilterType::Triangle);

    let transform = Transform::from_sizes(
        &size_r64(height as usize, width as usize)?,
        &size_r64(new_h as usize, new_w as usize)?,
    );
    let labels = labels.iter().map(|label| &transform * label).collect();
    Ok((image, labels))
}

fn crop_window<R>(
    image: DynamicImage,
    labels: Vec<PixelLabel>,
    [crop_h, crop_w]: [usize; 2],
    top_left_bias: f64,
    min_visible_ratio: R64,
    rng: &mut R,
) -> Result<(DynamicImage, Vec<PixelLabel>)>
where
    R: Rng + ?Sized,
{
    let (width, height) = image.dimensions();
    let win_h = (crop_h as u32).min(height);
    let win_w = (crop_w as u32).min(width);

    let (top, left) = if rng.gen_bool(top_left_bias) {
        (0, 0)
    } else {
        (
            rng.gen_range(0..=(height - win_h)),
            rng.gen_range(0..=(width - win_w)),
        )
    };

    let image = image.crop_imm(left, top, win_w, win_h);
    let window = size_r64(win_h as usize, win_w as usize)?;
    let shift = Transform::translate(-r64(top as f64), -r64(left as f64));
    let labels = labels
        .iter()
        .filter_map(|label| (&shift * label).clip_to(&window, min_visible_ratio))
        .collect();

    Ok((image, labels))
}

fn to_array(image: &DynamicImage, channels: usize) -> Result<Array3<f32>> {
    let (width, height) = image.dimensions();
    let (width, height) = (width as usize, height as usize);

    let array = match channels {
        1 => {
            let luma = image.to_luma8();
            Array3::from_shape_fn((1, height, width), |(_, y, x)| {
                luma.get_pixel(x as u32, y as u32)[0] as f32
            })
        }
        3 => {
            let rgb = image.to_rgb8();
            Array3::from_shape_fn((3, height, width), |(c, y, x)| {
                rgb.get_pixel(x as u32, y as u32)[c] as f32
            })
        }
        _ => bail!("unsupported number of channels {}", channels),
    };
    Ok(array)
}
