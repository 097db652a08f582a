use crate::common::*;

/// Options of the RoI data layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataLayerConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// One scale is drawn per image.
    #[serde(default = "default_scale_list")]
    pub scale_list: Vec<R64>,
    #[serde(default)]
    pub crop: Option<CropConfig>,
    /// Without cropping, the longest image edge is resized to this length.
    /// Zero disables the resizing.
    #[serde(default)]
    pub max_edge: usize,
    /// Images are padded to a multiple of this size. Zero pads to the
    /// largest downsampling factor only.
    #[serde(default)]
    pub pad_to: usize,
    #[serde(default = "default_pad_with")]
    pub pad_with: R64,
    #[serde(default)]
    pub subtract_mean: bool,
    /// Per-channel means in RGB order.
    #[serde(default = "default_pixel_means")]
    pub pixel_means: Vec<R64>,
    /// Cropped boxes keeping less than this share of their area are dropped.
    #[serde(default = "default_min_visible_ratio")]
    pub min_visible_ratio: R64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropConfig {
    /// Window height and width.
    pub size: [usize; 2],
    /// Probability to crop at the top-left corner.
    #[serde(default = "default_top_left_bias")]
    pub top_left_bias: R64,
}

impl Default for DataLayerConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            scale_list: default_scale_list(),
            crop: None,
            max_edge: 0,
            pad_to: 0,
            pad_with: default_pad_with(),
            subtract_mean: false,
            pixel_means: default_pixel_means(),
            min_visible_ratio: default_min_visible_ratio(),
        }
    }
}

impl DataLayerConfig {
    pub fn validate(&self) -> Result<()> {
        ensure!(self.batch_size > 0, "batch_size must be positive");
        ensure!(!self.scale_list.is_empty(), "scale_list must not be empty");
        ensure!(
            self.scale_list.iter().all(|&scale| scale > 0.0),
            "scales must be positive"
        );
        if let Some(crop) = &self.crop {
            let [h, w] = crop.size;
            ensure!(h > 0 && w > 0, "crop size must be positive");
            ensure!(
                (0.0..=1.0).contains(&crop.top_left_bias.raw()),
                "top_left_bias must be within [0, 1]"
            );
        }
        ensure!(
            matches!(self.pixel_means.len(), 1 | 3),
            "pixel_means must have 1 or 3 values"
        );
        ensure!(
            (0.0..=1.0).contains(&self.min_visible_ratio.raw()),
            "min_visible_ratio must be within [0, 1]"
        );
        Ok(())
    }

    /// The mean of each of `channels` image channels.
    pub fn channel_means(&self, channels: usize) -> Vec<f32> {
        let means: Vec<f32> = self
            .pixel_means
            .iter()
            .map(|mean| mean.raw() as f32)
            .collect();
        match (means.len(), channels) {
            (len, channels) if len == channels => means,
            (3, 1) => vec![means.iter().sum::<f32>() / 3.0],
            (1, channels) => vec![means[0]; channels],
            _ => vec![0.0; channels],
        }
    }
}

fn default_batch_size() -> usize {
    1
}

fn default_scale_list() -> Vec<R64> {
    vec![r64(1.0)]
}

fn default_pad_with() -> R64 {
    r64(0.0)
}

fn default_pixel_means() -> Vec<R64> {
    vec![r64(122.7717), r64(115.9465), r64(102.9801)]
}

fn default_min_visible_ratio() -> R64 {
    r64(0.5)
}

fn default_top_left_bias() -> R64 {
    r64(0.3)
}
