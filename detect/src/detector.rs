//! Model loading, preprocessing and watershed decoding of single images.

use crate::{common::*, config::Config};
use dwd::{
    data_layer::{pad_image, prepare_image, DataLayerConfig},
    decode::DwsHeads,
    dws::{Detection, DwsConfig},
    model::{DwdModel, DwdModelInit},
    utils::array_to_tensor,
};
use train::{config::Config as TrainConfig, data::aligned_data_layer_config};

/// Turns image files into padded network input.
#[derive(Debug, Clone)]
pub struct Preprocessor {
    config: DataLayerConfig,
    input_channels: usize,
}

/// An image ready for the network.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct InputImage {
    pub path: PathBuf,
    #[derivative(Debug = "ignore")]
    pub original: DynamicImage,
    /// The size after resizing, before padding.
    pub input_size: HW<usize>,
    #[derivative(Debug = "ignore")]
    pub data: Array4<f32>,
}

impl InputImage {
    pub fn original_size(&self) -> HW<usize> {
        let (width, height) = self.original.dimensions();
        HW::new(height as usize, width as usize)
    }
}

impl Preprocessor {
    pub fn new(config: &Config, train_config: &TrainConfig) -> Self {
        let mut data_layer = aligned_data_layer_config(train_config);
        if let Some(max_edge) = config.preprocess.max_edge {
            data_layer.max_edge = max_edge;
        }
        if let Some(pad_with) = config.preprocess.pad_with {
            data_layer.pad_with = pad_with;
        }

        Self {
            config: data_layer,
            input_channels: train_config.dataset.train.input_channels(),
        }
    }

    pub fn load(&self, path: PathBuf) -> Result<InputImage> {
        let original = image::open(&path)
            .with_context(|| format!("unable to open image '{}'", path.display()))?;
        let pixels = prepare_image(original.clone(), &self.config, self.input_channels)?;
        let (_, height, width) = pixels.dim();
        let data = pad_image(
            pixels.view(),
            self.config.pad_to,
            self.config.pad_with.raw() as f32,
        );

        Ok(InputImage {
            path,
            original,
            input_size: HW::new(height, width),
            data,
        })
    }
}

/// The trained network and its watershed decoder.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct Detector {
    #[derivative(Debug = "ignore")]
    vs: nn::VarStore,
    #[derivative(Debug = "ignore")]
    model: DwdModel,
    heads: DwsHeads,
    dws: DwsConfig,
}

impl Detector {
    pub fn load(config: &Config, train_config: &TrainConfig, num_classes: usize) -> Result<Self> {
        let checkpoint_file = match &config.model.checkpoint_file {
            Some(file) => file.clone(),
            None => train::utils::find_recent_checkpoint(&train_config.logging.dir)?
                .ok_or_else(|| {
                    format_err!(
                        "no checkpoint found in '{}'",
                        train_config.logging.dir.display()
                    )
                })?,
        };

        let mut vs = nn::VarStore::new(config.model.device);
        let root = vs.root();
        let model = DwdModelInit::from_assignments(
            train_config.dataset.train.input_channels(),
            num_classes,
            train_config.model.clone(),
            &train_config.assignments,
        )
        .build(&root / "model")?;
        vs.load(&checkpoint_file).with_context(|| {
            format!(
                "unable to load checkpoint file '{}'",
                checkpoint_file.display()
            )
        })?;
        vs.freeze();
        info!("loaded checkpoint file '{}'", checkpoint_file.display());

        let heads = DwsHeads::from_assignments(&train_config.assignments)?;
        let dws = config
            .dws
            .clone()
            .unwrap_or_else(|| train_config.dws.clone());

        Ok(Self {
            vs,
            model,
            heads,
            dws,
        })
    }

    /// Finds objects in the image, with boxes in original image pixels.
    pub fn detect(&self, input: &InputImage) -> Result<Vec<Detection>> {
        let image = array_to_tensor(&input.data)?.to_device(self.vs.device());
        let output = tch::no_grad(|| self.model.forward_t(&image, false))?;
        let detections = self
            .heads
            .decode(&output, &self.dws)?
            .into_iter()
            .next()
            .ok_or_else(|| format_err!("the model output is empty"))?;

        let to_r64 = |size: HW<usize>| -> Result<HW<R64>> {
            let [h, w] = size.hw();
            HW::try_from_hw([r64(h as f64), r64(w as f64)])
        };
        let transform = Transform::from_sizes(
            &to_r64(input.input_size)?,
            &to_r64(input.original_size())?,
        );
        let detections = detections
            .into_iter()
            .map(|detection| Detection {
                rect: &transform * &detection.rect,
                ..detection
            })
            .collect();
        Ok(detections)
    }
}
