use super::{ConvBn2D, ConvBn2DInit, ModelConfig, Upsampling};
use crate::{common::*, groundtruth::TrainingAssignment};

/// Output channels and strides of one head.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HeadSpec {
    pub channels: usize,
    pub ds_factors: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct DwdModelInit {
    pub input_channels: usize,
    pub config: ModelConfig,
    pub heads: Vec<HeadSpec>,
}

impl DwdModelInit {
    /// Creates one head per training assignment.
    pub fn from_assignments(
        input_channels: usize,
        num_classes: usize,
        config: ModelConfig,
        assignments: &[TrainingAssignment],
    ) -> Self {
        let heads = assignments
            .iter()
            .map(|assign| HeadSpec {
                channels: assign.head_channels(num_classes),
                ds_factors: assign.ds_factors.clone(),
            })
            .collect();

        Self {
            input_channels,
            config,
            heads,
        }
    }

    pub fn build<'p, P>(self, path: P) -> Result<DwdModel>
    where
        P: Borrow<nn::Path<'p>>,
    {
        let path = path.borrow();
        let Self {
            input_channels,
            config,
            heads,
        } = self;
        let depth = config.depth;
        let size_unit = config.size_unit();

        ensure!(input_channels > 0, "input_channels must be positive");
        ensure!(config.base_channels > 0, "base_channels must be positive");
        ensure!(!heads.is_empty(), "the model requires at least one head");

        // convert strides to decoder levels
        let head_levels: Vec<Vec<usize>> = heads
            .iter()
            .map(|head| -> Result<Vec<usize>> {
                ensure!(head.channels > 0, "head channels must be positive");
                head.ds_factors
                    .iter()
                    .map(|&factor| -> Result<usize> {
                        ensure!(
                            factor.is_power_of_two() && factor <= size_unit,
                            "ds_factor {} must be a power of two not greater than 2^depth = {}",
                            factor,
                            size_unit
                        );
                        Ok(factor.trailing_zeros() as usize)
                    })
                    .try_collect()
            })
            .try_collect()?;

        let batch_norm = config.batch_norm;
        let conv_init = |in_c: usize, out_c: usize, k: usize| ConvBn2DInit {
            batch_norm,
            ..ConvBn2DInit::new(in_c, out_c, k)
        };

        let stem = conv_init(input_channels, config.level_channels(0), 3).build(path / "stem");
        let stages: Vec<_> = (1..=depth)
            .map(|level| {
                let in_c = config.level_channels(level - 1);
                let out_c = config.level_channels(level);
                let down = conv_init(in_c, out_c, 3)
                    .stride(2)
                    .build(path / format!("enc_{}_down", level));
                let conv = conv_init(out_c, out_c, 3).build(path / format!("enc_{}_conv", level));
                (down, conv)
            })
            .collect();

        // decoder index of each head and the finest level each decoder must reach
        let (head_decoders, decoder_levels): (Vec<usize>, Vec<usize>) = match config.upsampling {
            Upsampling::Shared => {
                let min_level = head_levels.iter().flatten().copied().min().unwrap_or(depth);
                (vec![0; heads.len()], vec![min_level])
            }
            Upsampling::PerTask => {
                let min_levels = head_levels
                    .iter()
                    .map(|levels| levels.iter().copied().min().unwrap_or(depth))
                    .collect();
                ((0..heads.len()).collect(), min_levels)
            }
        };

        let decoders: Vec<_> = decoder_levels
            .into_iter()
            .enumerate()
            .map(|(index, min_level)| {
                let path = path / format!("dec_{}", index);
                let (laterals, fuses) = (min_level..depth)
                    .map(|level| {
                        let in_c = config.level_channels(level + 1);
                        let out_c = config.level_channels(level);
                        let lateral = nn::conv2d(
                            &path / format!("lateral_{}", level),
                            in_c as i64,
                            out_c as i64,
                            1,
                            Default::default(),
                        );
                        let fuse =
                            conv_init(out_c, out_c, 3).build(&path / format!("fuse_{}", level));
                        (lateral, fuse)
                    })
                    .unzip();

                Decoder {
                    min_level,
                    laterals,
                    fuses,
                }
            })
            .collect();

        let heads: Vec<_> = izip!(heads, head_levels, head_decoders)
            .enumerate()
            .map(|(index, (spec, levels, decoder))| {
                let path = path / format!("head_{}", index);
                let convs = izip!(&spec.ds_factors, levels)
                    .map(|(factor, level)| {
                        let conv = nn::conv2d(
                            &path / format!("ds_{}", factor),
                            config.level_channels(level) as i64,
                            spec.channels as i64,
                            1,
                            Default::default(),
                        );
                        (level, conv)
                    })
                    .collect();
                Head { decoder, convs }
            })
            .collect();

        Ok(DwdModel {
            stem,
            stages,
            decoders,
            heads,
            size_unit,
        })
    }
}

/// Encoder/decoder network with one output map per head and stride.
#[derive(Debug)]
pub struct DwdModel {
    stem: ConvBn2D,
    stages: Vec<(ConvBn2D, ConvBn2D)>,
    decoders: Vec<Decoder>,
    heads: Vec<Head>,
    size_unit: usize,
}

#[derive(Debug)]
struct Decoder {
    min_level: usize,
    /// Indexed by `level - min_level`.
    laterals: Vec<nn::Conv2D>,
    fuses: Vec<ConvBn2D>,
}

#[derive(Debug)]
struct Head {
    decoder: usize,
    convs: Vec<(usize, nn::Conv2D)>,
}

/// Raw head outputs in `[batch, channel, y, x]` layout.
#[derive(Debug, TensorLike)]
pub struct DwdModelOutput {
    /// `maps[head][ds_factor_index]`
    pub maps: Vec<Vec<Tensor>>,
}

impl DwdModel {
    pub fn size_unit(&self) -> usize {
        self.size_unit
    }

    pub fn forward_t(&self, input: &Tensor, train: bool) -> Result<DwdModelOutput> {
        let (_, _, height, width) = input.size4()?;
        let unit = self.size_unit as i64;
        ensure!(
            height % unit == 0 && width % unit == 0,
            "input size {}x{} must be a multiple of {}",
            height,
            width,
            unit
        );

        // features[level] has stride 2^level
        let features: Vec<Tensor> = {
            let first = self.stem.forward_t(input, train);
            iter::once(first.shallow_clone())
                .chain(self.stages.iter().scan(first, |xs, (down, conv)| {
                    *xs = conv.forward_t(&down.forward_t(xs, train), train);
                    Some(xs.shallow_clone())
                }))
                .collect()
        };

        let decoded: Vec<Vec<Tensor>> = self
            .decoders
            .iter()
            .map(|decoder| decoder.forward_t(&features, train))
            .collect();

        let maps = self
            .heads
            .iter()
            .map(|head| {
                let levels = &decoded[head.decoder];
                let min_level = self.decoders[head.decoder].min_level;
                head.convs
                    .iter()
                    .map(|(level, conv)| levels[level - min_level].apply(conv))
                    .collect()
            })
            .collect();

        Ok(DwdModelOutput { maps })
    }
}

impl Decoder {
    /// Returns the decoded maps of levels `min_level..=depth`.
    fn forward_t(&self, features: &[Tensor], train: bool) -> Vec<Tensor> {
        let depth = features.len() - 1;
        let mut current = features[depth].shallow_clone();
        let mut outputs = vec![current.shallow_clone()];

        for level in (self.min_level..depth).rev() {
            let index = level - self.min_level;
            let skip = &features[level];
            let size = skip.size();
            let up = current.upsample_nearest2d(&[size[2], size[3]], None, None);
            let merged = up.apply(&self.laterals[index]) + skip;
            current = self.fuses[index].forward_t(&merged, train);
            outputs.push(current.shallow_clone());
        }

        outputs.reverse();
        outputs
    }
}
