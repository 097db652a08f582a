use crate::common::*;

#[derive(Debug, Clone)]
pub struct ConvBn2DInit {
    pub in_c: usize,
    pub out_c: usize,
    pub k: usize,
    pub s: usize,
    pub p: usize,
    pub bias: bool,
    pub activation: bool,
    pub batch_norm: bool,
}

impl ConvBn2DInit {
    pub fn new(in_c: usize, out_c: usize, k: usize) -> Self {
        Self {
            in_c,
            out_c,
            k,
            s: 1,
            p: k / 2,
            bias: false,
            activation: true,
            batch_norm: true,
        }
    }

    pub fn stride(self, s: usize) -> Self {
        Self { s, ..self }
    }

    pub fn build<'p, P>(self, path: P) -> ConvBn2D
    where
        P: Borrow<nn::Path<'p>>,
    {
        let path = path.borrow();

        let Self {
            in_c,
            out_c,
            k,
            s,
            p,
            bias,
            activation,
            batch_norm,
        } = self;

        let conv = nn::conv2d(
            path / "conv",
            in_c as i64,
            out_c as i64,
            k as i64,
            nn::ConvConfig {
                stride: s as i64,
                padding: p as i64,
                // without batch norm the bias is needed
                bias: bias || !batch_norm,
                ..Default::default()
            },
        );
        let bn =
            batch_norm.then(|| nn::batch_norm2d(path / "bn", out_c as i64, Default::default()));

        ConvBn2D {
            conv,
            bn,
            activation,
        }
    }
}

/// Convolution followed by an optional batch norm and a leaky ReLU.
#[derive(Debug)]
pub struct ConvBn2D {
    conv: nn::Conv2D,
    bn: Option<nn::BatchNorm>,
    activation: bool,
}

impl nn::ModuleT for ConvBn2D {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        let Self {
            ref conv,
            ref bn,
            activation,
        } = *self;

        let xs = xs.apply(conv);
        let xs = match bn {
            Some(bn) => xs.apply_t(bn, train),
            None => xs,
        };

        if activation {
            xs.leaky_relu()
        } else {
            xs
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conv_bn_2d_output_shape() {
        let vs = nn::VarStore::new(Device::Cpu);
        let root = vs.root();
        let conv = ConvBn2DInit::new(3, 8, 3).stride(2).build(&root / "conv");

        let input = Tensor::randn(&[2, 3, 16, 12], (Kind::Float, Device::Cpu));
        let output = conv.forward_t(&input, true);
        assert_eq!(output.size(), vec![2, 8, 8, 6]);
    }
}
