use crate::{common::*, config::OptimizerConfig};

/// The optimizers selectable in the configuration.
pub enum Optimizer {
    Adam(nn::Optimizer),
    RmsProp(nn::Optimizer),
    Sgd(nn::Optimizer),
}

impl Optimizer {
    pub fn new(
        vs: &nn::VarStore,
        config: &OptimizerConfig,
        weight_decay: R64,
        lr: f64,
    ) -> Result<Self> {
        let wd = weight_decay.raw();
        let optimizer = match *config {
            OptimizerConfig::Adam { beta1, beta2 } => Self::Adam(
                nn::Adam {
                    beta1: beta1.raw(),
                    beta2: beta2.raw(),
                    wd,
                }
                .build(vs, lr)?,
            ),
            OptimizerConfig::RmsProp { alpha, momentum } => Self::RmsProp(
                nn::RmsProp {
                    alpha: alpha.raw(),
                    momentum: momentum.map(|momentum| momentum.raw()).unwrap_or(0.0),
                    wd,
                    ..Default::default()
                }
                .build(vs, lr)?,
            ),
            OptimizerConfig::Momentum { momentum, nesterov } => Self::Sgd(
                nn::Sgd {
                    momentum: momentum.raw(),
                    nesterov,
                    wd,
                    ..Default::default()
                }
                .build(vs, lr)?,
            ),
        };
        Ok(optimizer)
    }

    pub fn set_lr(&mut self, lr: f64) {
        match self {
            Self::Adam(opt) => opt.set_lr(lr),
            Self::RmsProp(opt) => opt.set_lr(lr),
            Self::Sgd(opt) => opt.set_lr(lr),
        }
    }

    pub fn backward_step(&mut self, loss: &Tensor) {
        match self {
            Self::Adam(opt) => opt.backward_step(loss),
            Self::RmsProp(opt) => opt.backward_step(loss),
            Self::Sgd(opt) => opt.backward_step(loss),
        }
    }
}
