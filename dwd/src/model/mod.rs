//! The fully-convolutional network.

mod config;
mod conv_bn_2d;
mod model;

pub use config::*;
pub use conv_bn_2d::*;
pub use model::*;
