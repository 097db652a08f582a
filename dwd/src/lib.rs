//! The building blocks of deep watershed detection.

mod common;
pub mod data_layer;
pub mod dataset;
pub mod decode;
pub mod dws;
pub mod groundtruth;
pub mod loss;
pub mod model;
pub mod prefetch;
pub mod roidb;
pub mod utils;
