//! Dataset loaders and dataset wrappers.

mod coco;
mod csv;
mod dataset;
mod record;
mod sanitized;
mod utils;
mod voc;

pub use self::csv::*;
pub use coco::*;
pub use dataset::*;
pub use record::*;
pub use sanitized::*;
pub use utils::*;
pub use voc::*;
