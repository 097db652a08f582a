//! Rectangle geometry for object annotations and detections.

mod common;

pub use rect::*;
pub mod rect;

pub use tlbr::*;
pub mod tlbr;

pub use cycxhw::*;
pub mod cycxhw;

pub use hw::*;
pub mod hw;

pub use transform::*;
pub mod transform;

pub mod prelude {
    pub use crate::rect::{Rect, RectFloat, RectNum};
}
