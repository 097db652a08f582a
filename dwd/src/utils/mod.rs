//! Utility functions and types.

mod draw;
mod num;
mod tensor;

pub use draw::*;
pub use num::*;
pub use tensor::*;
