use crate::common::*;

/// An image file with its size and object annotations, without pixels.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileRecord {
    pub path: PathBuf,
    pub size: HW<usize>,
    /// Boxes in pixel units.
    pub labels: Vec<PixelLabel>,
}
