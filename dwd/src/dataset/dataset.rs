use super::*;
use crate::common::*;

/// The generic dataset trait.
pub trait GenericDataset
where
    Self: Debug + Send + Sync,
{
    /// The number of color channels of the dataset.
    fn input_channels(&self) -> usize;

    /// The list of class names of the dataset.
    fn classes(&self) -> &IndexSet<String>;
}

/// The dataset with a list of image paths.
pub trait FileDataset
where
    Self: GenericDataset,
{
    /// Get the list of annotated image files in the dataset.
    fn records(&self) -> &[Arc<FileRecord>];
}

impl<D> GenericDataset for Box<D>
where
    D: GenericDataset + ?Sized,
{
    fn input_channels(&self) -> usize {
        (**self).input_channels()
    }

    fn classes(&self) -> &IndexSet<String> {
        (**self).classes()
    }
}

impl<D> FileDataset for Box<D>
where
    D: FileDataset + ?Sized,
{
    fn records(&self) -> &[Arc<FileRecord>] {
        (**self).records()
    }
}
