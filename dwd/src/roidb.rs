//! The region-of-interest database fed to the data layer.

use crate::{common::*, dataset::FileDataset};

/// An image with its annotations as seen by the data layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoiEntry {
    pub path: PathBuf,
    pub size: HW<usize>,
    pub labels: Vec<PixelLabel>,
    /// The image is mirrored horizontally when loaded.
    pub flipped: bool,
}

/// Builds the database from a dataset, optionally appending mirrored copies.
pub fn prepare_roidb<D>(dataset: &D, use_flipped: bool) -> Vec<Arc<RoiEntry>>
where
    D: FileDataset + ?Sized,
{
    let entries = dataset.records().iter().map(|record| {
        Arc::new(RoiEntry {
            path: record.path.clone(),
            size: record.size,
            labels: record.labels.clone(),
            flipped: false,
        })
    });

    let mut roidb: Vec<_> = entries.collect();
    if use_flipped {
        let flipped: Vec<_> = roidb.iter().map(|entry| Arc::new(entry.flip())).collect();
        roidb.extend(flipped);
        info!("appended horizontally flipped training examples");
    }
    info!("{} entries in roidb", roidb.len());

    roidb
}

/// Removes entries that cannot produce any foreground.
pub fn filter_roidb(roidb: Vec<Arc<RoiEntry>>) -> Vec<Arc<RoiEntry>> {
    let num_before = roidb.len();
    let filtered: Vec<_> = roidb
        .into_iter()
        .filter(|entry| !entry.labels.is_empty())
        .collect();
    info!(
        "filtered {} roidb entries: {} -> {}",
        num_before - filtered.len(),
        num_before,
        filtered.len()
    );
    filtered
}

impl RoiEntry {
    /// The same entry mirrored along the vertical image axis.
    pub fn flip(&self) -> Self {
        let transform = Transform::flip_horizontal(r64(self.size.w() as f64));
        let labels = self.labels.iter().map(|label| &transform * label).collect();

        Self {
            path: self.path.clone(),
            size: self.size,
            labels,
            flipped: !self.flipped,
        }
    }
}
