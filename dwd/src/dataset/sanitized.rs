use super::*;
use crate::common::*;

/// The dataset that filters out bad boxes.
#[derive(Debug)]
pub struct SanitizedDataset<D>
where
    D: FileDataset,
{
    dataset: D,
    records: Vec<Arc<FileRecord>>,
}

impl<D> SanitizedDataset<D>
where
    D: FileDataset,
{
    /// Clips boxes to the image.
    ///
    /// Boxes reaching further than `out_of_bound_tolerance` pixels outside
    /// the image, and boxes whose clipped height or width is below
    /// `min_bbox_size` pixels are removed.
    pub fn new(dataset: D, out_of_bound_tolerance: R64, min_bbox_size: R64) -> Result<Self> {
        ensure!(
            out_of_bound_tolerance >= 0.0,
            "out_of_bound_tolerance must be non-negative"
        );
        ensure!(min_bbox_size >= 0.0, "min_bbox_size must be non-negative");

        let mut out_of_bound_count = 0;
        let mut too_small_count = 0;

        let records: Vec<_> = dataset
            .records()
            .iter()
            .map(|record| -> Result<_> {
                let FileRecord {
                    ref path,
                    ref size,
                    labels: ref orig_labels,
                } = **record;

                ensure!(
                    size.h() > 0 && size.w() > 0,
                    "image height and width must be positive in '{}'",
                    path.display()
                );
                let size_r64 = HW::try_from_hw([r64(size.h() as f64), r64(size.w() as f64)])?;
                let tol = out_of_bound_tolerance;

                let labels: Vec<_> = orig_labels
                    .iter()
                    .filter(|label| {
                        let [t, l, b, r] = label.rect.tlbr();
                        let inside = t >= -tol
                            && l >= -tol
                            && b <= size_r64.h() + tol
                            && r <= size_r64.w() + tol;
                        if !inside {
                            out_of_bound_count += 1;
                        }
                        inside
                    })
                    .filter_map(|label| {
                        let clipped = label.rect.clip_to(&size_r64);
                        let clipped = clipped
                            .filter(|rect| rect.h() >= min_bbox_size && rect.w() >= min_bbox_size);
                        if clipped.is_none() {
                            too_small_count += 1;
                        }
                        Some(Label {
                            rect: clipped?,
                            class: label.class,
                        })
                    })
                    .collect();

                Ok(Arc::new(FileRecord {
                    path: path.clone(),
                    size: *size,
                    labels,
                }))
            })
            .try_collect()?;

        if out_of_bound_count > 0 {
            warn!(
                "filtered out {} objects out of image bounds",
                out_of_bound_count
            );
        }
        if too_small_count > 0 {
            warn!("filtered out {} too small objects", too_small_count);
        }

        Ok(Self { dataset, records })
    }
}

impl<D> GenericDataset for SanitizedDataset<D>
where
    D: FileDataset,
{
    fn input_channels(&self) -> usize {
        self.dataset.input_channels()
    }

    fn classes(&self) -> &IndexSet<String> {
        self.dataset.classes()
    }
}

impl<D> FileDataset for SanitizedDataset<D>
where
    D: FileDataset,
{
    fn records(&self) -> &[Arc<FileRecord>] {
        &self.records
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct ListDataset {
        classes: IndexSet<String>,
        records: Vec<Arc<FileRecord>>,
    }

    impl GenericDataset for ListDataset {
        fn input_channels(&self) -> usize {
            3
        }

        fn classes(&self) -> &IndexSet<String> {
            &self.classes
        }
    }

    impl FileDataset for ListDataset {
        fn records(&self) -> &[Arc<FileRecord>] {
            &self.records
        }
    }

    #[test]
    fn sanitize_boxes() {
        let label = |t: f64, l: f64, b: f64, r: f64| Label {
            rect: pixel_tlbr(t, l, b, r).unwrap(),
            class: 0,
        };
        let dataset = ListDataset {
            classes: iter::once("a".to_string()).collect(),
            records: vec![Arc::new(FileRecord {
                path: PathBuf::from("a.png"),
                size: HW::try_from_hw([100, 100]).unwrap(),
                labels: vec![
                    label(10.0, 10.0, 20.0, 20.0),
                    label(-1.0, 90.0, 20.0, 101.0),
                    label(-30.0, 0.0, 20.0, 20.0),
                    label(50.0, 50.0, 50.5, 60.0),
                ],
            })],
        };

        let sanitized = SanitizedDataset::new(dataset, r64(2.0), r64(1.0)).unwrap();
        let labels = &sanitized.records()[0].labels;
        assert_eq!(labels.len(), 2);
        assert_eq!(
            labels[1].rect.tlbr(),
            [r64(0.0), r64(90.0), r64(20.0), r64(100.0)]
        );
    }
}
