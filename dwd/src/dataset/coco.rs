use super::*;
use crate::common::*;

/// A dataset described by a COCO instances file.
#[derive(Debug, Clone)]
pub struct CocoDataset {
    pub classes: IndexSet<String>,
    pub records: Vec<Arc<FileRecord>>,
}

impl GenericDataset for CocoDataset {
    fn input_channels(&self) -> usize {
        3
    }

    fn classes(&self) -> &IndexSet<String> {
        &self.classes
    }
}

impl FileDataset for CocoDataset {
    fn records(&self) -> &[Arc<FileRecord>] {
        &self.records
    }
}

impl CocoDataset {
    pub async fn load(
        annotation_file: impl AsRef<Path>,
        image_dir: impl AsRef<Path>,
        classes_file: impl AsRef<Path>,
        class_whitelist: Option<HashSet<String>>,
    ) -> Result<Self> {
        let annotation_file = annotation_file.as_ref();
        let image_dir = image_dir.as_ref();
        let classes = load_classes_file(classes_file).await?;

        let instances: CocoInstances = {
            let text = tokio::fs::read_to_string(annotation_file)
                .await
                .with_context(|| format!("unable to read '{}'", annotation_file.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("unable to parse '{}'", annotation_file.display()))?
        };

        let records = instances.into_records(image_dir, &classes, class_whitelist.as_ref())?;
        info!(
            "loaded {} images from COCO annotation file '{}'",
            records.len(),
            annotation_file.display()
        );

        Ok(Self { classes, records })
    }
}

#[derive(Debug, Clone, Deserialize)]
struct CocoInstances {
    images: Vec<CocoImage>,
    annotations: Vec<CocoAnnotation>,
    categories: Vec<CocoCategory>,
}

#[derive(Debug, Clone, Deserialize)]
struct CocoImage {
    id: u64,
    file_name: String,
    width: usize,
    height: usize,
}

#[derive(Debug, Clone, Deserialize)]
struct CocoAnnotation {
    image_id: u64,
    category_id: u64,
    /// `[x, y, w, h]` in pixels.
    bbox: [f64; 4],
    #[serde(default)]
    iscrowd: u8,
}

#[derive(Debug, Clone, Deserialize)]
struct CocoCategory {
    id: u64,
    name: String,
}

impl CocoInstances {
    fn into_records(
        self,
        image_dir: &Path,
        classes: &IndexSet<String>,
        class_whitelist: Option<&HashSet<String>>,
    ) -> Result<Vec<Arc<FileRecord>>> {
        let Self {
            images,
            annotations,
            categories,
        } = self;

        // map category ids to class indexes
        let category_to_class: HashMap<u64, usize> = categories
            .iter()
            .filter_map(|category| {
                let class = class_index_of(classes, class_whitelist, &category.name)?;
                Some((category.id, class))
            })
            .collect();
        {
            let category_names: HashSet<_> =
                categories.iter().map(|category| &category.name).collect();
            let missing: Vec<_> = classes
                .iter()
                .filter(|name| !category_names.contains(name))
                .collect();
            if !missing.is_empty() {
                warn!(
                    "these classes are not defined in the annotation file: {:?}",
                    missing
                );
            }
            let ignored = categories.len() - category_to_class.len();
            if ignored > 0 {
                warn!("{} categories are ignored by the classes file", ignored);
            }
        }

        let mut labels_of_image: HashMap<u64, Vec<PixelLabel>> = HashMap::new();
        for annotation in annotations {
            let CocoAnnotation {
                image_id,
                category_id,
                bbox: [x, y, w, h],
                iscrowd,
            } = annotation;
            if iscrowd != 0 {
                continue;
            }
            let class = match category_to_class.get(&category_id) {
                Some(&class) => class,
                None => continue,
            };
            let rect = pixel_tlbr(y, x, y + h, x + w)
                .with_context(|| format!("invalid box in annotation of image {}", image_id))?;
            labels_of_image
                .entry(image_id)
                .or_default()
                .push(Label { rect, class });
        }

        images
            .into_iter()
            .map(|image| -> Result<_> {
                let CocoImage {
                    id,
                    file_name,
                    width,
                    height,
                } = image;
                Ok(Arc::new(FileRecord {
                    path: image_dir.join(file_name),
                    size: HW::try_from_hw([height, width])?,
                    labels: labels_of_image.remove(&id).unwrap_or_default(),
                }))
            })
            .try_collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn convert_instances() {
        let json = r#"{
            "images": [
                {"id": 1, "file_name": "a.jpg", "width": 64, "height": 48},
                {"id": 2, "file_name": "b.jpg", "width": 32, "height": 32}
            ],
            "annotations": [
                {"image_id": 1, "category_id": 7, "bbox": [4.0, 2.0, 10.0, 6.0], "iscrowd": 0},
                {"image_id": 1, "category_id": 9, "bbox": [0.0, 0.0, 5.0, 5.0], "iscrowd": 0},
                {"image_id": 2, "category_id": 7, "bbox": [0.0, 0.0, 5.0, 5.0], "iscrowd": 1}
            ],
            "categories": [
                {"id": 7, "name": "cat"},
                {"id": 9, "name": "dog"}
            ]
        }"#;
        let instances: CocoInstances = serde_json::from_str(json).unwrap();
        let classes: IndexSet<_> = ["person", "cat"].iter().map(|s| s.to_string()).collect();
        let records = instances
            .into_records(Path::new("coco"), &classes, None)
            .unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].size.hw(), [48, 64]);
        assert_eq!(records[0].labels.len(), 1);
        assert_eq!(records[0].labels[0].class, 1);
        assert_eq!(
            records[0].labels[0].rect.tlbr(),
            [r64(2.0), r64(4.0), r64(8.0), r64(14.0)]
        );
        assert!(records[1].labels.is_empty());
    }
}
