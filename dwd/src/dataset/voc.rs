use super::*;
use crate::common::*;

/// A dataset in Pascal VOC layout.
///
/// Annotations live in `Annotations/<id>.xml`, images in the image directory
/// and the sample list in `ImageSets/Main/<split>.txt`. DeepScores ships its
/// annotations in the same layout with coordinates relative to the page size,
/// which is handled by `normalized_coordinates`.
#[derive(Debug, Clone)]
pub struct VocDataset {
    pub classes: IndexSet<String>,
    pub records: Vec<Arc<FileRecord>>,
    pub input_channels: usize,
}

#[derive(Debug, Clone)]
pub struct VocDatasetInit<'a> {
    pub dataset_dir: &'a Path,
    pub split: &'a str,
    pub image_dir_name: &'a str,
    pub classes_file: &'a Path,
    pub class_whitelist: Option<HashSet<String>>,
    pub normalized_coordinates: bool,
    pub input_channels: usize,
}

impl GenericDataset for VocDataset {
    fn input_channels(&self) -> usize {
        self.input_channels
    }

    fn classes(&self) -> &IndexSet<String> {
        &self.classes
    }
}

impl FileDataset for VocDataset {
    fn records(&self) -> &[Arc<FileRecord>] {
        &self.records
    }
}

impl<'a> VocDatasetInit<'a> {
    pub async fn load(self) -> Result<VocDataset> {
        let Self {
            dataset_dir,
            split,
            image_dir_name,
            classes_file,
            class_whitelist,
            normalized_coordinates,
            input_channels,
        } = self;
        ensure!(
            matches!(input_channels, 1 | 3),
            "input_channels must be either 1 or 3"
        );

        let classes = Arc::new(load_classes_file(classes_file).await?);

        // read the sample list
        let split_file = dataset_dir
            .join("ImageSets")
            .join("Main")
            .join(format!("{}.txt", split));
        let sample_ids: Vec<String> = tokio::fs::read_to_string(&split_file)
            .await
            .with_context(|| format!("unable to read split file '{}'", split_file.display()))?
            .lines()
            .map(|line| line.split_whitespace().next().unwrap_or("").to_owned())
            .filter(|id| !id.is_empty())
            .collect();

        let annotation_dir = Arc::new(dataset_dir.join("Annotations"));
        let image_dir = Arc::new(dataset_dir.join(image_dir_name));
        let class_whitelist = Arc::new(class_whitelist);

        let closure_classes = classes.clone();
        let records: Vec<_> = stream::iter(sample_ids)
            .par_then(None, move |sample_id| {
                let annotation_dir = annotation_dir.clone();
                let image_dir = image_dir.clone();
                let classes = closure_classes.clone();
                let class_whitelist = class_whitelist.clone();

                async move {
                    let xml_file = annotation_dir.join(format!("{}.xml", sample_id));
                    let text = tokio::fs::read_to_string(&xml_file)
                        .await
                        .with_context(|| format!("unable to read '{}'", xml_file.display()))?;
                    let annotation: VocAnnotation = serde_xml_rs::from_str(&text)
                        .with_context(|| format!("unable to parse '{}'", xml_file.display()))?;

                    let record = annotation
                        .into_record(
                            &image_dir,
                            &classes,
                            class_whitelist.as_ref().as_ref(),
                            normalized_coordinates,
                        )
                        .with_context(|| format!("invalid annotation '{}'", xml_file.display()))?;
                    Ok::<_, Error>(Arc::new(record))
                }
            })
            .try_collect()
            .await?;

        let classes = Arc::try_unwrap(classes).unwrap_or_else(|classes| (*classes).clone());
        info!(
            "loaded {} samples from VOC dataset '{}'",
            records.len(),
            dataset_dir.display()
        );

        Ok(VocDataset {
            classes,
            records,
            input_channels,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
struct VocAnnotation {
    filename: String,
    size: VocSize,
    #[serde(default, rename = "object")]
    objects: Vec<VocObject>,
}

#[derive(Debug, Clone, Deserialize)]
struct VocSize {
    width: f64,
    height: f64,
}

#[derive(Debug, Clone, Deserialize)]
struct VocObject {
    name: String,
    bndbox: VocBndBox,
}

#[derive(Debug, Clone, Deserialize)]
struct VocBndBox {
    xmin: f64,
    ymin: f64,
    xmax: f64,
    ymax: f64,
}

impl VocAnnotation {
    fn into_record(
        self,
        image_dir: &Path,
        classes: &IndexSet<String>,
        class_whitelist: Option<&HashSet<String>>,
        normalized_coordinates: bool,
    ) -> Result<FileRecord> {
        let Self {
            filename,
            size: VocSize { width, height },
            objects,
        } = self;
        ensure!(
            width >= 1.0 && height >= 1.0,
            "image size must be positive, but get {}x{}",
            height,
            width
        );

        let (scale_y, scale_x) = if normalized_coordinates {
            (height, width)
        } else {
            (1.0, 1.0)
        };

        let labels: Vec<_> = objects
            .into_iter()
            .filter_map(|object| {
                let class = class_index_of(classes, class_whitelist, &object.name)?;
                Some((object.bndbox, class))
            })
            .map(|(bndbox, class)| -> Result<_> {
                let VocBndBox {
                    xmin,
                    ymin,
                    xmax,
                    ymax,
                } = bndbox;
                let rect = pixel_tlbr(
                    ymin * scale_y,
                    xmin * scale_x,
                    ymax * scale_y,
                    xmax * scale_x,
                )?;
                Ok(Label { rect, class })
            })
            .try_collect()?;

        Ok(FileRecord {
            path: image_dir.join(filename),
            size: HW::try_from_hw([height.round() as usize, width.round() as usize])?,
            labels,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_normalized_annotation() {
        let xml = r#"
<annotation>
  <folder>images</folder>
  <filename>page_0.png</filename>
  <size><width>200</width><height>100</height><depth>1</depth></size>
  <object>
    <name>flat</name>
    <bndbox><xmin>0.1</xmin><ymin>0.2</ymin><xmax>0.15</xmax><ymax>0.4</ymax></bndbox>
  </object>
  <object>
    <name>unknown</name>
    <bndbox><xmin>0.1</xmin><ymin>0.2</ymin><xmax>0.15</xmax><ymax>0.4</ymax></bndbox>
  </object>
</annotation>
"#;
        let annotation: VocAnnotation = serde_xml_rs::from_str(xml).unwrap();
        let classes: IndexSet<_> = ["sharp", "flat"].iter().map(|s| s.to_string()).collect();
        let record = annotation
            .into_record(Path::new("images"), &classes, None, true)
            .unwrap();

        assert_eq!(record.path, Path::new("images/page_0.png"));
        assert_eq!(record.size.hw(), [100, 200]);
        assert_eq!(record.labels.len(), 1);

        let label = &record.labels[0];
        assert_eq!(label.class, 1);
        assert_abs_diff_eq!(label.rect.t().raw(), 20.0, epsilon = 1e-9);
        assert_abs_diff_eq!(label.rect.l().raw(), 20.0, epsilon = 1e-9);
        assert_abs_diff_eq!(label.rect.b().raw(), 40.0, epsilon = 1e-9);
        assert_abs_diff_eq!(label.rect.r().raw(), 30.0, epsilon = 1e-9);
    }

    #[tokio::test]
    async fn load_voc_layout() {
        let dataset_dir = Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("tests")
            .join("data")
            .join("voc");
        let classes_file = dataset_dir.join("classes.txt");
        let dataset = VocDatasetInit {
            dataset_dir: &dataset_dir,
            split: "train",
            image_dir_name: "JPEGImages",
            classes_file: &classes_file,
            class_whitelist: None,
            normalized_coordinates: false,
            input_channels: 3,
        }
        .load()
        .await
        .unwrap();

        assert_eq!(dataset.records.len(), 2);
        assert_eq!(dataset.classes().len(), 2);
        assert_eq!(dataset.records[0].labels.len(), 2);
        assert_eq!(dataset.records[1].labels.len(), 1);
    }
}
