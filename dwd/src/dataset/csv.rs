use super::*;
use crate::common::*;

/// A dataset described by a CSV label file.
///
/// Every row is one object: `image_file,class_name,t,l,b,r` with pixel
/// coordinates. Images without objects can be listed with empty class and
/// coordinate fields.
#[derive(Debug, Clone)]
pub struct CsvDataset {
    pub classes: IndexSet<String>,
    pub records: Vec<Arc<FileRecord>>,
    pub input_channels: usize,
}

impl GenericDataset for CsvDataset {
    fn input_channels(&self) -> usize {
        self.input_channels
    }

    fn classes(&self) -> &IndexSet<String> {
        &self.classes
    }
}

impl FileDataset for CsvDataset {
    fn records(&self) -> &[Arc<FileRecord>] {
        &self.records
    }
}

impl CsvDataset {
    pub async fn load(
        image_dir: impl AsRef<Path>,
        label_file: impl AsRef<Path>,
        classes_file: impl AsRef<Path>,
        input_channels: usize,
        class_whitelist: Option<HashSet<String>>,
    ) -> Result<Self> {
        ensure!(
            matches!(input_channels, 1 | 3),
            "input_channels must be either 1 or 3"
        );
        let classes = Arc::new(load_classes_file(classes_file).await?);

        let rows = {
            let image_dir = image_dir.as_ref().to_owned();
            let label_file = label_file.as_ref().to_owned();
            tokio::task::spawn_blocking(move || load_csv_rows(image_dir, label_file)).await??
        };

        // group rows by image, keeping the file order
        let rows = ArcRef::new(Arc::new(rows));
        let groups: Vec<(PathBuf, Vec<ArcRef<Vec<CsvRow>, CsvRow>>)> = {
            let mut groups: IndexMap<PathBuf, Vec<_>> = IndexMap::new();
            (0..rows.len()).for_each(|index| {
                let row = rows.clone().map(|rows| &rows[index]);
                groups.entry(row.image_file.clone()).or_default().push(row);
            });
            groups.into_iter().collect()
        };

        let class_whitelist = Arc::new(class_whitelist);
        let records: Vec<_> = {
            let classes = classes.clone();

            stream::iter(groups)
                .par_map(None, move |(image_file, rows)| {
                    let classes = classes.clone();
                    let class_whitelist = class_whitelist.clone();

                    move || -> Result<_> {
                        let size = {
                            let imagesize::ImageSize { height, width } =
                                imagesize::size(&image_file).map_err(|err| {
                                    format_err!(
                                        "unable to read size of '{}': {:?}",
                                        image_file.display(),
                                        err
                                    )
                                })?;
                            HW::try_from_hw([height, width])?
                        };

                        let labels: Vec<_> = rows
                            .iter()
                            .filter_map(|row| {
                                let class_name = row.class_name.as_ref()?;
                                let class = class_index_of(
                                    &classes,
                                    class_whitelist.as_ref().as_ref(),
                                    class_name,
                                )?;
                                Some((row, class))
                            })
                            .map(|(row, class)| -> Result<_> {
                                let (t, l, b, r) = match (row.t, row.l, row.b, row.r) {
                                    (Some(t), Some(l), Some(b), Some(r)) => (t, l, b, r),
                                    _ => bail!(
                                        "missing coordinates for an object in '{}'",
                                        image_file.display()
                                    ),
                                };
                                Ok(Label {
                                    rect: pixel_tlbr(t, l, b, r)?,
                                    class,
                                })
                            })
                            .try_collect()?;

                        Ok(Arc::new(FileRecord {
                            path: image_file,
                            size,
                            labels,
                        }))
                    }
                })
                .try_collect()
                .await?
        };

        let classes = Arc::try_unwrap(classes).unwrap_or_else(|classes| (*classes).clone());
        info!("loaded {} images from CSV dataset", records.len());

        Ok(Self {
            classes,
            records,
            input_channels,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CsvRow {
    pub image_file: PathBuf,
    pub class_name: Option<String>,
    pub t: Option<f64>,
    pub l: Option<f64>,
    pub b: Option<f64>,
    pub r: Option<f64>,
}

pub fn load_csv_rows(
    image_dir: impl AsRef<Path>,
    label_file: impl AsRef<Path>,
) -> Result<Vec<CsvRow>> {
    let image_dir = image_dir.as_ref();
    let label_file = label_file.as_ref();

    let rows: Vec<CsvRow> = ::csv::ReaderBuilder::new()
        .has_headers(true)
        .comment(Some(b'#'))
        .trim(::csv::Trim::All)
        .from_path(label_file)
        .with_context(|| format!("unable to open '{}'", label_file.display()))?
        .deserialize()
        .try_collect()?;

    // check existence of image files
    rows.into_iter()
        .map(|row| {
            let image_file = image_dir.join(&row.image_file);
            ensure!(
                image_file.is_file(),
                "the image file '{}' does not exist",
                image_file.display()
            );
            Ok(CsvRow { image_file, ..row })
        })
        .try_collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn csv_dataset_test() {
        let base_dir = Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("tests")
            .join("data")
            .join("csv");
        let dataset = CsvDataset::load(
            base_dir.join("images"),
            base_dir.join("label.csv"),
            base_dir.join("classes.txt"),
            1,
            None,
        )
        .await
        .unwrap();

        assert_eq!(dataset.records.len(), 2);
        assert_eq!(dataset.classes.len(), 3);
        assert_eq!(dataset.input_channels(), 1);
        assert_eq!(dataset.records[0].labels.len(), 2);
        assert_eq!(dataset.records[0].size.hw(), [48, 64]);
        assert!(dataset.records[1].labels.is_empty());
    }
}
