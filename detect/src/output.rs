//! Detection records and overlay images.

use crate::{common::*, detector::InputImage};
use dwd::{
    dws::Detection,
    utils::{draw_rect, DETECTION_COLOR},
};

/// One line of `detections.jsonl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionRecord {
    pub image: PathBuf,
    pub height: usize,
    pub width: usize,
    pub detections: Vec<DetectionEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionEntry {
    pub class: usize,
    pub class_name: String,
    pub score: f64,
    /// `[top, left, bottom, right]` in image pixels.
    pub tlbr: [f64; 4],
    pub area: usize,
}

impl DetectionRecord {
    pub fn new(
        input: &InputImage,
        detections: &[Detection],
        classes: &IndexSet<String>,
    ) -> Result<Self> {
        let [height, width] = input.original_size().hw();
        let detections = detections
            .iter()
            .map(|detection| -> Result<_> {
                let class_name = classes
                    .get_index(detection.class)
                    .ok_or_else(|| format_err!("invalid class index {}", detection.class))?
                    .clone();
                Ok(DetectionEntry {
                    class: detection.class,
                    class_name,
                    score: detection.score.raw(),
                    tlbr: detection.rect.tlbr().map(|value| value.raw()),
                    area: detection.area,
                })
            })
            .try_collect()?;

        Ok(Self {
            image: input.path.clone(),
            height,
            width,
            detections,
        })
    }
}

/// Draws detections over the original image.
pub fn overlay_image(input: &InputImage, detections: &[Detection]) -> DynamicImage {
    let mut image = input.original.to_rgb8();
    detections
        .iter()
        .for_each(|detection| draw_rect(&mut image, &detection.rect, DETECTION_COLOR, 2));
    DynamicImage::ImageRgb8(image)
}

/// The overlay file name, unique as long as input file stems are.
pub fn overlay_file_name(index: usize, path: &Path) -> String {
    let stem = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("image");
    format!("{:06}_{}.png", index, stem)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input() -> InputImage {
        InputImage {
            path: PathBuf::from("images/page.png"),
            original: DynamicImage::new_rgb8(30, 20),
            input_size: HW::new(20, 30),
            data: Array4::zeros((1, 3, 24, 32)),
        }
    }

    fn detection(class: usize) -> Detection {
        Detection {
            rect: TLBR::try_from_tlbr([r64(2.0), r64(3.0), r64(8.0), r64(9.0)]).unwrap(),
            class,
            score: r64(0.75),
            area: 12,
        }
    }

    #[test]
    fn record_names_classes() {
        let classes: IndexSet<String> = vec!["notehead".to_owned(), "clef".to_owned()]
            .into_iter()
            .collect();
        let record = DetectionRecord::new(&input(), &[detection(1)], &classes).unwrap();
        assert_eq!(record.height, 20);
        assert_eq!(record.width, 30);
        assert_eq!(record.detections[0].class_name, "clef");
        assert_eq!(record.detections[0].tlbr, [2.0, 3.0, 8.0, 9.0]);

        let line = serde_json::to_string(&record).unwrap();
        let parsed: DetectionRecord = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed, record);

        assert!(DetectionRecord::new(&input(), &[detection(5)], &classes).is_err());
    }

    #[test]
    fn overlay_marks_boxes() {
        let image = overlay_image(&input(), &[detection(0)]).to_rgb8();
        assert_eq!(image.dimensions(), (30, 20));
        assert_eq!(*image.get_pixel(3, 2), DETECTION_COLOR);
        assert_eq!(*image.get_pixel(20, 15), Rgb([0, 0, 0]));
        assert_eq!(overlay_file_name(3, Path::new("a/b/page.png")), "000003_page.png");
    }
}
