//! The inference program of deep watershed detection.

mod common;
pub mod config;
pub mod detector;
pub mod output;

use crate::{
    common::*,
    config::Config,
    detector::{Detector, InputImage, Preprocessor},
    output::{overlay_file_name, overlay_image, DetectionRecord},
};
use dwd::dataset::load_classes_file;
use train::config::Config as TrainConfig;

/// The name of the output file holding one JSON record per image.
pub const DETECTIONS_FILE: &str = "detections.jsonl";

pub async fn start(config: Arc<Config>) -> Result<()> {
    let train_config = Arc::new(
        TrainConfig::open(&config.model.training_config).with_context(|| {
            format!(
                "failed to load training config file '{}'",
                config.model.training_config.display()
            )
        })?,
    );
    let classes = Arc::new(load_classes_file(train_config.dataset.train.classes_file()).await?);

    // load model
    let detector = {
        let config = config.clone();
        let train_config = train_config.clone();
        let num_classes = classes.len();
        tokio::task::spawn_blocking(move || Detector::load(&config, &train_config, num_classes))
            .await??
    };

    // list input images
    let paths: Vec<PathBuf> = glob::glob(&config.input.images)?.try_collect()?;
    let paths: Vec<_> = paths.into_iter().sorted().collect();
    if paths.is_empty() {
        warn!("no images match '{}'", config.input.images);
    }
    info!("{} input images", paths.len());

    // prepare output
    let output_dir = &config.output.dir;
    tokio::fs::create_dir_all(output_dir).await?;
    let overlay_dir = output_dir.join("overlays");
    if config.output.draw_overlay {
        tokio::fs::create_dir_all(&overlay_dir).await?;
    }
    let mut writer = tokio::fs::File::create(output_dir.join(DETECTIONS_FILE)).await?;

    // load images in parallel, keeping the input order
    let preprocessor = Arc::new(Preprocessor::new(&config, &train_config));
    let mut input_stream = Box::pin(stream::iter(paths).par_map(None, move |path| {
        let preprocessor = preprocessor.clone();
        move || preprocessor.load(path)
    }));

    let mut detector = detector;
    let mut index = 0;

    while let Some(input) = input_stream.next().await {
        let input: InputImage = input?;

        let (detector_, input, detections) = tokio::task::spawn_blocking(move || -> Result<_> {
            let detections = detector.detect(&input)?;
            Ok((detector, input, detections))
        })
        .await??;
        detector = detector_;

        info!(
            "{} objects in '{}'",
            detections.len(),
            input.path.display()
        );

        let record = DetectionRecord::new(&input, &detections, &classes)?;
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');
        writer.write_all(line.as_bytes()).await?;

        if config.output.draw_overlay {
            let path = overlay_dir.join(overlay_file_name(index, &input.path));
            tokio::task::spawn_blocking(move || -> Result<_> {
                overlay_image(&input, &detections).save(&path)?;
                Ok(())
            })
            .instrument(trace_span!("save_overlay"))
            .await??;
        }

        index += 1;
    }

    writer.flush().await?;
    info!("{} images processed", index);

    Ok(())
}
