use anyhow::Result;
use detect::{config::Config, output::DetectionRecord, DETECTIONS_FILE};
use dwd::{dataset::load_classes_file, model::DwdModelInit};
use std::{path::Path, sync::Arc};
use tch::{nn, Device};
use train::config::Config as TrainConfig;

#[tokio::test]
async fn detect_on_fixture() -> Result<()> {
    let train_config_file = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("train")
        .join("tests")
        .join("data")
        .join("train.json5");
    let train_config = TrainConfig::open(&train_config_file)?;
    let classes = load_classes_file(train_config.dataset.train.classes_file()).await?;
    let dir = tempfile::tempdir()?;

    // an untrained model stands in for a checkpoint
    let checkpoint_file = dir.path().join("model.ckpt");
    {
        let vs = nn::VarStore::new(Device::Cpu);
        let root = vs.root();
        let _model = DwdModelInit::from_assignments(
            train_config.dataset.train.input_channels(),
            classes.len(),
            train_config.model.clone(),
            &train_config.assignments,
        )
        .build(&root / "model")?;
        vs.save(&checkpoint_file)?;
    }

    let output_dir = dir.path().join("output");
    let text = format!(
        r#"{{
            version: "0.1.0",
            model: {{
                training_config: {:?},
                checkpoint_file: {:?},
                device: "cpu",
            }},
            input: {{ images: "../dwd/tests/data/csv/images/*.png" }},
            preprocess: {{ max_edge: 40 }},
            output: {{ dir: {:?}, draw_overlay: true }},
        }}"#,
        train_config_file, checkpoint_file, output_dir
    );
    let config: Config = json5::from_str(&text)?;
    detect::start(Arc::new(config)).await?;

    let lines = std::fs::read_to_string(output_dir.join(DETECTIONS_FILE))?;
    let records: Vec<DetectionRecord> = lines
        .lines()
        .map(serde_json::from_str)
        .collect::<Result<_, _>>()?;
    assert_eq!(records.len(), 2);
    assert!(records[0].image.ends_with("page_0.png"));
    assert!(records[1].image.ends_with("page_1.png"));
    records.iter().for_each(|record| {
        assert!(record.height > 0 && record.width > 0);
        record.detections.iter().for_each(|detection| {
            assert!(classes.contains(&detection.class_name));
        });
    });

    let overlays = std::fs::read_dir(output_dir.join("overlays"))?.count();
    assert_eq!(overlays, 2);
    Ok(())
}
