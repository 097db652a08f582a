use anyhow::Result;
use std::{path::Path, sync::Arc};
use train::config::Config;

#[tokio::test]
async fn train_on_fixture() -> Result<()> {
    let fixture = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("data")
        .join("train.json5");
    let logging_dir = tempfile::tempdir()?;

    let mut config = Config::open(&fixture)?;
    config.logging.dir = logging_dir.path().to_owned();
    train::start(Arc::new(config)).await?;

    // one run directory
    let runs: Vec<_> = std::fs::read_dir(logging_dir.path())?.collect::<Result<_, _>>()?;
    assert_eq!(runs.len(), 1);
    let run_dir = runs[0].path();

    assert!(run_dir.join("config.json5").is_file());
    let losses = std::fs::read_to_string(run_dir.join("losses.csv"))?;
    assert!(losses.starts_with("step,tag,name,value"));
    assert!(losses.contains(",train,assign_0_loss,"));
    assert!(losses.contains(",validation,"));
    assert!(run_dir
        .join("images")
        .join("train_detections_00000000.png")
        .is_file());

    // at steps 0 and 3, and after the last step
    let checkpoints = std::fs::read_dir(run_dir.join("checkpoints"))?.count();
    assert_eq!(checkpoints, 3);
    Ok(())
}
