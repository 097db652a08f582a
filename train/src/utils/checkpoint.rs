use super::FILE_STRFTIME;
use crate::{common::*, config::LoadCheckpoint};
use regex::Regex;

/// Save parameters to a checkpoint file.
pub fn save_checkpoint(
    vs: &nn::VarStore,
    checkpoint_dir: &Path,
    training_step: usize,
    loss: f64,
) -> Result<PathBuf> {
    let filename = format!(
        "{}_{:06}_{:08.5}.ckpt",
        Local::now().format(FILE_STRFTIME),
        training_step,
        loss
    );
    let path = checkpoint_dir.join(filename);
    vs.save(&path)?;
    Ok(path)
}

/// Finds the most recent checkpoint file under `<logging_dir>/*/checkpoints`.
pub fn find_recent_checkpoint(logging_dir: &Path) -> Result<Option<PathBuf>> {
    let checkpoint_filename_regex =
        Regex::new(r"^(\d{4}-\d{2}-\d{2}-\d{2}-\d{2}-\d{2}\.\d{3}[+-]\d{4})_\d{6}_\d+\.\d+\.ckpt$")?;

    let paths: Vec<_> =
        glob::glob(&format!("{}/*/checkpoints/*.ckpt", logging_dir.display()))?.try_collect()?;
    let checkpoint_file = paths
        .into_iter()
        .filter_map(|path| {
            let file_name = path.file_name()?.to_str()?;
            let captures = checkpoint_filename_regex.captures(file_name)?;
            let datetime_str = captures.get(1)?.as_str();
            let datetime = DateTime::parse_from_str(datetime_str, FILE_STRFTIME).ok()?;
            Some((path, datetime))
        })
        .max_by_key(|(_path, datetime)| *datetime)
        .map(|(path, _datetime)| path);

    Ok(checkpoint_file)
}

/// Load parameters from a diretory with specified checkpoint loading method.
///
/// Returns the loaded file, if any.
pub fn try_load_checkpoint(
    vs: &mut nn::VarStore,
    logging_dir: &Path,
    load_checkpoint: &LoadCheckpoint,
) -> Result<Option<PathBuf>> {
    let path = match load_checkpoint {
        LoadCheckpoint::Disabled => {
            info!("checkpoint loading is disabled");
            None
        }
        LoadCheckpoint::FromRecent => {
            let checkpoint_file = find_recent_checkpoint(logging_dir)?;
            if checkpoint_file.is_none() {
                warn!("no checkpoint file found");
            }
            checkpoint_file
        }
        LoadCheckpoint::FromFile { file } => {
            if file.is_file() {
                Some(file.to_owned())
            } else {
                warn!("{} is not a file", file.display());
                None
            }
        }
    };

    if let Some(path) = &path {
        info!("load checkpoint file {}", path.display());
        vs.load_partial(path)?;
    }

    Ok(path)
}

/// Loads the tensors of a weights file that exist in the var store.
pub fn load_pretrained_weights(vs: &mut nn::VarStore, file: &Path) -> Result<()> {
    ensure!(
        file.is_file(),
        "the pretrained weights file '{}' does not exist",
        file.display()
    );
    let missing = vs
        .load_partial(file)
        .with_context(|| format!("unable to load weights from '{}'", file.display()))?;
    info!(
        "loaded pretrained weights from '{}', {} variables are not in the file",
        file.display(),
        missing.len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recent_checkpoint_is_picked_by_file_time() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let names = [
            ("2022-03-01-10-00-00.000+0800", "run_a"),
            ("2022-03-02-10-00-00.000+0800", "run_b"),
            ("2022-02-28-10-00-00.000+0800", "run_b"),
        ];
        for (time, run) in names {
            let checkpoint_dir = dir.path().join(run).join("checkpoints");
            std::fs::create_dir_all(&checkpoint_dir)?;
            std::fs::write(
                checkpoint_dir.join(format!("{}_000010_001.50000.ckpt", time)),
                b"",
            )?;
        }
        std::fs::write(dir.path().join("run_a/checkpoints/garbage.ckpt"), b"")?;

        let recent = find_recent_checkpoint(dir.path())?.unwrap();
        assert!(recent
            .to_str()
            .unwrap()
            .ends_with("run_b/checkpoints/2022-03-02-10-00-00.000+0800_000010_001.50000.ckpt"));
        Ok(())
    }

    #[test]
    fn no_checkpoint_in_empty_dir() -> Result<()> {
        let dir = tempfile::tempdir()?;
        assert!(find_recent_checkpoint(dir.path())?.is_none());
        Ok(())
    }

    #[test]
    fn save_then_load() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let vs = nn::VarStore::new(Device::Cpu);
        let _ = vs.root().ones("weight", &[2, 2]);
        let path = save_checkpoint(&vs, dir.path(), 3, 0.25)?;
        assert!(path.is_file());

        let mut other = nn::VarStore::new(Device::Cpu);
        let weight = other.root().zeros("weight", &[2, 2]);
        let loaded = try_load_checkpoint(
            &mut other,
            dir.path(),
            &LoadCheckpoint::FromFile { file: path.clone() },
        )?;
        assert_eq!(loaded, Some(path));
        assert_eq!(f64::from(weight.sum(Kind::Float)), 4.0);
        Ok(())
    }
}
