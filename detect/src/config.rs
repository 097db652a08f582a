use crate::common::*;
use dwd::dws::DwsConfig;

pub use input::*;
pub use model::*;
pub use output::*;
pub use preprocess::*;

/// The requirement on the `version` field of configuration files.
pub const CONFIG_VERSION: &str = "0.1.0";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(deserialize_with = "deserialize_version")]
    pub version: Version,
    pub model: ModelConfig,
    pub input: InputConfig,
    #[serde(default)]
    pub preprocess: PreprocessConfig,
    /// Overrides the watershed options of the training configuration.
    #[serde(default)]
    pub dws: Option<DwsConfig>,
    pub output: OutputConfig,
}

impl Config {
    pub fn open<P>(path: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let text = fs::read_to_string(path)?;
        let config = json5::from_str(&text)?;
        Ok(config)
    }
}

mod model {
    use super::*;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct ModelConfig {
        /// The configuration the model was trained with.
        pub training_config: PathBuf,
        /// Defaults to the most recent checkpoint under the training logging directory.
        #[serde(default)]
        pub checkpoint_file: Option<PathBuf>,
        #[serde(with = "tch_serde::serde_device")]
        pub device: Device,
    }
}

mod input {
    use super::*;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct InputConfig {
        /// Glob pattern of input images.
        pub images: String,
    }
}

mod preprocess {
    use super::*;

    /// Overrides of the training preprocessing.
    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    pub struct PreprocessConfig {
        /// The longest image edge is resized to this length. Zero disables the resizing.
        #[serde(default)]
        pub max_edge: Option<usize>,
        #[serde(default)]
        pub pad_with: Option<R64>,
    }
}

mod output {
    use super::*;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct OutputConfig {
        pub dir: PathBuf,
        /// Save the detections drawn on every image.
        #[serde(default)]
        pub draw_overlay: bool,
    }
}

pub fn deserialize_version<'de, D>(deserializer: D) -> Result<Version, D::Error>
where
    D: Deserializer<'de>,
{
    let text = String::deserialize(deserializer)?;
    let version = Version::parse(&text).map_err(|err| {
        D::Error::custom(format!(
            "failed to parse version number '{}': {:?}",
            text, err
        ))
    })?;
    let requirement = VersionReq::parse(CONFIG_VERSION).map_err(D::Error::custom)?;

    if !requirement.matches(&version) {
        return Err(D::Error::custom(format!(
            "incompatible version: get '{}', but it is incompatible with requirement '{}'",
            version, requirement,
        )));
    }

    Ok(version)
}
