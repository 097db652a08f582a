pub use anyhow::{format_err, Context as _, Result};
pub use bbox::{prelude::*, Transform, HW, TLBR};
pub use derivative::Derivative;
pub use futures::stream::{self, StreamExt as _};
pub use image::{DynamicImage, GenericImageView as _, Rgb};
pub use indexmap::IndexSet;
pub use itertools::Itertools as _;
pub use ndarray::Array4;
pub use noisy_float::prelude::*;
pub use par_stream::prelude::*;
pub use semver::{Version, VersionReq};
pub use serde::{de::Error as DeserializeError, Deserialize, Deserializer, Serialize};
pub use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};
pub use tch::{nn, Device};
pub use tokio::io::AsyncWriteExt as _;
pub use tracing::{info, trace_span, warn, Instrument as _};
