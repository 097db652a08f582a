//! Common imports from external crates.

pub use anyhow::{bail, ensure, format_err, Context as _, Error, Result};
pub use approx::{abs_diff_eq, assert_abs_diff_eq};
pub use chrono::{DateTime, Local};
pub use derivative::Derivative;
pub use futures::future::{self, FutureExt as _};
pub use image::{DynamicImage, GrayImage, RgbImage};
pub use indexmap::IndexSet;
pub use itertools::{izip, Itertools as _};
pub use label::PixelLabel;
pub use noisy_float::prelude::*;
pub use serde::{Deserialize, Serialize};
pub use std::{
    borrow::Cow,
    collections::HashSet,
    fmt::Debug,
    num::NonZeroUsize,
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};
pub use tch::{
    nn::{self, OptimizerConfig as _},
    Device, Kind, Tensor,
};
pub use tch_tensor_like::TensorLike;
pub use tokio::sync::broadcast;
pub use tracing::{info, trace_span, warn, Instrument as _};

pub type Fallible<T> = Result<T, Error>;
