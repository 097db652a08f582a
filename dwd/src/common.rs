pub use anyhow::{bail, ensure, format_err, Context as _, Error, Result};
pub use approx::{abs_diff_eq, assert_abs_diff_eq};
pub use bbox::{prelude::*, CyCxHW, Transform, HW, TLBR};
pub use derivative::Derivative;
pub use futures::{
    future::{self, FutureExt as _},
    stream::{self, Stream, StreamExt as _, TryStreamExt as _},
};
pub use indexmap::{IndexMap, IndexSet};
pub use itertools::{izip, Itertools as _};
pub use label::{Label, PixelLabel};
pub use log::{info, warn};
pub use ndarray::{s, Array2, Array3, Array4, ArrayView2, ArrayView3, Axis};
pub use noisy_float::prelude::*;
pub use owning_ref::ArcRef;
pub use par_stream::prelude::*;
pub use rand::prelude::*;
pub use serde::{Deserialize, Serialize};
pub use std::{
    borrow::Borrow,
    cmp::{self, Ordering},
    collections::{HashMap, HashSet},
    fmt::Debug,
    iter,
    path::{Path, PathBuf},
    sync::{
        atomic::{self, AtomicBool},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};
pub use tch::{
    nn::{self, Module as _, ModuleT as _},
    Device, Kind, Reduction, Tensor,
};
pub use tch_tensor_like::TensorLike;
