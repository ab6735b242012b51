//! 🍇欢迎光临🍓
//!
//! 涵盖了本 crate 一系列常用的功能.

pub use crate::Idx3d;

pub use crate::data::preview::{save_axial_png, IntensityWindow};
pub use crate::data::stats::Statistics;
pub use crate::data::{DataError, LesionMask, MriVolume, NiftiHeaderAttr};

pub use crate::consts::label::{BACKGROUND, LESION};

pub use crate::dataset::{
    default_database_dir, DatabaseLayout, LesionCatalog, LesionDatabase, LesionSource,
};

pub use crate::sim::carve::carve_lesions;
pub use crate::sim::deform::{deform, DeformParams};
pub use crate::sim::longitudinal::{simulate_follow_ups, write_follow_ups, LongitudinalParams};
pub use crate::sim::mask::{generate_mask, MaskStrategy};
pub use crate::sim::refine::{filter_mask, restrict_to};
pub use crate::sim::{ContrastProfile, Modality, SimError};

pub use crate::pipeline::{ProcessRunner, SimulationParams, Simulator, ToolConfig, ToolRunner};
