//! 多发性硬化病灶模拟命令行工具.
//!
//! 每个子命令对应一个独立算法, `simulate` 执行完整流程.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use ms_berry::pipeline::{BsplineGrid, InitMode, Refinement};
use ms_berry::sim::mask::MaskStrategy;
use ms_berry::sim::Modality;
use snafu::Report;
use tracing::error;

mod result;
mod runner;

/// Simulate multiple sclerosis lesions on MRI volumes
#[derive(Debug, Parser)]
#[command(name = "lesion-sim", version)]
struct App {
    #[command(subcommand)]
    command: Command,

    /// Print debug-level logs
    #[arg(short = 'v', long = "verbose", global = true)]
    verbose: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Build a lesion mask from the lesion database
    GenerateMask(GenerateMaskArgs),
    /// Keep lesion voxels whose intensity is close to the in-lesion mean
    FilterMask(FilterMaskArgs),
    /// Change the intensity of a volume inside a lesion mask
    Deform(DeformArgs),
    /// Simulate follow-up exams with evolving lesions
    Longitudinal(LongitudinalArgs),
    /// Carve lesions into a volume guided by the lesion prior
    Carve(CarveArgs),
    /// Save an axial slice as a PNG preview
    Preview(PreviewArgs),
    /// Print intensity statistics of a volume
    Stats(StatsArgs),
    /// Run the full multi-modal simulation
    Simulate(Box<SimulateArgs>),
}

/// Options shared by the stochastic commands
#[derive(Debug, Args)]
struct SeedArgs {
    /// Random seed for reproducible output
    #[arg(long = "seed")]
    seed: Option<u64>,
}

#[derive(Debug, Args)]
struct GenerateMaskArgs {
    /// Output mask file
    #[arg(short = 'o', long = "out")]
    output: PathBuf,

    /// Lesion database directory
    /// (default is $MS_LESION_DATABASE or ~/dataset/MSlesion_database)
    #[arg(long = "database")]
    database: Option<PathBuf>,

    /// Volume whose grid the mask is built on (default is the MNI152 template)
    #[arg(long = "grid")]
    grid: Option<PathBuf>,

    /// Use the brain-extracted template
    #[arg(long = "brain-extracted")]
    brain_extracted: bool,

    /// Desired lesion load in ml
    #[arg(short = 'l', long = "load", default_value_t = ms_berry::consts::DEFAULT_LESION_LOAD)]
    lesion_load: f64,

    /// Sampling strategy (descending or uniform)
    #[arg(long = "strategy", default_value_t = MaskStrategy::Descending)]
    strategy: MaskStrategy,

    /// Use the legacy size groups
    #[arg(long = "legacy-catalog")]
    legacy_catalog: bool,

    #[command(flatten)]
    seed: SeedArgs,
}

#[derive(Debug, Args)]
struct FilterMaskArgs {
    /// Input volume
    volume: PathBuf,
    /// Lesion mask on the same grid
    mask: PathBuf,

    /// Output mask file
    #[arg(short = 'o', long = "out")]
    output: PathBuf,

    /// Number of standard deviations kept around the mean
    #[arg(short = 'k', long = "cut-factor", default_value_t = ms_berry::consts::DEFAULT_CUT_FACTOR)]
    cut_factor: f64,

    /// Restrict the lesions to this white matter mask instead of filtering by intensity
    #[arg(long = "white-matter")]
    white_matter: Option<PathBuf>,
}

/// Lesion contrast options shared by `deform` and `longitudinal`
#[derive(Debug, Args)]
struct ContrastArgs {
    /// Modality (T1, T2, T2-FLAIR, PD, DTI-FA, DTI-ADC)
    #[arg(short = 'm', long = "modality")]
    modality: Modality,

    /// Mean lesion contrast (default depends on the modality)
    #[arg(long = "mean")]
    mean: Option<f64>,

    /// Standard deviation of the lesion contrast (default depends on the modality)
    #[arg(long = "std")]
    std: Option<f64>,

    /// Smoothing of the lesion noise map in mm
    #[arg(long = "homogeneity", default_value_t = ms_berry::consts::DEFAULT_HOMOGENEITY)]
    homogeneity: f64,

    /// Smoothing of the lesion border in mm (default depends on the modality)
    #[arg(long = "sigma")]
    sigma: Option<f64>,

    /// Write the contrast map instead of the deformed volume
    #[arg(long = "map-only")]
    map_only: bool,
}

#[derive(Debug, Args)]
struct DeformArgs {
    /// Input volume
    volume: PathBuf,
    /// Lesion mask on the same grid
    mask: PathBuf,

    /// Output file
    #[arg(short = 'o', long = "out")]
    output: PathBuf,

    #[command(flatten)]
    contrast: ContrastArgs,

    #[command(flatten)]
    seed: SeedArgs,
}

#[derive(Debug, Args)]
struct LongitudinalArgs {
    /// Input volume
    volume: PathBuf,
    /// Lesion mask on the same grid
    mask: PathBuf,

    /// Output directory for the follow-up exams
    #[arg(short = 'o', long = "out-dir")]
    output_dir: PathBuf,

    #[command(flatten)]
    contrast: ContrastArgs,

    /// Number of follow-up exams
    #[arg(short = 'n', long = "follow-ups", default_value_t = ms_berry::consts::DEFAULT_FOLLOW_UPS)]
    follow_ups: u32,

    /// Percentage of lesions whose contrast keeps changing
    #[arg(long = "balance", default_value_t = ms_berry::consts::DEFAULT_BALANCE_HI)]
    balance: f64,

    /// Scale of the per-lesion fluctuation
    #[arg(long = "variability", default_value_t = ms_berry::consts::DEFAULT_VARIABILITY)]
    variability: f64,

    #[command(flatten)]
    seed: SeedArgs,
}

#[derive(Debug, Args)]
struct CarveArgs {
    /// Input volume
    volume: PathBuf,

    /// Output file
    #[arg(short = 'o', long = "out")]
    output: PathBuf,

    /// Lesion probability map (default is the one in the lesion database)
    #[arg(long = "prior")]
    prior: Option<PathBuf>,

    /// Lesion database directory, used when no prior is given
    #[arg(long = "database")]
    database: Option<PathBuf>,

    /// Number of lesions
    #[arg(short = 'n', long = "count", default_value_t = ms_berry::sim::carve::DEFAULT_LESION_COUNT)]
    count: usize,

    #[command(flatten)]
    seed: SeedArgs,
}

#[derive(Debug, Args)]
struct PreviewArgs {
    /// Input volume
    volume: PathBuf,

    /// Output PNG file
    #[arg(short = 'o', long = "out")]
    output: PathBuf,

    /// Lesion mask drawn in white
    #[arg(long = "mask")]
    mask: Option<PathBuf>,

    /// Axial slice index (default is the middle slice)
    #[arg(short = 'z', long = "slice")]
    slice: Option<usize>,
}

#[derive(Debug, Args)]
struct StatsArgs {
    /// Input volume
    volume: PathBuf,

    /// Only count voxels inside this mask
    #[arg(long = "mask")]
    mask: Option<PathBuf>,
}

#[derive(Debug, Default, Args)]
struct SimulateArgs {
    /// JSON configuration file. Explicit flags override its values
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// T1 volume
    #[arg(long = "t1")]
    t1: Option<PathBuf>,
    /// T2 volume
    #[arg(long = "t2")]
    t2: Option<PathBuf>,
    /// T2-FLAIR volume
    #[arg(long = "t2-flair")]
    t2_flair: Option<PathBuf>,
    /// PD volume
    #[arg(long = "pd")]
    pd: Option<PathBuf>,
    /// DTI fractional anisotropy map
    #[arg(long = "dti-fa")]
    dti_fa: Option<PathBuf>,
    /// DTI apparent diffusion coefficient map
    #[arg(long = "dti-adc")]
    dti_adc: Option<PathBuf>,

    /// Output directory
    #[arg(short = 'o', long = "out-dir")]
    output_dir: Option<PathBuf>,

    /// Desired lesion load in ml (5 to 50)
    #[arg(short = 'l', long = "load")]
    lesion_load: Option<f64>,

    /// Simulate follow-up exams instead of a single exam
    #[arg(long = "longitudinal")]
    longitudinal: bool,

    /// Number of follow-up exams (2 to 6)
    #[arg(long = "follow-ups")]
    follow_ups: Option<u32>,

    /// Percentage of lesions whose contrast keeps changing (1 to 100)
    #[arg(long = "balance")]
    balance_hi: Option<f64>,

    /// Output directory for the follow-up exams (default is the output directory)
    #[arg(long = "follow-up-dir")]
    follow_up_dir: Option<PathBuf>,

    /// Number of standard deviations kept by the intensity filter
    #[arg(long = "cut-factor")]
    cut_factor: Option<f64>,

    /// Sampling percentage of the non-linear registration
    #[arg(long = "sampling")]
    sampling_percentage: Option<f64>,

    /// BSpline grid, e.g. 5,5,5
    #[arg(long = "grid")]
    bspline_grid: Option<BsplineGrid>,

    /// Registration initialisation
    /// (useCenterOfHeadAlign, Off, useMomentsAlign, useGeometryAlign)
    #[arg(long = "init-mode")]
    init_mode: Option<InitMode>,

    /// Lesion map refinement (intensity-filter or white-matter)
    #[arg(long = "refinement")]
    refinement: Option<Refinement>,

    /// Smoothing of the lesion noise map in mm
    #[arg(long = "homogeneity")]
    homogeneity: Option<f64>,

    /// Scale of the per-lesion fluctuation across follow-ups
    #[arg(long = "variability")]
    variability: Option<f64>,

    /// Lesion sampling strategy (descending or uniform)
    #[arg(long = "strategy")]
    mask_strategy: Option<MaskStrategy>,

    /// Random seed for reproducible output
    #[arg(long = "seed")]
    seed: Option<u64>,

    /// Inputs are brain extracted
    #[arg(long = "brain-extracted")]
    brain_extracted: bool,

    /// Resample the results back to the grid of each input
    #[arg(long = "return-original-space")]
    return_original_space: bool,

    /// Keep the working directory
    #[arg(long = "keep-intermediates")]
    keep_intermediates: bool,

    /// Lesion database directory
    /// (default is $MS_LESION_DATABASE or ~/dataset/MSlesion_database)
    #[arg(long = "database")]
    database: Option<PathBuf>,

    /// Directory with the external tools (default is $MS_LESION_TOOLS, then PATH)
    #[arg(long = "tools-dir")]
    tools_dir: Option<PathBuf>,

    /// Print the effective configuration as JSON and exit
    #[arg(long = "dump-config")]
    dump_config: bool,
}

fn main() {
    let App { command, verbose } = App::parse();
    utils::init_logging(verbose);

    match runner::run(command) {
        Ok(summary) => summary.print(),
        Err(e) => {
            error!("{}", Report::from_error(e));
            std::process::exit(-1);
        }
    }
}
