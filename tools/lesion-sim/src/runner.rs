//! 子命令运行函数.

use std::path::Path;

use ms_berry::dataset::{LesionCatalog, LesionDatabase};
use ms_berry::pipeline::{ProcessRunner, SimulationParams, Simulator};
use ms_berry::prelude::*;
use ms_berry::sim::longitudinal::FollowUp;
use rand::rngs::StdRng;
use rand::SeedableRng;
use snafu::{ResultExt, Whatever};
use utils::loader;

use crate::result::Summary;
use crate::{
    CarveArgs, Command, ContrastArgs, DeformArgs, FilterMaskArgs, GenerateMaskArgs,
    LongitudinalArgs, PreviewArgs, SimulateArgs, StatsArgs,
};

/// 运行结果.
pub type RunResult = Result<Summary, Whatever>;

/// 实际运行.
pub fn run(command: Command) -> RunResult {
    match command {
        Command::GenerateMask(args) => generate(args),
        Command::FilterMask(args) => filter(args),
        Command::Deform(args) => deform_volume(args),
        Command::Longitudinal(args) => longitudinal(args),
        Command::Carve(args) => carve(args),
        Command::Preview(args) => preview(args),
        Command::Stats(args) => stats(args),
        Command::Simulate(args) => simulate(*args),
    }
}

#[inline]
fn rng(seed: Option<u64>) -> StdRng {
    seed.map_or_else(StdRng::from_entropy, StdRng::seed_from_u64)
}

fn open_volume(path: &Path) -> Result<MriVolume, Whatever> {
    MriVolume::open(path).with_whatever_context(|_| format!("could not read volume {}", path.display()))
}

fn open_mask(path: &Path) -> Result<LesionMask, Whatever> {
    LesionMask::open(path).with_whatever_context(|_| format!("could not read mask {}", path.display()))
}

fn generate(args: GenerateMaskArgs) -> RunResult {
    let layout = loader::database_layout(args.database).whatever_context("could not open lesion database")?;
    let grid = match &args.grid {
        Some(p) => open_volume(p)?,
        None => layout
            .load_template(args.brain_extracted)
            .whatever_context("could not read template")?,
    };
    let catalog = if args.legacy_catalog {
        LesionCatalog::legacy()
    } else {
        LesionCatalog::standard()
    };
    let db = LesionDatabase::new(layout);
    let report = generate_mask(
        &grid,
        &db,
        &catalog,
        args.lesion_load,
        args.strategy,
        &mut rng(args.seed.seed),
    )
    .whatever_context("could not generate lesion mask")?;
    report
        .mask
        .save(&args.output)
        .with_whatever_context(|_| format!("could not write {}", args.output.display()))?;
    Ok(Summary::Mask {
        path: args.output,
        desired: report.desired_load,
        achieved: report.achieved_load,
        placed: report.placed,
        rejected: report.rejected,
    })
}

fn filter(args: FilterMaskArgs) -> RunResult {
    let mut mask = open_mask(&args.mask)?;
    let initial = mask.volume_mm3();
    let stats = match &args.white_matter {
        Some(wm) => {
            let wm = open_mask(wm)?;
            restrict_to(&mut mask, &wm).whatever_context("could not restrict mask to white matter")?;
            None
        }
        None => {
            let volume = open_volume(&args.volume)?;
            let report = filter_mask(&volume, &mask, args.cut_factor)
                .whatever_context("could not filter mask")?;
            mask = report.mask;
            Some((report.stats, report.range))
        }
    };
    mask.save(&args.output)
        .with_whatever_context(|_| format!("could not write {}", args.output.display()))?;
    Ok(Summary::Filter {
        path: args.output,
        initial,
        remaining: mask.volume_mm3(),
        stats,
    })
}

fn deform_params(c: &ContrastArgs) -> DeformParams {
    let mut p = DeformParams::for_modality(c.modality);
    if let Some(mean) = c.mean {
        p.contrast.mean = mean;
    }
    if let Some(std) = c.std {
        p.contrast.std = std;
    }
    if let Some(sigma) = c.sigma {
        p.sigma = sigma;
    }
    p.homogeneity = c.homogeneity;
    p.map_only = c.map_only;
    p
}

fn deform_volume(args: DeformArgs) -> RunResult {
    let volume = open_volume(&args.volume)?;
    let mask = open_mask(&args.mask)?;
    let out = deform(&volume, &mask, &deform_params(&args.contrast), &mut rng(args.seed.seed))
        .whatever_context("could not deform volume")?;
    out.save(&args.output)
        .with_whatever_context(|_| format!("could not write {}", args.output.display()))?;
    Ok(Summary::Written(vec![args.output]))
}

fn longitudinal(args: LongitudinalArgs) -> RunResult {
    let volume = open_volume(&args.volume)?;
    let mask = open_mask(&args.mask)?;
    let params = LongitudinalParams {
        modality: args.contrast.modality,
        deform: deform_params(&args.contrast),
        variability: args.variability,
        follow_ups: args.follow_ups,
        balance: args.balance,
    };
    let follow_ups: Vec<FollowUp> = simulate_follow_ups(&volume, &mask, &params, &mut rng(args.seed.seed))
        .whatever_context("could not simulate follow-up exams")?;
    let paths = write_follow_ups(&args.output_dir, &params, &follow_ups)
        .whatever_context("could not write follow-up exams")?;
    Ok(Summary::Written(paths))
}

fn carve(args: CarveArgs) -> RunResult {
    let volume = open_volume(&args.volume)?;
    let prior = match &args.prior {
        Some(p) => open_volume(p)?,
        None => loader::database_layout(args.database)
            .whatever_context("could not open lesion database")?
            .load_prior()
            .whatever_context("could not read lesion prior")?,
    };
    let report = carve_lesions(&volume, &prior, args.count, &mut rng(args.seed.seed))
        .whatever_context("could not carve lesions")?;
    report
        .volume
        .save(&args.output)
        .with_whatever_context(|_| format!("could not write {}", args.output.display()))?;
    Ok(Summary::Carve {
        path: args.output,
        requested: args.count,
        carved: report.centers.len(),
        draws: report.draws,
    })
}

fn preview(args: PreviewArgs) -> RunResult {
    let volume = open_volume(&args.volume)?;
    let mask = args.mask.as_deref().map(open_mask).transpose()?;
    let z = args.slice.unwrap_or(volume.shape().0 / 2);
    save_axial_png(&volume, mask.as_ref(), z, &args.output)
        .with_whatever_context(|_| format!("could not write {}", args.output.display()))?;
    Ok(Summary::Written(vec![args.output]))
}

fn stats(args: StatsArgs) -> RunResult {
    let volume = open_volume(&args.volume)?;
    let stats = match &args.mask {
        Some(p) => {
            let mask = open_mask(p)?;
            volume
                .ensure_same_grid(&mask)
                .whatever_context("volume and mask are on different grids")?;
            Statistics::of_masked(volume.data(), mask.data())
        }
        None => Statistics::of(volume.data()),
    };
    Ok(Summary::Stats(stats))
}

/// 合并配置文件与命令行参数. 命令行参数优先.
fn simulation_params(args: &SimulateArgs) -> Result<SimulationParams, Whatever> {
    let mut p = match &args.config {
        Some(path) => SimulationParams::from_json_file(path).whatever_context("could not load config")?,
        None => SimulationParams::default(),
    };

    macro_rules! take {
        ($($field: ident),+ $(,)?) => {
            $(
                if let Some(v) = &args.$field {
                    p.$field = v.clone().into();
                }
            )+
        };
    }
    take!(t1, t2, t2_flair, pd, dti_fa, dti_adc, follow_up_dir, seed);
    take!(output_dir, lesion_load, follow_ups, balance_hi, cut_factor, sampling_percentage);
    take!(bspline_grid, init_mode, refinement, homogeneity, variability, mask_strategy);

    p.longitudinal |= args.longitudinal;
    p.brain_extracted |= args.brain_extracted;
    p.return_original_space |= args.return_original_space;
    p.keep_intermediates |= args.keep_intermediates;
    Ok(p)
}

fn simulate(args: SimulateArgs) -> RunResult {
    let params = simulation_params(&args)?;
    if args.dump_config {
        let json = serde_json::to_string_pretty(&params).whatever_context("could not serialise config")?;
        return Ok(Summary::Config(json));
    }

    let layout = loader::database_layout(args.database).whatever_context("could not open lesion database")?;
    let db = LesionDatabase::new(layout.clone());
    let runner = ProcessRunner::new(loader::tool_config(args.tools_dir));
    let report = Simulator::new(&runner, &layout, &db)
        .run(&params)
        .whatever_context("simulation failed")?;
    Ok(Summary::Simulation(report))
}
