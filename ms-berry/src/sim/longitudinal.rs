//! 纵向随访模拟.
//!
//! 连通域意义下的每个病灶都有自己的强度轨迹. 按体积从小到大遍历,
//! 前 `floor(n * balance / 100)` 个病灶的对比度随时间线性变化 (逐渐趋于正常组织),
//! 其余病灶只在基础对比度附近小幅波动.
//!
//! 对比度变化函数 `f(t) = (1 - c) / 6 * t + |z| * v * s`, 其中 `c` 为对比度均值,
//! `s` 为对比度标准差, `v` 为波动系数, `z ~ N(0, 1)`. 高信号模态取相反符号.

use std::fs;
use std::path::{Path, PathBuf};

use ndarray::Array3;
use rand::Rng;
use rand_distr::StandardNormal;
use snafu::{ensure, ResultExt};

use super::deform::DeformParams;
use super::modality::Modality;
use super::{
    ensure_non_negative, keep_inside, smoothed_noise_map, CreateDirSnafu, InvalidParameterSnafu,
    SimResult, VolumeSnafu, WriteOutputSnafu,
};
use crate::consts::{DEFAULT_BALANCE_HI, DEFAULT_FOLLOW_UPS, DEFAULT_VARIABILITY, LONGITUDINAL_SLOPE_DIVISOR};
use crate::data::components::label_components;
use crate::filter::gaussian_smooth;
use crate::{LesionMask, MriVolume, NiftiHeaderAttr};

/// 截断正态采样的最大尝试次数. 超出后截断到边界.
const MAX_RESAMPLE: usize = 1000;

/// 纵向随访参数.
#[derive(Debug, Copy, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LongitudinalParams {
    /// 模态, 决定信号极性与输出文件名.
    pub modality: Modality,
    /// 对比度, 均匀度与边界平滑参数. `map_only` 为真时只输出对比度图.
    pub deform: DeformParams,
    /// 波动系数.
    pub variability: f64,
    /// 随访次数.
    pub follow_ups: u32,
    /// 对比度持续变化的病灶占比 (百分比).
    pub balance: f64,
}

impl LongitudinalParams {
    /// 使用 `modality` 的默认参数.
    pub fn for_modality(modality: Modality) -> Self {
        Self {
            modality,
            deform: DeformParams::for_modality(modality),
            variability: DEFAULT_VARIABILITY,
            follow_ups: DEFAULT_FOLLOW_UPS,
            balance: DEFAULT_BALANCE_HI,
        }
    }

    fn validate(&self) -> SimResult<()> {
        self.deform.validate()?;
        ensure_non_negative("variability", self.variability)?;
        ensure!(
            self.follow_ups >= 1,
            InvalidParameterSnafu {
                name: "follow_ups",
                value: self.follow_ups as f64
            }
        );
        ensure!(
            (0.0..=100.0).contains(&self.balance),
            InvalidParameterSnafu {
                name: "balance",
                value: self.balance
            }
        );
        Ok(())
    }

    /// 第 `t` 个随访的输出文件名.
    pub fn file_name(&self, t: u32) -> String {
        let suffix = if self.deform.map_only {
            "_lesionContrast"
        } else {
            ""
        };
        format!("vol{}_TimePoint_{t}{suffix}.nii.gz", self.modality)
    }
}

/// 一次模拟随访.
#[derive(Debug, Clone)]
pub struct FollowUp {
    /// 时间点, 从 1 开始.
    pub time_point: u32,
    /// 随访扫描, 或 (`map_only` 时) 对比度图.
    pub volume: MriVolume,
}

/// 持续变化病灶的对比度偏移.
fn evolving_dc<R: Rng + ?Sized>(modality: Modality, c: f64, spread: f64, t: u32, rng: &mut R) -> f64 {
    let draw = |rng: &mut R| {
        let z: f64 = rng.sample(StandardNormal);
        z.abs() * spread
    };
    let t = t as f64;
    if modality.is_hypo() {
        let slope = (1.0 - c) / LONGITUDINAL_SLOPE_DIVISOR;
        let mut dc = slope * t + draw(rng);
        if modality == Modality::DtiFa {
            // FA 不超过 1, 偏移超过 1 时重新采样.
            let mut tries = 0;
            while dc > 1.0 && tries < MAX_RESAMPLE {
                dc = slope * t + draw(rng);
                tries += 1;
            }
            dc = dc.min(1.0);
        }
        dc
    } else {
        -((c - 1.0) / LONGITUDINAL_SLOPE_DIVISOR) * t - draw(rng)
    }
}

/// 波动病灶的对比度偏移, 服从截断到 `[-limit, limit]` 的标准正态分布.
fn fluctuating_dc<R: Rng + ?Sized>(limit: f64, rng: &mut R) -> f64 {
    if limit <= 0.0 {
        return 0.0;
    }
    let mut dc: f64 = rng.sample(StandardNormal);
    let mut tries = 0;
    while dc.abs() > limit && tries < MAX_RESAMPLE {
        dc = rng.sample(StandardNormal);
        tries += 1;
    }
    dc.clamp(-limit, limit)
}

/// 对病灶体素施加偏移. 持续变化的病灶不越过正常组织 (对比度 1).
#[inline]
fn apply_dc(base: f32, dc: f64, evolving: bool, hypo: bool) -> f32 {
    let v = base as f64 + dc;
    let v = match (evolving, hypo) {
        (true, true) if v > 1.0 => 1.0,
        (true, false) if v < 1.0 => 1.0,
        _ => v,
    };
    v as f32
}

/// 基于 `volume` 与病灶掩膜 `mask` 生成 `params.follow_ups` 次随访.
pub fn simulate_follow_ups<R: Rng + ?Sized>(
    volume: &MriVolume,
    mask: &LesionMask,
    params: &LongitudinalParams,
    rng: &mut R,
) -> SimResult<Vec<FollowUp>> {
    params.validate()?;
    volume.ensure_same_grid(mask).context(VolumeSnafu)?;

    let contrast = params.deform.contrast;
    let base = smoothed_noise_map(volume, contrast, params.deform.homogeneity, rng)?;
    let cc = label_components(mask.data());
    let lesions = cc.all_positions();
    let n_lesions = lesions.len();
    let hypo = params.modality.is_hypo();
    let spread = params.variability * contrast.std;
    tracing::info!(
        modality = %params.modality,
        n_lesions,
        changing = (n_lesions as f64 * params.balance / 100.0).floor() as usize,
        "simulating follow-up exams"
    );

    let mut ans = Vec::with_capacity(params.follow_ups as usize);
    for t in 1..=params.follow_ups {
        let mut n_changing = (n_lesions as f64 * params.balance / 100.0).floor() as usize;
        let mut map = Array3::<f32>::from_elem(volume.shape(), 1.0);

        // 从最小的病灶开始.
        for (i, pos) in lesions.iter().enumerate().rev() {
            let evolving = n_changing > 0;
            let dc = if evolving {
                n_changing -= 1;
                evolving_dc(params.modality, contrast.mean, spread, t, rng)
            } else {
                fluctuating_dc(spread, rng)
            };
            tracing::debug!(t, lesion = n_lesions - i, evolving, dc, "lesion intensity shift");
            for p in pos {
                map[*p] = apply_dc(base[*p], dc, evolving, hypo);
            }
        }

        keep_inside(&mut map, mask);
        let map = gaussian_smooth(&map, volume.pix_dim(), params.deform.sigma);
        let map = MriVolume::from_parts(volume, map)
            .context(VolumeSnafu)?
            .into_float32();
        let out = if params.deform.map_only {
            map
        } else {
            volume.multiply(&map).context(VolumeSnafu)?
        };
        ans.push(FollowUp {
            time_point: t,
            volume: out,
        });
    }
    Ok(ans)
}

/// 将随访结果写入 `dir`, 文件名见 [`LongitudinalParams::file_name`]. 返回写出的路径.
pub fn write_follow_ups<P: AsRef<Path>>(
    dir: P,
    params: &LongitudinalParams,
    follow_ups: &[FollowUp],
) -> SimResult<Vec<PathBuf>> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir).context(CreateDirSnafu { path: dir })?;
    let mut ans = Vec::with_capacity(follow_ups.len());
    for f in follow_ups {
        let path = dir.join(params.file_name(f.time_point));
        f.volume
            .save(&path)
            .context(WriteOutputSnafu { path: path.clone() })?;
        tracing::info!(path = %path.display(), "follow-up written");
        ans.push(path);
    }
    Ok(ans)
}
