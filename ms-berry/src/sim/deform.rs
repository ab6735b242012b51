//! 病灶强度形变.
//!
//! 在病灶区域内生成一张乘性对比度图, 再乘到原始扫描上.

use rand::Rng;
use snafu::ResultExt;

use super::modality::{ContrastProfile, Modality};
use super::{ensure_non_negative, keep_inside, smoothed_noise_map, SimResult, VolumeSnafu};
use crate::consts::DEFAULT_HOMOGENEITY;
use crate::filter::gaussian_smooth;
use crate::{LesionMask, MriVolume, NiftiHeaderAttr};

/// 强度形变参数.
#[derive(Debug, Copy, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeformParams {
    /// 病灶对比度分布.
    pub contrast: ContrastProfile,
    /// 噪声图平滑 sigma (毫米). 越小病灶内部越不均匀.
    pub homogeneity: f64,
    /// 病灶边界平滑 sigma (毫米).
    pub sigma: f64,
    /// 只输出对比度图, 不乘到扫描上.
    pub map_only: bool,
}

impl DeformParams {
    /// 使用 `modality` 的默认对比度与边界平滑参数.
    pub fn for_modality(modality: Modality) -> Self {
        Self {
            contrast: modality.default_contrast(),
            homogeneity: DEFAULT_HOMOGENEITY,
            sigma: modality.default_sigma(),
            map_only: false,
        }
    }

    pub(crate) fn validate(&self) -> SimResult<()> {
        ensure_non_negative("homogeneity", self.homogeneity)?;
        ensure_non_negative("sigma", self.sigma)
    }
}

/// 生成病灶对比度图: 噪声图经 `homogeneity` 平滑, 病灶外置 1, 再经 `sigma` 平滑.
pub fn lesion_contrast_map<R: Rng + ?Sized>(
    volume: &MriVolume,
    mask: &LesionMask,
    params: &DeformParams,
    rng: &mut R,
) -> SimResult<MriVolume> {
    params.validate()?;
    volume.ensure_same_grid(mask).context(VolumeSnafu)?;

    let mut map = smoothed_noise_map(volume, params.contrast, params.homogeneity, rng)?;
    keep_inside(&mut map, mask);
    let map = gaussian_smooth(&map, volume.pix_dim(), params.sigma);
    Ok(MriVolume::from_parts(volume, map)
        .context(VolumeSnafu)?
        .into_float32())
}

/// 在 `mask` 标记的病灶区域内改变 `volume` 的强度.
///
/// `params.map_only` 为真时返回对比度图 (`f32`), 否则返回 `volume × map`,
/// 落盘时保持原始像素类型.
pub fn deform<R: Rng + ?Sized>(
    volume: &MriVolume,
    mask: &LesionMask,
    params: &DeformParams,
    rng: &mut R,
) -> SimResult<MriVolume> {
    tracing::info!(
        mean = params.contrast.mean,
        std = params.contrast.std,
        homogeneity = params.homogeneity,
        sigma = params.sigma,
        "deforming lesion intensities"
    );
    let map = lesion_contrast_map(volume, mask, params, rng)?;
    if params.map_only {
        return Ok(map);
    }
    volume.multiply(&map).context(VolumeSnafu)
}
