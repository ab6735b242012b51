//! 病灶掩膜精化: 强度过滤与白质约束.

use ndarray::Zip;
use snafu::ResultExt;

use super::{ensure_non_negative, SimResult, VolumeSnafu};
use crate::consts::label::{self, is_lesion};
use crate::data::stats::Statistics;
use crate::{LesionMask, MriVolume, NiftiHeaderAttr};

/// 强度过滤结果.
#[derive(Debug, Clone)]
pub struct FilterReport {
    /// 过滤后的掩膜, 只包含 [`label::LESION`].
    pub mask: LesionMask,
    /// 掩膜内的强度统计.
    pub stats: Statistics,
    /// 保留区间 `(lower, upper)`, 开区间.
    pub range: (f64, f64),
    /// 过滤前的病灶体积 (mm³).
    pub initial_volume: f64,
    /// 过滤后的病灶体积 (mm³).
    pub final_volume: f64,
}

/// 统计 `volume` 在 `mask` 前景内的强度均值与样本标准差, 只保留强度严格位于
/// `(mean - k·std, mean + k·std)` 内的病灶体素.
///
/// 掩膜为空时返回空掩膜. `volume` 与 `mask` 必须同网格.
pub fn filter_mask(volume: &MriVolume, mask: &LesionMask, cut_factor: f64) -> SimResult<FilterReport> {
    ensure_non_negative("cut_factor", cut_factor)?;
    volume.ensure_same_grid(mask).context(VolumeSnafu)?;

    let stats = Statistics::of_masked(volume.data(), mask.data());
    let initial_volume = mask.volume_mm3();
    if stats.is_empty() {
        tracing::warn!("lesion mask is empty, nothing to filter");
        return Ok(FilterReport {
            mask: LesionMask::zeros_like(mask),
            stats,
            range: (0.0, 0.0),
            initial_volume,
            final_volume: 0.0,
        });
    }

    let lower = stats.mean - cut_factor * stats.std();
    let upper = stats.mean + cut_factor * stats.std();
    let mut out = LesionMask::zeros_like(mask);
    Zip::from(&mut out.data_mut())
        .and(&volume.data())
        .and(&mask.data())
        .for_each(|o, &v, &m| {
            let v = v as f64;
            if is_lesion(m) && lower < v && v < upper {
                *o = label::LESION;
            }
        });
    let final_volume = out.volume_mm3();
    tracing::info!(
        mean = stats.mean,
        std = stats.std(),
        initial_volume,
        final_volume,
        "lesion mask filtered"
    );

    Ok(FilterReport {
        mask: out,
        stats,
        range: (lower, upper),
        initial_volume,
        final_volume,
    })
}

/// 将白质掩膜 `wm` 之外的病灶体素清除. 返回被清除的体素个数.
pub fn restrict_to(mask: &mut LesionMask, wm: &LesionMask) -> SimResult<usize> {
    let removed = mask.intersect(wm).context(VolumeSnafu)?;
    tracing::info!(removed, "lesion voxels outside white matter removed");
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::test_utils::{flat_volume, mask_with};
    use crate::sim::SimError;

    #[test]
    fn test_filter_drops_outliers() {
        let shape = (1, 1, 10);
        let mut vol = flat_volume(shape, 100.0);
        let pos: Vec<_> = (0..8).map(|w| (0, 0, w)).collect();
        // 强度 100 x 7 和 1000 x 1. 均值 212.5.
        vol[(0, 0, 7)] = 1000.0;
        vol[(0, 0, 9)] = 5000.0;
        let mask = mask_with(shape, &pos);

        let r = filter_mask(&vol, &mask, 1.5).unwrap();
        assert_eq!(r.stats.count, 8);
        assert!((r.stats.mean - 212.5).abs() < 1e-9);
        assert_eq!(r.initial_volume, 8.0);
        assert_eq!(r.final_volume, 7.0);
        assert_eq!(r.mask[(0, 0, 7)], 0);
        assert_eq!(r.mask[(0, 0, 0)], label::LESION);
        assert_eq!(r.mask[(0, 0, 9)], 0);
    }

    #[test]
    fn test_filter_constant_region_is_empty() {
        // 标准差为 0 时开区间为空.
        let vol = flat_volume((2, 2, 2), 3.0);
        let mask = mask_with((2, 2, 2), &[(0, 0, 0), (1, 1, 1)]);
        let r = filter_mask(&vol, &mask, 1.5).unwrap();
        assert!(r.mask.is_empty());
    }

    #[test]
    fn test_filter_empty_mask() {
        let vol = flat_volume((2, 2, 2), 3.0);
        let r = filter_mask(&vol, &mask_with((2, 2, 2), &[]), 1.5).unwrap();
        assert!(r.mask.is_empty());
        assert_eq!(r.final_volume, 0.0);
    }

    #[test]
    fn test_filter_rejects_bad_input() {
        let vol = flat_volume((2, 2, 2), 3.0);
        assert!(matches!(
            filter_mask(&vol, &mask_with((2, 2, 3), &[]), 1.5),
            Err(SimError::Volume { .. })
        ));
        assert!(matches!(
            filter_mask(&vol, &mask_with((2, 2, 2), &[]), -1.0),
            Err(SimError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_restrict_to_white_matter() {
        let mut mask = mask_with((1, 2, 2), &[(0, 0, 0), (0, 1, 1)]);
        let wm = mask_with((1, 2, 2), &[(0, 1, 1), (0, 1, 0)]);
        assert_eq!(restrict_to(&mut mask, &wm).unwrap(), 1);
        assert_eq!(mask.foreground_pos(), vec![(0, 1, 1)]);
    }
}
