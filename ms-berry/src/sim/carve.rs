//! 旧版概率病灶雕刻: 按病灶先验概率图随机选点, 以高斯邻域衰减强度.

use itertools::iproduct;
use rand::Rng;
use snafu::ResultExt;

use super::{SimResult, VolumeSnafu};
use crate::{Idx3d, MriVolume, NiftiHeaderAttr};

/// 默认雕刻的病灶个数.
pub const DEFAULT_LESION_COUNT: usize = 20;

/// 高斯邻域算子的方差 (体素²).
const OPERATOR_VARIANCE: f64 = 20.0;

/// 邻域半径的取值范围.
const MIN_RADIUS: usize = 1;
const MAX_RADIUS: usize = 3;

/// 每个病灶允许的最大随机抽样次数.
const MAX_DRAWS_PER_LESION: usize = 10_000;

/// 雕刻结果.
#[derive(Debug, Clone)]
pub struct CarveReport {
    /// 雕刻后的扫描.
    pub volume: MriVolume,
    /// 各病灶的中心体素.
    pub centers: Vec<Idx3d>,
    /// 总共的随机抽样次数.
    pub draws: usize,
}

/// 半径为 `radius` 的归一化三维高斯算子, 按 `(dz, dh, dw)` 行优先展开.
pub fn gaussian_operator(radius: usize) -> Vec<f64> {
    let r = radius as i64;
    let mut op: Vec<f64> = iproduct!(-r..=r, -r..=r, -r..=r)
        .map(|(z, h, w)| (-((z * z + h * h + w * w) as f64) / (2.0 * OPERATOR_VARIANCE)).exp())
        .collect();
    let sum: f64 = op.iter().sum();
    op.iter_mut().for_each(|v| *v /= sum);
    op
}

/// 在 `volume` 上雕刻 `count` 个病灶. 体素 `p` 被选中的概率为 `prior[p]`.
///
/// 先验图为空 (或概率极低) 时, 抽样次数达到上限后提前结束.
pub fn carve_lesions<R: Rng + ?Sized>(
    volume: &MriVolume,
    prior: &MriVolume,
    count: usize,
    rng: &mut R,
) -> SimResult<CarveReport> {
    volume.ensure_same_grid(prior).context(VolumeSnafu)?;
    let (depth, height, width) = volume.shape();
    let mut out = volume.clone();
    let mut centers = Vec::with_capacity(count);
    let max_draws = count.saturating_mul(MAX_DRAWS_PER_LESION);
    let mut draws = 0usize;

    while centers.len() < count && draws < max_draws && volume.size() > 0 {
        draws += 1;
        let pos = (
            rng.gen_range(0..depth),
            rng.gen_range(0..height),
            rng.gen_range(0..width),
        );
        let check: f64 = rng.gen();
        if (prior[pos] as f64) <= check {
            continue;
        }

        let radius = rng.gen_range(MIN_RADIUS..=MAX_RADIUS);
        let op = gaussian_operator(radius);
        let r = radius as i64;
        for ((dz, dh, dw), g) in iproduct!(-r..=r, -r..=r, -r..=r).zip(op) {
            let z = pos.0 as i64 + dz;
            let h = pos.1 as i64 + dh;
            let w = pos.2 as i64 + dw;
            if z < 0 || h < 0 || w < 0 {
                continue;
            }
            let nb = (z as usize, h as usize, w as usize);
            if out.check(&nb) {
                out[nb] = (out[nb] as f64 * (1.0 - g)) as f32;
            }
        }
        tracing::debug!(?pos, radius, "lesion carved");
        centers.push(pos);
    }

    if centers.len() < count {
        tracing::warn!(
            carved = centers.len(),
            requested = count,
            draws,
            "lesion prior too sparse, stopped early"
        );
    }
    Ok(CarveReport {
        volume: out,
        centers,
        draws,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::test_utils::flat_volume;
    use crate::sim::SimError;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_operator_normalised() {
        for r in MIN_RADIUS..=MAX_RADIUS {
            let op = gaussian_operator(r);
            assert_eq!(op.len(), (2 * r + 1).pow(3));
            assert!((op.iter().sum::<f64>() - 1.0).abs() < 1e-12);
            let center = op.len() / 2;
            assert!(op.iter().all(|v| *v <= op[center]));
        }
    }

    #[test]
    fn test_certain_prior_carves_all() {
        let vol = flat_volume((10, 10, 10), 100.0);
        let prior = flat_volume((10, 10, 10), 1.0);
        let mut rng = StdRng::seed_from_u64(4);
        let r = carve_lesions(&vol, &prior, 5, &mut rng).unwrap();
        assert_eq!(r.centers.len(), 5);
        assert_eq!(r.draws, 5);
        let c = r.centers[0];
        assert!(r.volume[c] < 100.0);
        assert!(r.volume.data().iter().all(|v| *v <= 100.0 && *v > 0.0));
    }

    #[test]
    fn test_empty_prior_stops() {
        let vol = flat_volume((4, 4, 4), 100.0);
        let prior = flat_volume((4, 4, 4), 0.0);
        let mut rng = StdRng::seed_from_u64(4);
        let r = carve_lesions(&vol, &prior, 2, &mut rng).unwrap();
        assert!(r.centers.is_empty());
        assert_eq!(r.draws, 2 * MAX_DRAWS_PER_LESION);
        assert_eq!(r.volume.data(), vol.data());
    }

    #[test]
    fn test_grid_mismatch() {
        let vol = flat_volume((4, 4, 4), 100.0);
        let prior = flat_volume((4, 4, 5), 1.0);
        let mut rng = StdRng::seed_from_u64(0);
        assert!(matches!(
            carve_lesions(&vol, &prior, 1, &mut rng),
            Err(SimError::Volume { .. })
        ));
    }
}
