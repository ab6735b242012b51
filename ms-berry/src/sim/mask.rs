//! 从病灶标签库中抽取病灶, 拼成满足目标负荷的病灶掩膜.

use std::fmt;
use std::str::FromStr;

use ndarray::Zip;
use rand::Rng;
use snafu::{ensure, ResultExt};

use super::{DatabaseSnafu, EmptyCatalogSnafu, SimResult, VolumeSnafu};
use crate::consts::label::{is_background, is_lesion};
use crate::consts::MM3_PER_ML;
use crate::dataset::{LesionCatalog, LesionSource};
use crate::{LesionMask, NiftiHeaderAttr};

/// 旧版均匀抽样中, 体积小于该值的病灶超出负荷时会使最大分组退出抽样.
const UNIFORM_SHRINK_BELOW: usize = 1200;

/// 病灶抽样策略.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum MaskStrategy {
    /// 总是从剩余的最大分组中抽取, 剩余负荷不足时逐级退到更小的分组.
    #[default]
    Descending,
    /// 旧版: 在可用分组中均匀随机抽取.
    Uniform,
}

impl fmt::Display for MaskStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MaskStrategy::Descending => "descending",
            MaskStrategy::Uniform => "uniform",
        })
    }
}

impl FromStr for MaskStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "descending" => Ok(MaskStrategy::Descending),
            "uniform" => Ok(MaskStrategy::Uniform),
            _ => Err(format!("unknown mask strategy {s:?}")),
        }
    }
}

/// 病灶掩膜生成结果.
#[derive(Debug, Clone)]
pub struct MaskReport {
    /// 生成的掩膜, 位于模板网格上.
    pub mask: LesionMask,
    /// 目标负荷 (体素个数, 1 mm 模板上即 mm³).
    pub desired_load: f64,
    /// 实际负荷 (新增的病灶体素个数).
    pub achieved_load: f64,
    /// 成功放置的病灶个数.
    pub placed: usize,
    /// 被拒绝的抽样次数.
    pub rejected: usize,
}

/// 单次抽样的判定结果.
enum Draw {
    Placed,
    Rejected,
    /// 最小分组的病灶也超出负荷, 结束抽样.
    Stop,
}

/// 掩膜生成器内部状态.
struct Builder<'a, S: ?Sized> {
    mask: LesionMask,
    source: &'a S,
    catalog: &'a LesionCatalog,
    desired: f64,
    current: f64,
    placed: usize,
    rejected: usize,
}

impl<'a, S: LesionSource + ?Sized> Builder<'a, S> {
    /// 抽取第 `gi` 组的随机病灶并尝试放入掩膜.
    ///
    /// `check_overlap` 为真时, 与已放置病灶重叠的病灶会被拒绝.
    /// `volume_out` 返回该病灶的体积, 供旧版策略决定是否缩小分组范围.
    fn try_place<R: Rng + ?Sized>(
        &mut self,
        gi: usize,
        check_overlap: bool,
        rng: &mut R,
        volume_out: &mut usize,
    ) -> SimResult<Draw> {
        let catalog = self.catalog;
        let group = &catalog.groups()[gi];
        let index = rng.gen_range(0..group.count);
        let lesion = self
            .source
            .lesion(&group.name, index)
            .context(DatabaseSnafu)?;
        self.mask.ensure_same_grid(&lesion).context(VolumeSnafu)?;

        let volume = lesion.count_foreground();
        *volume_out = volume;
        if self.current + volume as f64 > self.desired {
            tracing::debug!(group = %group.name, volume, "lesion would exceed desired load");
            if gi == 0 {
                return Ok(Draw::Stop);
            }
            self.rejected += 1;
            return Ok(Draw::Rejected);
        }

        if check_overlap {
            let overlaps = Zip::from(&lesion.data())
                .and(&self.mask.data())
                .fold(false, |acc, &l, &m| acc || (is_lesion(l) && is_lesion(m)));
            if overlaps {
                tracing::debug!(group = %group.name, index, "lesion overlaps placed lesions");
                self.rejected += 1;
                return Ok(Draw::Rejected);
            }
        }

        let mut added = 0usize;
        Zip::from(&mut self.mask.data_mut())
            .and(&lesion.data())
            .for_each(|m, &l| {
                if is_lesion(l) && is_background(*m) {
                    *m = l;
                    added += 1;
                }
            });
        if added == 0 {
            // 同一个病灶被重复抽中.
            self.rejected += 1;
            return Ok(Draw::Rejected);
        }
        self.current += added as f64;
        self.placed += 1;
        tracing::debug!(
            group = %group.name,
            index,
            current = self.current,
            desired = self.desired,
            "lesion placed"
        );
        Ok(Draw::Placed)
    }

    fn finish(self) -> MaskReport {
        MaskReport {
            mask: self.mask,
            desired_load: self.desired,
            achieved_load: self.current,
            placed: self.placed,
            rejected: self.rejected,
        }
    }
}

/// 在 `grid` 网格上生成总体积约为 `lesion_load_ml` 毫升的病灶掩膜.
///
/// 病灶从 `source` 中按 `catalog` 分组抽取, 每个病灶标签都必须与 `grid` 同网格.
/// 负荷以体素个数计 (1 mm 各向同性模板上即 mm³), 结果不会超过目标负荷.
pub fn generate_mask<G, S, R>(
    grid: &G,
    source: &S,
    catalog: &LesionCatalog,
    lesion_load_ml: f64,
    strategy: MaskStrategy,
    rng: &mut R,
) -> SimResult<MaskReport>
where
    G: NiftiHeaderAttr + ?Sized,
    S: LesionSource + ?Sized,
    R: Rng + ?Sized,
{
    ensure!(!catalog.is_empty(), EmptyCatalogSnafu);
    let mut b = Builder {
        mask: LesionMask::zeros_like(grid),
        source,
        catalog,
        desired: (lesion_load_ml * MM3_PER_ML).max(0.0),
        current: 0.0,
        placed: 0,
        rejected: 0,
    };
    tracing::info!(desired = b.desired, %strategy, "generating lesion mask");

    match strategy {
        MaskStrategy::Descending => descending(&mut b, rng)?,
        MaskStrategy::Uniform => uniform(&mut b, rng)?,
    }

    tracing::info!(
        achieved = b.current,
        placed = b.placed,
        rejected = b.rejected,
        "lesion mask generated"
    );
    Ok(b.finish())
}

fn descending<S, R>(b: &mut Builder<'_, S>, rng: &mut R) -> SimResult<()>
where
    S: LesionSource + ?Sized,
    R: Rng + ?Sized,
{
    let largest = b.catalog.len() - 1;
    let mut n_groups = b.catalog.len();
    let mut failures = 0usize;
    let mut volume = 0usize;

    while b.current < b.desired {
        let gi = n_groups - 1;
        let group = &b.catalog.groups()[gi];
        if b.desired - b.current <= group.max_volume as f64 || failures >= group.count {
            tracing::debug!(group = %group.name, failures, "size group retired");
            n_groups -= 1;
            failures = 0;
            if n_groups == 0 {
                break;
            }
            continue;
        }
        match b.try_place(gi, gi < largest, rng, &mut volume)? {
            Draw::Placed => {}
            Draw::Rejected => failures += 1,
            Draw::Stop => break,
        }
    }
    Ok(())
}

fn uniform<S, R>(b: &mut Builder<'_, S>, rng: &mut R) -> SimResult<()>
where
    S: LesionSource + ?Sized,
    R: Rng + ?Sized,
{
    let mut n_groups = b.catalog.len();
    // 可用病灶全部重叠时不会再有进展, 限制连续失败次数.
    let max_failures: usize = b.catalog.groups().iter().map(|g| g.count).sum::<usize>().max(1);
    let mut failures = 0usize;
    let mut volume = 0usize;

    while b.current < b.desired && n_groups > 0 && failures < max_failures {
        let gi = rng.gen_range(0..n_groups);
        if b.catalog.groups()[gi].count == 0 {
            failures += 1;
            continue;
        }
        match b.try_place(gi, true, rng, &mut volume)? {
            Draw::Placed => failures = 0,
            Draw::Rejected => {
                failures += 1;
                if b.current + volume as f64 > b.desired && volume < UNIFORM_SHRINK_BELOW {
                    n_groups -= 1;
                }
            }
            Draw::Stop => break,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{MemoryLesionSource, SizeGroup};
    use crate::sim::test_utils::{cube, mask_with};
    use crate::sim::SimError;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const SHAPE: crate::Idx3d = (20, 20, 20);

    /// 两个分组: 小病灶 (1 体素) 与大病灶 (27 体素), 各有互不重叠的若干个.
    fn source() -> (MemoryLesionSource, LesionCatalog) {
        let mut src = MemoryLesionSource::new();
        for i in 0..8 {
            src.insert("small", i, mask_with(SHAPE, &[(1, 1, 2 * i + 1)]));
        }
        for i in 0..4 {
            src.insert("big", i, mask_with(SHAPE, &cube((5 + 4 * i, 10, 10), 1)));
        }
        let cat = LesionCatalog::new(vec![
            SizeGroup::new("small", 8, 1),
            SizeGroup::new("big", 4, 27),
        ]);
        (src, cat)
    }

    #[test]
    fn test_descending_never_exceeds_load() {
        let (src, cat) = source();
        let grid = mask_with(SHAPE, &[]);
        for seed in 0..8 {
            let mut rng = StdRng::seed_from_u64(seed);
            // 0.06 ml = 60 体素.
            let r = generate_mask(&grid, &src, &cat, 0.06, MaskStrategy::Descending, &mut rng)
                .unwrap();
            assert_eq!(r.desired_load, 60.0);
            assert!(r.achieved_load <= r.desired_load);
            assert_eq!(r.achieved_load as usize, r.mask.count_foreground());
            // 大病灶可重复抽取 (不检查重叠), 但新增体素只按空位计数.
            assert!(r.placed >= 1);
        }
    }

    #[test]
    fn test_descending_overlap_only_allowed_for_largest_group() {
        let mut src = MemoryLesionSource::new();
        src.insert("small", 0, mask_with(SHAPE, &[(1, 1, 1), (1, 1, 2)]));
        src.insert("small", 1, mask_with(SHAPE, &[(1, 1, 2), (1, 1, 3)]));
        // 两个大病灶重叠 18 个体素, 并集为 36.
        src.insert("big", 0, mask_with(SHAPE, &cube((10, 10, 5), 1)));
        src.insert("big", 1, mask_with(SHAPE, &cube((10, 10, 6), 1)));
        let cat = LesionCatalog::new(vec![
            SizeGroup::new("small", 2, 2),
            SizeGroup::new("big", 2, 27),
        ]);
        let grid = mask_with(SHAPE, &[]);

        let mut both_big = 0;
        for seed in 0..16 {
            let mut rng = StdRng::seed_from_u64(seed);
            let r = generate_mask(&grid, &src, &cat, 1.0, MaskStrategy::Descending, &mut rng)
                .unwrap();
            let pos = r.mask.foreground_pos();
            let small = pos.iter().filter(|p| p.0 == 1).count();
            let big = pos.len() - small;
            // 小病灶之间互相重叠, 只能放入一个.
            assert_eq!(small, 2);
            assert!(big == 27 || big == 36, "big voxels {big}");
            if big == 36 {
                both_big += 1;
            }
        }
        assert!(both_big > 0);
    }

    #[test]
    fn test_descending_retires_groups_larger_than_remaining_load() {
        let (src, cat) = source();
        let grid = mask_with(SHAPE, &[]);
        for seed in 0..8 {
            // 20 体素不超过大病灶的 27: 大分组直接退出.
            let mut rng = StdRng::seed_from_u64(seed);
            let r = generate_mask(&grid, &src, &cat, 0.02, MaskStrategy::Descending, &mut rng)
                .unwrap();
            let pos = r.mask.foreground_pos();
            assert!(!pos.is_empty());
            assert!(pos.iter().all(|p| p.0 == 1));
            assert_eq!(r.placed, pos.len());

            // 30 体素: 先放入一个大病灶, 剩余 3 体素后大分组退出.
            let mut rng = StdRng::seed_from_u64(seed);
            let r = generate_mask(&grid, &src, &cat, 0.03, MaskStrategy::Descending, &mut rng)
                .unwrap();
            let pos = r.mask.foreground_pos();
            assert_eq!(pos.iter().filter(|p| p.0 != 1).count(), 27);
            assert!(r.achieved_load <= 30.0);
        }
    }

    /// 记录各分组被抽取次数的病灶源.
    struct CountingSource {
        inner: MemoryLesionSource,
        draws: std::cell::RefCell<std::collections::HashMap<String, usize>>,
    }

    impl LesionSource for CountingSource {
        fn lesion(&self, group: &str, index: usize) -> crate::dataset::DatabaseResult<LesionMask> {
            *self.draws.borrow_mut().entry(group.to_string()).or_default() += 1;
            self.inner.lesion(group, index)
        }
    }

    /// 一个单体素小病灶, 以及 10 个体积为 `huge` 的相同大病灶.
    fn uniform_huge_draws(huge: usize, seed: u64) -> usize {
        let slab: Vec<_> = itertools::iproduct!(10..13, 0..20, 0..20).take(huge).collect();
        let mut inner = MemoryLesionSource::new();
        inner.insert("tiny", 0, mask_with(SHAPE, &[(0, 0, 0)]));
        for i in 0..10 {
            inner.insert("huge", i, mask_with(SHAPE, &slab));
        }
        let src = CountingSource {
            inner,
            draws: Default::default(),
        };
        let cat = LesionCatalog::new(vec![
            SizeGroup::new("tiny", 1, 1),
            SizeGroup::new("huge", 10, 1300),
        ]);
        let grid = mask_with(SHAPE, &[]);
        let mut rng = StdRng::seed_from_u64(seed);
        // 500 体素: 大病灶总是超出负荷.
        let r = generate_mask(&grid, &src, &cat, 0.5, MaskStrategy::Uniform, &mut rng).unwrap();
        assert_eq!(r.mask.count_foreground(), 1);
        let n = src.draws.borrow().get("huge").copied().unwrap_or(0);
        n
    }

    #[test]
    fn test_uniform_shrinks_only_for_lesions_below_1200() {
        let mut total = 0;
        for seed in 0..8 {
            // 1199 体素的病灶超出负荷后, 最大分组退出, 不会再被抽到.
            assert!(uniform_huge_draws(1199, seed) <= 1);
            total += uniform_huge_draws(1200, seed);
        }
        // 1200 体素的病灶超出负荷不会使分组退出.
        assert!(total > 8);
    }

    #[test]
    fn test_zero_load_is_empty() {
        let (src, cat) = source();
        let grid = mask_with(SHAPE, &[]);
        let mut rng = StdRng::seed_from_u64(1);
        for strategy in [MaskStrategy::Descending, MaskStrategy::Uniform] {
            let r = generate_mask(&grid, &src, &cat, 0.0, strategy, &mut rng).unwrap();
            assert!(r.mask.is_empty());
            assert_eq!(r.placed, 0);
        }
    }

    #[test]
    fn test_uniform_rejects_overlap() {
        let (src, cat) = source();
        let grid = mask_with(SHAPE, &[]);
        let mut rng = StdRng::seed_from_u64(7);
        let r = generate_mask(&grid, &src, &cat, 0.2, MaskStrategy::Uniform, &mut rng).unwrap();
        // 所有互不重叠病灶的总体积为 8 + 4 * 27 = 116 < 200.
        assert_eq!(r.achieved_load as usize, r.mask.count_foreground());
        assert!(r.achieved_load <= 116.0);
        assert!(r.rejected > 0);
    }

    #[test]
    fn test_grid_mismatch_is_error() {
        let mut src = MemoryLesionSource::new();
        src.insert("only", 0, mask_with((3, 3, 3), &[(1, 1, 1)]));
        let cat = LesionCatalog::new(vec![SizeGroup::new("only", 1, 1)]);
        let grid = mask_with(SHAPE, &[]);
        let mut rng = StdRng::seed_from_u64(0);
        let err = generate_mask(&grid, &src, &cat, 1.0, MaskStrategy::Descending, &mut rng)
            .unwrap_err();
        assert!(matches!(err, SimError::Volume { .. }));
    }

    #[test]
    fn test_empty_catalog() {
        let grid = mask_with(SHAPE, &[]);
        let mut rng = StdRng::seed_from_u64(0);
        let err = generate_mask(
            &grid,
            &MemoryLesionSource::new(),
            &LesionCatalog::new(vec![]),
            1.0,
            MaskStrategy::Descending,
            &mut rng,
        )
        .unwrap_err();
        assert!(matches!(err, SimError::EmptyCatalog));
    }

    #[test]
    fn test_strategy_parse() {
        assert_eq!("uniform".parse::<MaskStrategy>().unwrap(), MaskStrategy::Uniform);
        assert_eq!(MaskStrategy::default().to_string(), "descending");
        assert!("random".parse::<MaskStrategy>().is_err());
    }
}
