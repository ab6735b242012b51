//! 3D 连通域标记.

use std::collections::VecDeque;

use ndarray::{Array3, ArrayView3};

use crate::consts::label::is_lesion;
use crate::Idx3d;

/// 获得 `(z, h, w)` 的 6-邻居索引. 不检查越界, 下溢会回绕成极大值.
#[inline]
pub(crate) fn neighbour6((z, h, w): Idx3d) -> [Idx3d; 6] {
    [
        (z.wrapping_sub(1), h, w),
        (z.saturating_add(1), h, w),
        (z, h.wrapping_sub(1), w),
        (z, h.saturating_add(1), w),
        (z, h, w.wrapping_sub(1)),
        (z, h, w.saturating_add(1)),
    ]
}

/// 连通域标记结果.
#[derive(Debug, Clone)]
pub struct Components {
    /// 每个体素所属连通域的标签. `0` 为背景, `1` 为最大连通域, 依此类推.
    pub labels: Array3<u32>,
    /// `sizes[i]` 为标签 `i + 1` 的体素个数, 降序排列.
    pub sizes: Vec<usize>,
}

impl Components {
    /// 连通域个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.sizes.len()
    }

    /// 是否不存在连通域?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.sizes.is_empty()
    }

    /// 获取标签 `label` 对应的全部体素位置, 按行优先排列.
    pub fn positions(&self, label: u32) -> Vec<Idx3d> {
        self.labels
            .indexed_iter()
            .filter_map(|(pos, l)| (*l == label).then_some(pos))
            .collect()
    }

    /// 一次遍历收集所有连通域的体素位置. `result[i]` 对应标签 `i + 1`.
    pub fn all_positions(&self) -> Vec<Vec<Idx3d>> {
        let mut ans: Vec<Vec<Idx3d>> = self.sizes.iter().map(|s| Vec::with_capacity(*s)).collect();
        for (pos, l) in self.labels.indexed_iter() {
            if *l > 0 {
                ans[*l as usize - 1].push(pos);
            }
        }
        ans
    }
}

/// 按照 6-相邻规则对 `mask` 的非零体素做连通域标记,
/// 然后按照体积从大到小重新编号. 体积相同时按首次出现的行优先顺序排序.
pub fn label_components(mask: ArrayView3<u8>) -> Components {
    let shape = mask.dim();
    let mut raw = Array3::<u32>::zeros(shape);
    let mut sizes = Vec::<usize>::new();
    let mut bfs_q = VecDeque::with_capacity(16);

    for (pos, p) in mask.indexed_iter() {
        if !is_lesion(*p) || raw[pos] != 0 {
            continue;
        }
        sizes.push(0);
        let cur_label = sizes.len() as u32;
        raw[pos] = cur_label;
        bfs_q.push_back(pos);

        while let Some(cur) = bfs_q.pop_front() {
            sizes[cur_label as usize - 1] += 1;
            for nb in neighbour6(cur) {
                let hit = matches!(mask.get(nb), Some(v) if is_lesion(*v));
                if hit && raw[nb] == 0 {
                    raw[nb] = cur_label;
                    bfs_q.push_back(nb);
                }
            }
        }
    }

    // 稳定排序保证相同体积按首次出现顺序.
    let mut order: Vec<usize> = (0..sizes.len()).collect();
    order.sort_by(|a, b| sizes[*b].cmp(&sizes[*a]));
    let mut remap = vec![0u32; sizes.len() + 1];
    for (new, old) in order.iter().enumerate() {
        remap[old + 1] = new as u32 + 1;
    }
    raw.mapv_inplace(|l| remap[l as usize]);
    let sizes = order.into_iter().map(|i| sizes[i]).collect();

    Components { labels: raw, sizes }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relabel_by_size() {
        let mut mask = Array3::<u8>::zeros((3, 4, 4));
        // 首个 (单体素) 连通域.
        mask[(0, 0, 0)] = 1;
        // 三体素连通域, 跨层相连.
        mask[(0, 2, 2)] = 1;
        mask[(1, 2, 2)] = 1;
        mask[(2, 2, 2)] = 1;
        // 另一个单体素连通域. 对角相邻不算相连.
        mask[(2, 3, 3)] = 5;

        let cc = label_components(mask.view());
        assert_eq!(cc.len(), 3);
        assert_eq!(cc.sizes, vec![3, 1, 1]);
        assert_eq!(cc.labels[(1, 2, 2)], 1);
        assert_eq!(cc.labels[(0, 0, 0)], 2);
        assert_eq!(cc.labels[(2, 3, 3)], 3);
        assert_eq!(cc.labels[(0, 1, 1)], 0);
        assert_eq!(cc.positions(1), vec![(0, 2, 2), (1, 2, 2), (2, 2, 2)]);
        assert_eq!(cc.all_positions()[2], vec![(2, 3, 3)]);
    }

    #[test]
    fn test_empty() {
        let cc = label_components(Array3::<u8>::zeros((2, 2, 2)).view());
        assert!(cc.is_empty());
        assert!(cc.labels.iter().all(|l| *l == 0));
    }
}
