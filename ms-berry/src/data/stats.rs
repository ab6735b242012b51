//! 体数据强度的描述性统计.

use ndarray::{ArrayView3, Zip};

use crate::consts::label::is_lesion;

/// 一组体素强度的统计结果.
///
/// 方差为样本方差 (分母 `n - 1`), 与常见医学图像工具箱的统计滤波器一致.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Statistics {
    /// 参与统计的体素个数.
    pub count: usize,
    /// 强度总和.
    pub sum: f64,
    /// 平均值.
    pub mean: f64,
    /// 样本方差. 少于两个体素时为 0.
    pub variance: f64,
    /// 最小值.
    pub min: f64,
    /// 最大值.
    pub max: f64,
}

impl Default for Statistics {
    fn default() -> Self {
        Self {
            count: 0,
            sum: 0.0,
            mean: 0.0,
            variance: 0.0,
            min: 0.0,
            max: 0.0,
        }
    }
}

impl Statistics {
    /// 样本标准差.
    #[inline]
    pub fn std(&self) -> f64 {
        self.variance.sqrt()
    }

    /// 是否没有任何体素参与统计?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// 统计全部体素.
    pub fn of(data: ArrayView3<f32>) -> Self {
        let mut acc = Accumulator::default();
        data.iter().for_each(|&v| acc.push(v as f64));
        acc.finish()
    }

    /// 仅统计 `mask` 非零位置上的体素. 两者形状必须相同, 否则 panic.
    pub fn of_masked(data: ArrayView3<f32>, mask: ArrayView3<u8>) -> Self {
        let mut acc = Accumulator::default();
        Zip::from(&data).and(&mask).for_each(|&v, &m| {
            if is_lesion(m) {
                acc.push(v as f64);
            }
        });
        acc.finish()
    }
}

/// Welford 在线算法累加器.
#[derive(Default)]
struct Accumulator {
    count: usize,
    sum: f64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl Accumulator {
    #[inline]
    fn push(&mut self, v: f64) {
        if self.count == 0 {
            self.min = v;
            self.max = v;
        } else {
            self.min = self.min.min(v);
            self.max = self.max.max(v);
        }
        self.count += 1;
        self.sum += v;
        let delta = v - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (v - self.mean);
    }

    fn finish(self) -> Statistics {
        if self.count == 0 {
            return Statistics::default();
        }
        let variance = if self.count > 1 {
            self.m2 / (self.count - 1) as f64
        } else {
            0.0
        };
        Statistics {
            count: self.count,
            sum: self.sum,
            mean: self.mean,
            variance,
            min: self.min,
            max: self.max,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr3, Array3};

    #[test]
    fn test_sample_variance() {
        let data = arr3(&[[[2.0f32, 4.0], [4.0, 4.0]], [[5.0, 5.0], [7.0, 9.0]]]);
        let s = Statistics::of(data.view());
        assert_eq!(s.count, 8);
        assert_eq!(s.sum, 40.0);
        assert!((s.mean - 5.0).abs() < 1e-12);
        // 总体方差为 4, 样本方差为 32 / 7.
        assert!((s.variance - 32.0 / 7.0).abs() < 1e-12);
        assert_eq!(s.min, 2.0);
        assert_eq!(s.max, 9.0);
    }

    #[test]
    fn test_masked() {
        let data = Array3::from_shape_fn((2, 2, 2), |(z, h, w)| (z * 4 + h * 2 + w) as f32);
        let mut mask = Array3::zeros((2, 2, 2));
        mask[(0, 0, 1)] = 1u8;
        mask[(1, 1, 1)] = 2u8;
        let s = Statistics::of_masked(data.view(), mask.view());
        assert_eq!(s.count, 2);
        assert!((s.mean - 4.0).abs() < 1e-12);
        assert!((s.std() - 18f64.sqrt()).abs() < 1e-12);

        let empty = Statistics::of_masked(data.view(), Array3::zeros((2, 2, 2)).view());
        assert!(empty.is_empty());
        assert_eq!(empty.std(), 0.0);
    }
}
