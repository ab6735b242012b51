//! 轴向切片预览图, 用于快速目测检查模拟结果.

use std::path::Path;

use ordered_float::NotNan;
use snafu::{ensure, ResultExt};

use super::{DataResult, ImageSnafu, LesionMask, MriVolume, NiftiHeaderAttr, SliceOutOfRangeSnafu};
use crate::consts::label::is_lesion;

/// 强度窗口, 将任意强度映射到 8-bit 灰度值.
///
/// 该窗口是只读的. 若要修改窗口参数, 你应该创建新的实例.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct IntensityWindow {
    lower: f32,
    upper: f32,
}

impl IntensityWindow {
    /// 构建窗口. 要求 `lower < upper` 且均为有限值, 否则返回 `None`.
    pub fn new(lower: f32, upper: f32) -> Option<Self> {
        (lower.is_finite() && upper.is_finite() && lower < upper).then_some(Self { lower, upper })
    }

    /// 以数据的第 1 和第 99 百分位数作为窗口上下限.
    /// 非有限值被忽略. 数据为常数或为空时退化为 `[v, v + 1]` / `[0, 1]`.
    pub fn from_percentiles<I: IntoIterator<Item = f32>>(it: I) -> Self {
        let mut v: Vec<NotNan<f32>> = it
            .into_iter()
            .filter(|x| x.is_finite())
            .filter_map(|x| NotNan::new(x).ok())
            .collect();
        if v.is_empty() {
            return Self {
                lower: 0.0,
                upper: 1.0,
            };
        }
        v.sort_unstable();
        let at = |q: f64| v[((v.len() - 1) as f64 * q).round() as usize].into_inner();
        let (lower, upper) = (at(0.01), at(0.99));
        Self::new(lower, upper).unwrap_or(Self {
            lower,
            upper: lower + 1.0,
        })
    }

    /// 窗下限.
    #[inline]
    pub fn lower_bound(&self) -> f32 {
        self.lower
    }

    /// 窗上限.
    #[inline]
    pub fn upper_bound(&self) -> f32 {
        self.upper
    }

    /// 求强度 `v` 对应的灰度值 (0 <= value <= 255). NaN 映射为 0.
    pub fn eval(&self, v: f32) -> u8 {
        if v.is_nan() || v <= self.lower {
            u8::MIN
        } else if v >= self.upper {
            u8::MAX
        } else {
            // 255, not 256.
            ((v - self.lower) / (self.upper - self.lower) * 255.0) as u8
        }
    }
}

/// 将 `volume` 的第 `z` 层轴向切片保存为 PNG 灰度图.
///
/// 窗口由整个体数据自动推导. 若提供 `mask`, 病灶体素绘制为白色.
pub fn save_axial_png<P: AsRef<Path>>(
    volume: &MriVolume,
    mask: Option<&LesionMask>,
    z: usize,
    path: P,
) -> DataResult<()> {
    let (depth, height, width) = volume.shape();
    ensure!(z < depth, SliceOutOfRangeSnafu { z, depth });
    if let Some(m) = mask {
        volume.ensure_same_grid(m)?;
    }

    let data = volume.data();
    let window = IntensityWindow::from_percentiles(data.iter().copied());
    let mut buf = image::GrayImage::new(width as u32, height as u32);
    for h in 0..height {
        for w in 0..width {
            let lesion = mask.map_or(false, |m| is_lesion(m[(z, h, w)]));
            let gray = if lesion {
                u8::MAX
            } else {
                window.eval(data[(z, h, w)])
            };
            buf.put_pixel(w as u32, h as u32, image::Luma([gray]));
        }
    }
    let path = path.as_ref();
    buf.save(path).context(ImageSnafu { path })
}
