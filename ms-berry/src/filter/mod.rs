//! 可分离离散高斯平滑.
//!
//! `sigma` 以毫米为单位, 按照每个轴的体素分辨率换算为体素单位.
//! 卷积核半径为 `ceil(4σ)` 个体素, 归一化, 边界按最近体素复制延拓.

use ndarray::{Array3, ArrayViewMut1, Axis, Zip};

/// 生成半径为 `ceil(4σ)` 的归一化一维高斯核. `sigma` 以体素为单位.
pub fn gaussian_kernel(sigma: f64) -> Vec<f64> {
    if sigma <= 0.0 || !sigma.is_finite() {
        return vec![1.0];
    }
    let radius = (4.0 * sigma).ceil() as i64;
    let mut kernel: Vec<f64> = (-radius..=radius)
        .map(|x| (-(x * x) as f64 / (2.0 * sigma * sigma)).exp())
        .collect();
    let sum: f64 = kernel.iter().sum();
    kernel.iter_mut().for_each(|k| *k /= sum);
    kernel
}

/// 对一条数据线做卷积, 结果写回原处. `buf` 为复用的暂存区.
fn convolve_lane(mut lane: ArrayViewMut1<f32>, kernel: &[f64], buf: &mut Vec<f64>) {
    let n = lane.len() as i64;
    let radius = (kernel.len() / 2) as i64;
    buf.clear();
    buf.extend(lane.iter().map(|v| *v as f64));
    for (i, out) in lane.iter_mut().enumerate() {
        let i = i as i64;
        let acc: f64 = kernel
            .iter()
            .enumerate()
            .map(|(k, w)| {
                let j = (i + k as i64 - radius).clamp(0, n - 1);
                w * buf[j as usize]
            })
            .sum();
        *out = acc as f32;
    }
}

/// 沿 `axis` 轴做一维高斯卷积.
fn smooth_axis(data: &mut Array3<f32>, axis: usize, kernel: &[f64]) {
    if kernel.len() <= 1 || data.len_of(Axis(axis)) <= 1 {
        return;
    }
    let lanes = data.lanes_mut(Axis(axis));

    cfg_if::cfg_if! {
        if #[cfg(feature = "rayon")] {
            Zip::from(lanes).par_for_each(|lane| {
                let mut buf = Vec::with_capacity(lane.len());
                convolve_lane(lane, kernel, &mut buf);
            });
        } else {
            let mut buf = Vec::new();
            Zip::from(lanes).for_each(|lane| convolve_lane(lane, kernel, &mut buf));
        }
    }
}

/// 对 `(z, h, w)` 组织的体数据做各向同性 (物理单位) 高斯平滑.
///
/// `spacing` 为 `[z, h, w]` 体素分辨率 (毫米), `sigma_mm <= 0` 时原样返回.
pub fn gaussian_smooth(data: &Array3<f32>, spacing: [f64; 3], sigma_mm: f64) -> Array3<f32> {
    let mut out = data.clone();
    if sigma_mm <= 0.0 || !sigma_mm.is_finite() {
        return out;
    }
    for (axis, sp) in spacing.iter().enumerate() {
        let sp = if *sp > 0.0 { *sp } else { 1.0 };
        let kernel = gaussian_kernel(sigma_mm / sp);
        smooth_axis(&mut out, axis, &kernel);
    }
    out
}
