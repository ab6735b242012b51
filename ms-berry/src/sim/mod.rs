//! 病灶模拟算法: 掩膜生成, 掩膜精化, 强度形变, 纵向随访以及旧版概率雕刻.

use std::path::PathBuf;

use ndarray::{Array3, Zip};
use rand::Rng;
use rand_distr::{Distribution, Normal};
use snafu::{ensure, OptionExt, Snafu};

use crate::consts::label::is_lesion;
use crate::data::DataError;
use crate::dataset::DatabaseError;
use crate::filter::gaussian_smooth;
use crate::{LesionMask, MriVolume, NiftiHeaderAttr};

pub mod carve;
pub mod deform;
pub mod longitudinal;
pub mod mask;
pub mod modality;
pub mod refine;

pub use modality::{ContrastProfile, Modality, ParseModalityError};

/// 模拟过程中的错误.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SimError {
    /// 体数据操作失败 (通常是网格不一致).
    #[snafu(display("volume operation failed"))]
    Volume { source: DataError },

    /// 读取病灶库失败.
    #[snafu(display("lesion database access failed"))]
    Database { source: DatabaseError },

    /// 写出结果失败.
    #[snafu(display("could not write {}", path.display()))]
    WriteOutput { path: PathBuf, source: DataError },

    /// 创建输出目录失败.
    #[snafu(display("could not create directory {}", path.display()))]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    /// 病灶分组列表为空.
    #[snafu(display("lesion catalog is empty"))]
    EmptyCatalog,

    /// 对比度分布参数非法.
    #[snafu(display("invalid contrast profile: mean {mean}, std {std}"))]
    InvalidContrast { mean: f64, std: f64 },

    /// 数值参数超出范围.
    #[snafu(display("parameter {name} = {value} out of range"))]
    InvalidParameter { name: &'static str, value: f64 },
}

/// 模拟结果.
pub type SimResult<T> = Result<T, SimError>;

/// 生成每个体素独立服从 `N(mean, std²)` 的噪声图, 然后以 `homogeneity` (毫米) 平滑.
pub(crate) fn smoothed_noise_map<R: Rng + ?Sized>(
    grid: &MriVolume,
    contrast: ContrastProfile,
    homogeneity: f64,
    rng: &mut R,
) -> SimResult<Array3<f32>> {
    ensure!(
        contrast.is_valid(),
        InvalidContrastSnafu {
            mean: contrast.mean,
            std: contrast.std
        }
    );
    let normal = Normal::new(contrast.mean, contrast.std)
        .ok()
        .context(InvalidContrastSnafu {
            mean: contrast.mean,
            std: contrast.std,
        })?;
    let noise = Array3::from_shape_simple_fn(grid.shape(), || normal.sample(rng) as f32);
    Ok(gaussian_smooth(&noise, grid.pix_dim(), homogeneity))
}

/// 病灶外的体素置 1, 病灶内保持原值.
pub(crate) fn keep_inside(map: &mut Array3<f32>, mask: &LesionMask) {
    Zip::from(map).and(&mask.data()).for_each(|v, &m| {
        if !is_lesion(m) {
            *v = 1.0;
        }
    });
}

/// 检查非负参数.
pub(crate) fn ensure_non_negative(name: &'static str, value: f64) -> SimResult<()> {
    ensure!(
        value.is_finite() && value >= 0.0,
        InvalidParameterSnafu { name, value }
    );
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_utils {
    use ndarray::Array3;

    use crate::{LesionMask, MriVolume};

    /// 常数强度的合成扫描.
    pub fn flat_volume(shape: crate::Idx3d, value: f32) -> MriVolume {
        MriVolume::synthetic(Array3::from_elem(shape, value), [1.0; 3])
    }

    /// 在指定位置置 1 的合成掩膜.
    pub fn mask_with(shape: crate::Idx3d, pos: &[crate::Idx3d]) -> LesionMask {
        let mut data = Array3::zeros(shape);
        for p in pos {
            data[*p] = 1u8;
        }
        LesionMask::synthetic(data, [1.0; 3])
    }

    /// 中心为 `c`, 边长为 `2r + 1` 的立方体病灶.
    pub fn cube(c: crate::Idx3d, r: usize) -> Vec<crate::Idx3d> {
        let mut ans = vec![];
        for z in c.0 - r..=c.0 + r {
            for h in c.1 - r..=c.1 + r {
                for w in c.2 - r..=c.2 + r {
                    ans.push((z, h, w));
                }
            }
        }
        ans
    }
}
