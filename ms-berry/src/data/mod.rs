use std::ops::{Index, IndexMut};
use std::path::{Path, PathBuf};

use ndarray::{Array3, ArrayView, ArrayViewMut, Ix3, Zip};
use nifti::writer::WriterOptions;
use nifti::{IntoNdArray, NiftiHeader, NiftiObject, NiftiType, ReaderOptions};
use snafu::{ensure, OptionExt, ResultExt, Snafu};

use crate::consts::label::{self, is_lesion};
use crate::Idx3d;

pub mod components;
pub mod preview;
pub mod stats;

/// `NiftiHeader` 是栈上大对象, 移动该对象的开销很可观.
/// 因此我们将其分配到堆上.
type BoxedHeader = Box<NiftiHeader>;

/// 体数据读写错误.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum DataError {
    /// 读取 nii 文件失败.
    #[snafu(display("could not read NIfTI file {}", path.display()))]
    Read {
        path: PathBuf,
        source: nifti::NiftiError,
    },

    /// 写入 nii 文件失败.
    #[snafu(display("could not write NIfTI file {}", path.display()))]
    Write {
        path: PathBuf,
        source: nifti::NiftiError,
    },

    /// 体素个数与 header 声明的形状不一致 (例如多于一个时间点的 4D 数据).
    #[snafu(display("expected a single 3D volume of {expected} voxels, found {found}"))]
    NotVolume3d { expected: usize, found: usize },

    /// 写入预览图失败.
    #[snafu(display("could not write image {}", path.display()))]
    Image {
        path: PathBuf,
        source: image::ImageError,
    },

    /// 切片下标越界.
    #[snafu(display("slice {z} out of range (depth {depth})"))]
    SliceOutOfRange { z: usize, depth: usize },

    /// 两个体数据不在同一网格上.
    #[snafu(display("grid mismatch: {left:?} vs {right:?}"))]
    GridMismatch { left: Idx3d, right: Idx3d },
}

/// 体数据读写结果.
pub type DataResult<T> = Result<T, DataError>;

/// 将 (W, H, z) 转换成 (z, H, W). 以后均按照该模式访问.
#[inline]
fn get_shape_from_header(h: &NiftiHeader) -> Idx3d {
    // [W, H, z]. 体素个数数组. 低于三维的数据在缺失维度上视为 1.
    let [rank, w, h, z, ..] = h.dim;
    let d = |n: u16, axis: u16| if rank >= axis { n.max(1) as usize } else { 1 };
    (d(z, 3), d(h, 2), d(w, 1))
}

/// 将 header 中的形状改写为 `(z, h, w)`.
fn set_shape_to_header(h: &mut NiftiHeader, (z, hh, w): Idx3d) {
    h.dim[0] = 3;
    h.dim[1] = w as u16;
    h.dim[2] = hh as u16;
    h.dim[3] = z as u16;
    h.dim[4..].fill(1);
}

/// 读取 nii 文件, 返回 header 和以 `(z, h, w)` 组织的数据.
fn read_volume<T>(path: &Path) -> DataResult<(BoxedHeader, Array3<T>)>
where
    T: nifti::DataElement,
{
    let obj = ReaderOptions::new()
        .read_file(path)
        .context(ReadSnafu { path })?;
    let header = Box::new(obj.header().clone());
    let shape = get_shape_from_header(&header);

    // nifti 数据在内存中以 [W, H, z] 的 Fortran 序排列, 恰好等于 (z, H, W) 的 C 序.
    let raw = obj
        .into_volume()
        .into_ndarray::<T>()
        .context(ReadSnafu { path })?
        .into_raw_vec();
    let expected = shape.0 * shape.1 * shape.2;
    let found = raw.len();
    let data = Array3::from_shape_vec(shape, raw)
        .ok()
        .context(NotVolume3dSnafu { expected, found })?;
    Ok((header, data))
}

/// 为写出准备 header: 数据已经按 `scl_slope` / `scl_inter` 缩放过, 因此重置为恒等变换.
fn header_for_write(header: &NiftiHeader, shape: Idx3d) -> NiftiHeader {
    let mut h = header.clone();
    h.scl_slope = 1.0;
    h.scl_inter = 0.0;
    set_shape_to_header(&mut h, shape);
    h
}

/// 由 `f32` 体素值转换到落盘像素类型. 整数类型截断并饱和, 与 C 风格强制转换一致.
trait VoxelCast: Sized {
    fn from_f32(v: f32) -> Self;
}

macro_rules! impl_int_cast {
    ($($t: ty),+) => {
        $(
            impl VoxelCast for $t {
                #[inline]
                fn from_f32(v: f32) -> Self {
                    if v.is_nan() {
                        return 0;
                    }
                    let v = (v as f64).trunc().clamp(<$t>::MIN as f64, <$t>::MAX as f64);
                    // 64 位整数的 MAX 转成 f64 会进位, 此时 cast 失败, 直接取边界值.
                    num::cast::<f64, $t>(v).unwrap_or(if v > 0.0 { <$t>::MAX } else { <$t>::MIN })
                }
            }
        )+
    };
}

impl_int_cast!(u8, i8, u16, i16, u32, i32, u64, i64);

impl VoxelCast for f32 {
    #[inline]
    fn from_f32(v: f32) -> Self {
        v
    }
}

impl VoxelCast for f64 {
    #[inline]
    fn from_f32(v: f32) -> Self {
        v as f64
    }
}

/// 体数据 header 的共用属性和部分通用操作.
pub trait NiftiHeaderAttr {
    /// 获取 header 部分.
    fn header(&self) -> &NiftiHeader;

    /// 获取数据形状大小 `(z, h, w)`.
    #[inline]
    fn shape(&self) -> Idx3d {
        get_shape_from_header(self.header())
    }

    /// 获取数据体素个数.
    #[inline]
    fn size(&self) -> usize {
        let (z, h, w) = self.shape();
        z * h * w
    }

    /// 检查索引是否合法.
    #[inline]
    fn check(&self, (z0, h0, w0): &Idx3d) -> bool {
        let (z, h, w) = self.shape();
        *z0 < z && *h0 < h && *w0 < w
    }

    /// 获取单个体素分辨率 `[z, h, w]`, 以毫米为单位.
    /// 非正数分辨率 (header 缺失时常见) 按 1 毫米处理.
    #[inline]
    fn pix_dim(&self) -> [f64; 3] {
        let [_, w, h, z, ..] = self.header().pixdim;
        let fix = |v: f32| if v > 0.0 { v as f64 } else { 1.0 };
        [fix(z), fix(h), fix(w)]
    }

    /// 获取体素的实际体积值, 以立方毫米为单位.
    #[inline]
    fn voxel(&self) -> f64 {
        self.pix_dim().iter().product()
    }

    /// 两个体数据是否处于同一网格 (形状与分辨率均一致)?
    fn same_grid<O: NiftiHeaderAttr + ?Sized>(&self, other: &O) -> bool {
        self.shape() == other.shape()
            && self
                .pix_dim()
                .iter()
                .zip(other.pix_dim())
                .all(|(a, b)| (a - b).abs() < 1e-3)
    }

    /// 若不在同一网格则返回 `Err`.
    fn ensure_same_grid<O: NiftiHeaderAttr + ?Sized>(&self, other: &O) -> DataResult<()> {
        ensure!(
            self.same_grid(other),
            GridMismatchSnafu {
                left: self.shape(),
                right: other.shape()
            }
        );
        Ok(())
    }
}

/// nii 格式 3D MRI 扫描 (或参数图, 如 DTI-FA/ADC), 包括 header 和体素强度.
/// 强度以 `f32` 保存, 同时记住落盘时的像素类型.
#[derive(Debug, Clone)]
pub struct MriVolume {
    header: BoxedHeader,
    datatype: NiftiType,
    data: Array3<f32>,
}

impl NiftiHeaderAttr for MriVolume {
    #[inline]
    fn header(&self) -> &NiftiHeader {
        &self.header
    }
}

impl Index<Idx3d> for MriVolume {
    type Output = f32;

    #[inline]
    fn index(&self, index: Idx3d) -> &Self::Output {
        &self.data[index]
    }
}

impl IndexMut<Idx3d> for MriVolume {
    #[inline]
    fn index_mut(&mut self, index: Idx3d) -> &mut Self::Output {
        &mut self.data[index]
    }
}

impl MriVolume {
    /// 打开 nii 文件格式的 3D 扫描. `path` 为 `.nii` 或 `.nii.gz` 文件的本地路径.
    pub fn open<P: AsRef<Path>>(path: P) -> DataResult<Self> {
        let (header, data) = read_volume::<f32>(path.as_ref())?;
        let datatype = header.data_type().unwrap_or(NiftiType::Float32);
        Ok(Self {
            header,
            datatype,
            data,
        })
    }

    /// 以 `grid` 的 header 为模板创建新扫描. `data` 以 `(z, h, w)` 组织,
    /// 形状必须与 `grid` 一致, 否则返回 `Err`.
    pub fn from_parts<G: NiftiHeaderAttr + ?Sized>(grid: &G, data: Array3<f32>) -> DataResult<Self> {
        let shape = data.dim();
        ensure!(
            shape == grid.shape(),
            GridMismatchSnafu {
                left: shape,
                right: grid.shape()
            }
        );
        let header = Box::new(grid.header().clone());
        let datatype = header.data_type().unwrap_or(NiftiType::Float32);
        Ok(Self {
            header,
            datatype,
            data,
        })
    }

    /// 从裸数据直接创建扫描. 体素分辨率 `pix_dim` 按 `[z, h, w]` 给出 (毫米).
    ///
    /// 主要用于构造合成数据.
    pub fn synthetic(data: Array3<f32>, pix_dim: [f32; 3]) -> Self {
        let mut header = Box::<NiftiHeader>::default();
        set_shape_to_header(&mut header, data.dim());
        let [z, h, w] = pix_dim;
        header.pixdim[1] = w;
        header.pixdim[2] = h;
        header.pixdim[3] = z;
        header.datatype = NiftiType::Float32 as i16;
        header.bitpix = 32;
        Self {
            header,
            datatype: NiftiType::Float32,
            data,
        }
    }

    /// 落盘像素类型.
    #[inline]
    pub fn datatype(&self) -> NiftiType {
        self.datatype
    }

    /// 将落盘像素类型改为 `f32`. 用于参数图等必须保留小数的数据.
    #[inline]
    pub fn into_float32(mut self) -> Self {
        self.datatype = NiftiType::Float32;
        self.header.datatype = NiftiType::Float32 as i16;
        self.header.bitpix = 32;
        self
    }

    /// 以原始像素类型保存到 `path`. 非浮点类型会截断并饱和.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> DataResult<()> {
        let path = path.as_ref();
        let header = header_for_write(&self.header, self.data.dim());

        macro_rules! write_as {
            ($t: ty) => {{
                let out = self.data.mapv(<$t as VoxelCast>::from_f32);
                WriterOptions::new(path)
                    .reference_header(&header)
                    .write_nifti(&out.permuted_axes([2, 1, 0]))
            }};
        }

        let result = match self.datatype {
            NiftiType::Uint8 => write_as!(u8),
            NiftiType::Int8 => write_as!(i8),
            NiftiType::Uint16 => write_as!(u16),
            NiftiType::Int16 => write_as!(i16),
            NiftiType::Uint32 => write_as!(u32),
            NiftiType::Int32 => write_as!(i32),
            NiftiType::Uint64 => write_as!(u64),
            NiftiType::Int64 => write_as!(i64),
            NiftiType::Float64 => write_as!(f64),
            _ => write_as!(f32),
        };
        result.context(WriteSnafu { path })
    }

    /// 以 `f32` 像素类型保存到 `path`, 忽略原始像素类型.
    pub fn save_f32<P: AsRef<Path>>(&self, path: P) -> DataResult<()> {
        let path = path.as_ref();
        let header = header_for_write(&self.header, self.data.dim());
        WriterOptions::new(path)
            .reference_header(&header)
            .write_nifti(&self.data.view().permuted_axes([2, 1, 0]))
            .context(WriteSnafu { path })
    }

    /// 逐体素乘以 `map`. 两者必须处于同一网格.
    pub fn multiply(&self, map: &MriVolume) -> DataResult<MriVolume> {
        self.ensure_same_grid(map)?;
        let mut out = self.clone();
        Zip::from(&mut out.data)
            .and(&map.data)
            .for_each(|v, &m| *v *= m);
        Ok(out)
    }

    /// 获得数据的一份不可变 shallow copy.
    #[inline]
    pub fn data(&self) -> ArrayView<'_, f32, Ix3> {
        self.data.view()
    }

    /// 获得数据的一份可变 shallow copy.
    #[inline]
    pub fn data_mut(&mut self) -> ArrayViewMut<'_, f32, Ix3> {
        self.data.view_mut()
    }

}

/// nii 格式 3D 病灶标签. 标签值以 `u8` 保存, 非零即病灶.
#[derive(Debug, Clone)]
pub struct LesionMask {
    header: BoxedHeader,
    data: Array3<u8>,
}

impl NiftiHeaderAttr for LesionMask {
    #[inline]
    fn header(&self) -> &NiftiHeader {
        &self.header
    }
}

impl Index<Idx3d> for LesionMask {
    type Output = u8;

    #[inline]
    fn index(&self, index: Idx3d) -> &Self::Output {
        &self.data[index]
    }
}

impl IndexMut<Idx3d> for LesionMask {
    #[inline]
    fn index_mut(&mut self, index: Idx3d) -> &mut Self::Output {
        &mut self.data[index]
    }
}

impl LesionMask {
    /// 打开 nii 文件格式的 3D 病灶标签. 任意像素类型都会被转换为 `u8`.
    pub fn open<P: AsRef<Path>>(path: P) -> DataResult<Self> {
        let (header, data) = read_volume::<u8>(path.as_ref())?;
        Ok(Self { header, data })
    }

    /// 在 `grid` 的网格上创建一个全背景掩膜.
    pub fn zeros_like<G: NiftiHeaderAttr + ?Sized>(grid: &G) -> Self {
        let mut header = Box::new(grid.header().clone());
        header.datatype = NiftiType::Uint8 as i16;
        header.bitpix = 8;
        Self {
            header,
            data: Array3::zeros(grid.shape()),
        }
    }

    /// 以 `grid` 的 header 为模板创建掩膜. 形状不一致时返回 `Err`.
    pub fn from_parts<G: NiftiHeaderAttr + ?Sized>(grid: &G, data: Array3<u8>) -> DataResult<Self> {
        let mut mask = Self::zeros_like(grid);
        ensure!(
            data.dim() == mask.data.dim(),
            GridMismatchSnafu {
                left: data.dim(),
                right: grid.shape()
            }
        );
        mask.data = data;
        Ok(mask)
    }

    /// 从裸数据直接创建掩膜. 体素分辨率 `pix_dim` 按 `[z, h, w]` 给出 (毫米).
    pub fn synthetic(data: Array3<u8>, pix_dim: [f32; 3]) -> Self {
        let grid = MriVolume::synthetic(Array3::zeros(data.dim()), pix_dim);
        let mut mask = Self::zeros_like(&grid);
        mask.data = data;
        mask
    }

    /// 以 `u8` 像素类型保存到 `path`.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> DataResult<()> {
        let path = path.as_ref();
        let header = header_for_write(&self.header, self.data.dim());
        WriterOptions::new(path)
            .reference_header(&header)
            .write_nifti(&self.data.view().permuted_axes([2, 1, 0]))
            .context(WriteSnafu { path })
    }

    /// 获得数据的一份不可变 shallow copy.
    #[inline]
    pub fn data(&self) -> ArrayView<'_, u8, Ix3> {
        self.data.view()
    }

    /// 获得数据的一份可变 shallow copy.
    #[inline]
    pub fn data_mut(&mut self) -> ArrayViewMut<'_, u8, Ix3> {
        self.data.view_mut()
    }

    /// 病灶体素个数.
    #[inline]
    pub fn count_foreground(&self) -> usize {
        self.data.iter().filter(|p| is_lesion(**p)).count()
    }

    /// 掩膜是否不含任何病灶?
    #[inline]
    pub fn is_empty(&self) -> bool {
        !self.data.iter().any(|p| is_lesion(*p))
    }

    /// 病灶实际体积, 以立方毫米为单位.
    #[inline]
    pub fn volume_mm3(&self) -> f64 {
        self.count_foreground() as f64 * self.voxel()
    }

    /// 病灶实际体积, 以毫升为单位.
    #[inline]
    pub fn volume_ml(&self) -> f64 {
        self.volume_mm3() / crate::consts::MM3_PER_ML
    }

    /// 收集所有病灶体素对应的下标, 结果按行优先存储.
    pub fn foreground_pos(&self) -> Vec<Idx3d> {
        self.data
            .indexed_iter()
            .filter_map(|(pos, p)| is_lesion(*p).then_some(pos))
            .collect()
    }

    /// 将所有病灶体素统一设为 [`label::LESION`].
    pub fn binarize(&mut self) {
        self.data
            .mapv_inplace(|p| if is_lesion(p) { label::LESION } else { label::BACKGROUND });
    }

    /// 将不在 `other` 前景中的病灶体素置为背景. 返回被清除的体素个数.
    pub fn intersect(&mut self, other: &LesionMask) -> DataResult<usize> {
        self.ensure_same_grid(other)?;
        let mut removed = 0usize;
        Zip::from(&mut self.data).and(&other.data).for_each(|p, &o| {
            if is_lesion(*p) && !is_lesion(o) {
                *p = label::BACKGROUND;
                removed += 1;
            }
        });
        Ok(removed)
    }
}
