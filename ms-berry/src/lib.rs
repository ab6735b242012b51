#![warn(missing_docs)] // <= 合适时移除它.
// #![warn(clippy::missing_docs_in_private_items)]  // <= too strict.

//! 核心库. 在真实的 MRI 扫描 (NIfTI) 上模拟多发性硬化 (MS) 白质病灶.
//!
//! 该 crate 目前仅提供 `safe` 接口.
//!
//! # 注意
//!
//! 1. 三维数据统一按 `(z, h, w)` 索引, 读写 nii 文件时自动转换轴顺序.
//! 2. 配准, 重采样, 偏置场校正等算法不在本 crate 内实现, 由 [`pipeline::tools`]
//!   调用外部命令行工具完成.
//! 3. 所有随机过程都接受调用方提供的 `Rng`, 固定种子即可复现结果.
//!
//! # 开发计划
//!
//! ### 扫描与病灶掩膜的数据结构 ✅
//!
//! 任意像素类型的扫描统一以 `f32` 处理, 保存时转换回原始类型.
//!
//! 实现位于 `ms-berry/src/data`.
//!
//! ### 病灶数据库与 MNI152 模板 ✅
//!
//! 按体积分组的病灶标签库, 支持从目录或内存读取.
//!
//! 实现位于 `ms-berry/src/dataset`.
//!
//! ### 病灶掩膜生成 ✅
//!
//! 从数据库中随机抽取病灶拼成目标负荷 (ml) 的掩膜, 不超过目标负荷.
//! 提供从大到小抽取与旧版均匀抽取两种策略.
//!
//! 实现位于 `ms-berry/src/sim/mask.rs`.
//!
//! ### 掩膜精化 ✅
//!
//! 1. 按病灶内强度均值与标准差过滤. ✅
//! 2. 与白质分割结果取交集. ✅
//!
//! 实现位于 `ms-berry/src/sim/refine.rs`.
//!
//! ### 强度形变与纵向随访 ✅
//!
//! 病灶内生成平滑的乘性对比度图. 纵向随访中一部分病灶的对比度持续变化,
//! 其余病灶随机波动.
//!
//! 实现位于 `ms-berry/src/sim/deform.rs` 与 `ms-berry/src/sim/longitudinal.rs`.
//!
//! ### 旧版概率病灶雕刻 ✅
//!
//! 实现位于 `ms-berry/src/sim/carve.rs`.
//!
//! ### 完整流程 ✅
//!
//! 多模态对齐, 模板配准, 病灶图生成, 精化与模拟, 结果可选回到原始空间.
//!
//! 实现位于 `ms-berry/src/pipeline`.
//!
//! ### 外部工具的并行调度 ⌛️
//!
//! 多个模态的对齐步骤互不依赖, 可以并行执行.

/// 三维索引, 按 `(z, h, w)` 排列.
pub type Idx3d = (usize, usize, usize);

/// 3D MRI nii 文件基础数据结构.
pub mod data;

pub use data::{LesionMask, MriVolume, NiftiHeaderAttr};

pub mod consts;

pub mod filter;

pub mod dataset;

pub mod sim;

pub mod pipeline;

pub mod prelude;
