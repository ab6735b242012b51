//! 通用常量.

/// 掩膜标签值.
pub mod label {
    /// 背景体素值.
    pub const BACKGROUND: u8 = 0;

    /// 病灶体素值. 过滤后的掩膜只包含该值.
    pub const LESION: u8 = 1;

    /// 体素是否是病灶? 任意非零值均视为病灶.
    #[inline]
    pub const fn is_lesion(p: u8) -> bool {
        p != BACKGROUND
    }

    /// 体素是否是背景?
    #[inline]
    pub const fn is_background(p: u8) -> bool {
        p == BACKGROUND
    }
}

/// 病灶数据库目录布局.
pub mod database {
    /// 含颅骨的 MNI152 模板文件名.
    pub const MNI152_T1: &str = "MNI152_T1_1mm.nii.gz";

    /// 去颅骨 (brain extracted) 的 MNI152 模板文件名.
    pub const MNI152_T1_BRAIN: &str = "MNI152_T1_1mm_brain.nii.gz";

    /// 病灶概率先验图文件名 (旧版流程使用).
    pub const LESION_PRIOR: &str = "USP-ICBM-MSpriors-46-1mm.nii.gz";

    /// 病灶标签库子目录名.
    pub const LABELS_DIR: &str = "labels-database";

    /// `{用户主目录}/dataset` 下的默认数据库目录名.
    pub const DEFAULT_DIR_NAME: &str = "MSlesion_database";
}

/// 病灶负荷单位换算: 1 ml = 1000 mm³.
pub const MM3_PER_ML: f64 = 1000.0;

/// 纵向模拟中, 对比度随时间变化的分母. `f(t) = (1 - c) / 6 * t`.
pub const LONGITUDINAL_SLOPE_DIVISOR: f64 = 6.0;

/// 默认病灶均匀度 (噪声图平滑 sigma, 毫米).
pub const DEFAULT_HOMOGENEITY: f64 = 0.5;

/// 默认纵向随访强度波动系数.
pub const DEFAULT_VARIABILITY: f64 = 0.5;

/// 默认白质阈值 (过滤掩膜的标准差倍数).
pub const DEFAULT_CUT_FACTOR: f64 = 1.5;

/// 默认目标病灶负荷 (ml).
pub const DEFAULT_LESION_LOAD: f64 = 10.0;

/// 默认随访次数.
pub const DEFAULT_FOLLOW_UPS: u32 = 2;

/// 默认 "变化对比度" 病灶占比 (百分比).
pub const DEFAULT_BALANCE_HI: f64 = 56.0;
