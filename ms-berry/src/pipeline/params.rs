//! 完整流程的参数, 可从 JSON 配置文件读取.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use snafu::ensure;

use super::error::{InvalidParamsSnafu, PipelineResult};
use crate::consts::{
    DEFAULT_BALANCE_HI, DEFAULT_CUT_FACTOR, DEFAULT_FOLLOW_UPS, DEFAULT_HOMOGENEITY,
    DEFAULT_LESION_LOAD, DEFAULT_VARIABILITY,
};
use crate::sim::deform::DeformParams;
use crate::sim::longitudinal::LongitudinalParams;
use crate::sim::mask::MaskStrategy;
use crate::sim::{ContrastProfile, Modality};

const LESION_LOAD_RANGE: RangeInclusive<f64> = 5.0..=50.0;
const FOLLOW_UPS_RANGE: RangeInclusive<u32> = 2..=6;
const BALANCE_RANGE: RangeInclusive<f64> = 1.0..=100.0;
const CUT_FACTOR_RANGE: RangeInclusive<f64> = 0.1..=5.0;
const SAMPLING_RANGE: RangeInclusive<f64> = 0.0001..=1.0;

/// 非线性配准的默认采样率.
pub const DEFAULT_SAMPLING_PERCENTAGE: f64 = 0.05;

/// BSpline 控制点网格, 形如 `"5,5,5"`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(try_from = "String", into = "String")
)]
pub struct BsplineGrid(pub [u32; 3]);

impl Default for BsplineGrid {
    fn default() -> Self {
        Self([5, 5, 5])
    }
}

impl fmt::Display for BsplineGrid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c] = self.0;
        write!(f, "{a},{b},{c}")
    }
}

impl FromStr for BsplineGrid {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts = s
            .split(',')
            .map(|p| p.trim().parse::<u32>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| format!("bad grid {s:?}: {e}"))?;
        match parts[..] {
            [a, b, c] if a > 0 && b > 0 && c > 0 => Ok(Self([a, b, c])),
            _ => Err(format!("grid {s:?} must be three positive integers")),
        }
    }
}

impl TryFrom<String> for BsplineGrid {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<BsplineGrid> for String {
    fn from(g: BsplineGrid) -> Self {
        g.to_string()
    }
}

/// 配准初始化方式.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum InitMode {
    /// 头部中心对齐.
    #[default]
    #[cfg_attr(feature = "serde", serde(rename = "useCenterOfHeadAlign"))]
    CenterOfHead,
    /// 不初始化.
    #[cfg_attr(feature = "serde", serde(rename = "Off"))]
    Off,
    /// 矩对齐.
    #[cfg_attr(feature = "serde", serde(rename = "useMomentsAlign"))]
    Moments,
    /// 几何中心对齐.
    #[cfg_attr(feature = "serde", serde(rename = "useGeometryAlign"))]
    Geometry,
}

impl InitMode {
    /// 全部取值.
    pub const ALL: [InitMode; 4] = [
        InitMode::CenterOfHead,
        InitMode::Off,
        InitMode::Moments,
        InitMode::Geometry,
    ];

    /// 外部配准工具使用的名称.
    pub const fn as_str(&self) -> &'static str {
        match self {
            InitMode::CenterOfHead => "useCenterOfHeadAlign",
            InitMode::Off => "Off",
            InitMode::Moments => "useMomentsAlign",
            InitMode::Geometry => "useGeometryAlign",
        }
    }
}

impl fmt::Display for InitMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InitMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| format!("unknown init mode {s:?}"))
    }
}

/// 病灶图精化方式.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum Refinement {
    /// 按病灶内强度统计过滤.
    #[default]
    IntensityFilter,
    /// 外部工具链分割白质, 病灶限制在白质内.
    WhiteMatter,
}

impl fmt::Display for Refinement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Refinement::IntensityFilter => "intensity-filter",
            Refinement::WhiteMatter => "white-matter",
        })
    }
}

impl FromStr for Refinement {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "intensity-filter" => Ok(Refinement::IntensityFilter),
            "white-matter" => Ok(Refinement::WhiteMatter),
            _ => Err(format!("unknown refinement {s:?}")),
        }
    }
}

/// 完整模拟流程参数.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default, deny_unknown_fields))]
pub struct SimulationParams {
    /// T1 输入.
    pub t1: Option<PathBuf>,
    /// T2 输入.
    pub t2: Option<PathBuf>,
    /// T2-FLAIR 输入.
    pub t2_flair: Option<PathBuf>,
    /// PD 输入.
    pub pd: Option<PathBuf>,
    /// DTI-FA 输入.
    pub dti_fa: Option<PathBuf>,
    /// DTI-ADC 输入.
    pub dti_adc: Option<PathBuf>,

    /// 输出目录.
    pub output_dir: PathBuf,
    /// 将结果重采样回各模态的原始空间.
    pub return_original_space: bool,
    /// 输入已去颅骨, 使用去颅骨模板.
    pub brain_extracted: bool,
    /// 目标病灶负荷 (ml).
    pub lesion_load: f64,

    /// 生成纵向随访而不是单次检查.
    pub longitudinal: bool,
    /// 随访次数.
    pub follow_ups: u32,
    /// 对比度持续变化的病灶占比 (百分比).
    pub balance_hi: f64,
    /// 随访输出目录, 缺省时使用 `output_dir`.
    pub follow_up_dir: Option<PathBuf>,

    /// 强度过滤的标准差倍数.
    pub cut_factor: f64,
    /// 非线性配准采样率.
    pub sampling_percentage: f64,
    /// BSpline 控制点网格.
    pub bspline_grid: BsplineGrid,
    /// 配准初始化方式.
    pub init_mode: InitMode,
    /// 病灶图精化方式.
    pub refinement: Refinement,

    /// 噪声图平滑 sigma (毫米).
    pub homogeneity: f64,
    /// 随访波动系数.
    pub variability: f64,
    /// 按模态覆盖的边界平滑 sigma (毫米).
    pub sigma: BTreeMap<Modality, f64>,
    /// 按模态覆盖的病灶对比度.
    pub contrast: BTreeMap<Modality, ContrastProfile>,
    /// 病灶抽样策略.
    pub mask_strategy: MaskStrategy,
    /// 随机种子. 缺省时从系统熵初始化.
    pub seed: Option<u64>,
    /// 保留中间文件 (工作目录).
    pub keep_intermediates: bool,
}

impl Default for SimulationParams {
    fn default() -> Self {
        Self {
            t1: None,
            t2: None,
            t2_flair: None,
            pd: None,
            dti_fa: None,
            dti_adc: None,
            output_dir: PathBuf::from("."),
            return_original_space: false,
            brain_extracted: false,
            lesion_load: DEFAULT_LESION_LOAD,
            longitudinal: false,
            follow_ups: DEFAULT_FOLLOW_UPS,
            balance_hi: DEFAULT_BALANCE_HI,
            follow_up_dir: None,
            cut_factor: DEFAULT_CUT_FACTOR,
            sampling_percentage: DEFAULT_SAMPLING_PERCENTAGE,
            bspline_grid: BsplineGrid::default(),
            init_mode: InitMode::default(),
            refinement: Refinement::default(),
            homogeneity: DEFAULT_HOMOGENEITY,
            variability: DEFAULT_VARIABILITY,
            sigma: BTreeMap::new(),
            contrast: BTreeMap::new(),
            mask_strategy: MaskStrategy::default(),
            seed: None,
            keep_intermediates: false,
        }
    }
}

impl SimulationParams {
    /// 读取 JSON 配置文件. 缺失的字段取默认值.
    #[cfg(feature = "serde")]
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> PipelineResult<Self> {
        use super::error::{ParseConfigSnafu, ReadConfigSnafu};
        use snafu::ResultExt;

        let path = path.as_ref();
        let text = std::fs::read_to_string(path).context(ReadConfigSnafu { path })?;
        serde_json::from_str(&text).context(ParseConfigSnafu { path })
    }

    /// `modality` 的输入路径.
    pub fn input(&self, modality: Modality) -> Option<&Path> {
        match modality {
            Modality::T1 => self.t1.as_deref(),
            Modality::T2 => self.t2.as_deref(),
            Modality::T2Flair => self.t2_flair.as_deref(),
            Modality::Pd => self.pd.as_deref(),
            Modality::DtiFa => self.dti_fa.as_deref(),
            Modality::DtiAdc => self.dti_adc.as_deref(),
        }
    }

    /// 设置 `modality` 的输入路径.
    pub fn set_input(&mut self, modality: Modality, path: Option<PathBuf>) {
        let slot = match modality {
            Modality::T1 => &mut self.t1,
            Modality::T2 => &mut self.t2,
            Modality::T2Flair => &mut self.t2_flair,
            Modality::Pd => &mut self.pd,
            Modality::DtiFa => &mut self.dti_fa,
            Modality::DtiAdc => &mut self.dti_adc,
        };
        *slot = path;
    }

    /// 全部已提供的输入, 按 [`Modality::ALL`] 的顺序.
    pub fn inputs(&self) -> Vec<(Modality, &Path)> {
        Modality::ALL
            .into_iter()
            .filter_map(|m| self.input(m).map(|p| (m, p)))
            .collect()
    }

    /// 参考空间: 第一个可作为参考的输入.
    pub fn reference(&self) -> Option<(Modality, &Path)> {
        self.inputs().into_iter().find(|(m, _)| m.can_be_reference())
    }

    /// 随访输出目录.
    pub fn follow_up_dir(&self) -> &Path {
        self.follow_up_dir.as_deref().unwrap_or(&self.output_dir)
    }

    /// `modality` 的强度形变参数, 应用按模态的覆盖值.
    pub fn deform_params(&self, modality: Modality) -> DeformParams {
        let mut p = DeformParams::for_modality(modality);
        p.homogeneity = self.homogeneity;
        if let Some(s) = self.sigma.get(&modality) {
            p.sigma = *s;
        }
        if let Some(c) = self.contrast.get(&modality) {
            p.contrast = *c;
        }
        p
    }

    /// `modality` 的纵向随访参数.
    pub fn longitudinal_params(&self, modality: Modality) -> LongitudinalParams {
        LongitudinalParams {
            modality,
            deform: self.deform_params(modality),
            variability: self.variability,
            follow_ups: self.follow_ups,
            balance: self.balance_hi,
        }
    }

    /// 检查参数范围与输入文件.
    pub fn validate(&self) -> PipelineResult<()> {
        check_range("lesion_load", self.lesion_load, &LESION_LOAD_RANGE)?;
        ensure!(
            FOLLOW_UPS_RANGE.contains(&self.follow_ups),
            InvalidParamsSnafu {
                name: "follow_ups",
                reason: format!("{} not in {FOLLOW_UPS_RANGE:?}", self.follow_ups),
            }
        );
        check_range("balance_hi", self.balance_hi, &BALANCE_RANGE)?;
        check_range("cut_factor", self.cut_factor, &CUT_FACTOR_RANGE)?;
        check_range("sampling_percentage", self.sampling_percentage, &SAMPLING_RANGE)?;
        check_non_negative("homogeneity", self.homogeneity)?;
        check_non_negative("variability", self.variability)?;
        for v in self.sigma.values() {
            check_non_negative("sigma", *v)?;
        }
        for (m, c) in &self.contrast {
            ensure!(
                c.is_valid(),
                InvalidParamsSnafu {
                    name: "contrast",
                    reason: format!("{m}: mean {} std {}", c.mean, c.std),
                }
            );
        }
        for (m, p) in self.inputs() {
            ensure!(
                p.is_file(),
                InvalidParamsSnafu {
                    name: "inputs",
                    reason: format!("{m} input {} is not a file", p.display()),
                }
            );
        }
        Ok(())
    }
}

fn check_range(name: &'static str, v: f64, range: &RangeInclusive<f64>) -> PipelineResult<()> {
    ensure!(
        range.contains(&v),
        InvalidParamsSnafu {
            name,
            reason: format!("{v} not in {range:?}"),
        }
    );
    Ok(())
}

fn check_non_negative(name: &'static str, v: f64) -> PipelineResult<()> {
    ensure!(
        v.is_finite() && v >= 0.0,
        InvalidParamsSnafu {
            name,
            reason: format!("{v} must be finite and non-negative"),
        }
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::PipelineError;

    #[test]
    fn test_defaults_are_valid() {
        let p = SimulationParams::default();
        p.validate().unwrap();
        assert_eq!(p.bspline_grid.to_string(), "5,5,5");
        assert_eq!(p.init_mode.as_str(), "useCenterOfHeadAlign");
        assert_eq!(p.follow_up_dir(), Path::new("."));
        assert!(p.reference().is_none());
    }

    #[test]
    fn test_grid_parse() {
        assert_eq!("3, 4,5".parse::<BsplineGrid>().unwrap(), BsplineGrid([3, 4, 5]));
        assert!("5,5".parse::<BsplineGrid>().is_err());
        assert!("5,0,5".parse::<BsplineGrid>().is_err());
        assert!("a,b,c".parse::<BsplineGrid>().is_err());
    }

    #[test]
    fn test_reference_order() {
        let mut p = SimulationParams::default();
        p.set_input(Modality::DtiFa, Some("fa.nii.gz".into()));
        assert!(p.reference().is_none());
        p.set_input(Modality::Pd, Some("pd.nii.gz".into()));
        p.set_input(Modality::T2, Some("t2.nii.gz".into()));
        assert_eq!(p.reference().map(|r| r.0), Some(Modality::T2));
        let order: Vec<_> = p.inputs().into_iter().map(|(m, _)| m).collect();
        assert_eq!(order, vec![Modality::T2, Modality::Pd, Modality::DtiFa]);
    }

    #[test]
    fn test_out_of_range() {
        let check = |f: fn(&mut SimulationParams), field: &str| {
            let mut p = SimulationParams::default();
            f(&mut p);
            match p.validate() {
                Err(PipelineError::InvalidParams { name, .. }) => assert_eq!(name, field),
                other => panic!("expected error for {field}, got {other:?}"),
            }
        };
        check(|p| p.lesion_load = 60.0, "lesion_load");
        check(|p| p.follow_ups = 1, "follow_ups");
        check(|p| p.balance_hi = 0.0, "balance_hi");
        check(|p| p.cut_factor = 0.0, "cut_factor");
        check(|p| p.sampling_percentage = 2.0, "sampling_percentage");
        check(|p| p.homogeneity = -1.0, "homogeneity");
        check(|p| {
            p.contrast.insert(Modality::T1, ContrastProfile::new(0.7, -1.0));
        }, "contrast");
        check(|p| p.t1 = Some("/definitely/missing.nii.gz".into()), "inputs");
    }

    #[test]
    fn test_overrides() {
        let mut p = SimulationParams::default();
        p.homogeneity = 1.0;
        p.sigma.insert(Modality::T1, 2.0);
        p.contrast.insert(Modality::T1, ContrastProfile::new(0.5, 0.1));
        let d = p.deform_params(Modality::T1);
        assert_eq!(d.sigma, 2.0);
        assert_eq!(d.homogeneity, 1.0);
        assert_eq!(d.contrast, ContrastProfile::new(0.5, 0.1));
        let d = p.deform_params(Modality::T2);
        assert_eq!(d.sigma, Modality::T2.default_sigma());

        let l = p.longitudinal_params(Modality::T2);
        assert_eq!(l.follow_ups, p.follow_ups);
        assert_eq!(l.balance, p.balance_hi);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_json_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sim.json");
        std::fs::write(
            &path,
            r#"{
                "t2_flair": "flair.nii.gz",
                "lesion_load": 20,
                "bspline_grid": "4,4,4",
                "init_mode": "useMomentsAlign",
                "refinement": "white-matter",
                "mask_strategy": "uniform",
                "sigma": { "T2-FLAIR": 1.0 },
                "contrast": { "T1": { "mean": 0.6, "std": 0.1 } },
                "seed": 7
            }"#,
        )
        .unwrap();
        let p = SimulationParams::from_json_file(&path).unwrap();
        assert_eq!(p.t2_flair.as_deref(), Some(Path::new("flair.nii.gz")));
        assert_eq!(p.lesion_load, 20.0);
        assert_eq!(p.bspline_grid, BsplineGrid([4, 4, 4]));
        assert_eq!(p.init_mode, InitMode::Moments);
        assert_eq!(p.refinement, Refinement::WhiteMatter);
        assert_eq!(p.mask_strategy, MaskStrategy::Uniform);
        assert_eq!(p.sigma.get(&Modality::T2Flair), Some(&1.0));
        assert_eq!(p.seed, Some(7));
        assert_eq!(p.follow_ups, DEFAULT_FOLLOW_UPS);

        std::fs::write(&path, r#"{ "bspline_grid": "1,2" }"#).unwrap();
        assert!(matches!(
            SimulationParams::from_json_file(&path),
            Err(PipelineError::ParseConfig { .. })
        ));
    }
}
