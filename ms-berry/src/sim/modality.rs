//! MRI 模态及其病灶对比度参数.

use std::fmt;
use std::str::FromStr;

use snafu::Snafu;

/// 支持的 MRI 模态.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Modality {
    /// T1 加权.
    #[cfg_attr(feature = "serde", serde(rename = "T1"))]
    T1,
    /// T2 加权.
    #[cfg_attr(feature = "serde", serde(rename = "T2"))]
    T2,
    /// T2-FLAIR.
    #[cfg_attr(feature = "serde", serde(rename = "T2-FLAIR"))]
    T2Flair,
    /// 质子密度加权.
    #[cfg_attr(feature = "serde", serde(rename = "PD"))]
    Pd,
    /// DTI 各向异性分数图.
    #[cfg_attr(feature = "serde", serde(rename = "DTI-FA"))]
    DtiFa,
    /// DTI 表观扩散系数图.
    #[cfg_attr(feature = "serde", serde(rename = "DTI-ADC"))]
    DtiAdc,
}

/// 无法识别的模态名.
#[derive(Debug, Snafu)]
#[snafu(display("unknown modality {name:?}, expected one of T1, T2, T2-FLAIR, PD, DTI-FA, DTI-ADC"))]
pub struct ParseModalityError {
    name: String,
}

impl Modality {
    /// 全部模态, 按参考空间优先级排列.
    pub const ALL: [Modality; 6] = [
        Modality::T1,
        Modality::T2,
        Modality::T2Flair,
        Modality::Pd,
        Modality::DtiFa,
        Modality::DtiAdc,
    ];

    /// 模态的标准名称, 也用于纵向随访文件名.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Modality::T1 => "T1",
            Modality::T2 => "T2",
            Modality::T2Flair => "T2-FLAIR",
            Modality::Pd => "PD",
            Modality::DtiFa => "DTI-FA",
            Modality::DtiAdc => "DTI-ADC",
        }
    }

    /// 输出文件名中使用的短标签.
    pub const fn file_tag(&self) -> &'static str {
        match self {
            Modality::T1 => "T1",
            Modality::T2 => "T2",
            Modality::T2Flair => "T2FLAIR",
            Modality::Pd => "PD",
            Modality::DtiFa => "FA",
            Modality::DtiAdc => "ADC",
        }
    }

    /// 病灶在该模态下是否呈低信号 (对比度 < 1)?
    #[inline]
    pub const fn is_hypo(&self) -> bool {
        matches!(self, Modality::T1 | Modality::DtiFa)
    }

    /// 该模态能否作为参考空间? DTI 参数图不能.
    #[inline]
    pub const fn can_be_reference(&self) -> bool {
        !matches!(self, Modality::DtiFa | Modality::DtiAdc)
    }

    /// 默认病灶对比度.
    pub const fn default_contrast(&self) -> ContrastProfile {
        match self {
            Modality::T1 => ContrastProfile::new(0.70, 0.10),
            Modality::T2 => ContrastProfile::new(1.60, 0.15),
            Modality::T2Flair => ContrastProfile::new(1.55, 0.15),
            Modality::Pd => ContrastProfile::new(1.40, 0.12),
            Modality::DtiFa => ContrastProfile::new(0.60, 0.10),
            Modality::DtiAdc => ContrastProfile::new(1.30, 0.12),
        }
    }

    /// 默认病灶边界平滑 sigma (毫米).
    pub const fn default_sigma(&self) -> f64 {
        match self {
            Modality::DtiFa => 1.5,
            Modality::DtiAdc => 1.3,
            _ => 0.75,
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Modality {
    type Err = ParseModalityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Modality::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| ParseModalityError { name: s.to_string() })
    }
}

/// 病灶强度的乘性对比度分布 `N(mean, std²)`.
#[derive(Debug, Copy, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ContrastProfile {
    /// 均值. 低信号模态小于 1, 高信号模态大于 1.
    pub mean: f64,
    /// 标准差.
    pub std: f64,
}

impl ContrastProfile {
    /// 构建对比度分布.
    pub const fn new(mean: f64, std: f64) -> Self {
        Self { mean, std }
    }

    /// 参数是否可用于采样? 要求均值有限, 标准差有限且非负.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.mean.is_finite() && self.std.is_finite() && self.std >= 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        for m in Modality::ALL {
            assert_eq!(m.to_string().parse::<Modality>().unwrap(), m);
        }
        assert_eq!("T2-FLAIR".parse::<Modality>().unwrap(), Modality::T2Flair);
        assert!("FLAIR".parse::<Modality>().is_err());
        assert_eq!(Modality::T2Flair.file_tag(), "T2FLAIR");
        assert_eq!(Modality::DtiAdc.file_tag(), "ADC");
    }

    #[test]
    fn test_polarity_matches_default_contrast() {
        for m in Modality::ALL {
            let c = m.default_contrast();
            assert!(c.is_valid());
            assert_eq!(m.is_hypo(), c.mean < 1.0, "{m}");
        }
        assert!(!Modality::DtiFa.can_be_reference());
        assert!(Modality::Pd.can_be_reference());
        assert_eq!(Modality::DtiFa.default_sigma(), 1.5);
        assert_eq!(Modality::T2Flair.default_sigma(), 0.75);
    }
}
