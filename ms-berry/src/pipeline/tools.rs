//! 外部命令行工具: 配准, 重采样, 去噪, 偏置场校正, 组织分类与标签平滑.
//!
//! 这些算法不在本 crate 内实现, 而是通过 [`ToolRunner`] 调用外部可执行文件.

use std::collections::HashMap;
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;

use snafu::{ensure, OptionExt, ResultExt, Snafu};

/// 仅保留 stderr 的最后若干行.
const STDERR_TAIL_LINES: usize = 20;

/// 外部工具种类.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Tool {
    /// 刚性 / 仿射 / BSpline 配准.
    Registration,
    /// 按变换重采样.
    Resample,
    /// 各向异性扩散去噪.
    NoiseFilter,
    /// N4 偏置场校正.
    BiasCorrection,
    /// 脑组织分类 (白质).
    TissueClassifier,
    /// 标签图平滑.
    LabelSmoothing,
}

impl Tool {
    /// 全部工具.
    pub const ALL: [Tool; 6] = [
        Tool::Registration,
        Tool::Resample,
        Tool::NoiseFilter,
        Tool::BiasCorrection,
        Tool::TissueClassifier,
        Tool::LabelSmoothing,
    ];

    /// 默认可执行文件名.
    pub const fn default_name(&self) -> &'static str {
        match self {
            Tool::Registration => "BRAINSFit",
            Tool::Resample => "BRAINSResample",
            Tool::NoiseFilter => "AADImageFilter",
            Tool::BiasCorrection => "N4ITKBiasFieldCorrection",
            Tool::TissueClassifier => "BasicBrainTissues",
            Tool::LabelSmoothing => "LabelMapSmoothing",
        }
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.default_name())
    }
}

/// 外部工具调用错误.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ToolError {
    /// 找不到可执行文件.
    #[snafu(display("executable for {tool} not found (looked for {name:?})"))]
    NotFound { tool: Tool, name: String },

    /// 无法启动进程.
    #[snafu(display("could not start {}", path.display()))]
    Spawn {
        path: PathBuf,
        source: std::io::Error,
    },

    /// 进程以非零状态退出.
    #[snafu(display("{tool} failed with status {code:?}: {stderr}"))]
    Failed {
        tool: Tool,
        code: Option<i32>,
        stderr: String,
    },

    /// 进程成功退出, 但没有产生预期的输出文件.
    #[snafu(display("{tool} did not produce {}", path.display()))]
    MissingOutput { tool: Tool, path: PathBuf },
}

/// 命令行参数值.
#[derive(Debug, Clone, PartialEq)]
pub enum CliValue {
    /// 字符串.
    Str(String),
    /// 整数.
    Int(i64),
    /// 浮点数.
    Float(f64),
    /// 布尔开关. 为真时只输出 `--key`, 为假时省略.
    Flag(bool),
    /// 文件路径.
    Path(PathBuf),
}

impl CliValue {
    /// 以路径形式读取.
    pub fn as_path(&self) -> Option<&Path> {
        match self {
            CliValue::Path(p) => Some(p),
            _ => None,
        }
    }

    /// 以字符串形式读取.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            CliValue::Str(s) => Some(s),
            _ => None,
        }
    }
}

macro_rules! impl_cli_value_from {
    ($variant: ident, $conv: expr, $($t: ty),+) => {
        $(
            impl From<$t> for CliValue {
                #[inline]
                fn from(v: $t) -> Self {
                    CliValue::$variant($conv(v))
                }
            }
        )+
    };
}

impl_cli_value_from!(Str, String::from, &str, String);
impl_cli_value_from!(Int, i64::from, i32, u32, u16);
impl_cli_value_from!(Float, f64::from, f32, f64);
impl_cli_value_from!(Flag, bool::from, bool);
impl_cli_value_from!(Path, PathBuf::from, &Path, PathBuf);

/// 有序的命令行参数表, 渲染为 `--key value`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CliParams {
    entries: Vec<(String, CliValue)>,
}

impl CliParams {
    /// 创建空参数表.
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置参数. 已存在的键会被覆盖, 保持原有顺序.
    pub fn set<K: Into<String>, V: Into<CliValue>>(&mut self, key: K, value: V) -> &mut Self {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
        self
    }

    /// 链式设置参数.
    pub fn with<K: Into<String>, V: Into<CliValue>>(mut self, key: K, value: V) -> Self {
        self.set(key, value);
        self
    }

    /// 读取参数.
    pub fn get(&self, key: &str) -> Option<&CliValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// 读取路径参数.
    pub fn path(&self, key: &str) -> Option<&Path> {
        self.get(key).and_then(CliValue::as_path)
    }

    /// 全部参数, 按插入顺序.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &CliValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// 渲染为命令行参数列表.
    pub fn to_args(&self) -> Vec<OsString> {
        let mut ans = Vec::with_capacity(self.entries.len() * 2);
        for (k, v) in &self.entries {
            let flag = OsString::from(format!("--{k}"));
            match v {
                CliValue::Flag(false) => {}
                CliValue::Flag(true) => ans.push(flag),
                CliValue::Str(s) => ans.extend([flag, s.into()]),
                CliValue::Int(i) => ans.extend([flag, i.to_string().into()]),
                CliValue::Float(f) => ans.extend([flag, f.to_string().into()]),
                CliValue::Path(p) => ans.extend([flag, p.as_os_str().to_owned()]),
            }
        }
        ans
    }
}

/// 执行外部工具的接口.
pub trait ToolRunner {
    /// 同步执行 `tool`, 直到其退出.
    fn run(&self, tool: Tool, params: &CliParams) -> Result<(), ToolError>;
}

/// 外部工具的查找配置.
#[derive(Debug, Clone, Default)]
pub struct ToolConfig {
    /// 可执行文件目录. 为 `None` 时在 `PATH` 中查找.
    pub bin_dir: Option<PathBuf>,
    /// 覆盖默认可执行文件名.
    pub names: HashMap<Tool, String>,
}

impl ToolConfig {
    /// 以 `bin_dir` 为工具目录.
    pub fn new(bin_dir: Option<PathBuf>) -> Self {
        Self {
            bin_dir,
            names: HashMap::new(),
        }
    }

    /// `tool` 的可执行文件名.
    pub fn name(&self, tool: Tool) -> &str {
        self.names
            .get(&tool)
            .map(String::as_str)
            .unwrap_or_else(|| tool.default_name())
    }

    /// 解析 `tool` 的可执行文件路径.
    pub fn resolve(&self, tool: Tool) -> Result<PathBuf, ToolError> {
        let name = self.name(tool);
        let candidates: Vec<PathBuf> = match &self.bin_dir {
            Some(dir) => vec![dir.clone()],
            None => std::env::var_os("PATH")
                .map(|p| std::env::split_paths(&p).collect())
                .unwrap_or_default(),
        };
        candidates
            .into_iter()
            .map(|dir| dir.join(name))
            .find(|p| p.is_file())
            .context(NotFoundSnafu { tool, name })
    }
}

/// 以子进程方式执行外部工具.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    config: ToolConfig,
}

impl ProcessRunner {
    /// 使用给定配置.
    pub fn new(config: ToolConfig) -> Self {
        Self { config }
    }

    /// 工具查找配置.
    pub fn config(&self) -> &ToolConfig {
        &self.config
    }
}

impl ToolRunner for ProcessRunner {
    fn run(&self, tool: Tool, params: &CliParams) -> Result<(), ToolError> {
        let path = self.config.resolve(tool)?;
        let args = params.to_args();
        tracing::debug!(%tool, path = %path.display(), ?args, "running external tool");

        let output = Command::new(&path)
            .args(&args)
            .output()
            .context(SpawnSnafu { path: &path })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let lines: Vec<&str> = stderr.lines().collect();
            let tail = lines[lines.len().saturating_sub(STDERR_TAIL_LINES)..].join("\n");
            return FailedSnafu {
                tool,
                code: output.status.code(),
                stderr: tail,
            }
            .fail();
        }
        Ok(())
    }
}

/// 检查外部工具是否生成了 `path`.
pub(crate) fn ensure_output(tool: Tool, path: &Path) -> Result<(), ToolError> {
    ensure!(path.is_file(), MissingOutputSnafu { tool, path });
    Ok(())
}

/// 各步骤使用的参数预设.
pub mod presets {
    use std::path::Path;

    use super::CliParams;

    /// 初始对齐: 刚性 + 仿射配准, 采样率 0.002, 矩对齐初始化.
    pub fn conform(fixed: &Path, moving: &Path, transform: &Path, output: &Path) -> CliParams {
        CliParams::new()
            .with("fixedVolume", fixed)
            .with("movingVolume", moving)
            .with("samplingPercentage", 0.002)
            .with("linearTransform", transform)
            .with("outputVolume", output)
            .with("initializeTransformMode", "useMomentsAlign")
            .with("useRigid", true)
            .with("useAffine", true)
    }

    /// 模板到参考空间的非线性配准: 刚性 + 仿射 + BSpline.
    pub fn bspline(
        fixed: &Path,
        moving: &Path,
        transform: &Path,
        output: &Path,
        sampling: f64,
        grid: &str,
        init_mode: &str,
    ) -> CliParams {
        CliParams::new()
            .with("fixedVolume", fixed)
            .with("movingVolume", moving)
            .with("samplingPercentage", sampling)
            .with("splineGridSize", grid)
            .with("outputVolume", output)
            .with("bsplineTransform", transform)
            .with("initializeTransformMode", init_mode)
            .with("useRigid", true)
            .with("useAffine", true)
            .with("useBSpline", true)
    }

    /// 按变换重采样. 标签图使用最近邻插值与二值像素, 其余使用线性插值与浮点像素.
    pub fn resample(
        input: &Path,
        reference: &Path,
        output: &Path,
        transform: &Path,
        inverse: bool,
        label_map: bool,
    ) -> CliParams {
        let (mode, pixel) = if label_map {
            ("NearestNeighbor", "binary")
        } else {
            ("Linear", "float")
        };
        CliParams::new()
            .with("inputVolume", input)
            .with("referenceVolume", reference)
            .with("outputVolume", output)
            .with("warpTransform", transform)
            .with("inverseTransform", inverse)
            .with("interpolationMode", mode)
            .with("pixelType", pixel)
    }

    /// 各向异性扩散去噪.
    pub fn noise_filter(input: &Path, output: &Path) -> CliParams {
        CliParams::new()
            .with("inputVolume", input)
            .with("outputVolume", output)
            .with("condutance", 10)
            .with("iterations", 5)
            .with("q", 1.2)
    }

    /// N4 偏置场校正.
    pub fn bias_correction(input: &Path, output: &Path) -> CliParams {
        CliParams::new()
            .with("inputImageName", input)
            .with("outputImageName", output)
    }

    /// 只输出白质的脑组织分类.
    pub fn white_matter(input: &Path, output: &Path, modality: &str) -> CliParams {
        CliParams::new()
            .with("inputVolume", input)
            .with("outputLabel", output)
            .with("imageModality", modality)
            .with("oneTissue", true)
            .with("typeTissue", "White Matter")
    }

    /// 白质标签平滑.
    pub fn label_smoothing(input: &Path, output: &Path) -> CliParams {
        CliParams::new()
            .with("labelToSmooth", 3)
            .with("gaussianSigma", 0.2)
            .with("inputVolume", input)
            .with("outputVolume", output)
    }
}
