use std::path::PathBuf;

use snafu::Snafu;

use super::tools::{Tool, ToolError};
use crate::data::DataError;
use crate::dataset::DatabaseError;
use crate::sim::SimError;

/// 完整模拟流程中的错误.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum PipelineError {
    /// 参数越界或缺失.
    #[snafu(display("invalid parameter `{name}`: {reason}"))]
    InvalidParams { name: &'static str, reason: String },

    /// 没有可作为参考空间的模态 (T1, T2, T2-FLAIR, PD 至少需要一个).
    #[snafu(display("no reference modality: provide at least one of T1, T2, T2-FLAIR or PD"))]
    NoReference,

    /// 读取配置文件失败.
    #[snafu(display("could not read config {}", path.display()))]
    ReadConfig {
        path: PathBuf,
        source: std::io::Error,
    },

    /// 配置文件格式错误.
    #[cfg(feature = "serde")]
    #[snafu(display("could not parse config {}", path.display()))]
    ParseConfig {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// 无法创建工作目录或输出目录.
    #[snafu(display("could not create directory {}", path.display()))]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    /// 无法覆盖输出文件.
    #[snafu(display("could not replace output {}", path.display()))]
    CopyOutput {
        path: PathBuf,
        source: std::io::Error,
    },

    /// 外部工具失败.
    #[snafu(display("step `{step}` failed running {tool}"))]
    RunTool {
        step: &'static str,
        tool: Tool,
        source: ToolError,
    },

    /// 读写中间文件失败.
    #[snafu(display("could not access {}", path.display()))]
    Volume { path: PathBuf, source: DataError },

    /// 病灶数据库错误.
    #[snafu(display("lesion database error"))]
    Database { source: DatabaseError },

    /// 模拟算法错误.
    #[snafu(display("simulation of {what} failed"))]
    Simulate { what: String, source: SimError },
}

/// 流程结果.
pub type PipelineResult<T> = Result<T, PipelineError>;
