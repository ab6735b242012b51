//! 命令行工具依赖的通用组件.

use snafu::{Report, ResultExt, Whatever};
use tracing::Level;

pub mod loader;

const SEP: &str = "--------------------------------------------------------";

/// 向 `w` 写入一行简单分隔线.
#[inline]
pub fn sep_to<W: std::io::Write>(mut w: W) -> std::io::Result<()> {
    writeln!(&mut w, "{SEP}")
}

/// 安装全局日志输出. `verbose` 为真时输出 DEBUG 级别日志, 否则为 INFO.
///
/// 重复安装不会 panic, 只打印错误.
pub fn init_logging(verbose: bool) {
    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_max_level(if verbose { Level::DEBUG } else { Level::INFO })
            .with_writer(std::io::stderr)
            .finish(),
    )
    .whatever_context("Could not set up global logging subscriber")
    .unwrap_or_else(|e: Whatever| {
        eprintln!("[ERROR] {}", Report::from_error(e));
    });
}
