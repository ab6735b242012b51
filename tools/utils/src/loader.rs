//! 对 `ms-berry::dataset` 与 `ms-berry::pipeline::tools` 的更一层封装.
//! 从环境变量或用户主目录定位病灶数据库与外部工具.

use ms_berry::consts::database::DEFAULT_DIR_NAME;
use ms_berry::dataset::{DatabaseLayout, DatabaseResult};
use ms_berry::pipeline::ToolConfig;
use std::env;
use std::path::PathBuf;

/// 病灶数据库位置的环境变量.
pub const DATABASE_ENV: &str = "MS_LESION_DATABASE";

/// 外部工具目录的环境变量.
pub const TOOLS_ENV: &str = "MS_LESION_TOOLS";

/// 获取病灶数据库路径.
///
/// 1. 若环境变量 `$MS_LESION_DATABASE` 非空, 则返回其值;
/// 2. 否则, 返回 `$HOME/dataset/MSlesion_database`;
/// 3. 找不到用户主目录时, 返回当前目录下的 `MSlesion_database`.
pub fn database_dir_from_env_or_home() -> PathBuf {
    match env::var_os(DATABASE_ENV) {
        Some(d) if !d.is_empty() => PathBuf::from(d),
        _ => ms_berry::dataset::default_database_dir()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DIR_NAME)),
    }
}

/// 打开病灶数据库. `explicit` 优先于环境变量与默认位置.
pub fn database_layout(explicit: Option<PathBuf>) -> DatabaseResult<DatabaseLayout> {
    DatabaseLayout::open(explicit.unwrap_or_else(database_dir_from_env_or_home))
}

/// 获取外部工具目录. 环境变量 `$MS_LESION_TOOLS` 为空时返回 `None`, 即在 `PATH` 中查找.
pub fn tools_dir_from_env() -> Option<PathBuf> {
    env::var_os(TOOLS_ENV)
        .filter(|d| !d.is_empty())
        .map(PathBuf::from)
}

/// 外部工具配置. `explicit` 优先于环境变量.
#[inline]
pub fn tool_config(explicit: Option<PathBuf>) -> ToolConfig {
    ToolConfig::new(explicit.or_else(tools_dir_from_env))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ms_berry::dataset::DatabaseError;

    #[test]
    fn test_explicit_database() {
        let dir = tempfile::tempdir().unwrap();
        let layout = database_layout(Some(dir.path().to_path_buf())).unwrap();
        assert_eq!(layout.root(), dir.path());

        let missing = dir.path().join("missing");
        assert!(matches!(
            database_layout(Some(missing)),
            Err(DatabaseError::MissingDatabase { .. })
        ));
    }

    #[test]
    fn test_explicit_tools_dir() {
        let config = tool_config(Some(PathBuf::from("/opt/slicer/cli-modules")));
        assert_eq!(
            config.bin_dir.as_deref(),
            Some(std::path::Path::new("/opt/slicer/cli-modules"))
        );
    }
}
