//! 数据集操作: 病灶标签库、模板与先验图的目录布局.

use std::path::{Path, PathBuf};

mod catalog;
mod lesion_db;

pub use catalog::{LesionCatalog, SizeGroup};
pub use lesion_db::{
    DatabaseError, DatabaseLayout, DatabaseResult, LesionDatabase, LesionSource, MemoryLesionSource,
};

/// 获取 `{用户主目录}/dataset` 目录下给定继续项组成的全路径.
pub fn home_dataset_dir_with<P: AsRef<Path>, I: IntoIterator<Item = P>>(it: I) -> Option<PathBuf> {
    let mut ans = dirs::home_dir()?;
    ans.push("dataset");
    ans.extend(it);
    Some(ans)
}

/// 默认病灶数据库位置 `{用户主目录}/dataset/MSlesion_database`.
#[inline]
pub fn default_database_dir() -> Option<PathBuf> {
    home_dataset_dir_with([crate::consts::database::DEFAULT_DIR_NAME])
}
