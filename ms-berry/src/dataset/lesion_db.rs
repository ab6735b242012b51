//! 病灶标签库与模板文件.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use snafu::{ensure, OptionExt, ResultExt, Snafu};

use crate::consts::database::{LABELS_DIR, LESION_PRIOR, MNI152_T1, MNI152_T1_BRAIN};
use crate::data::{DataError, LesionMask, MriVolume};

/// 病灶数据库错误.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum DatabaseError {
    /// 数据库目录不存在.
    #[snafu(display("lesion database not found at {}", path.display()))]
    MissingDatabase { path: PathBuf },

    /// 读取病灶标签失败.
    #[snafu(display("could not load lesion {index} of group {group}"))]
    LoadLesion {
        group: String,
        index: usize,
        source: DataError,
    },

    /// 读取模板或先验图失败.
    #[snafu(display("could not load {}", path.display()))]
    LoadVolume { path: PathBuf, source: DataError },

    /// 内存病灶源中不存在该病灶.
    #[snafu(display("no lesion {index} in group {group}"))]
    NoSuchLesion { group: String, index: usize },
}

/// 病灶数据库操作结果.
pub type DatabaseResult<T> = Result<T, DatabaseError>;

/// 病灶标签来源. 给定分组名与组内编号, 返回对应的病灶标签.
pub trait LesionSource {
    /// 取出 `group` 分组的第 `index` 个病灶.
    fn lesion(&self, group: &str, index: usize) -> DatabaseResult<LesionMask>;
}

/// 数据库目录布局.
///
/// ```text
/// <root>/
///   MNI152_T1_1mm.nii.gz
///   MNI152_T1_1mm_brain.nii.gz
///   USP-ICBM-MSpriors-46-1mm.nii.gz
///   labels-database/<group>/<index>.nii.gz
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseLayout {
    root: PathBuf,
}

impl DatabaseLayout {
    /// 以 `root` 为根目录. 不检查目录是否存在.
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    /// 以 `root` 为根目录, 要求目录存在.
    pub fn open<P: Into<PathBuf>>(root: P) -> DatabaseResult<Self> {
        let root = root.into();
        ensure!(root.is_dir(), MissingDatabaseSnafu { path: root });
        Ok(Self { root })
    }

    /// 数据库根目录.
    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// MNI152 模板路径. `brain_extracted` 为真时选择去颅骨版本.
    pub fn template(&self, brain_extracted: bool) -> PathBuf {
        self.root.join(if brain_extracted {
            MNI152_T1_BRAIN
        } else {
            MNI152_T1
        })
    }

    /// 病灶概率先验图路径.
    #[inline]
    pub fn lesion_prior(&self) -> PathBuf {
        self.root.join(LESION_PRIOR)
    }

    /// 病灶标签库目录.
    #[inline]
    pub fn labels_dir(&self) -> PathBuf {
        self.root.join(LABELS_DIR)
    }

    /// 单个病灶标签路径 `labels-database/<group>/<index>.nii.gz`.
    pub fn lesion_path(&self, group: &str, index: usize) -> PathBuf {
        let mut p = self.labels_dir();
        p.push(group);
        p.push(format!("{index}.nii.gz"));
        p
    }

    /// 读取模板.
    pub fn load_template(&self, brain_extracted: bool) -> DatabaseResult<MriVolume> {
        let path = self.template(brain_extracted);
        MriVolume::open(&path).context(LoadVolumeSnafu { path })
    }

    /// 读取病灶概率先验图.
    pub fn load_prior(&self) -> DatabaseResult<MriVolume> {
        let path = self.lesion_prior();
        MriVolume::open(&path).context(LoadVolumeSnafu { path })
    }
}

/// 磁盘上的病灶标签库.
#[derive(Debug, Clone)]
pub struct LesionDatabase {
    layout: DatabaseLayout,
}

impl LesionDatabase {
    /// 基于给定布局创建.
    pub fn new(layout: DatabaseLayout) -> Self {
        Self { layout }
    }

    /// 数据库布局.
    #[inline]
    pub fn layout(&self) -> &DatabaseLayout {
        &self.layout
    }
}

impl LesionSource for LesionDatabase {
    fn lesion(&self, group: &str, index: usize) -> DatabaseResult<LesionMask> {
        let path = self.layout.lesion_path(group, index);
        tracing::debug!(path = %path.display(), "loading lesion label");
        LesionMask::open(&path).context(LoadLesionSnafu { group, index })
    }
}

/// 内存中的病灶标签来源, 主要用于合成数据与测试.
#[derive(Debug, Clone, Default)]
pub struct MemoryLesionSource {
    lesions: HashMap<(String, usize), LesionMask>,
}

impl MemoryLesionSource {
    /// 创建空的病灶源.
    pub fn new() -> Self {
        Self::default()
    }

    /// 放入 `group` 分组的第 `index` 个病灶.
    pub fn insert<S: Into<String>>(&mut self, group: S, index: usize, lesion: LesionMask) {
        self.lesions.insert((group.into(), index), lesion);
    }

    /// 病灶总数.
    #[inline]
    pub fn len(&self) -> usize {
        self.lesions.len()
    }

    /// 是否为空?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.lesions.is_empty()
    }
}

impl LesionSource for MemoryLesionSource {
    fn lesion(&self, group: &str, index: usize) -> DatabaseResult<LesionMask> {
        self.lesions
            .get(&(group.to_string(), index))
            .cloned()
            .context(NoSuchLesionSnafu { group, index })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_layout_paths() {
        let layout = DatabaseLayout::new("/data/ms");
        assert_eq!(
            layout.template(false),
            PathBuf::from("/data/ms/MNI152_T1_1mm.nii.gz")
        );
        assert_eq!(
            layout.template(true),
            PathBuf::from("/data/ms/MNI152_T1_1mm_brain.nii.gz")
        );
        assert_eq!(
            layout.lesion_prior(),
            PathBuf::from("/data/ms/USP-ICBM-MSpriors-46-1mm.nii.gz")
        );
        assert_eq!(
            layout.lesion_path("50-100", 17),
            PathBuf::from("/data/ms/labels-database/50-100/17.nii.gz")
        );
    }

    #[test]
    fn test_open_missing_database() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(matches!(
            DatabaseLayout::open(&missing),
            Err(DatabaseError::MissingDatabase { .. })
        ));
        assert!(DatabaseLayout::open(dir.path()).is_ok());
    }

    #[test]
    fn test_load_lesion_from_disk() {
        let dir = tempdir().unwrap();
        let layout = DatabaseLayout::new(dir.path());
        let path = layout.lesion_path("5-20", 3);
        fs::create_dir_all(path.parent().unwrap()).unwrap();

        let mut data = Array3::zeros((2, 3, 4));
        data[(1, 2, 3)] = 1u8;
        LesionMask::synthetic(data, [1.0; 3]).save(&path).unwrap();

        let db = LesionDatabase::new(layout);
        let lesion = db.lesion("5-20", 3).unwrap();
        assert_eq!(lesion.count_foreground(), 1);
        assert_eq!(lesion[(1, 2, 3)], 1);
        assert!(matches!(
            db.lesion("5-20", 4),
            Err(DatabaseError::LoadLesion { index: 4, .. })
        ));
    }

    #[test]
    fn test_memory_source() {
        let mut src = MemoryLesionSource::new();
        src.insert("a", 0, LesionMask::synthetic(Array3::zeros((1, 1, 1)), [1.0; 3]));
        assert_eq!(src.len(), 1);
        assert!(src.lesion("a", 0).is_ok());
        assert!(src.lesion("a", 1).is_err());
    }
}
