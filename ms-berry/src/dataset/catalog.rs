//! 病灶体积分组.

/// 一个病灶体积分组. 分组内的病灶按 `0..count` 编号.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SizeGroup {
    /// 分组名, 同时也是标签库中的子目录名.
    pub name: String,
    /// 分组内的病灶个数.
    pub count: usize,
    /// 分组内病灶的体积上限 (mm³).
    pub max_volume: usize,
}

impl SizeGroup {
    /// 创建分组.
    pub fn new<S: Into<String>>(name: S, count: usize, max_volume: usize) -> Self {
        Self {
            name: name.into(),
            count,
            max_volume,
        }
    }
}

/// 按体积从小到大排列的病灶分组列表.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LesionCatalog {
    groups: Vec<SizeGroup>,
}

impl LesionCatalog {
    /// 由分组列表构建. 分组按 `max_volume` 升序重排.
    pub fn new(mut groups: Vec<SizeGroup>) -> Self {
        groups.sort_by_key(|g| g.max_volume);
        Self { groups }
    }

    /// 当前标签库的分组.
    pub fn standard() -> Self {
        Self::new(vec![
            SizeGroup::new("50-100", 950, 100),
            SizeGroup::new("100-500", 944, 500),
            SizeGroup::new("500-1000", 138, 1000),
            SizeGroup::new("1000-5000", 117, 5000),
            SizeGroup::new("5000-more", 75, 15000),
        ])
    }

    /// 旧版标签库的分组. 旧版按随机分组抽取, 不使用体积上限, 这里按分组名给出近似值.
    pub fn legacy() -> Self {
        Self::new(vec![
            SizeGroup::new("5-20", 586, 20),
            SizeGroup::new("20-75", 440, 75),
            SizeGroup::new("75-200", 150, 200),
            SizeGroup::new("200-750", 80, 750),
            SizeGroup::new("750-more", 23, 3000),
        ])
    }

    /// 全部分组, 从小到大.
    #[inline]
    pub fn groups(&self) -> &[SizeGroup] {
        &self.groups
    }

    /// 分组个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// 是否没有任何分组?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// 获取第 `i` 个分组.
    #[inline]
    pub fn get(&self, i: usize) -> Option<&SizeGroup> {
        self.groups.get(i)
    }
}

impl Default for LesionCatalog {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_catalogs() {
        let std = LesionCatalog::standard();
        assert_eq!(std.len(), 5);
        assert_eq!(std.get(0).unwrap().name, "50-100");
        assert_eq!(std.get(4).unwrap().max_volume, 15000);
        assert_eq!(std.groups().iter().map(|g| g.count).sum::<usize>(), 2224);

        let legacy = LesionCatalog::legacy();
        assert_eq!(legacy.get(0).unwrap(), &SizeGroup::new("5-20", 586, 20));
        assert_eq!(legacy.get(4).unwrap().count, 23);
    }

    #[test]
    fn test_sorted_on_build() {
        let cat = LesionCatalog::new(vec![SizeGroup::new("b", 1, 50), SizeGroup::new("a", 2, 10)]);
        assert_eq!(cat.get(0).unwrap().name, "a");
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_serde() {
        let cat = LesionCatalog::standard();
        let s = serde_json::to_string(&cat).unwrap();
        let back: LesionCatalog = serde_json::from_str(&s).unwrap();
        assert_eq!(cat, back);
    }
}
