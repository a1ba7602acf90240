//! 名称到图片模板的查找表
//!
//! 与任务文字解析分离：新增怪物 / 资源 / NPC 只需扩充表项（或配置 [assets]），不必改动解析逻辑。

use std::collections::HashMap;

use crate::config::AssetsSection;

/// 资产类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetCategory {
    Enemy,
    Resource,
    Npc,
}

/// 纯查找表：targetName -> 模板 ID
#[derive(Debug, Clone, Default)]
pub struct AssetTable {
    entries: HashMap<AssetCategory, HashMap<String, String>>,
}

impl AssetTable {
    /// 空表
    pub fn new() -> Self {
        Self::default()
    }

    /// 内置映射（常见怪物与资源点）
    pub fn with_defaults() -> Self {
        let mut table = Self::new();
        for (name, id) in [("野猪", "enemy_boar"), ("狼", "enemy_wolf"), ("野狼", "enemy_wolf")] {
            table.insert(AssetCategory::Enemy, name, id);
        }
        for (name, id) in [
            ("铁矿", "ore_iron"),
            ("铜矿", "ore_copper"),
            ("草药", "herb_basic"),
            ("木材", "wood_basic"),
        ] {
            table.insert(AssetCategory::Resource, name, id);
        }
        table
    }

    /// 内置映射叠加配置中的 [assets]
    pub fn from_config(section: &AssetsSection) -> Self {
        let mut table = Self::with_defaults();
        let groups = [
            (AssetCategory::Enemy, &section.enemies),
            (AssetCategory::Resource, &section.resources),
            (AssetCategory::Npc, &section.npcs),
        ];
        for (category, map) in groups {
            for (name, id) in map {
                table.insert(category, name, id);
            }
        }
        table
    }

    /// 同名覆盖
    pub fn insert(&mut self, category: AssetCategory, name: impl Into<String>, template_id: impl Into<String>) {
        self.entries
            .entry(category)
            .or_default()
            .insert(name.into(), template_id.into());
    }

    /// 名称先去掉首尾空白再查
    pub fn resolve(&self, category: AssetCategory, name: &str) -> Option<&str> {
        self.entries
            .get(&category)
            .and_then(|m| m.get(name.trim()))
            .map(String::as_str)
    }
}
