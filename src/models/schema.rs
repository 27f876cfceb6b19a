//! 问答槽位列的模式描述
//!
//! 列名格式 `{role}_{language}_{position}`，由请求的槽位数 N 推导出完整列集，
//! 写入前以"只增不删"的方式迁移表头。

use std::sync::OnceLock;

use regex::Regex;

use super::qa::{Language, QaKey, Role};

/// 固定的前导列
pub const SOURCE_COLUMN: &str = "source";
pub const TRANSLATION_COLUMN: &str = "translation";
pub const TAGS_COLUMN: &str = "tags";

/// 旧文件中使用的列名别名
pub const SOURCE_ALIASES: &[&str] = &[SOURCE_COLUMN, "sanskrit"];
pub const TRANSLATION_ALIASES: &[&str] = &[TRANSLATION_COLUMN, "english"];

fn slot_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^([qa])_(en|hi|sa)_(\d+)$").expect("槽位列正则表达式无效")
    })
}

/// 解析槽位列名，返回 (键, 位置)
pub fn parse_slot_column(name: &str) -> Option<(QaKey, usize)> {
    let caps = slot_pattern().captures(name.trim())?;
    let role = Role::from_code(&caps[1])?;
    let language = Language::from_code(&caps[2])?;
    let position: usize = caps[3].parse().ok()?;
    (position >= 1).then_some((QaKey::new(role, language), position))
}

/// 槽位列模式，版本号即槽位数 N
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotSchema {
    slot_count: usize,
}

impl SlotSchema {
    pub fn for_count(slot_count: usize) -> Self {
        Self { slot_count }
    }

    /// 从已有表头推导当前模式（取出现过的最大位置）
    pub fn from_headers(headers: &[String]) -> Self {
        let slot_count = headers
            .iter()
            .filter_map(|h| parse_slot_column(h))
            .map(|(_, position)| position)
            .max()
            .unwrap_or(0);
        Self { slot_count }
    }

    pub fn version(&self) -> usize {
        self.slot_count
    }

    /// 全部槽位列，按语言分组，每组内问题/答案交替
    pub fn columns(&self) -> Vec<String> {
        let mut columns = Vec::with_capacity(self.slot_count * QaKey::ALL.len());
        for language in Language::ALL {
            for position in 1..=self.slot_count {
                for role in Role::ALL {
                    columns.push(QaKey::new(role, language).column(position));
                }
            }
        }
        columns
    }

    /// 对表头做只增不删的迁移，返回新增的列
    pub fn widen(&self, headers: &mut Vec<String>) -> Vec<String> {
        let mut added = Vec::new();
        for column in self.columns() {
            if !headers.iter().any(|h| h == &column) {
                headers.push(column.clone());
                added.push(column);
            }
        }
        added
    }
}
