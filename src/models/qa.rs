//! 问答数据模型
//!
//! 六个固定键：`q_en a_en q_hi a_hi q_sa a_sa`（问题/答案 × 三种语言）

use std::collections::BTreeMap;
use std::fmt;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::warn;

/// 目标语言
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Language {
    /// 英语
    English,
    /// 印地语（天城体）
    Hindi,
    /// 梵语（天城体）
    Sanskrit,
}

impl Language {
    pub const ALL: [Language; 3] = [Language::English, Language::Hindi, Language::Sanskrit];

    /// 列名中使用的语言代码
    pub fn code(self) -> &'static str {
        match self {
            Language::English => "en",
            Language::Hindi => "hi",
            Language::Sanskrit => "sa",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "en" => Some(Language::English),
            "hi" => Some(Language::Hindi),
            "sa" => Some(Language::Sanskrit),
            _ => None,
        }
    }
}

/// 问题还是答案
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Role {
    Question,
    Answer,
}

impl Role {
    pub const ALL: [Role; 2] = [Role::Question, Role::Answer];

    pub fn code(self) -> &'static str {
        match self {
            Role::Question => "q",
            Role::Answer => "a",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "q" => Some(Role::Question),
            "a" => Some(Role::Answer),
            _ => None,
        }
    }
}

/// 问答键，例如 `q_en`
///
/// 排序为 `q_en, a_en, q_hi, a_hi, q_sa, a_sa`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct QaKey {
    pub language: Language,
    pub role: Role,
}

impl QaKey {
    pub const fn new(role: Role, language: Language) -> Self {
        Self { language, role }
    }

    /// 全部六个固定键
    pub const ALL: [QaKey; 6] = [
        QaKey::new(Role::Question, Language::English),
        QaKey::new(Role::Answer, Language::English),
        QaKey::new(Role::Question, Language::Hindi),
        QaKey::new(Role::Answer, Language::Hindi),
        QaKey::new(Role::Question, Language::Sanskrit),
        QaKey::new(Role::Answer, Language::Sanskrit),
    ];

    pub fn name(self) -> String {
        format!("{}_{}", self.role.code(), self.language.code())
    }

    /// 第 `position` 个槽位的列名（从 1 开始）
    pub fn column(self, position: usize) -> String {
        format!("{}_{}_{}", self.role.code(), self.language.code(), position)
    }

    pub fn parse(name: &str) -> Option<Self> {
        let (role, language) = name.split_once('_')?;
        Some(Self::new(Role::from_code(role)?, Language::from_code(language)?))
    }
}

impl fmt::Display for QaKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.role.code(), self.language.code())
    }
}

impl From<QaKey> for String {
    fn from(key: QaKey) -> Self {
        key.name()
    }
}

impl TryFrom<String> for QaKey {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        QaKey::parse(&value).ok_or_else(|| format!("未知的问答键: {}", value))
    }
}

/// 一次生成的结构化结果：每个键对应一个有序字符串列表
///
/// 反序列化时忽略六个键以外的字段，缺少的键视为空列表，
/// 因此可以平铺在 `ResultRow` 等结构中
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct GenerationResult {
    items: BTreeMap<QaKey, Vec<String>>,
}

impl GenerationResult {
    /// 六个键都存在、列表都为空
    pub fn empty() -> Self {
        Self {
            items: QaKey::ALL.iter().map(|key| (*key, Vec::new())).collect(),
        }
    }

    pub fn get(&self, key: QaKey) -> &[String] {
        self.items.get(&key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn set(&mut self, key: QaKey, values: Vec<String>) {
        self.items.insert(key, values);
    }

    pub fn iter(&self) -> impl Iterator<Item = (QaKey, &[String])> {
        self.items.iter().map(|(key, values)| (*key, values.as_slice()))
    }

    /// 把另一个结果的各键内容追加到本结果
    pub fn extend_from(&mut self, other: GenerationResult) {
        for (key, values) in other.items {
            self.items.entry(key).or_default().extend(values);
        }
    }

    /// 所有键的列表长度相同时返回该长度
    pub fn arity(&self) -> Option<usize> {
        let mut lengths = QaKey::ALL.iter().map(|key| self.get(*key).len());
        let first = lengths.next()?;
        lengths.all(|len| len == first).then_some(first)
    }

    /// 最长列表的长度
    pub fn max_len(&self) -> usize {
        self.items.values().map(Vec::len).max().unwrap_or(0)
    }

    /// 是否至少有一个非空条目
    pub fn has_content(&self) -> bool {
        self.items
            .values()
            .any(|values| values.iter().any(|v| !v.trim().is_empty()))
    }

    /// 把每个键的列表长度修正为 `n`：多则截断，少则补空字符串
    ///
    /// 返回被修正的键的数量
    pub fn conform(&mut self, n: usize) -> usize {
        let mut corrected = 0;
        for key in QaKey::ALL {
            let values = self.items.entry(key).or_default();
            if values.len() > n {
                warn!("键 {} 有 {} 项，截断为 {}", key, values.len(), n);
                values.truncate(n);
                corrected += 1;
            } else if values.len() < n {
                warn!("键 {} 只有 {} 项，期望 {}，补齐空字符串", key, values.len(), n);
                values.resize(n, String::new());
                corrected += 1;
            }
        }
        corrected
    }
}

impl<'de> Deserialize<'de> for GenerationResult {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let fields = BTreeMap::<String, serde_json::Value>::deserialize(deserializer)?;
        let mut result = GenerationResult::empty();
        for (name, value) in fields {
            let Some(key) = QaKey::parse(&name) else {
                continue;
            };
            let values: Vec<String> = serde_json::from_value(value)
                .map_err(|e| D::Error::custom(format!("键 {} 的值必须是字符串列表: {}", name, e)))?;
            result.set(key, values);
        }
        Ok(result)
    }
}

impl Default for GenerationResult {
    fn default() -> Self {
        Self::empty()
    }
}
