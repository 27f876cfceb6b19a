//! 模型输出解析 - 业务能力层
//!
//! 只负责把一段不可靠的自由文本变成结构化的 `GenerationResult`：
//!
//! 1. 去掉 JSON 之前的叙述性文字
//! 2. 直接解析
//! 3. 按括号深度提取第一个完整对象
//! 4. 补齐缺失的右括号后再解析一次
//! 5. 校验六个键并把列表长度修正为 n

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::error::ParseError;
use crate::models::{GenerationResult, QaKey};
use crate::utils::logging::truncate_text;

/// 模型输出解析器
pub struct ResponseParser;

impl ResponseParser {
    /// 解析并校验模型输出，要求每个键恰好 `n` 项
    pub fn parse(raw: &str, n: usize) -> Result<GenerationResult, ParseError> {
        let object = Self::decode(raw)?;
        Self::validate(object, n)
    }

    /// 从原始文本中解码出一个 JSON 对象（不做键校验）
    pub fn decode(raw: &str) -> Result<Map<String, Value>, ParseError> {
        if raw.trim().is_empty() {
            warn!("模型返回内容为空");
            return Err(ParseError::EmptyResponse);
        }

        let cleaned = strip_narrative(raw);

        // 尝试 1: 直接解析
        match serde_json::from_str::<Value>(cleaned) {
            Ok(Value::Object(map)) => {
                debug!("直接解析 JSON 成功");
                return Ok(map);
            }
            Ok(_) => debug!("直接解析结果不是对象"),
            Err(e) => debug!("直接解析 JSON 失败: {}", e),
        }

        // 尝试 2: 提取第一个完整对象
        if let Some(extracted) = extract_first_object(cleaned) {
            match serde_json::from_str::<Value>(extracted) {
                Ok(Value::Object(map)) => {
                    debug!("提取 JSON 成功，长度 {}", extracted.len());
                    return Ok(map);
                }
                Ok(_) => debug!("提取结果不是对象"),
                Err(e) => debug!("提取的 JSON 解析失败: {}", e),
            }
        }

        // 尝试 3: 补齐括号
        if let Some(repaired) = repair_unbalanced(cleaned) {
            if let Some(map) = decode_leading_object(&repaired) {
                info!("✓ 修复不完整的 JSON 成功");
                return Ok(map);
            }
            debug!("修复后的 JSON 仍无法解析");
        }

        let preview = truncate_text(cleaned, 200);
        warn!("无法从模型输出中解析 JSON，前 200 字符: {}", preview);
        Err(ParseError::Undecodable { preview })
    }

    /// 校验六个固定键并修正列表长度
    ///
    /// 缺键或值不是列表时失败；长度不符只会截断或补齐，不会失败
    pub fn validate(mut object: Map<String, Value>, n: usize) -> Result<GenerationResult, ParseError> {
        let mut result = GenerationResult::empty();

        for key in QaKey::ALL {
            let name = key.name();
            let value = object.remove(&name).ok_or_else(|| ParseError::MissingKey {
                key: name.clone(),
                present: object.keys().cloned().collect(),
            })?;
            let Value::Array(items) = value else {
                return Err(ParseError::NotAList { key: name });
            };
            result.set(key, items.into_iter().map(stringify_item).collect());
        }

        let corrected = result.conform(n);
        if corrected == 0 {
            debug!("输出校验通过，每个键 {} 项", n);
        }
        Ok(result)
    }
}

/// 丢弃第一个以 `{` 开头的行之前的所有行
fn strip_narrative(text: &str) -> &str {
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        if line.trim_start().starts_with('{') {
            if offset > 0 {
                debug!("去掉 JSON 之前的 {} 字节叙述文字", offset);
            }
            return &text[offset..];
        }
        offset += line.len();
    }
    text
}

/// 从第一个 `{` 开始按括号深度扫描，返回深度第一次回到 0 时的片段
///
/// 字符串内部的括号不计入深度；反斜杠跳过紧随其后的一个字符
pub fn extract_first_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth: i64 = 0;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '"' => in_string = !in_string,
            '{' | '[' if !in_string => depth += 1,
            '}' | ']' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    let end = start + offset + c.len_utf8();
                    return Some(&text[start..end]);
                }
            }
            _ => {}
        }
    }

    debug!("没有找到完整的 JSON 对象");
    None
}

/// 左括号比右括号多 k 个时，追加 k 个 `}` 和 k/2 个 `]`
///
/// 括号平衡或右括号更多时返回 `None`
pub fn repair_unbalanced(text: &str) -> Option<String> {
    let open = text.chars().filter(|c| matches!(c, '{' | '[')).count();
    let close = text.chars().filter(|c| matches!(c, '}' | ']')).count();
    debug!("括号统计 - 左: {}, 右: {}", open, close);

    if open <= close {
        return None;
    }
    let missing = open - close;
    let mut repaired = String::with_capacity(text.len() + missing + missing / 2);
    repaired.push_str(text);
    repaired.extend(std::iter::repeat('}').take(missing));
    repaired.extend(std::iter::repeat(']').take(missing / 2));
    Some(repaired)
}

/// 解析开头的第一个 JSON 值，忽略其后的多余字符
fn decode_leading_object(text: &str) -> Option<Map<String, Value>> {
    let mut stream = serde_json::Deserializer::from_str(text.trim_start()).into_iter::<Value>();
    match stream.next() {
        Some(Ok(Value::Object(map))) => Some(map),
        _ => None,
    }
}

fn stringify_item(item: Value) -> String {
    match item {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
