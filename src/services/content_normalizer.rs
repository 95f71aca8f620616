//! 内容规范化服务 - 业务能力层
//!
//! 服务端保存的 part 内容经过多次往返序列化，可能是：
//! - JSON 字符串，甚至是"JSON 字符串的 JSON 字符串"（最多 10 层）
//! - `{ admin, user }` 信封，每一层本身又可能是字符串
//! - 直接就是题组数组
//! - 数组被序列化成 `{"0": .., "1": ..}` 这样的对象
//!
//! 这里把它们统一成 `{ questionGroups: [...], ...其他字段 }`，
//! 每个题组的 `questions` 都是真正的数组。规范化是幂等的。
//! 解析失败不是错误：原样返回，视为"还没有内容"。

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::models::PartContent;

/// 最大解包层数
pub const MAX_UNWRAP_DEPTH: usize = 10;

const QUESTION_GROUPS_KEY: &str = "questionGroups";
const QUESTIONS_KEY: &str = "questions";
const TEXT_KEY: &str = "text";

/// 反复按 JSON 解析字符串，直到得到非字符串值或无法继续解析
///
/// 解包 `MAX_UNWRAP_DEPTH` 层之后仍然是可解析的 JSON 字符串时返回 `Null`（视为没有内容）。
pub fn unwrap_json(value: Value) -> Value {
    let mut current = value;
    for _ in 0..MAX_UNWRAP_DEPTH {
        match current {
            Value::String(s) => match serde_json::from_str::<Value>(&s) {
                Ok(parsed) => current = parsed,
                Err(_) => return Value::String(s),
            },
            other => return other,
        }
    }

    match current {
        Value::String(s) if serde_json::from_str::<Value>(&s).is_ok() => {
            warn!("⚠️ 内容序列化层数超过 {}，视为空内容", MAX_UNWRAP_DEPTH);
            Value::Null
        }
        other => other,
    }
}

/// 把键全部是非负整数的对象当作数组，按数值升序排列
///
/// 空对象不算（无法区分空数组和空对象）。
pub fn array_like_to_vec(map: &Map<String, Value>) -> Option<Vec<Value>> {
    if map.is_empty() {
        return None;
    }

    let mut indexed = Vec::with_capacity(map.len());
    for (key, value) in map {
        let index: u64 = key.parse().ok()?;
        // "01" / "+1" 这类键不是序列化器产生的下标
        if index.to_string() != *key {
            return None;
        }
        indexed.push((index, value.clone()));
    }

    indexed.sort_by_key(|(index, _)| *index);
    Some(indexed.into_iter().map(|(_, value)| value).collect())
}

/// 规范化 part 内容，返回 JSON 值
///
/// 结果是对象时一定包含 `questionGroups` 数组；无法识别的输入原样返回。
pub fn normalize_content(raw: &Value) -> Value {
    normalize_at_depth(raw.clone(), 0)
}

/// 规范化并转换为强类型内容，没有内容时返回 `None`
pub fn parse_part_content(raw: &Value) -> Option<PartContent> {
    match normalize_content(raw) {
        value @ Value::Object(_) => match serde_json::from_value::<PartContent>(value) {
            Ok(content) => Some(content),
            Err(e) => {
                warn!("⚠️ 内容结构无法识别，视为空内容: {}", e);
                None
            }
        },
        _ => {
            debug!("内容为空或无法解析");
            None
        }
    }
}

fn normalize_at_depth(value: Value, depth: usize) -> Value {
    match unwrap_json(value) {
        Value::Array(groups) => canonical_content(groups, Map::new()),
        Value::Object(map) => {
            if let Some(groups) = array_like_to_vec(&map) {
                return canonical_content(groups, Map::new());
            }
            if !map.contains_key(QUESTION_GROUPS_KEY) && depth < MAX_UNWRAP_DEPTH {
                // admin 带有正确答案等编辑期结构，优先于 user
                for envelope in ["admin", "user"] {
                    if let Some(inner) = map.get(envelope) {
                        let normalized = normalize_at_depth(inner.clone(), depth + 1);
                        if normalized.is_object() {
                            debug!("已从 {} 信封中取出内容", envelope);
                            return normalized;
                        }
                    }
                }
            }
            canonical_object(map)
        }
        terminal => terminal,
    }
}

fn canonical_content(groups: Vec<Value>, mut rest: Map<String, Value>) -> Value {
    let groups = groups
        .into_iter()
        .filter_map(|group| match unwrap_json(group) {
            Value::Object(map) => Some(canonical_group(map)),
            other => {
                debug!("忽略无法识别的题组: {}", other);
                None
            }
        })
        .collect();

    rest.insert(QUESTION_GROUPS_KEY.to_string(), Value::Array(groups));
    Value::Object(rest)
}

fn canonical_object(mut map: Map<String, Value>) -> Value {
    let groups = map
        .remove(QUESTION_GROUPS_KEY)
        .map(coerce_list)
        .unwrap_or_default();
    canonical_content(groups, map)
}

fn canonical_group(mut map: Map<String, Value>) -> Value {
    let questions = coerce_questions(map.remove(QUESTIONS_KEY));
    map.insert(QUESTIONS_KEY.to_string(), Value::Array(questions));
    Value::Object(map)
}

/// 任意值 → 列表：数组原样，类数组对象按下标排序，其余视为空
fn coerce_list(value: Value) -> Vec<Value> {
    match unwrap_json(value) {
        Value::Array(items) => items,
        Value::Object(map) => array_like_to_vec(&map).unwrap_or_default(),
        _ => Vec::new(),
    }
}

fn coerce_questions(value: Option<Value>) -> Vec<Value> {
    let Some(value) = value else {
        return Vec::new();
    };

    let original = value.clone();
    let items = match unwrap_json(value) {
        Value::Array(items) => items,
        Value::Object(map) if map.is_empty() => Vec::new(),
        Value::Object(map) => match array_like_to_vec(&map) {
            Some(items) => items,
            // 单个题目对象
            None => vec![Value::Object(map)],
        },
        Value::Null => Vec::new(),
        _ => match original {
            // 整段富文本（占位符题型）
            Value::String(blob) if !blob.trim().is_empty() => vec![Value::String(blob)],
            _ => Vec::new(),
        },
    };

    items.into_iter().filter_map(coerce_question).collect()
}

fn coerce_question(item: Value) -> Option<Value> {
    match item {
        Value::String(s) => match unwrap_json(Value::String(s.clone())) {
            Value::Object(map) => Some(Value::Object(map)),
            _ => Some(text_question(s)),
        },
        Value::Object(map) => Some(Value::Object(map)),
        _ => None,
    }
}

fn text_question(text: String) -> Value {
    let mut map = Map::new();
    map.insert(TEXT_KEY.to_string(), Value::String(text));
    Value::Object(map)
}
