//! 题号计算服务 - 业务能力层
//!
//! 在一个 section 内，题号按 part 顺序 → 题组顺序 → 组内顺序连续编号，从 1 开始。
//!
//! 题组占用的题号数量取决于题型：
//! - 占位符题型：统计所有题目富文本中出现的不同占位符编号
//!   （`[n]` 与 `data-number="n"` 两种写法等价，必须同时兼容）
//! - 普通题型：题目对象个数；还没有题目时按默认 5 题预留

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, info};

use crate::models::{EntityId, PartContent, QuestionGroup};

/// 未编写题目的普通题组默认占用的题号数
pub const DEFAULT_GROUP_SIZE: u32 = 5;

static BRACKET_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[(\d+)\]").expect("bracket marker regex"));

// data-number="3" / data-number='3' / data-number=3 / data-number=&quot;3&quot; / data-number=\"3\"
static ATTRIBUTE_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"data-number\s*=\s*(?:\\?"|'|&quot;|&#34;)?(\d+)"#).expect("attribute marker regex")
});

static RANGE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)-(\d+)$").expect("range regex"));

/// 提取富文本中的占位符编号（两种写法合并去重）
pub fn extract_markers(text: &str) -> BTreeSet<u32> {
    BRACKET_MARKER
        .captures_iter(text)
        .chain(ATTRIBUTE_MARKER.captures_iter(text))
        .filter_map(|cap| cap.get(1).and_then(|m| m.as_str().parse::<u32>().ok()))
        .collect()
}

/// 题组内所有题目的占位符编号（升序）
pub fn group_markers(group: &QuestionGroup) -> BTreeSet<u32> {
    group
        .questions
        .iter()
        .flat_map(|q| extract_markers(&q.text))
        .collect()
}

/// 题组占用的题号数
pub fn group_question_count(group: &QuestionGroup) -> u32 {
    if group.is_placeholder_bearing() {
        return group_markers(group).len() as u32;
    }

    match group.questions.len() {
        0 => DEFAULT_GROUP_SIZE,
        n => n as u32,
    }
}

/// 整个 part 占用的题号数
pub fn part_question_count(content: &PartContent) -> u32 {
    content.question_groups.iter().map(group_question_count).sum()
}

/// 解析 "start-end"，格式不对或 end < start 时返回 `None`
pub fn parse_range(range: &str) -> Option<(u32, u32)> {
    let caps = RANGE_PATTERN.captures(range.trim())?;
    let start: u32 = caps.get(1)?.as_str().parse().ok()?;
    let end: u32 = caps.get(2)?.as_str().parse().ok()?;
    (start <= end).then_some((start, end))
}

pub fn format_range(start: u32, end: u32) -> String {
    format!("{}-{}", start, end)
}

/// 题组当前保存的范围内有多少题号，无效范围按 0 处理
pub fn stored_range_count(group: &QuestionGroup) -> u32 {
    group
        .range
        .as_deref()
        .and_then(parse_range)
        .map(|(start, end)| end - start + 1)
        .unwrap_or(0)
}

/// 当前 part 之前所有 part 占用的题号总数
///
/// `prior_parts` 为同一 section 中排在当前 part 之前的内容（`None` 表示还没有内容）。
pub fn compute_offset(prior_parts: &[Option<&PartContent>]) -> u32 {
    prior_parts
        .iter()
        .flatten()
        .map(|content| part_question_count(content))
        .sum()
}

/// 从 `offset + 1` 开始为 part 内的题组重新分配题号范围
///
/// 占用 0 个题号的题组（没有任何占位符的占位符题组）不保留范围。
pub fn recalculate_ranges(content: &PartContent, offset: u32) -> PartContent {
    let mut updated = content.clone();
    let mut current_start = offset + 1;

    for (index, group) in updated.question_groups.iter_mut().enumerate() {
        let count = group_question_count(group);
        let new_range = (count > 0).then(|| format_range(current_start, current_start + count - 1));

        if group.range != new_range {
            info!(
                "题组 {} 题号范围修正: {:?} -> {:?} (原有 {} 题, 实际 {} 题)",
                index + 1,
                group.range,
                new_range,
                stored_range_count(group),
                count
            );
        }

        group.range = new_range;
        current_start += count;
    }

    updated
}

/// part 整体的题号范围（第一个题组的起点到最后一个题组的终点）
pub fn part_range(content: &PartContent) -> Option<(u32, u32)> {
    let ranges: Vec<(u32, u32)> = content
        .question_groups
        .iter()
        .filter_map(|g| g.range.as_deref().and_then(parse_range))
        .collect();

    let start = ranges.iter().map(|(s, _)| *s).min()?;
    let end = ranges.iter().map(|(_, e)| *e).max()?;
    Some((start, end))
}

/// 参与编号的 part
#[derive(Debug, Clone, PartialEq)]
pub struct NumberedPart {
    pub part_id: EntityId,
    pub ord: u32,
    /// `None` 表示该 part 还没有内容
    pub content: Option<PartContent>,
}

impl NumberedPart {
    pub fn new(part_id: EntityId, ord: u32, content: Option<PartContent>) -> Self {
        Self {
            part_id,
            ord,
            content,
        }
    }

    pub fn question_range(&self) -> Option<(u32, u32)> {
        self.content.as_ref().and_then(part_range)
    }

    pub fn question_count(&self) -> u32 {
        self.content.as_ref().map(part_question_count).unwrap_or(0)
    }

    /// 是否包含某个题号
    pub fn contains(&self, ordinal: u32) -> bool {
        self.question_range()
            .map(|(start, end)| (start..=end).contains(&ordinal))
            .unwrap_or(false)
    }
}

/// section 重新编号的结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SectionRecalculation {
    /// 按 `ord` 排序的全部 part（已写入新范围）
    pub parts: Vec<NumberedPart>,
    /// 题号范围发生变化、需要重新保存的 part
    pub changed_part_ids: Vec<EntityId>,
    /// 旧范围覆盖、新范围不再覆盖的题号，对应的题目/答案记录需要删除
    pub vacated_ordinals: BTreeSet<u32>,
    /// section 总题数
    pub total_questions: u32,
}

impl SectionRecalculation {
    pub fn changed_parts(&self) -> impl Iterator<Item = &NumberedPart> {
        self.parts
            .iter()
            .filter(|p| self.changed_part_ids.contains(&p.part_id))
    }
}

fn covered_ordinals(content: &PartContent) -> BTreeSet<u32> {
    content
        .question_groups
        .iter()
        .filter_map(|g| g.range.as_deref().and_then(parse_range))
        .flat_map(|(start, end)| start..=end)
        .collect()
}

/// 按 section 顺序重算所有 part 的题号
///
/// 任何一个 part 的修改都会影响后面所有 part 的偏移量，所以总是整段重算，
/// 只把范围真正变化的 part 报告给调用方。
pub fn recalculate_section(parts: &[NumberedPart]) -> SectionRecalculation {
    let mut ordered: Vec<NumberedPart> = parts.to_vec();
    ordered.sort_by_key(|p| p.ord);

    let mut result = SectionRecalculation::default();
    let mut previous_ordinals = BTreeSet::new();
    let mut current_ordinals = BTreeSet::new();
    let mut offset = 0;

    for part in ordered {
        let Some(content) = part.content.as_ref() else {
            result.parts.push(part);
            continue;
        };

        previous_ordinals.extend(covered_ordinals(content));

        let updated = recalculate_ranges(content, offset);
        let changed = updated
            .question_groups
            .iter()
            .zip(content.question_groups.iter())
            .any(|(new, old)| new.range != old.range);

        if changed {
            debug!("part {} (ord {}) 题号范围已变化", part.part_id, part.ord);
            result.changed_part_ids.push(part.part_id);
        }

        offset += part_question_count(&updated);
        current_ordinals.extend(covered_ordinals(&updated));
        result.parts.push(NumberedPart::new(part.part_id, part.ord, Some(updated)));
    }

    result.vacated_ordinals = previous_ordinals
        .difference(&current_ordinals)
        .copied()
        .collect();
    result.total_questions = offset;

    if !result.vacated_ordinals.is_empty() {
        info!("题号已释放: {:?}", result.vacated_ordinals);
    }

    result
}
