//! 编辑保存流程 - 流程层
//!
//! 核心职责：定义"保存一个 part"的完整流程
//!
//! 流程顺序：
//! 1. 本地校验（失败直接返回，不会发请求）
//! 2. 读取整个 section 的 part 并规范化内容
//! 3. 整段重算题号
//! 4. 只保存内容或范围有变化的 part（admin 保留答案，user 去掉答案）
//! 5. 同步题号记录：更新受影响的题号，删除被释放的题号

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::clients::{AuthoringApi, ContentApi};
use crate::error::{AppResult, ValidationError};
use crate::models::{EntityId, PartContent, PartContentEnvelope, QuestionGroup};
use crate::services::content_normalizer::parse_part_content;
use crate::services::question_numbering::{
    extract_markers, group_markers, parse_range, recalculate_section, NumberedPart,
    SectionRecalculation,
};

const ANSWER_FIELDS: [&str; 2] = ["correctAnswer", "correctAnswers"];

/// 一次保存的统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SectionSyncReport {
    pub section_id: EntityId,
    /// 实际保存的 part
    pub saved_part_ids: Vec<EntityId>,
    /// 被释放的题号
    pub vacated_ordinals: BTreeSet<u32>,
    pub upserted_questions: usize,
    pub deleted_questions: usize,
    pub total_questions: u32,
}

/// 编辑保存流程
///
/// - 不持有任何会话状态
/// - 只依赖远程接口和业务能力（services）
pub struct AuthoringFlow {
    api: Arc<dyn AuthoringApi>,
}

impl AuthoringFlow {
    pub fn new(api: Arc<dyn AuthoringApi>) -> Self {
        Self { api }
    }

    /// 读取 section 的所有 part 并规范化内容
    pub async fn load_section(&self, section_id: EntityId) -> AppResult<Vec<NumberedPart>> {
        load_section_parts(self.api.as_ref(), section_id).await
    }

    /// 保存前校验
    pub fn validate(content: &PartContent) -> Result<(), ValidationError> {
        for (group_index, group) in content.question_groups.iter().enumerate() {
            if group.group_type.is_none() {
                return Err(ValidationError::MissingGroupType {
                    group_index: group_index + 1,
                });
            }
            if group.is_placeholder_bearing() {
                continue;
            }
            if let Some(question_index) = group.questions.iter().position(|q| q.text.trim().is_empty()) {
                return Err(ValidationError::MissingQuestionText {
                    group_index: group_index + 1,
                    question_index: question_index + 1,
                });
            }
        }
        Ok(())
    }

    /// 保存编辑后的 part，并级联更新同一 section 中后续 part 的题号
    pub async fn save_part(
        &self,
        section_id: EntityId,
        part_id: EntityId,
        edited: PartContent,
    ) -> AppResult<SectionSyncReport> {
        Self::validate(&edited)?;

        let mut parts = self.load_section(section_id).await?;
        let Some(target) = parts.iter_mut().find(|p| p.part_id == part_id) else {
            return Err(ValidationError::UnknownPart { part_id, section_id }.into());
        };
        target.content = Some(edited);

        info!("[section {}] 💾 保存 part {}", section_id, part_id);
        self.apply(section_id, &parts, Some(part_id)).await
    }

    /// 不做修改，只重算并修正整个 section 的题号
    pub async fn renumber_section(&self, section_id: EntityId) -> AppResult<SectionSyncReport> {
        let parts = self.load_section(section_id).await?;
        self.apply(section_id, &parts, None).await
    }

    async fn apply(
        &self,
        section_id: EntityId,
        parts: &[NumberedPart],
        edited_part: Option<EntityId>,
    ) -> AppResult<SectionSyncReport> {
        let recalculation = recalculate_section(parts);

        let mut to_save: BTreeSet<EntityId> = recalculation.changed_part_ids.iter().copied().collect();
        to_save.extend(edited_part);

        let mut report = SectionSyncReport {
            section_id,
            vacated_ordinals: recalculation.vacated_ordinals.clone(),
            total_questions: recalculation.total_questions,
            ..Default::default()
        };

        for part in recalculation.parts.iter().filter(|p| to_save.contains(&p.part_id)) {
            let Some(content) = part.content.as_ref() else {
                continue;
            };
            let envelope = PartContentEnvelope {
                admin: content.clone(),
                user: strip_answers(content),
            };
            self.api.save_part_content(part.part_id, &envelope).await?;
            report.saved_part_ids.push(part.part_id);
        }

        let (upserted, deleted) = self
            .sync_question_records(section_id, &recalculation, &to_save)
            .await?;
        report.upserted_questions = upserted;
        report.deleted_questions = deleted;

        log_report(&report);
        Ok(report)
    }

    /// 同步题号记录，返回 (更新数, 删除数)
    async fn sync_question_records(
        &self,
        section_id: EntityId,
        recalculation: &SectionRecalculation,
        saved: &BTreeSet<EntityId>,
    ) -> AppResult<(usize, usize)> {
        let mut upserted = 0;
        for part in recalculation.parts.iter().filter(|p| saved.contains(&p.part_id)) {
            let Some(content) = part.content.as_ref() else {
                continue;
            };
            for (ord, answers) in ordinal_answers(content) {
                self.api
                    .create_or_update_question(section_id, part.part_id, ord, &answers)
                    .await?;
                upserted += 1;
            }
        }

        let existing = self.api.get_all_questions(section_id).await?;
        let mut deleted = 0;
        for record in existing.iter().filter(|r| {
            recalculation.vacated_ordinals.contains(&r.ord) || r.ord > recalculation.total_questions
        }) {
            match self.api.delete_question(record.id).await {
                Ok(()) => deleted += 1,
                Err(e) => warn!(
                    "[section {}] ⚠️ 删除题号 {} 的记录失败: {}",
                    section_id, record.ord, e
                ),
            }
        }

        Ok((upserted, deleted))
    }
}

/// 读取 section 的所有 part，逐个取内容并规范化
///
/// 作答端和编辑端共用；内容无法解析的 part 视为还没有内容。
pub async fn load_section_parts<A>(api: &A, section_id: EntityId) -> AppResult<Vec<NumberedPart>>
where
    A: ContentApi + ?Sized,
{
    let mut parts = api.get_all_parts(section_id).await?;
    parts.sort_by_key(|p| p.ord);

    let mut numbered = Vec::with_capacity(parts.len());
    for part in parts {
        let response = api.get_part_content(part.id).await?;
        let raw = response.content.or(part.content).unwrap_or(Value::Null);
        let content = parse_part_content(&raw);
        if content.is_none() {
            debug!("[section {}] part {} 还没有内容", section_id, part.id);
        }
        numbered.push(NumberedPart::new(part.id, part.ord, content));
    }

    Ok(numbered)
}

/// 去掉题目和题组上的正确答案，用于作答端展示
pub fn strip_answers(content: &PartContent) -> PartContent {
    let mut stripped = content.clone();
    for group in stripped.question_groups.iter_mut() {
        for field in ANSWER_FIELDS {
            group.extra.remove(field);
        }
        for question in group.questions.iter_mut() {
            question.correct_answer = None;
            question.correct_answers = None;
        }
    }
    stripped
}

/// 每个已编写题目的题号及其正确答案
pub fn ordinal_answers(content: &PartContent) -> Vec<(u32, Vec<String>)> {
    content
        .question_groups
        .iter()
        .filter_map(|group| {
            let (start, _) = group.range.as_deref().and_then(parse_range)?;
            Some(group_ordinal_answers(group, start))
        })
        .flatten()
        .collect()
}

fn group_ordinal_answers(group: &QuestionGroup, start: u32) -> Vec<(u32, Vec<String>)> {
    if !group.is_placeholder_bearing() {
        return group
            .questions
            .iter()
            .enumerate()
            .map(|(i, q)| {
                let source = q.correct_answers.as_ref().or(q.correct_answer.as_ref());
                (start + i as u32, source.map(answer_strings).unwrap_or_default())
            })
            .collect();
    }

    // 占位符编号按升序依次对应题号，答案按编号查找
    let mut by_marker: BTreeMap<u32, Vec<String>> = BTreeMap::new();
    for question in &group.questions {
        let markers: Vec<u32> = extract_markers(&question.text).into_iter().collect();
        let source = question
            .correct_answers
            .as_ref()
            .or(question.correct_answer.as_ref());

        match source {
            Some(Value::Object(map)) => {
                for marker in &markers {
                    if let Some(value) = map.get(&marker.to_string()) {
                        by_marker.insert(*marker, answer_strings(value));
                    }
                }
            }
            Some(Value::Array(items)) => {
                for (marker, value) in markers.iter().zip(items) {
                    by_marker.insert(*marker, answer_strings(value));
                }
            }
            Some(value) if markers.len() == 1 => {
                by_marker.insert(markers[0], answer_strings(value));
            }
            _ => {}
        }
    }

    group_markers(group)
        .into_iter()
        .enumerate()
        .map(|(i, marker)| (start + i as u32, by_marker.remove(&marker).unwrap_or_default()))
        .collect()
}

/// 答案值 → 可接受答案列表
fn answer_strings(value: &Value) -> Vec<String> {
    match value {
        Value::Null => Vec::new(),
        Value::String(s) if s.trim().is_empty() => Vec::new(),
        Value::String(s) => vec![s.clone()],
        Value::Array(items) => items.iter().flat_map(answer_strings).collect(),
        other => vec![other.to_string()],
    }
}

fn log_report(report: &SectionSyncReport) {
    info!(
        "[section {}] ✓ 保存完成: part {:?}, 题号记录更新 {}, 删除 {}, 总题数 {}",
        report.section_id,
        report.saved_part_ids,
        report.upserted_questions,
        report.deleted_questions,
        report.total_questions
    );
}
