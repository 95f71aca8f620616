//! 部分内容模型（题组 / 题目）
//!
//! 内容在服务端是任意层级序列化的 JSON，这里的类型只描述规范化之后的形态，
//! 未识别的字段原样保存在 `extra` 中，保存回服务端时不会丢失。

use phf::phf_map;
use serde::de::value::{MapAccessDeserializer, SeqAccessDeserializer};
use serde::de::{MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// 题型
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum GroupType {
    /// 单选
    MultipleChoice,
    /// 判断（True / False / Not Given）
    TrueFalseNotGiven,
    /// 判断（Yes / No / Not Given）
    YesNoNotGiven,
    /// 标题匹配
    MatchHeading,
    /// 句子填空
    SentenceCompletion,
    /// 摘要填空
    SummaryCompletion,
    /// 简答（富文本占位符）
    ShortAnswer,
    /// 矩阵表格
    MatrixTable,
    /// 表格填空
    TableCompletion,
    /// 多选
    MultipleCorrectAnswers,
    /// 图片填空
    ImageInputs,
    /// 未识别的题型，原样保留
    Other(String),
}

/// 题型的所有历史写法
static GROUP_TYPE_ALIASES: phf::Map<&'static str, GroupType> = phf_map! {
    "multiple-choice" => GroupType::MultipleChoice,
    "multiple_choice" => GroupType::MultipleChoice,
    "multipleChoice" => GroupType::MultipleChoice,
    "mcq" => GroupType::MultipleChoice,
    "true-false-not-given" => GroupType::TrueFalseNotGiven,
    "true_false_not_given" => GroupType::TrueFalseNotGiven,
    "trueFalseNotGiven" => GroupType::TrueFalseNotGiven,
    "tfng" => GroupType::TrueFalseNotGiven,
    "yes-no-not-given" => GroupType::YesNoNotGiven,
    "yes_no_not_given" => GroupType::YesNoNotGiven,
    "yesNoNotGiven" => GroupType::YesNoNotGiven,
    "ynng" => GroupType::YesNoNotGiven,
    "match-heading" => GroupType::MatchHeading,
    "match_heading" => GroupType::MatchHeading,
    "matchHeading" => GroupType::MatchHeading,
    "matching-headings" => GroupType::MatchHeading,
    "sentence-completion" => GroupType::SentenceCompletion,
    "sentence_completion" => GroupType::SentenceCompletion,
    "sentenceCompletion" => GroupType::SentenceCompletion,
    "summary-completion" => GroupType::SummaryCompletion,
    "summary_completion" => GroupType::SummaryCompletion,
    "summaryCompletion" => GroupType::SummaryCompletion,
    "short-answer" => GroupType::ShortAnswer,
    "short_answer" => GroupType::ShortAnswer,
    "shortAnswer" => GroupType::ShortAnswer,
    "matrix-table" => GroupType::MatrixTable,
    "matrix_table" => GroupType::MatrixTable,
    "matrixTable" => GroupType::MatrixTable,
    "table-completion" => GroupType::TableCompletion,
    "table_completion" => GroupType::TableCompletion,
    "tableCompletion" => GroupType::TableCompletion,
    "multiple-correct-answers" => GroupType::MultipleCorrectAnswers,
    "multiple_correct_answers" => GroupType::MultipleCorrectAnswers,
    "multipleCorrectAnswers" => GroupType::MultipleCorrectAnswers,
    "image-inputs" => GroupType::ImageInputs,
    "image_inputs" => GroupType::ImageInputs,
    "imageInputs" => GroupType::ImageInputs,
};

impl GroupType {
    /// 解析题型，未知写法保留为 `Other`
    pub fn parse(s: &str) -> Self {
        let trimmed = s.trim();
        GROUP_TYPE_ALIASES
            .get(trimmed)
            .cloned()
            .unwrap_or_else(|| GroupType::Other(trimmed.to_string()))
    }

    /// 规范名称（kebab-case）
    pub fn as_str(&self) -> &str {
        match self {
            GroupType::MultipleChoice => "multiple-choice",
            GroupType::TrueFalseNotGiven => "true-false-not-given",
            GroupType::YesNoNotGiven => "yes-no-not-given",
            GroupType::MatchHeading => "match-heading",
            GroupType::SentenceCompletion => "sentence-completion",
            GroupType::SummaryCompletion => "summary-completion",
            GroupType::ShortAnswer => "short-answer",
            GroupType::MatrixTable => "matrix-table",
            GroupType::TableCompletion => "table-completion",
            GroupType::MultipleCorrectAnswers => "multiple-correct-answers",
            GroupType::ImageInputs => "image-inputs",
            GroupType::Other(name) => name,
        }
    }

    /// 题号是否来自富文本中的占位符（而不是题目对象的个数）
    pub fn is_placeholder_bearing(&self) -> bool {
        matches!(
            self,
            GroupType::ShortAnswer
                | GroupType::SentenceCompletion
                | GroupType::SummaryCompletion
                | GroupType::TableCompletion
        )
    }
}

impl From<String> for GroupType {
    fn from(s: String) -> Self {
        GroupType::parse(&s)
    }
}

impl From<GroupType> for String {
    fn from(t: GroupType) -> Self {
        t.as_str().to_string()
    }
}

impl fmt::Display for GroupType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 单道题目
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Question {
    #[serde(default, deserialize_with = "deserialize_lenient_string")]
    pub text: String,
    #[serde(rename = "correctAnswer", default, skip_serializing_if = "Option::is_none")]
    pub correct_answer: Option<Value>,
    #[serde(rename = "correctAnswers", default, skip_serializing_if = "Option::is_none")]
    pub correct_answers: Option<Value>,
    /// 选项等题型相关数据
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Question {
    pub fn with_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }
}

/// 题组：拥有一段连续题号
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionGroup {
    #[serde(
        rename = "type",
        default,
        deserialize_with = "deserialize_group_type",
        skip_serializing_if = "Option::is_none"
    )]
    pub group_type: Option<GroupType>,
    #[serde(default, deserialize_with = "deserialize_lenient_string")]
    pub instruction: String,
    /// 形如 "11-15" 的题号范围
    #[serde(
        default,
        deserialize_with = "deserialize_optional_lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub range: Option<String>,
    #[serde(default)]
    pub questions: Vec<Question>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl QuestionGroup {
    pub fn new(group_type: GroupType, questions: Vec<Question>) -> Self {
        Self {
            group_type: Some(group_type),
            instruction: String::new(),
            range: None,
            questions,
            extra: Map::new(),
        }
    }

    pub fn is_placeholder_bearing(&self) -> bool {
        self.group_type
            .as_ref()
            .map(GroupType::is_placeholder_bearing)
            .unwrap_or(false)
    }
}

/// 规范化之后的部分内容 `{ questionGroups: [...], ...其他字段 }`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PartContent {
    #[serde(rename = "questionGroups", default)]
    pub question_groups: Vec<QuestionGroup>,
    /// 文章 / 说明等
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PartContent {
    pub fn new(question_groups: Vec<QuestionGroup>) -> Self {
        Self {
            question_groups,
            extra: Map::new(),
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

// 编辑器保存的字段类型并不稳定（数字 / 字符串 / null / 对象都出现过），统一读成字符串；
// 对象和数组保留为 JSON 文本，一个字段异常不能让整个 part 解析失败
struct LenientStringVisitor;

impl<'de> Visitor<'de> for LenientStringVisitor {
    type Value = Option<String>;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("any JSON value")
    }

    fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        Ok(Some(value.to_string()))
    }

    fn visit_string<E>(self, value: String) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        Ok(Some(value))
    }

    fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        Ok(Some(value.to_string()))
    }

    fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        Ok(Some(value.to_string()))
    }

    fn visit_f64<E>(self, value: f64) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        Ok(Some(value.to_string()))
    }

    fn visit_bool<E>(self, value: bool) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        Ok(Some(value.to_string()))
    }

    fn visit_unit<E>(self) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        Ok(None)
    }

    fn visit_none<E>(self) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        Ok(None)
    }

    fn visit_seq<A>(self, seq: A) -> Result<Self::Value, A::Error>
    where
        A: SeqAccess<'de>,
    {
        let value = Value::deserialize(SeqAccessDeserializer::new(seq))?;
        Ok(Some(value.to_string()))
    }

    fn visit_map<A>(self, map: A) -> Result<Self::Value, A::Error>
    where
        A: MapAccess<'de>,
    {
        let value = Value::deserialize(MapAccessDeserializer::new(map))?;
        Ok(Some(value.to_string()))
    }

    fn visit_some<D>(self, deserializer: D) -> Result<Self::Value, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(self)
    }
}

fn deserialize_optional_lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_any(LenientStringVisitor)
}

fn deserialize_lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(deserializer
        .deserialize_any(LenientStringVisitor)?
        .unwrap_or_default())
}

fn deserialize_group_type<'de, D>(deserializer: D) -> Result<Option<GroupType>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(deserializer
        .deserialize_any(LenientStringVisitor)?
        .filter(|s| !s.trim().is_empty())
        .map(|s| GroupType::parse(&s)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_group_type_aliases() {
        assert_eq!(GroupType::parse("short_answer"), GroupType::ShortAnswer);
        assert_eq!(GroupType::parse("matchHeading"), GroupType::MatchHeading);
        assert_eq!(GroupType::parse(" tfng "), GroupType::TrueFalseNotGiven);
        assert_eq!(
            GroupType::parse("diagram-label"),
            GroupType::Other("diagram-label".to_string())
        );
        assert!(GroupType::ShortAnswer.is_placeholder_bearing());
        assert!(!GroupType::MultipleChoice.is_placeholder_bearing());
    }

    #[test]
    fn test_unknown_fields_survive() {
        let raw = json!({
            "passage": "<p>text</p>",
            "questionGroups": [{
                "type": "multipleChoice",
                "instruction": "Choose",
                "questions": [{ "text": "Q1", "options": ["A", "B"], "correctAnswer": "A" }]
            }]
        });

        let content: PartContent = serde_json::from_value(raw).unwrap();
        assert_eq!(content.extra["passage"], json!("<p>text</p>"));

        let back = content.to_value();
        assert_eq!(back["questionGroups"][0]["type"], json!("multiple-choice"));
        assert_eq!(back["questionGroups"][0]["questions"][0]["options"], json!(["A", "B"]));
        assert_eq!(back["questionGroups"][0]["questions"][0]["correctAnswer"], json!("A"));
    }

    #[test]
    fn test_lenient_scalar_fields() {
        let group: QuestionGroup = serde_json::from_value(json!({
            "type": "",
            "instruction": null,
            "range": 7,
            "questions": [{ "text": 12 }]
        }))
        .unwrap();

        assert_eq!(group.group_type, None);
        assert_eq!(group.instruction, "");
        assert_eq!(group.range.as_deref(), Some("7"));
        assert_eq!(group.questions[0].text, "12");
    }

    #[test]
    fn test_structured_scalar_fields_kept_as_json_text() {
        let group: QuestionGroup = serde_json::from_value(json!({
            "type": "short-answer",
            "instruction": { "html": "<b>Write ONE WORD</b>" },
            "range": ["1", "2"],
            "questions": [{ "text": { "html": "<p>[1] and [2]</p>" } }]
        }))
        .unwrap();

        assert_eq!(group.instruction, r#"{"html":"<b>Write ONE WORD</b>"}"#);
        assert_eq!(group.range.as_deref(), Some(r#"["1","2"]"#));
        assert!(group.questions[0].text.contains("[1] and [2]"));
    }
}
