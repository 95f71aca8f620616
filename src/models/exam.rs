use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::content::PartContent;

/// 实体 ID（服务端自增主键）
pub type EntityId = i64;

/// 部分类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SectionType {
    /// 阅读
    Reading,
    /// 听力
    Listening,
    /// 写作
    Writing,
}

/// 试卷
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Test {
    pub id: EntityId,
    pub name: String,
    #[serde(default)]
    pub sections: Vec<Section>,
}

/// 试卷中的一个部分（阅读 / 听力 / 写作）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Section {
    pub id: EntityId,
    #[serde(default)]
    pub test_id: Option<EntityId>,
    pub section_type: SectionType,
    #[serde(default)]
    pub title: Option<String>,
    /// 作答时间限制（秒）
    #[serde(default)]
    pub time_limit_seconds: Option<u32>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

/// section 内按 `ord` 排序的一个 part
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    pub id: EntityId,
    #[serde(default)]
    pub section_id: Option<EntityId>,
    pub ord: u32,
    #[serde(default)]
    pub title: Option<String>,
    /// 服务端保存的原始内容（可能是多层序列化的字符串）
    #[serde(default)]
    pub content: Option<Value>,
    #[serde(default)]
    pub question_range: Option<String>,
}

/// `getPartContent` 的响应
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PartContentResponse {
    #[serde(default)]
    pub content: Option<Value>,
}

/// `savePartContent` 的请求体：admin 保留正确答案，user 为去掉答案后的版本
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartContentEnvelope {
    pub admin: PartContent,
    pub user: PartContent,
}

/// `getAllQuestions` 返回的题目记录（每个题号一条）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionRecord {
    pub id: EntityId,
    pub ord: u32,
    pub part_id: EntityId,
    #[serde(default)]
    pub answers: Vec<String>,
}

/// 一次作答会话的标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionIds {
    pub mock_id: EntityId,
    pub section_id: EntityId,
}

impl SessionIds {
    pub fn new(mock_id: EntityId, section_id: EntityId) -> Self {
        Self { mock_id, section_id }
    }
}

impl std::fmt::Display for SessionIds {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.mock_id, self.section_id)
    }
}
