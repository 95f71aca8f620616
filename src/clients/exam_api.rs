//! 考试服务的远程接口
//!
//! 核心逻辑只依赖这些 trait，不关心传输方式。

use async_trait::async_trait;

use crate::error::AppResult;
use crate::models::{EntityId, Part, PartContentEnvelope, PartContentResponse, QuestionRecord, SessionIds};

/// 读取内容（作答时和编辑时都会用到）
#[async_trait]
pub trait ContentApi: Send + Sync {
    /// 读取 part 的原始内容，可能是多层序列化的字符串，也可能为空
    async fn get_part_content(&self, part_id: EntityId) -> AppResult<PartContentResponse>;

    /// 读取 section 的所有 part（按 `ord` 排序）
    async fn get_all_parts(&self, section_id: EntityId) -> AppResult<Vec<Part>>;
}

/// 编辑端写入
#[async_trait]
pub trait AuthoringApi: ContentApi {
    /// 保存规范化后的内容
    async fn save_part_content(&self, part_id: EntityId, envelope: &PartContentEnvelope) -> AppResult<()>;

    /// 读取 section 下所有题号记录
    async fn get_all_questions(&self, section_id: EntityId) -> AppResult<Vec<QuestionRecord>>;

    /// 按 (section, ord) 新建或更新题号记录
    async fn create_or_update_question(
        &self,
        section_id: EntityId,
        part_id: EntityId,
        ord: u32,
        answers: &[String],
    ) -> AppResult<()>;

    async fn delete_question(&self, question_id: EntityId) -> AppResult<()>;
}

/// 作答端写入
#[async_trait]
pub trait SessionApi: Send + Sync {
    /// 提交单个题号的答案，对 (mockId, sectionId, ord) 幂等，后写覆盖先写
    async fn send_answer(&self, ids: SessionIds, question_ord: u32, answer: &str) -> AppResult<()>;

    /// 结束 section
    async fn finish_section(&self, ids: SessionIds) -> AppResult<()>;
}
