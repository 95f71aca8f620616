//! # Mock Exam Session
//!
//! 模考作答会话与题号编排引擎
//!
//! ## 架构设计
//!
//! 本系统采用严格的四层架构：
//!
//! ### ① 基础设施层（Infrastructure / Clients）
//! - `infrastructure/` - 本地持久化（计时器、未送达答案）
//! - `clients/` - 考试服务的远程接口（`ContentApi` / `AuthoringApi` / `SessionApi`）及 HTTP 实现
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"，不持有会话
//! - `content_normalizer` - 多层序列化内容的规范化
//! - `question_numbering` - 题号计数与整段重算
//! - `AnswerSyncQueue` - 答案提交、重试、丢弃与恢复
//! - `SessionTimer` - 1 Hz 计时与持久化
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义"保存一个 part"的完整流程
//! - `AuthoringFlow` - 校验 → 规范化 → 重算题号 → 保存 → 同步题号记录
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/test_session` - 一次作答会话，持有答案队列和计时器
//!
//! ## 模块结构

pub mod clients;
pub mod config;
pub mod error;
pub mod infrastructure;

pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use clients::{AuthoringApi, ContentApi, ExamClient, SessionApi};
pub use config::Config;
pub use error::{AppError, AppResult};
pub use infrastructure::{FileStore, KeyValueStore, MemoryStore};
pub use models::{AnswerValue, GroupType, PartContent, Question, QuestionGroup, SessionIds};
pub use orchestrator::{SessionPhase, TestSessionStore};
pub use services::{normalize_content, recalculate_section, AnswerSyncQueue, SessionTimer};
pub use workflow::{AuthoringFlow, SectionSyncReport};
