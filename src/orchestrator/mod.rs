//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 持有一次作答会话的全部状态，把各项业务能力串成完整的会话生命周期。
//!
//! ## 模块划分
//!
//! ### `test_session` - 作答会话
//! - 加载 section 内容并编号
//! - 答案同步（委托 `AnswerSyncQueue`）
//! - 计时与到时交卷（委托 `SessionTimer`）
//! - 题号定位（`go_to_question`）
//! - 回看模式
//!
//! ## 层次关系
//!
//! ```text
//! test_session (一次作答)
//!     ↓
//! workflow (读取并规范化 section)
//!     ↓
//! services (能力层：normalize / numbering / answer sync / timer)
//!     ↓
//! infrastructure + clients (存储、远程接口)
//! ```
//!
//! ## 设计原则
//!
//! 1. **一次会话一个对象**：不同会话之间不共享状态
//! 2. **显式释放**：`dispose()` 停止计时并清空队列
//! 3. **向下依赖**：编排层 → workflow → services → infrastructure

pub mod test_session;

pub use test_session::{ReviewScore, SessionPhase, TestSessionStore};
