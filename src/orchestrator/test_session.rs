//! 作答会话 - 编排层
//!
//! ## 职责
//!
//! 每次作答创建一个 `TestSessionStore`，持有该会话的全部状态：
//! - 已编号的 part 列表（题号定位）
//! - 答案同步队列
//! - 计时器
//! - 回看模式下的已提交答案和判分结果
//!
//! ## 生命周期
//!
//! ```text
//! Loading ──start──▶ Active ──finish_session / 到时──▶ Finished
//!    └──────────────────┴────────── dispose ──────────▶ Disposed
//! ```
//!
//! 到时和手动交卷走同一个结束流程，只会执行一次。
//! 阶段变化通过 `watch` 通道推送，界面订阅即可，不需要轮询。

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::clients::{ContentApi, SessionApi};
use crate::config::Config;
use crate::error::{AppResult, SessionError};
use crate::infrastructure::{FileStore, KeyValueStore};
use crate::models::{AnswerValue, EntityId, PendingAnswer, SessionIds, SubmittedAnswer};
use crate::services::question_numbering::{recalculate_section, NumberedPart};
use crate::services::{AnswerSyncQueue, SessionTimer};
use crate::utils::logging::{log_session_finish, log_session_start};
use crate::workflow::load_section_parts;

/// 会话阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Loading,
    Active,
    Finished,
    Disposed,
}

/// 回看模式得分
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReviewScore {
    pub correct: usize,
    /// 已判分的题数（`is_correct` 不为空）
    pub graded: usize,
    pub total: usize,
}

/// 手动交卷和到时交卷共用的结束流程
#[derive(Clone)]
struct Finalizer {
    api: Arc<dyn SessionApi>,
    queue: AnswerSyncQueue,
    phase: Arc<watch::Sender<SessionPhase>>,
    last_error: Arc<Mutex<Option<String>>>,
}

impl Finalizer {
    /// 抢占结束权：只有 Active 能进入 Finished
    fn claim(&self) -> Result<(), SessionError> {
        let mut claimed = false;
        self.phase.send_if_modified(|phase| {
            if *phase == SessionPhase::Active {
                *phase = SessionPhase::Finished;
                claimed = true;
            }
            claimed
        });

        if claimed {
            return Ok(());
        }
        match *self.phase.borrow() {
            SessionPhase::Disposed => Err(SessionError::Disposed),
            _ => Err(SessionError::AlreadyFinished),
        }
    }

    /// 通知服务端结束 section；失败时记录错误，本地仍视为已结束
    async fn finish_remote(&self, ids: SessionIds) -> AppResult<()> {
        let result = self.api.finish_section(ids).await;

        let answered = self.queue.answers().values().filter(|v| !v.is_blank()).count();
        let dropped = self.queue.dropped_answers().len();
        log_session_finish(ids.mock_id, ids.section_id, answered, dropped);

        if let Err(e) = &result {
            error!("[会话 {}] ❌ 结束 section 失败: {}", ids, e);
            *self.lock_error() = Some(e.to_string());
        }
        result
    }

    /// 到时强制交卷
    async fn expire(self, ids: SessionIds) {
        if self.claim().is_err() {
            return;
        }
        info!("[会话 {}] ⏰ 时间到，自动交卷", ids);
        self.queue.flush().await;
        let _ = self.finish_remote(ids).await;
    }

    fn lock_error(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        self.last_error.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// 一次作答会话
pub struct TestSessionStore {
    config: Config,
    store: Arc<dyn KeyValueStore>,
    queue: AnswerSyncQueue,
    timer: Option<SessionTimer>,
    ids: Option<SessionIds>,
    parts: Vec<NumberedPart>,
    current_part: Option<usize>,
    submitted_answers: BTreeMap<u32, AnswerValue>,
    answer_correctness: BTreeMap<u32, Option<bool>>,
    finalizer: Finalizer,
}

impl TestSessionStore {
    pub fn new(config: Config, api: Arc<dyn SessionApi>, store: Arc<dyn KeyValueStore>) -> Self {
        let queue = AnswerSyncQueue::new(&config, Arc::clone(&api), Arc::clone(&store));
        let (phase, _) = watch::channel(SessionPhase::Loading);

        Self {
            config,
            store,
            queue: queue.clone(),
            timer: None,
            ids: None,
            parts: Vec::new(),
            current_part: None,
            submitted_answers: BTreeMap::new(),
            answer_correctness: BTreeMap::new(),
            finalizer: Finalizer {
                api,
                queue,
                phase: Arc::new(phase),
                last_error: Arc::new(Mutex::new(None)),
            },
        }
    }

    /// 使用配置中的 `storage_path` 作为持久化存储
    pub fn with_file_store(config: Config, api: Arc<dyn SessionApi>) -> Self {
        let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::from_config(&config));
        Self::new(config, api, store)
    }

    // ========== 内容 ==========

    /// 从服务端读取 section 内容并编号
    pub async fn load_section<A>(&mut self, api: &A, section_id: EntityId) -> AppResult<()>
    where
        A: ContentApi + ?Sized,
    {
        let parts = load_section_parts(api, section_id).await?;
        self.load_parts(parts);
        Ok(())
    }

    /// 使用已规范化的 part 列表；题号会重新计算，不依赖存储的范围
    pub fn load_parts(&mut self, parts: Vec<NumberedPart>) {
        let recalculation = recalculate_section(&parts);
        if !recalculation.changed_part_ids.is_empty() {
            warn!(
                "⚠️ 存储的题号范围与实际题数不一致，已在本地修正: part {:?}",
                recalculation.changed_part_ids
            );
        }

        info!(
            "📚 已加载 {} 个 part，共 {} 题",
            recalculation.parts.len(),
            recalculation.total_questions
        );
        self.current_part = if recalculation.parts.is_empty() { None } else { Some(0) };
        self.parts = recalculation.parts;
    }

    pub fn parts(&self) -> &[NumberedPart] {
        &self.parts
    }

    pub fn current_part(&self) -> Option<&NumberedPart> {
        self.current_part.and_then(|index| self.parts.get(index))
    }

    /// 包含该题号的 part
    pub fn part_for(&self, ordinal: u32) -> Option<&NumberedPart> {
        self.parts.iter().find(|part| part.contains(ordinal))
    }

    /// 跳转到题号所在的 part；题号不存在时保持当前 part 不变
    pub fn go_to_question(&mut self, ordinal: u32) -> Option<&NumberedPart> {
        let Some(index) = self.parts.iter().position(|part| part.contains(ordinal)) else {
            warn!("⚠️ 题号 {} 不在任何 part 中", ordinal);
            return None;
        };
        self.current_part = Some(index);
        self.parts.get(index)
    }

    // ========== 会话 ==========

    pub fn set_session_ids(&mut self, ids: SessionIds) {
        self.ids = Some(ids);
        self.queue.set_session_ids(ids);
    }

    pub fn session_ids(&self) -> Option<SessionIds> {
        self.ids
    }

    /// 开始计时，进入 Active
    pub fn start(&mut self, limit_seconds: u32) -> AppResult<()> {
        let ids = self.ids.ok_or(SessionError::MissingSessionIds)?;
        match self.phase() {
            SessionPhase::Loading => {}
            SessionPhase::Active => return Ok(()),
            SessionPhase::Finished => return Err(SessionError::AlreadyFinished.into()),
            SessionPhase::Disposed => return Err(SessionError::Disposed.into()),
        }

        let mut timer = SessionTimer::new(&self.config, Arc::clone(&self.store), ids);
        let finalizer = self.finalizer.clone();
        self.finalizer.phase.send_replace(SessionPhase::Active);
        // 交卷在独立任务中进行，之后停止计时器不会中断它
        timer.start(limit_seconds, move || async move {
            tokio::spawn(finalizer.expire(ids));
        });

        log_session_start(ids.mock_id, ids.section_id, timer.remaining());
        self.timer = Some(timer);
        Ok(())
    }

    pub fn phase(&self) -> SessionPhase {
        *self.finalizer.phase.borrow()
    }

    /// 订阅阶段变化（例如到时自动交卷）
    pub fn subscribe(&self) -> watch::Receiver<SessionPhase> {
        self.finalizer.phase.subscribe()
    }

    pub fn remaining_seconds(&self) -> Option<u32> {
        self.timer.as_ref().map(SessionTimer::remaining)
    }

    /// 最近一次结束 section 失败的原因
    pub fn last_finish_error(&self) -> Option<String> {
        self.finalizer.lock_error().clone()
    }

    /// 交卷：提交剩余答案 → 停止计时 → 通知服务端
    ///
    /// 服务端调用失败时返回错误，但会话在本地仍然结束。
    pub async fn finish_session(&mut self) -> AppResult<()> {
        let ids = self.ids.ok_or(SessionError::MissingSessionIds)?;
        self.finalizer.claim()?;

        info!("[会话 {}] 📤 交卷", ids);
        self.queue.flush().await;

        if let Some(timer) = self.timer.as_mut() {
            timer.stop();
            if let Err(e) = timer.clear() {
                warn!("⚠️ 清除计时器存储失败: {}", e);
            }
        }

        self.finalizer.finish_remote(ids).await
    }

    /// 释放会话：停止计时并清空答案队列
    ///
    /// 未结束的会话会保存剩余时间，重新进入时可以继续。
    pub fn dispose(&mut self) {
        if let Some(mut timer) = self.timer.take() {
            timer.stop();
        }
        self.queue.reset();
        self.finalizer.phase.send_replace(SessionPhase::Disposed);
        info!("会话已释放");
    }

    // ========== 答案 ==========

    pub fn set_answer(&self, ordinal: u32, value: impl Into<AnswerValue>) -> AppResult<()> {
        match self.phase() {
            SessionPhase::Finished => Err(SessionError::AlreadyFinished.into()),
            SessionPhase::Disposed => Err(SessionError::Disposed.into()),
            _ => {
                self.queue.set_answer(ordinal, value.into());
                Ok(())
            }
        }
    }

    pub fn get_answer(&self, ordinal: u32) -> Option<AnswerValue> {
        self.queue.get_answer(ordinal)
    }

    pub fn answers(&self) -> BTreeMap<u32, AnswerValue> {
        self.queue.answers()
    }

    pub fn pending_count(&self) -> usize {
        self.queue.pending_count()
    }

    /// 当前答案是否已确认送达
    pub fn is_acked(&self, ordinal: u32) -> bool {
        self.queue.is_acked(ordinal)
    }

    /// 提交失败被丢弃的答案，界面用来提示
    pub fn dropped_answers(&self) -> Vec<PendingAnswer> {
        self.queue.dropped_answers()
    }

    /// 重新提交被丢弃的答案，返回重新排队的数量
    pub async fn retry_dropped(&self) -> usize {
        let count = self.queue.requeue_dropped();
        if count > 0 {
            self.queue.process_pending().await;
        }
        count
    }

    // ========== 回看 ==========

    /// 载入评分服务返回的已提交答案，不影响作答答案表
    pub fn load_review(&mut self, submitted: Vec<SubmittedAnswer>) {
        self.submitted_answers.clear();
        self.answer_correctness.clear();

        for item in submitted {
            self.answer_correctness.insert(item.ordinal, item.is_correct);
            self.submitted_answers.insert(item.ordinal, item.answer);
        }
        info!("📖 回看模式: {} 道题", self.submitted_answers.len());
    }

    pub fn submitted_answer(&self, ordinal: u32) -> Option<&AnswerValue> {
        self.submitted_answers.get(&ordinal)
    }

    /// `None` 表示没有该题，`Some(None)` 表示该题尚未判分
    pub fn answer_correctness(&self, ordinal: u32) -> Option<Option<bool>> {
        self.answer_correctness.get(&ordinal).copied()
    }

    pub fn review_score(&self) -> ReviewScore {
        let graded: Vec<bool> = self.answer_correctness.values().flatten().copied().collect();
        ReviewScore {
            correct: graded.iter().filter(|c| **c).count(),
            graded: graded.len(),
            total: self.answer_correctness.len(),
        }
    }
}
