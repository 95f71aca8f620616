//! 答案同步队列 - 业务能力层
//!
//! 学生每次修改答案：
//! 1. 立即写入本地答案表（界面马上能读到，不受网络影响）
//! 2. 会话标识已知时立刻后台提交；未知时先放入待提交集合，标识到位后自动处理
//!
//! 单个题号的状态：`Unsent → Sending → {Acked | Failed}`，失败后退避重试，
//! 超过重试上限变为 `Dropped`：从待提交集合移除，但会保存到本地存储，
//! 界面可以提示学生，也可以通过 `requeue_dropped` 重新提交。
//!
//! 不保证不同题号之间的提交顺序，只保证每个题号最终尝试提交的是本地最新值；
//! 服务端按 (sessionId, ordinal) 幂等。

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::clients::SessionApi;
use crate::config::Config;
use crate::infrastructure::KeyValueStore;
use crate::models::{AnswerValue, DeliveryState, PendingAnswer, SessionIds};
use crate::utils::truncate_text;

/// 本地存储中未送达答案的键
pub fn dropped_answers_key(ids: SessionIds) -> String {
    format!("dropped_answers:{}:{}", ids.mock_id, ids.section_id)
}

#[derive(Debug)]
struct PendingEntry {
    answer: PendingAnswer,
    /// 是否已有任务在负责投递（包括退避等待期间）
    claimed: bool,
}

#[derive(Debug, Default)]
struct QueueState {
    ids: Option<SessionIds>,
    answers: BTreeMap<u32, AnswerValue>,
    pending: BTreeMap<u32, PendingEntry>,
    dropped: BTreeMap<u32, PendingAnswer>,
    /// 每个题号最近一次确认送达的值
    acked: BTreeMap<u32, PendingAnswer>,
    next_version: u64,
    /// reset 之后递增，旧任务的结果直接丢弃
    epoch: u64,
}

struct QueueInner {
    api: Arc<dyn SessionApi>,
    store: Arc<dyn KeyValueStore>,
    max_retries: u32,
    retry_delay: Duration,
    state: Mutex<QueueState>,
    in_flight: Mutex<Vec<JoinHandle<()>>>,
}

/// 投递一次之后的下一步
enum Next {
    Done,
    Resend,
    Retry(Duration),
}

/// 答案同步队列
///
/// 克隆开销很小，所有克隆共享同一份会话状态。
#[derive(Clone)]
pub struct AnswerSyncQueue {
    inner: Arc<QueueInner>,
}

impl AnswerSyncQueue {
    pub fn new(config: &Config, api: Arc<dyn SessionApi>, store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                api,
                store,
                max_retries: config.answer_max_retries,
                retry_delay: config.retry_delay(),
                state: Mutex::new(QueueState::default()),
                in_flight: Mutex::new(Vec::new()),
            }),
        }
    }

    /// 设置会话标识，并自动处理之前积压的答案
    pub fn set_session_ids(&self, ids: SessionIds) {
        {
            let mut state = self.inner.lock_state();
            state.ids = Some(ids);
            self.inner.restore_dropped(&mut state, ids);
        }
        info!("[会话 {}] 会话标识已就绪，开始处理积压答案", ids);

        let queue = self.clone();
        self.inner.spawn_tracked(async move {
            queue.process_pending().await;
        });
    }

    pub fn session_ids(&self) -> Option<SessionIds> {
        self.inner.lock_state().ids
    }

    /// 修改答案
    ///
    /// 同步更新本地答案表；空白答案不提交，同时撤销该题号尚未送达的旧值。
    pub fn set_answer(&self, ordinal: u32, value: AnswerValue) {
        let should_send = {
            let mut state = self.inner.lock_state();
            state.answers.insert(ordinal, value.clone());

            if value.is_blank() {
                state.pending.remove(&ordinal);
                debug!("题号 {} 答案为空，跳过提交", ordinal);
                return;
            }

            state.next_version += 1;
            let version = state.next_version;

            let entry = state.pending.entry(ordinal).or_insert_with(|| PendingEntry {
                answer: PendingAnswer::new(ordinal, value.clone(), version),
                claimed: false,
            });
            entry.answer.value = value;
            entry.answer.version = version;
            entry.answer.updated_at = Utc::now();
            let claimed = entry.claimed;

            if state.dropped.remove(&ordinal).is_some() {
                self.inner.persist_dropped(&state);
            }

            state.ids.is_some() && !claimed
        };

        if should_send {
            let inner = Arc::clone(&self.inner);
            self.inner.spawn_tracked(async move {
                inner.deliver(ordinal).await;
            });
        }
    }

    pub fn get_answer(&self, ordinal: u32) -> Option<AnswerValue> {
        self.inner.lock_state().answers.get(&ordinal).cloned()
    }

    /// 本地答案表快照
    pub fn answers(&self) -> BTreeMap<u32, AnswerValue> {
        self.inner.lock_state().answers.clone()
    }

    /// 尚未确认送达的答案
    pub fn pending_answers(&self) -> Vec<PendingAnswer> {
        self.inner
            .lock_state()
            .pending
            .values()
            .map(|entry| entry.answer.clone())
            .collect()
    }

    pub fn pending_count(&self) -> usize {
        self.inner.lock_state().pending.len()
    }

    /// 超过重试上限被丢弃的答案
    pub fn dropped_answers(&self) -> Vec<PendingAnswer> {
        self.inner.lock_state().dropped.values().cloned().collect()
    }

    /// 当前答案是否已经确认送达（之后再修改就不算）
    pub fn is_acked(&self, ordinal: u32) -> bool {
        let state = self.inner.lock_state();
        match (state.acked.get(&ordinal), state.answers.get(&ordinal)) {
            (Some(acked), Some(current)) => acked.value == *current,
            _ => false,
        }
    }

    /// 把丢弃的答案重新放回待提交集合（计数清零），返回数量
    ///
    /// 调用方随后通过 `flush` 或 `process_pending` 触发提交。
    pub fn requeue_dropped(&self) -> usize {
        let mut state = self.inner.lock_state();
        let dropped = std::mem::take(&mut state.dropped);
        let count = dropped.len();

        for (ordinal, answer) in dropped {
            if state.pending.contains_key(&ordinal) {
                continue;
            }
            state.next_version += 1;
            let version = state.next_version;
            state.pending.insert(
                ordinal,
                PendingEntry {
                    answer: PendingAnswer::new(ordinal, answer.value, version),
                    claimed: false,
                },
            );
        }

        self.inner.persist_dropped(&state);
        if count > 0 {
            info!("♻️ 已重新排队 {} 个未送达的答案", count);
        }
        count
    }

    /// 处理所有未在投递中的待提交答案，等待本轮全部结束
    pub async fn process_pending(&self) {
        let ordinals: Vec<u32> = {
            let state = self.inner.lock_state();
            if state.ids.is_none() {
                debug!("会话标识未设置，暂不处理积压答案");
                return;
            }
            state
                .pending
                .iter()
                .filter(|(_, entry)| !entry.claimed)
                .map(|(ordinal, _)| *ordinal)
                .collect()
        };

        if ordinals.is_empty() {
            return;
        }

        debug!("处理 {} 个积压答案", ordinals.len());
        join_all(
            ordinals
                .into_iter()
                .map(|ordinal| Arc::clone(&self.inner).deliver(ordinal)),
        )
        .await;
    }

    /// 结束会话前清空队列：等待所有进行中的提交，再把剩下的答案至少再尝试一次
    pub async fn flush(&self) {
        info!("📤 正在提交剩余答案...");
        self.inner.await_in_flight().await;
        self.process_pending().await;
        self.inner.await_in_flight().await;

        let state = self.inner.lock_state();
        info!(
            "✓ 答案提交完成: 未确认 {}, 未送达 {}",
            state.pending.len(),
            state.dropped.len()
        );
    }

    /// 重置会话：清空本地状态，进行中的请求不会被中止，但结果会被忽略
    pub fn reset(&self) {
        {
            let mut state = self.inner.lock_state();
            let epoch = state.epoch + 1;
            *state = QueueState {
                epoch,
                ..Default::default()
            };
        }
        self.inner.lock_in_flight().clear();
        debug!("答案队列已重置");
    }
}

impl QueueInner {
    fn lock_state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_in_flight(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 在当前运行时后台执行，并记录句柄供 flush 等待
    ///
    /// 不在 tokio 运行时中时不启动任务，答案留在待提交集合中。
    fn spawn_tracked<F>(&self, task: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let join = handle.spawn(task);
                let mut in_flight = self.lock_in_flight();
                in_flight.retain(|h| !h.is_finished());
                in_flight.push(join);
            }
            Err(_) => warn!("⚠️ 当前不在异步运行时中，答案将在下次 flush 时提交"),
        }
    }

    async fn await_in_flight(&self) {
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.lock_in_flight());
        for result in join_all(handles).await {
            if let Err(e) = result {
                warn!("⚠️ 答案提交任务异常结束: {}", e);
            }
        }
    }

    /// 负责一个题号直到送达、被丢弃或被撤销
    async fn deliver(self: Arc<Self>, ordinal: u32) {
        let epoch = {
            let mut state = self.lock_state();
            match state.pending.get_mut(&ordinal) {
                Some(entry) if !entry.claimed => entry.claimed = true,
                _ => return,
            }
            state.epoch
        };

        loop {
            let (ids, value, version) = {
                let mut state = self.lock_state();
                if state.epoch != epoch {
                    return;
                }
                let Some(ids) = state.ids else {
                    if let Some(entry) = state.pending.get_mut(&ordinal) {
                        entry.claimed = false;
                    }
                    return;
                };
                let Some(entry) = state.pending.get_mut(&ordinal) else {
                    return;
                };
                entry.answer.state = DeliveryState::Sending;
                entry.answer.attempts += 1;
                (ids, entry.answer.value.clone(), entry.answer.version)
            };

            let result = self.api.send_answer(ids, ordinal, &value.to_wire()).await;

            let next = {
                let mut state = self.lock_state();
                if state.epoch != epoch {
                    debug!("题号 {} 的提交结果已过期（会话已重置）", ordinal);
                    return;
                }
                self.after_attempt(&mut state, ordinal, version, result)
            };

            match next {
                Next::Done => return,
                Next::Resend => continue,
                Next::Retry(delay) => {
                    if !delay.is_zero() {
                        sleep(delay).await;
                    }
                }
            }
        }
    }

    fn after_attempt(
        &self,
        state: &mut QueueState,
        ordinal: u32,
        version: u64,
        result: crate::error::AppResult<()>,
    ) -> Next {
        let Some(entry) = state.pending.get_mut(&ordinal) else {
            // 投递期间答案被清空
            return Next::Done;
        };

        match result {
            Ok(()) if entry.answer.version == version => {
                debug!("✓ 题号 {} 答案已送达", ordinal);
                if let Some(mut acked) = state.pending.remove(&ordinal) {
                    acked.answer.state = DeliveryState::Acked;
                    acked.answer.failures = 0;
                    state.acked.insert(ordinal, acked.answer);
                }
                Next::Done
            }
            Ok(()) => {
                // 投递期间又被修改过，继续提交最新值；送达过说明网络正常，失败计数清零
                entry.answer.state = DeliveryState::Unsent;
                entry.answer.failures = 0;
                Next::Resend
            }
            Err(e) => {
                entry.answer.failures += 1;
                let failures = entry.answer.failures;
                if failures > self.max_retries {
                    let Some(mut removed) = state.pending.remove(&ordinal) else {
                        return Next::Done;
                    };
                    removed.answer.state = DeliveryState::Dropped;
                    error!(
                        "❌ 题号 {} 答案连续 {} 次提交失败，已放弃: {} (答案: {})",
                        ordinal,
                        failures,
                        e,
                        truncate_text(&removed.answer.value.to_wire(), 40)
                    );
                    state.dropped.insert(ordinal, removed.answer);
                    self.persist_dropped(state);
                    return Next::Done;
                }

                entry.answer.state = DeliveryState::Failed;
                let delay = self.retry_delay * 2u32.saturating_pow(failures - 1);
                warn!(
                    "⚠️ 题号 {} 答案提交失败 (尝试 {}/{}, {}): {}，{:?} 后重试",
                    ordinal,
                    failures,
                    self.max_retries + 1,
                    if e.is_transient() { "临时错误" } else { "非临时错误" },
                    e,
                    delay
                );
                Next::Retry(delay)
            }
        }
    }

    fn persist_dropped(&self, state: &QueueState) {
        let Some(ids) = state.ids else {
            return;
        };
        let key = dropped_answers_key(ids);

        let result = if state.dropped.is_empty() {
            self.store.remove(&key)
        } else {
            let answers: Vec<&PendingAnswer> = state.dropped.values().collect();
            match serde_json::to_string(&answers) {
                Ok(json) => self.store.set(&key, &json),
                Err(e) => Err(e.into()),
            }
        };

        if let Err(e) = result {
            warn!("⚠️ 保存未送达答案失败: {}", e);
        }
    }

    /// 页面刷新后恢复之前未送达的答案
    fn restore_dropped(&self, state: &mut QueueState, ids: SessionIds) {
        let Some(json) = self.store.get(&dropped_answers_key(ids)) else {
            return;
        };

        match serde_json::from_str::<Vec<PendingAnswer>>(&json) {
            Ok(answers) => {
                if !answers.is_empty() {
                    warn!("⚠️ [会话 {}] 发现 {} 个之前未送达的答案", ids, answers.len());
                }
                for answer in answers {
                    state
                        .answers
                        .entry(answer.ordinal)
                        .or_insert_with(|| answer.value.clone());
                    if !state.pending.contains_key(&answer.ordinal) {
                        state.dropped.insert(answer.ordinal, answer);
                    }
                }
            }
            Err(e) => warn!("⚠️ 未送达答案记录无法解析，已忽略: {}", e),
        }
    }
}
