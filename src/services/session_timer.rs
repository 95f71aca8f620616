//! 会话计时器 - 业务能力层
//!
//! 每秒 tick 一次，每 10 次把剩余秒数写入持久化存储（按 mockId + sectionId 区分），
//! 页面刷新后从存储恢复；到时清除存储并恰好调用一次到期回调。

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::AppResult;
use crate::infrastructure::KeyValueStore;
use crate::models::SessionIds;

/// 计时器状态在存储中的键
pub fn timer_key(ids: SessionIds) -> String {
    format!("timer:{}:{}", ids.mock_id, ids.section_id)
}

/// 会话计时器
pub struct SessionTimer {
    store: Arc<dyn KeyValueStore>,
    key: String,
    tick: Duration,
    persist_every: u32,
    remaining: Arc<AtomicU32>,
    handle: Option<JoinHandle<()>>,
}

impl SessionTimer {
    pub fn new(config: &Config, store: Arc<dyn KeyValueStore>, ids: SessionIds) -> Self {
        Self {
            store,
            key: timer_key(ids),
            tick: config.tick_interval(),
            persist_every: config.timer_persist_every.max(1),
            remaining: Arc::new(AtomicU32::new(0)),
            handle: None,
        }
    }

    /// 计算起始剩余时间
    ///
    /// 存储中的值在 (0, limit] 内时沿用；超过 limit 的值截断为 limit；
    /// 没有值、为 0 或无法解析时从 limit 开始。
    pub fn restore_remaining(&self, limit_seconds: u32) -> u32 {
        let Some(saved) = self.store.get(&self.key) else {
            return limit_seconds;
        };

        match saved.trim().parse::<u32>() {
            Ok(0) => limit_seconds,
            Ok(value) if value > limit_seconds => {
                warn!(
                    "⚠️ 计时器存储值 {} 超过时间限制 {}，已截断",
                    value, limit_seconds
                );
                limit_seconds
            }
            Ok(value) => {
                info!("⏱️ 已恢复计时器: 剩余 {} 秒", value);
                value
            }
            Err(_) => {
                warn!("⚠️ 计时器存储值无效: {:?}", saved);
                limit_seconds
            }
        }
    }

    /// 启动计时器；已在运行时先停止旧的
    pub fn start<F, Fut>(&mut self, limit_seconds: u32, on_expire: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.stop();

        let start_value = self.restore_remaining(limit_seconds);
        self.remaining.store(start_value, Ordering::SeqCst);

        let remaining = Arc::clone(&self.remaining);
        let store = Arc::clone(&self.store);
        let key = self.key.clone();
        let tick = self.tick;
        let persist_every = self.persist_every;

        debug!("计时器启动: {} 秒 (键 {})", start_value, key);

        self.handle = Some(tokio::spawn(async move {
            let mut interval = interval_at(Instant::now() + tick, tick);
            let mut ticks: u32 = 0;

            loop {
                interval.tick().await;
                ticks = ticks.wrapping_add(1);

                let left = remaining.load(Ordering::SeqCst).saturating_sub(1);
                remaining.store(left, Ordering::SeqCst);

                if left == 0 {
                    info!("⏰ 时间到，强制结束会话");
                    if let Err(e) = store.remove(&key) {
                        warn!("⚠️ 清除计时器存储失败: {}", e);
                    }
                    on_expire().await;
                    break;
                }

                if ticks % persist_every == 0 {
                    if let Err(e) = store.set(&key, &left.to_string()) {
                        warn!("⚠️ 保存计时器失败: {}", e);
                    }
                }
            }
        }));
    }

    /// 停止计时器，可以重复调用
    ///
    /// 仍有剩余时间时写入存储，刷新后可以继续。
    pub fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };

        let finished = handle.is_finished();
        handle.abort();

        let left = self.remaining();
        if !finished && left > 0 {
            if let Err(e) = self.store.set(&self.key, &left.to_string()) {
                warn!("⚠️ 保存计时器失败: {}", e);
            }
        }
        debug!("计时器已停止: 剩余 {} 秒", left);
    }

    /// 删除持久化的剩余时间（会话正常结束后调用）
    pub fn clear(&self) -> AppResult<()> {
        self.store.remove(&self.key)
    }

    pub fn remaining(&self) -> u32 {
        self.remaining.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for SessionTimer {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
