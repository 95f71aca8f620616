use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// 程序配置
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// 考试服务 API 根地址
    pub api_base_url: String,
    /// 考试服务访问令牌
    pub api_token: String,
    /// 单次请求超时（秒）
    pub request_timeout_secs: u64,
    /// 答案提交失败后的最大重试次数（不含首次提交）
    pub answer_max_retries: u32,
    /// 重试基础等待时间（毫秒），按指数递增
    pub answer_retry_delay_ms: u64,
    /// 计时器每隔多少次 tick 持久化一次剩余时间
    pub timer_persist_every: u32,
    /// 计时器 tick 间隔（毫秒）
    pub timer_tick_ms: u64,
    /// 本地持久化文件（计时器状态、丢弃的答案）
    pub storage_path: String,
    /// 是否显示详细日志
    pub verbose_logging: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8080/api".to_string(),
            api_token: String::new(),
            request_timeout_secs: 15,
            answer_max_retries: 3,
            answer_retry_delay_ms: 1000,
            timer_persist_every: 10,
            timer_tick_ms: 1000,
            storage_path: "session_state.json".to_string(),
            verbose_logging: false,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            api_base_url: std::env::var("EXAM_API_BASE_URL").unwrap_or(default.api_base_url),
            api_token: std::env::var("EXAM_API_TOKEN").unwrap_or(default.api_token),
            request_timeout_secs: std::env::var("REQUEST_TIMEOUT_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.request_timeout_secs),
            answer_max_retries: std::env::var("ANSWER_MAX_RETRIES").ok().and_then(|v| v.parse().ok()).unwrap_or(default.answer_max_retries),
            answer_retry_delay_ms: std::env::var("ANSWER_RETRY_DELAY_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.answer_retry_delay_ms),
            timer_persist_every: std::env::var("TIMER_PERSIST_EVERY").ok().and_then(|v| v.parse().ok()).unwrap_or(default.timer_persist_every),
            timer_tick_ms: std::env::var("TIMER_TICK_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.timer_tick_ms),
            storage_path: std::env::var("SESSION_STORAGE_PATH").unwrap_or(default.storage_path),
            verbose_logging: std::env::var("VERBOSE_LOGGING").ok().and_then(|v| v.parse().ok()).unwrap_or(default.verbose_logging),
        }
    }

    /// 从 TOML 文件加载配置，缺失的字段使用默认值
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("无法读取配置文件: {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("无法解析配置文件: {}", path.display()))?;
        Ok(config)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.answer_retry_delay_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.timer_tick_ms.max(1))
    }
}
