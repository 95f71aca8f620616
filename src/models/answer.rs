use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 学生答案：单个字符串，或有序的多个选项
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnswerValue {
    Text(String),
    Multiple(Vec<String>),
}

impl AnswerValue {
    /// 空白答案不会提交到服务端
    pub fn is_blank(&self) -> bool {
        match self {
            AnswerValue::Text(s) => s.trim().is_empty(),
            AnswerValue::Multiple(values) => values.iter().all(|v| v.trim().is_empty()),
        }
    }

    /// 提交给 `sendAnswer` 的字符串形式，多选按 JSON 数组编码
    pub fn to_wire(&self) -> String {
        match self {
            AnswerValue::Text(s) => s.clone(),
            AnswerValue::Multiple(values) => {
                serde_json::to_string(values).unwrap_or_else(|_| values.join(","))
            }
        }
    }
}

impl From<&str> for AnswerValue {
    fn from(s: &str) -> Self {
        AnswerValue::Text(s.to_string())
    }
}

impl From<String> for AnswerValue {
    fn from(s: String) -> Self {
        AnswerValue::Text(s)
    }
}

impl From<Vec<String>> for AnswerValue {
    fn from(values: Vec<String>) -> Self {
        AnswerValue::Multiple(values)
    }
}

/// 单个题号的投递状态
///
/// `Unsent → Sending → {Acked | Failed}`，`Failed` 在下一次处理时回到 `Sending`，
/// 超过重试上限后变为 `Dropped`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryState {
    Unsent,
    Sending,
    Acked,
    Failed,
    Dropped,
}

/// 等待服务端确认的答案
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingAnswer {
    pub ordinal: u32,
    pub value: AnswerValue,
    /// 已经发起的提交次数（只增不减）
    pub attempts: u32,
    /// 连续失败次数，决定退避时间和是否丢弃；任何一次送达都会清零
    #[serde(default)]
    pub failures: u32,
    pub state: DeliveryState,
    /// 本地每次修改都会递增，用来判断确认的是不是最新值
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

impl PendingAnswer {
    pub fn new(ordinal: u32, value: AnswerValue, version: u64) -> Self {
        Self {
            ordinal,
            value,
            attempts: 0,
            failures: 0,
            state: DeliveryState::Unsent,
            version,
            updated_at: Utc::now(),
        }
    }

    /// 失败之后又重试了几次
    pub fn retries(&self) -> u32 {
        self.failures.saturating_sub(1)
    }
}

/// 评分服务返回的已提交答案，用于回看模式
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmittedAnswer {
    pub ordinal: u32,
    pub answer: AnswerValue,
    #[serde(default)]
    pub is_correct: Option<bool>,
}
