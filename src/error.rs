use thiserror::Error;

/// 错误来源（第三方错误统一装箱）
pub type BoxedSource = Box<dyn std::error::Error + Send + Sync>;

/// 应用程序错误类型
#[derive(Debug, Error)]
pub enum AppError {
    /// API 调用错误
    #[error("API错误: {0}")]
    Api(#[from] ApiError),
    /// 持久化存储错误
    #[error("存储错误: {0}")]
    Storage(#[from] StorageError),
    /// 保存前的本地校验错误
    #[error("校验错误: {0}")]
    Validation(#[from] ValidationError),
    /// 会话状态错误
    #[error("会话错误: {0}")]
    Session(#[from] SessionError),
    /// 配置错误
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),
    /// 其他错误（用于包装第三方库错误）
    #[error("错误: {0}")]
    Other(String),
}

/// API 调用错误
#[derive(Debug, Error)]
pub enum ApiError {
    /// 网络请求失败（连接失败、超时等）
    #[error("API请求失败 ({endpoint}): {source}")]
    RequestFailed {
        endpoint: String,
        #[source]
        source: BoxedSource,
    },
    /// API 返回非 2xx 响应
    #[error("API返回错误响应 ({endpoint}): status={status}, message={message:?}")]
    BadResponse {
        endpoint: String,
        status: u16,
        message: Option<String>,
    },
    /// JSON 解析失败
    #[error("JSON解析失败: {source}")]
    JsonParseFailed {
        #[source]
        source: BoxedSource,
    },
}

impl ApiError {
    /// 是否为可重试的临时错误（网络错误、5xx、429）
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::RequestFailed { .. } => true,
            ApiError::BadResponse { status, .. } => *status >= 500 || *status == 429,
            ApiError::JsonParseFailed { .. } => false,
        }
    }
}

/// 持久化存储错误
#[derive(Debug, Error)]
pub enum StorageError {
    /// 读取失败
    #[error("读取存储失败 ({path}): {source}")]
    ReadFailed {
        path: String,
        #[source]
        source: BoxedSource,
    },
    /// 写入失败
    #[error("写入存储失败 ({path}): {source}")]
    WriteFailed {
        path: String,
        #[source]
        source: BoxedSource,
    },
}

/// 保存前校验错误（只在本地出现，不会到达网络层）
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// 题组缺少题型
    #[error("第 {group_index} 个题组缺少题型")]
    MissingGroupType { group_index: usize },
    /// 题目缺少题干
    #[error("第 {group_index} 个题组的第 {question_index} 道题缺少题干")]
    MissingQuestionText {
        group_index: usize,
        question_index: usize,
    },
    /// 部分不属于该 section
    #[error("部分 {part_id} 不属于 section {section_id}")]
    UnknownPart { part_id: i64, section_id: i64 },
}

/// 会话状态错误
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    /// mockId / sectionId 尚未设置
    #[error("会话标识尚未设置")]
    MissingSessionIds,
    /// 会话已结束
    #[error("会话已结束")]
    AlreadyFinished,
    /// 会话已释放
    #[error("会话已释放")]
    Disposed,
}

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 环境变量解析失败
    #[error("环境变量 {var_name} 解析失败: 值 '{value}' 无法转换为 {expected_type}")]
    EnvVarParseFailed {
        var_name: String,
        value: String,
        expected_type: String,
    },
    /// HTTP 客户端构建失败
    #[error("HTTP客户端构建失败: {source}")]
    HttpClientBuildFailed {
        #[source]
        source: BoxedSource,
    },
}

// ========== 从常见错误类型转换 ==========

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Api(ApiError::JsonParseFailed {
            source: Box::new(err),
        })
    }
}

// ========== 便捷构造函数 ==========

impl AppError {
    /// 创建API请求失败错误
    pub fn api_request_failed(
        endpoint: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        AppError::Api(ApiError::RequestFailed {
            endpoint: endpoint.into(),
            source: Box::new(source),
        })
    }

    /// 创建API错误响应
    pub fn api_bad_response(endpoint: impl Into<String>, status: u16, message: Option<String>) -> Self {
        AppError::Api(ApiError::BadResponse {
            endpoint: endpoint.into(),
            status,
            message,
        })
    }

    /// 创建存储读取错误
    pub fn storage_read_failed(
        path: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        AppError::Storage(StorageError::ReadFailed {
            path: path.into(),
            source: Box::new(source),
        })
    }

    /// 创建存储写入错误
    pub fn storage_write_failed(
        path: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        AppError::Storage(StorageError::WriteFailed {
            path: path.into(),
            source: Box::new(source),
        })
    }

    /// 是否为可重试的临时错误
    pub fn is_transient(&self) -> bool {
        match self {
            AppError::Api(e) => e.is_transient(),
            _ => false,
        }
    }
}

// ========== Result 类型别名 ==========

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;
