use thiserror::Error;

/// 地理编码错误类型
///
/// 所有载荷都是字符串，保证错误可以 `Clone`：
/// 批量上传失败时，同一个错误要复制到该分块的每一个位置。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GeocoderError {
    /// 查询本身不合法（既没有文本也没有坐标、参数越界等），不应重试
    #[error("查询无效: {0}")]
    Query(String),

    /// 超时未收到响应，调用方可以重试
    #[error("请求超时: {0}")]
    TimedOut(String),

    /// 远程服务返回非成功状态，或者连接失败（此时 status 为 None）
    #[error("服务不可用 (状态码: {status:?}): {message}")]
    ServiceUnavailable {
        status: Option<u16>,
        message: String,
    },

    /// 服务方报告的配额 / 频率限制，与普通的服务不可用区分开，方便调用方退避更久
    #[error("配额不足 (状态码: {status}), 建议等待: {retry_after:?}秒")]
    InsufficientQuota {
        status: u16,
        retry_after: Option<u64>,
    },

    /// 凭证被拒绝
    #[error("认证失败 (状态码: {status}): {message}")]
    AuthenticationFailure { status: u16, message: String },

    /// 响应体与预期结构不符，视为服务缺陷
    #[error("响应解析失败: {0}")]
    Parse(String),

    /// 客户端配置错误，在任何请求发出之前检测
    #[error("配置错误: {0}")]
    Configuration(String),

    /// 临时文件 / 缓存文件读写失败
    #[error("文件错误: {0}")]
    Io(String),

    /// 内部任务异常（例如任务 panic）
    #[error("内部错误: {0}")]
    Internal(String),
}

impl GeocoderError {
    /// 是否值得由调用方重试
    ///
    /// 核心本身从不重试，这里只给外层的重试策略一个判断依据。
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GeocoderError::TimedOut(_)
                | GeocoderError::ServiceUnavailable { .. }
                | GeocoderError::InsufficientQuota { .. }
        )
    }

    /// 按 HTTP 状态码分类非成功响应
    ///
    /// # 参数
    /// - `status`: HTTP 状态码
    /// - `message`: 响应体摘要
    /// - `retry_after`: `Retry-After` 头（秒）
    pub fn from_status(status: u16, message: impl Into<String>, retry_after: Option<u64>) -> Self {
        let message = message.into();
        match status {
            400 | 412 | 413 | 414 => GeocoderError::Query(format!("{} ({})", message, status)),
            401 | 403 | 407 => GeocoderError::AuthenticationFailure { status, message },
            402 | 429 => GeocoderError::InsufficientQuota {
                status,
                retry_after,
            },
            408 | 504 => GeocoderError::TimedOut(format!("{} ({})", message, status)),
            _ => GeocoderError::ServiceUnavailable {
                status: Some(status),
                message,
            },
        }
    }
}

// ========== 从常见错误类型转换 ==========

impl From<serde_json::Error> for GeocoderError {
    fn from(err: serde_json::Error) -> Self {
        GeocoderError::Parse(err.to_string())
    }
}

impl From<csv::Error> for GeocoderError {
    fn from(err: csv::Error) -> Self {
        GeocoderError::Parse(err.to_string())
    }
}

impl From<std::io::Error> for GeocoderError {
    fn from(err: std::io::Error) -> Self {
        GeocoderError::Io(err.to_string())
    }
}

impl From<url::ParseError> for GeocoderError {
    fn from(err: url::ParseError) -> Self {
        GeocoderError::Configuration(format!("无效的 URL: {}", err))
    }
}

impl From<reqwest::Error> for GeocoderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GeocoderError::TimedOut(err.to_string())
        } else if err.is_decode() {
            GeocoderError::Parse(err.to_string())
        } else if err.is_builder() {
            GeocoderError::Configuration(err.to_string())
        } else {
            GeocoderError::ServiceUnavailable {
                status: err.status().map(|s| s.as_u16()),
                message: err.to_string(),
            }
        }
    }
}

// ========== Result 类型别名 ==========

/// 地理编码结果类型
pub type GeocoderResult<T> = Result<T, GeocoderError>;
