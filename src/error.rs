//! 同步错误分类

use thiserror::Error;

/// 同步过程中的错误
///
/// 只有 `Config` 和 `Fatal` 会终止进程，其余错误由同步循环吸收并在下个周期重试。
#[derive(Debug, Error)]
pub enum SyncError {
    /// 启动阶段的配置错误，不重试
    #[error("配置错误: {0}")]
    Config(String),

    /// 暂时性的连接故障，跳过本周期
    #[error("连接失败: {0}")]
    Connectivity(String),

    /// 多步写入中途失败，已有部分写入生效
    #[error("部分写入失败 ({applied}/{total} 已完成): {reason}")]
    PartialApply {
        applied: usize,
        total: usize,
        reason: String,
    },

    /// 无法归类的错误
    #[error("致命错误: {0}")]
    Fatal(String),
}

pub type SyncResult<T> = std::result::Result<T, SyncError>;

impl SyncError {
    /// 是否可以在下个周期重试
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::Connectivity(_) | SyncError::PartialApply { .. })
    }

    /// 给错误信息加上操作上下文，保留分类
    pub fn context(self, what: &str) -> Self {
        match self {
            SyncError::Config(msg) => SyncError::Config(format!("{}: {}", what, msg)),
            SyncError::Connectivity(msg) => SyncError::Connectivity(format!("{}: {}", what, msg)),
            SyncError::PartialApply {
                applied,
                total,
                reason,
            } => SyncError::PartialApply {
                applied,
                total,
                reason: format!("{}: {}", what, reason),
            },
            SyncError::Fatal(msg) => SyncError::Fatal(format!("{}: {}", what, msg)),
        }
    }
}

impl From<sqlx::Error> for SyncError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => SyncError::Connectivity(err.to_string()),
            _ => SyncError::Fatal(err.to_string()),
        }
    }
}

/// reqwest 错误的粗分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HttpFault {
    Unreachable,
    /// 响应体与预期结构不符，重试也不会好转
    Decode,
    Status(u16),
    Other,
}

impl HttpFault {
    fn of(err: &reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            HttpFault::Unreachable
        } else if err.is_decode() {
            HttpFault::Decode
        } else if let Some(status) = err.status() {
            HttpFault::Status(status.as_u16())
        } else {
            HttpFault::Other
        }
    }

    fn into_error(self, message: String) -> SyncError {
        match self {
            HttpFault::Unreachable | HttpFault::Other => SyncError::Connectivity(message),
            HttpFault::Decode => SyncError::Fatal(format!("无法解析响应: {}", message)),
            HttpFault::Status(status) => classify_status(status, &message),
        }
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        HttpFault::of(&err).into_error(err.to_string())
    }
}

/// 按 HTTP 状态码归类：限流和服务端错误可重试，其余 4xx 视为致命
pub fn classify_status(status: u16, message: &str) -> SyncError {
    match status {
        429 | 500..=599 => SyncError::Connectivity(format!("HTTP {}: {}", status, message)),
        _ => SyncError::Fatal(format!("HTTP {}: {}", status, message)),
    }
}
