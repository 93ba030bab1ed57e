//! 错误代码和错误类别定义

use serde::{Deserialize, Serialize};
use std::fmt;

/// 错误代码枚举
///
/// 错误代码按类别分组，每个类别占用1000个代码范围：
/// - 1000-1999: 注册中心相关错误
/// - 2000-2999: 服务发现与选址相关错误
/// - 3000-3999: 本地缓存相关错误
/// - 4000-4999: 扩展插件相关错误
/// - 9000-9999: 通用错误
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u32)]
pub enum ErrorCode {
    // ============================================================
    // 注册中心相关错误 (1000-1999)
    // ============================================================
    RegistryUnavailable = 1000,
    RegisterFailed = 1001,
    UnregisterFailed = 1002,
    SubscribeFailed = 1003,
    UnsubscribeFailed = 1004,
    NotifyFailed = 1005,
    RegistryDestroyed = 1006,

    // ============================================================
    // 服务发现与选址相关错误 (2000-2999)
    // ============================================================
    DiscoveryFailed = 2000,
    ServiceNotFound = 2001,
    NoAvailableInstance = 2002,
    InvalidAddress = 2003,

    // ============================================================
    // 本地缓存相关错误 (3000-3999)
    // ============================================================
    CacheIoError = 3000,
    CacheLockFailed = 3001,
    CacheDecodeFailed = 3002,

    // ============================================================
    // 扩展插件相关错误 (4000-4999)
    // ============================================================
    ExtensionNotFound = 4000,

    // ============================================================
    // 通用错误 (9000-9999)
    // ============================================================
    InternalError = 9000,
    ConfigurationError = 9001,
    InvalidParameter = 9002,
    SerializationError = 9003,
    UnknownError = 9999,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl ErrorCode {
    /// 获取错误代码的数字值
    #[inline]
    pub fn as_u32(&self) -> u32 {
        *self as u32
    }

    /// 从数字值创建错误代码
    pub fn from_u32(code: u32) -> Option<Self> {
        match code {
            1000 => Some(ErrorCode::RegistryUnavailable),
            1001 => Some(ErrorCode::RegisterFailed),
            1002 => Some(ErrorCode::UnregisterFailed),
            1003 => Some(ErrorCode::SubscribeFailed),
            1004 => Some(ErrorCode::UnsubscribeFailed),
            1005 => Some(ErrorCode::NotifyFailed),
            1006 => Some(ErrorCode::RegistryDestroyed),
            2000 => Some(ErrorCode::DiscoveryFailed),
            2001 => Some(ErrorCode::ServiceNotFound),
            2002 => Some(ErrorCode::NoAvailableInstance),
            2003 => Some(ErrorCode::InvalidAddress),
            3000 => Some(ErrorCode::CacheIoError),
            3001 => Some(ErrorCode::CacheLockFailed),
            3002 => Some(ErrorCode::CacheDecodeFailed),
            4000 => Some(ErrorCode::ExtensionNotFound),
            9000 => Some(ErrorCode::InternalError),
            9001 => Some(ErrorCode::ConfigurationError),
            9002 => Some(ErrorCode::InvalidParameter),
            9003 => Some(ErrorCode::SerializationError),
            9999 => Some(ErrorCode::UnknownError),
            _ => None,
        }
    }

    /// 获取错误代码的英文标识符
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::RegistryUnavailable => "REGISTRY_UNAVAILABLE",
            ErrorCode::RegisterFailed => "REGISTER_FAILED",
            ErrorCode::UnregisterFailed => "UNREGISTER_FAILED",
            ErrorCode::SubscribeFailed => "SUBSCRIBE_FAILED",
            ErrorCode::UnsubscribeFailed => "UNSUBSCRIBE_FAILED",
            ErrorCode::NotifyFailed => "NOTIFY_FAILED",
            ErrorCode::RegistryDestroyed => "REGISTRY_DESTROYED",
            ErrorCode::DiscoveryFailed => "DISCOVERY_FAILED",
            ErrorCode::ServiceNotFound => "SERVICE_NOT_FOUND",
            ErrorCode::NoAvailableInstance => "NO_AVAILABLE_INSTANCE",
            ErrorCode::InvalidAddress => "INVALID_ADDRESS",
            ErrorCode::CacheIoError => "CACHE_IO_ERROR",
            ErrorCode::CacheLockFailed => "CACHE_LOCK_FAILED",
            ErrorCode::CacheDecodeFailed => "CACHE_DECODE_FAILED",
            ErrorCode::ExtensionNotFound => "EXTENSION_NOT_FOUND",
            ErrorCode::InternalError => "INTERNAL_ERROR",
            ErrorCode::ConfigurationError => "CONFIGURATION_ERROR",
            ErrorCode::InvalidParameter => "INVALID_PARAMETER",
            ErrorCode::SerializationError => "SERIALIZATION_ERROR",
            ErrorCode::UnknownError => "UNKNOWN_ERROR",
        }
    }

    /// 获取错误代码的类别（用于错误分类）
    pub fn category(&self) -> ErrorCategory {
        match self.as_u32() {
            1000..=1999 => ErrorCategory::Registry,
            2000..=2999 => ErrorCategory::Discovery,
            3000..=3999 => ErrorCategory::Cache,
            4000..=4999 => ErrorCategory::Extension,
            _ => ErrorCategory::General,
        }
    }

    /// 判断是否为可重试的错误
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCode::RegistryUnavailable
                | ErrorCode::RegisterFailed
                | ErrorCode::UnregisterFailed
                | ErrorCode::SubscribeFailed
                | ErrorCode::UnsubscribeFailed
                | ErrorCode::NotifyFailed
                | ErrorCode::DiscoveryFailed
                | ErrorCode::NoAvailableInstance
                | ErrorCode::CacheIoError
                | ErrorCode::CacheLockFailed
        )
    }
}

/// 错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    Registry,
    Discovery,
    Cache,
    Extension,
    General,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Registry => write!(f, "REGISTRY"),
            ErrorCategory::Discovery => write!(f, "DISCOVERY"),
            ErrorCategory::Cache => write!(f, "CACHE"),
            ErrorCategory::Extension => write!(f, "EXTENSION"),
            ErrorCategory::General => write!(f, "GENERAL"),
        }
    }
}
