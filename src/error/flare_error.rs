//! Flare RPC 统一错误类型

use super::code::ErrorCode;
use std::collections::HashMap;
use thiserror::Error;

/// Flare RPC 统一错误类型
#[derive(Error, Debug, Clone)]
pub enum FlareError {
    /// 带错误代码的业务错误
    #[error("错误 [{code}] {reason}", code = .code.as_str())]
    Localized {
        code: ErrorCode,
        reason: String,
        details: Option<String>,
        params: Option<HashMap<String, String>>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// 系统错误（内部错误）
    #[error("系统错误: {0}")]
    System(String),

    /// IO 错误
    #[error("IO 错误: {0}")]
    Io(String),
}

impl FlareError {
    /// 创建带错误代码的错误
    pub fn localized(code: ErrorCode, reason: impl Into<String>) -> Self {
        FlareError::Localized {
            code,
            reason: reason.into(),
            details: None,
            params: None,
            timestamp: chrono::Utc::now(),
        }
    }

    /// 创建系统错误
    pub fn system(msg: impl Into<String>) -> Self {
        FlareError::System(msg.into())
    }

    /// 创建 IO 错误
    pub fn io(msg: impl Into<String>) -> Self {
        FlareError::Io(msg.into())
    }

    // ============================================================
    // 便捷方法：注册中心相关错误
    // ============================================================

    /// 注册中心不可用
    pub fn registry_unavailable(reason: impl Into<String>) -> Self {
        Self::localized(ErrorCode::RegistryUnavailable, reason)
    }

    /// 注册中心已销毁
    pub fn registry_destroyed() -> Self {
        Self::localized(ErrorCode::RegistryDestroyed, "registry center has been destroyed")
    }

    // ============================================================
    // 便捷方法：服务发现相关错误
    // ============================================================

    /// 服务发现失败
    pub fn discovery_failed(reason: impl Into<String>) -> Self {
        Self::localized(ErrorCode::DiscoveryFailed, reason)
    }

    /// 没有可用实例
    ///
    /// 选址本身用 `Ok(None)` 表达“没有实例”，调用方需要失败时再转换成这个错误
    pub fn no_instance(service_name: impl Into<String>) -> Self {
        let mut params = HashMap::new();
        params.insert("service".to_string(), service_name.into());
        FlareError::Localized {
            code: ErrorCode::NoAvailableInstance,
            reason: "no available instance".to_string(),
            details: None,
            params: Some(params),
            timestamp: chrono::Utc::now(),
        }
    }

    /// 非法地址
    pub fn invalid_address(address: impl Into<String>) -> Self {
        let mut params = HashMap::new();
        params.insert("address".to_string(), address.into());
        FlareError::Localized {
            code: ErrorCode::InvalidAddress,
            reason: "invalid address".to_string(),
            details: None,
            params: Some(params),
            timestamp: chrono::Utc::now(),
        }
    }

    // ============================================================
    // 便捷方法：缓存相关错误
    // ============================================================

    /// 缓存文件加锁失败
    pub fn cache_lock_failed(reason: impl Into<String>) -> Self {
        Self::localized(ErrorCode::CacheLockFailed, reason)
    }

    /// 注册信息解码失败
    pub fn decode_failed(reason: impl Into<String>) -> Self {
        Self::localized(ErrorCode::CacheDecodeFailed, reason)
    }

    // ============================================================
    // 便捷方法：扩展与配置相关错误
    // ============================================================

    /// 扩展未找到
    pub fn extension_not_found(kind: &str, name: impl Into<String>) -> Self {
        let mut params = HashMap::new();
        params.insert("kind".to_string(), kind.to_string());
        params.insert("name".to_string(), name.into());
        FlareError::Localized {
            code: ErrorCode::ExtensionNotFound,
            reason: format!("{} extension not found", kind),
            details: None,
            params: Some(params),
            timestamp: chrono::Utc::now(),
        }
    }

    /// 配置错误
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::localized(ErrorCode::ConfigurationError, reason)
    }

    /// 参数错误
    pub fn invalid_parameter(reason: impl Into<String>) -> Self {
        Self::localized(ErrorCode::InvalidParameter, reason)
    }

    /// 获取错误代码
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            FlareError::Localized { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// 获取错误原因
    pub fn reason(&self) -> &str {
        match self {
            FlareError::Localized { reason, .. } => reason,
            FlareError::System(msg) => msg,
            FlareError::Io(msg) => msg,
        }
    }

    /// 判断是否为可重试的错误
    pub fn is_retryable(&self) -> bool {
        match self {
            FlareError::Localized { code, .. } => code.is_retryable(),
            FlareError::Io(_) => true,
            FlareError::System(_) => false,
        }
    }
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, FlareError>;
