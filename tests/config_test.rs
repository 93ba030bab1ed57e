//! 配置与错误处理测试

use flare_rpc_client::config::{Config, LogConfig, LogFormat};
use flare_rpc_client::discovery::ServiceInstance;
use flare_rpc_client::error::{ErrorCategory, ErrorCode, FlareError};
use flare_rpc_client::telemetry::try_init_tracing;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

/// 测试：空配置使用默认值
#[test]
fn test_defaults() {
    let config = assert_ok!(Config::from_toml(""));
    assert_eq!(config.selector.load_balance, "random");
    assert_eq!(config.selector.router, "none");
    assert_eq!(config.selector.circuit_breaker, "none");
    assert_eq!(config.selector.discovery, "static");
    assert_eq!(config.registry.retry_period(), Duration::from_millis(5000));
    assert_eq!(config.registry.max_retries, 3);
    assert!(config.registry.cache.file_path.is_none());
    assert!(config.registry.cache.persisted);
    assert!(!config.registry.cache.sync_save);
    assert_eq!(config.registry.cache.alive_secs, 300);
    assert_eq!(config.log.level, "info");
    assert_eq!(config.log.format, LogFormat::Text);
}

/// 测试：从文件加载完整配置
#[test]
fn test_load_from_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("client.toml");
    std::fs::write(
        &path,
        r#"
[selector]
load_balance = "consistent_hash"
router = "metadata"
circuit_breaker = "consecutive_failure"
discovery = "registry"

[registry]
retry_period_ms = 200
max_retries = 7

[registry.cache]
file_path = "/tmp/flare/registry.cache"
sync_save = true
alive_secs = 60

[log]
level = "debug"
format = "json"
"#,
    )
    .expect("write config");

    let config = assert_ok!(Config::load_from_file(&path));
    assert_eq!(config.selector.load_balance, "consistent_hash");
    assert_eq!(config.selector.discovery, "registry");
    assert_eq!(config.registry.retry_period(), Duration::from_millis(200));
    assert_eq!(config.registry.max_retries, 7);
    assert_eq!(
        config.registry.cache.file_path.as_deref(),
        Some(std::path::Path::new("/tmp/flare/registry.cache"))
    );
    assert!(config.registry.cache.sync_save);
    assert!(config.registry.cache.persisted);
    assert_eq!(config.log.format, LogFormat::Json);
}

/// 测试：非法配置返回配置错误
#[test]
fn test_invalid_config() {
    let err = assert_err!(Config::from_toml("[registry]\nmax_retries = \"many\""));
    assert_eq!(err.code(), Some(ErrorCode::ConfigurationError));

    let err = assert_err!(Config::load_from_file("/nonexistent/flare/client.toml"));
    assert_eq!(err.code(), Some(ErrorCode::ConfigurationError));
}

/// 测试：错误码分类与可重试判断
#[test]
fn test_error_codes() {
    assert_eq!(ErrorCode::RegisterFailed.category(), ErrorCategory::Registry);
    assert_eq!(ErrorCode::NoAvailableInstance.category(), ErrorCategory::Discovery);
    assert_eq!(ErrorCode::CacheLockFailed.category(), ErrorCategory::Cache);
    assert_eq!(ErrorCode::ExtensionNotFound.category(), ErrorCategory::Extension);
    assert_eq!(
        ErrorCode::from_u32(ErrorCode::CacheIoError.as_u32()),
        Some(ErrorCode::CacheIoError)
    );

    let err = FlareError::no_instance("echo");
    assert_eq!(err.code(), Some(ErrorCode::NoAvailableInstance));
    assert!(err.is_retryable());
    assert!(!FlareError::extension_not_found("router", "set").is_retryable());

    let io: FlareError = std::io::Error::other("disk full").into();
    assert!(io.is_retryable());
}

/// 测试：服务实例可以序列化为 JSON
#[test]
fn test_instance_serializes() {
    let instance = ServiceInstance::new("10.0.0.1", 8080).with_weight(50);
    let json = serde_json::to_value(&instance).expect("serialize");
    assert_eq!(json["host"], "10.0.0.1");
    assert_eq!(json["port"], 8080);
    assert_eq!(json["parameters"]["weight"], "50");
}

/// 测试：重复初始化日志返回错误而不是 panic
#[test]
fn test_tracing_init_twice() {
    let config = LogConfig::default();
    let _ = try_init_tracing(&config);
    assert!(try_init_tracing(&config).is_err());
}
