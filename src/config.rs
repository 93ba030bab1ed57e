//! 客户端运行时配置
//!
//! 配置的加载由上层负责，这里只定义已解析的配置结构及其默认值

use crate::error::{FlareError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub selector: SelectorConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub log: LogConfig,
}

/// 选址器配置：按名称解析各个扩展
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SelectorConfig {
    #[serde(default = "default_load_balance")]
    pub load_balance: String, // random, round_robin, consistent_hash
    #[serde(default = "default_none")]
    pub router: String, // none, metadata
    #[serde(default = "default_none")]
    pub circuit_breaker: String, // none, consecutive_failure
    /// 服务发现实现的注册名
    #[serde(default = "default_discovery")]
    pub discovery: String,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            load_balance: default_load_balance(),
            router: default_none(),
            circuit_breaker: default_none(),
            discovery: default_discovery(),
        }
    }
}

/// 注册中心配置
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RegistryConfig {
    /// 两次重试之间的间隔（毫秒）
    #[serde(default = "default_retry_period_ms")]
    pub retry_period_ms: u64,
    /// 最大重试次数
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub cache: CacheConfig,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            retry_period_ms: default_retry_period_ms(),
            max_retries: default_max_retries(),
            cache: CacheConfig::default(),
        }
    }
}

impl RegistryConfig {
    pub fn retry_period(&self) -> Duration {
        Duration::from_millis(self.retry_period_ms)
    }

    /// 设置重试间隔
    pub fn with_retry_period(mut self, period: Duration) -> Self {
        self.retry_period_ms = period.as_millis() as u64;
        self
    }

    /// 设置最大重试次数
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// 设置缓存配置
    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }
}

/// 注册中心本地缓存配置
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    /// 缓存文件路径，未配置时只保留内存缓存
    pub file_path: Option<PathBuf>,
    /// 是否持久化到磁盘
    #[serde(default = "default_true")]
    pub persisted: bool,
    /// 是否在调用线程上同步落盘
    #[serde(default)]
    pub sync_save: bool,
    /// 缓存存活时间（秒），用于 `expire_cache`
    #[serde(default = "default_alive_secs")]
    pub alive_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            file_path: None,
            persisted: true,
            sync_save: false,
            alive_secs: default_alive_secs(),
        }
    }
}

impl CacheConfig {
    /// 使用指定文件创建缓存配置
    pub fn with_file(path: impl Into<PathBuf>) -> Self {
        Self {
            file_path: Some(path.into()),
            ..Self::default()
        }
    }

    /// 启用/禁用同步落盘
    pub fn with_sync_save(mut self, sync_save: bool) -> Self {
        self.sync_save = sync_save;
        self
    }

    /// 设置缓存存活时间
    pub fn with_alive_secs(mut self, alive_secs: u64) -> Self {
        self.alive_secs = alive_secs;
        self
    }
}

/// 日志配置
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// 日志输出格式
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// 普通文本格式
    #[default]
    Text,
    /// JSON 格式，适合日志聚合系统
    Json,
}

fn default_load_balance() -> String {
    "random".to_string()
}

fn default_discovery() -> String {
    "static".to_string()
}

fn default_none() -> String {
    "none".to_string()
}

fn default_retry_period_ms() -> u64 {
    5000
}

fn default_max_retries() -> u32 {
    3
}

fn default_true() -> bool {
    true
}

fn default_alive_secs() -> u64 {
    300
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            FlareError::configuration(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }
}
