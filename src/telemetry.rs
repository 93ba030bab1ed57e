//! 日志初始化
//!
//! `RUST_LOG` 环境变量优先于配置中的日志级别

use crate::config::{LogConfig, LogFormat};
use anyhow::Result;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

fn env_filter(config: &LogConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level))
}

/// 初始化全局日志订阅器
///
/// 已经存在全局订阅器时返回错误，不会 panic
pub fn try_init_tracing(config: &LogConfig) -> Result<()> {
    let filter = env_filter(config);
    match config.format {
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_thread_names(true))
            .try_init()?,
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().flatten_event(true).with_current_span(false))
            .try_init()?,
    }
    tracing::info!(level = %config.level, format = ?config.format, "Tracing initialized");
    Ok(())
}

/// 初始化全局日志订阅器，重复初始化时只记录一条调试日志
pub fn init_tracing(config: &LogConfig) {
    if let Err(e) = try_init_tracing(config) {
        tracing::debug!(error = %e, "Tracing subscriber already installed");
    }
}
