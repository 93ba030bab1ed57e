//! Flare RPC Client Runtime
//!
//! 客户端选址运行时：服务发现、路由、负载均衡、熔断组成的选址链路，
//! 注册中心操作的失败重试任务，以及带版本号持久化的注册中心本地缓存。

pub mod config;
pub mod discovery;
pub mod error;
pub mod registry;
pub mod selector;
pub mod telemetry;

// Re-exports
pub use config::{CacheConfig, Config, LogConfig, LogFormat, RegistryConfig, SelectorConfig};
pub use error::{ErrorBuilder, ErrorCategory, ErrorCode, FlareError, Result, ResultExt};

pub use discovery::{Discovery, RegistryDiscovery, ServiceId, ServiceInstance, StaticDiscovery};
pub use registry::{
    FailbackRegistryCenter, NotifyListener, RegisterInfo, RegistryCenter, RegistryCenterCache,
    RegistryCenterData, RetryKind, RetryState, RetryTask,
};
pub use selector::{
    CircuitBreaker, DefaultSelector, Extensions, LoadBalance, Request, Router, Selector,
};
pub use telemetry::{init_tracing, try_init_tracing};
