//! 选址模块
//!
//! 把 (服务标识, 请求) 解析为一个可调用的服务实例

pub mod circuit_breaker;
pub mod default_selector;
pub mod extensions;
pub mod load_balance;
pub mod request;
pub mod router;

use crate::discovery::{ServiceId, ServiceInstance};
use crate::error::Result;
use async_trait::async_trait;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitState, ConsecutiveFailureCircuitBreaker,
    NoneCircuitBreaker,
};
pub use default_selector::DefaultSelector;
pub use extensions::Extensions;
pub use load_balance::{
    ConsistentHashLoadBalance, LoadBalance, LoadBalanceStrategy, RandomLoadBalance,
    RoundRobinLoadBalance,
};
pub use request::Request;
pub use router::{MetadataRouter, NoneRouter, Router};

/// 选址器 Trait
#[async_trait]
pub trait Selector: Send + Sync {
    /// 选择一个实例，`Ok(None)` 表示没有可用实例，不是错误
    async fn select_one(
        &self,
        service_id: &ServiceId,
        request: &mut Request,
    ) -> Result<Option<ServiceInstance>>;

    /// 列出全部可用实例
    async fn select_all(&self, service_id: &ServiceId, request: &Request)
    -> Result<Vec<ServiceInstance>>;

    /// 上报调用结果
    fn report(&self, instance: &ServiceInstance, code: i32, cost_ms: u64);
}
