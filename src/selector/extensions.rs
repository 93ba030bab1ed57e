//! 扩展容器
//!
//! 在启动时显式构造，按名称解析负载均衡、路由、熔断和服务发现实现

use super::circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, ConsecutiveFailureCircuitBreaker, NoneCircuitBreaker,
};
use super::load_balance::{LoadBalance, LoadBalanceStrategy};
use super::router::{MetadataRouter, NoneRouter, Router};
use crate::discovery::Discovery;
use crate::error::{FlareError, Result};
use std::collections::HashMap;
use std::sync::Arc;

/// 无路由、无熔断
pub const NONE: &str = "none";
/// 元数据路由
pub const METADATA_ROUTER: &str = "metadata";
/// 连续失败熔断
pub const CONSECUTIVE_FAILURE_BREAKER: &str = "consecutive_failure";

/// 扩展容器
#[derive(Default, Clone)]
pub struct Extensions {
    load_balances: HashMap<String, Arc<dyn LoadBalance>>,
    routers: HashMap<String, Arc<dyn Router>>,
    circuit_breakers: HashMap<String, Arc<dyn CircuitBreaker>>,
    discoveries: HashMap<String, Arc<dyn Discovery>>,
}

impl Extensions {
    /// 空容器
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册了全部内置负载均衡、路由和熔断实现的容器
    ///
    /// 服务发现依赖地址或注册中心，需要调用方自行注册
    pub fn with_defaults() -> Self {
        let mut extensions = Self::new();
        for strategy in [
            LoadBalanceStrategy::Random,
            LoadBalanceStrategy::RoundRobin,
            LoadBalanceStrategy::ConsistentHash,
        ] {
            extensions.register_load_balance(strategy.as_str(), Arc::from(strategy.build()));
        }
        extensions.register_router(NONE, Arc::new(NoneRouter));
        extensions.register_router(METADATA_ROUTER, Arc::new(MetadataRouter));
        extensions.register_circuit_breaker(NONE, Arc::new(NoneCircuitBreaker));
        extensions.register_circuit_breaker(
            CONSECUTIVE_FAILURE_BREAKER,
            Arc::new(ConsecutiveFailureCircuitBreaker::new(
                CircuitBreakerConfig::default(),
            )),
        );
        extensions
    }

    pub fn register_load_balance(&mut self, name: impl Into<String>, lb: Arc<dyn LoadBalance>) {
        self.load_balances.insert(name.into(), lb);
    }

    pub fn register_router(&mut self, name: impl Into<String>, router: Arc<dyn Router>) {
        self.routers.insert(name.into(), router);
    }

    pub fn register_circuit_breaker(
        &mut self,
        name: impl Into<String>,
        breaker: Arc<dyn CircuitBreaker>,
    ) {
        self.circuit_breakers.insert(name.into(), breaker);
    }

    pub fn register_discovery(&mut self, name: impl Into<String>, discovery: Arc<dyn Discovery>) {
        self.discoveries.insert(name.into(), discovery);
    }

    pub fn load_balance(&self, name: &str) -> Result<Arc<dyn LoadBalance>> {
        lookup(&self.load_balances, "load_balance", name)
    }

    pub fn router(&self, name: &str) -> Result<Arc<dyn Router>> {
        lookup(&self.routers, "router", name)
    }

    pub fn circuit_breaker(&self, name: &str) -> Result<Arc<dyn CircuitBreaker>> {
        lookup(&self.circuit_breakers, "circuit_breaker", name)
    }

    pub fn discovery(&self, name: &str) -> Result<Arc<dyn Discovery>> {
        lookup(&self.discoveries, "discovery", name)
    }
}

fn lookup<T: ?Sized>(table: &HashMap<String, Arc<T>>, kind: &str, name: &str) -> Result<Arc<T>> {
    table
        .get(name)
        .cloned()
        .ok_or_else(|| FlareError::extension_not_found(kind, name))
}
