//! 默认选址器
//!
//! 服务发现 -> 路由 -> 负载均衡 -> 熔断判定。
//! 选中的实例被熔断时，在候选列表中过滤出全部可用实例后重新负载均衡

use super::Selector;
use super::circuit_breaker::CircuitBreaker;
use super::extensions::Extensions;
use super::load_balance::{self, LoadBalance};
use super::request::Request;
use super::router::Router;
use crate::config::SelectorConfig;
use crate::discovery::{
    Discovery, PARAM_INCLUDE_CIRCUIT_BROKEN, PARAM_INCLUDE_UNHEALTHY, ServiceId, ServiceInstance,
};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// 默认选址器
#[derive(Clone)]
pub struct DefaultSelector {
    discovery: Arc<dyn Discovery>,
    router: Arc<dyn Router>,
    load_balance: Arc<dyn LoadBalance>,
    circuit_breaker: Arc<dyn CircuitBreaker>,
}

impl DefaultSelector {
    pub fn new(
        discovery: Arc<dyn Discovery>,
        router: Arc<dyn Router>,
        load_balance: Arc<dyn LoadBalance>,
        circuit_breaker: Arc<dyn CircuitBreaker>,
    ) -> Self {
        Self {
            discovery,
            router,
            load_balance,
            circuit_breaker,
        }
    }

    /// 按配置的名称从扩展容器中解析各组件
    pub fn from_config(config: &SelectorConfig, extensions: &Extensions) -> Result<Self> {
        Ok(Self::new(
            extensions.discovery(&config.discovery)?,
            extensions.router(&config.router)?,
            extensions.load_balance(&config.load_balance)?,
            extensions.circuit_breaker(&config.circuit_breaker)?,
        ))
    }
}

#[async_trait]
impl Selector for DefaultSelector {
    async fn select_one(
        &self,
        service_id: &ServiceId,
        request: &mut Request,
    ) -> Result<Option<ServiceInstance>> {
        // 不健康和已熔断的实例也要拿到，由后面的熔断判定过滤
        let mut query = service_id.clone();
        let params = query.parameters_mut();
        params.insert(PARAM_INCLUDE_UNHEALTHY.to_string(), "true".to_string());
        params.insert(PARAM_INCLUDE_CIRCUIT_BROKEN.to_string(), "true".to_string());

        let instances = self.discovery.list(&query).await?;

        for (key, value) in service_id.metadata() {
            request.put_context(key, value);
        }

        let routed = self.router.route(&instances, request);
        let Some(chosen) = load_balance::select(self.load_balance.as_ref(), &routed, request)
        else {
            debug!(service = %service_id, "No instance after routing");
            return Ok(None);
        };
        if self.circuit_breaker.allow_request(chosen) {
            return Ok(Some(chosen.clone()));
        }

        debug!(
            service = %service_id,
            instance = %chosen,
            "Selected instance is circuit broken, reselecting"
        );
        let admissible: Vec<ServiceInstance> = routed
            .iter()
            .filter(|instance| self.circuit_breaker.allow_request(instance))
            .cloned()
            .collect();
        Ok(load_balance::select(self.load_balance.as_ref(), &admissible, request).cloned())
    }

    async fn select_all(
        &self,
        service_id: &ServiceId,
        _request: &Request,
    ) -> Result<Vec<ServiceInstance>> {
        let instances = self.discovery.list(service_id).await?;
        if instances.is_empty() {
            return Ok(instances);
        }
        Ok(instances
            .into_iter()
            .filter(|instance| self.circuit_breaker.allow_request(instance))
            .collect())
    }

    fn report(&self, instance: &ServiceInstance, code: i32, cost_ms: u64) {
        self.circuit_breaker.report(instance, code, cost_ms);
    }
}
