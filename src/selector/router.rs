//! 路由器
//!
//! 路由器在负载均衡之前过滤实例列表，不修改传入的列表

use super::request::Request;
use crate::discovery::ServiceInstance;

/// 路由器 Trait
pub trait Router: Send + Sync {
    fn route(&self, instances: &[ServiceInstance], request: &Request) -> Vec<ServiceInstance>;
}

/// 不做任何路由
#[derive(Debug, Default, Clone, Copy)]
pub struct NoneRouter;

impl Router for NoneRouter {
    fn route(&self, instances: &[ServiceInstance], _request: &Request) -> Vec<ServiceInstance> {
        instances.to_vec()
    }
}

/// 按元数据路由
///
/// 保留参数匹配请求上下文中全部路由条目的实例；没有实例匹配时返回原列表
#[derive(Debug, Default, Clone, Copy)]
pub struct MetadataRouter;

impl Router for MetadataRouter {
    fn route(&self, instances: &[ServiceInstance], request: &Request) -> Vec<ServiceInstance> {
        let filters = request.context();
        if filters.is_empty() {
            return instances.to_vec();
        }
        let matched: Vec<ServiceInstance> = instances
            .iter()
            .filter(|instance| instance.matches_parameters(filters))
            .cloned()
            .collect();
        if matched.is_empty() {
            tracing::debug!(
                filters = ?filters,
                candidates = instances.len(),
                "No instance matches routing metadata, keeping all"
            );
            return instances.to_vec();
        }
        matched
    }
}
