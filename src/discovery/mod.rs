//! 服务发现模块
//!
//! 把服务标识解析为候选实例列表。实现包括直连地址和基于注册中心订阅两种

pub mod instance;
pub mod registry_discovery;
pub mod static_discovery;

use crate::error::Result;
use async_trait::async_trait;

pub use instance::{
    DEFAULT_WEIGHT, METADATA_PREFIX, PARAM_HEALTHY, PARAM_INCLUDE_CIRCUIT_BROKEN,
    PARAM_INCLUDE_UNHEALTHY, PARAM_WEIGHT, PARAM_ZONE, ServiceId, ServiceInstance,
};
pub use registry_discovery::RegistryDiscovery;
pub use static_discovery::StaticDiscovery;

/// 服务发现 Trait
///
/// 同一个服务标识会被反复查询，实现不能每次都重新订阅
#[async_trait]
pub trait Discovery: Send + Sync {
    /// 列出服务的候选实例
    ///
    /// 参数表中的 `include_unhealthy` 为 `true` 时需要返回不健康实例
    async fn list(&self, service_id: &ServiceId) -> Result<Vec<ServiceInstance>>;
}

/// 按服务标识的提示过滤不健康实例
pub(crate) fn filter_unhealthy(
    service_id: &ServiceId,
    instances: Vec<ServiceInstance>,
) -> Vec<ServiceInstance> {
    if service_id.include_unhealthy() {
        return instances;
    }
    instances.into_iter().filter(ServiceInstance::is_healthy).collect()
}
