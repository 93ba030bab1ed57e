//! 直连地址服务发现

use super::{Discovery, ServiceId, ServiceInstance, filter_unhealthy};
use crate::error::{FlareError, Result};
use async_trait::async_trait;
use dashmap::DashMap;

/// 直连地址服务发现，不依赖注册中心
#[derive(Debug, Default)]
pub struct StaticDiscovery {
    services: DashMap<String, Vec<ServiceInstance>>,
}

impl StaticDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置服务的实例列表
    pub fn with_service(
        self,
        service_name: impl Into<String>,
        instances: Vec<ServiceInstance>,
    ) -> Self {
        self.services.insert(service_name.into(), instances);
        self
    }

    /// 使用 `host:port,host:port` 形式的地址列表设置服务
    pub fn with_addresses(self, service_name: impl Into<String>, addresses: &str) -> Result<Self> {
        let instances = parse_addresses(addresses)?;
        Ok(self.with_service(service_name, instances))
    }

    /// 替换服务的实例列表
    pub fn update(&self, service_name: impl Into<String>, instances: Vec<ServiceInstance>) {
        self.services.insert(service_name.into(), instances);
    }
}

#[async_trait]
impl Discovery for StaticDiscovery {
    async fn list(&self, service_id: &ServiceId) -> Result<Vec<ServiceInstance>> {
        let instances = self
            .services
            .get(service_id.service_name())
            .map(|entry| entry.value().clone())
            .unwrap_or_default();
        Ok(filter_unhealthy(service_id, instances))
    }
}

/// 解析 `host:port,host:port` 地址列表，IPv6 地址需要加方括号
pub fn parse_addresses(addresses: &str) -> Result<Vec<ServiceInstance>> {
    addresses
        .split(',')
        .map(str::trim)
        .filter(|addr| !addr.is_empty())
        .map(parse_address)
        .collect()
}

fn parse_address(address: &str) -> Result<ServiceInstance> {
    let (host, port) = address
        .rsplit_once(':')
        .ok_or_else(|| FlareError::invalid_address(address))?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return Err(FlareError::invalid_address(address));
    }
    let port: u16 = port
        .parse()
        .map_err(|_| FlareError::invalid_address(address))?;
    Ok(ServiceInstance::new(host, port))
}
