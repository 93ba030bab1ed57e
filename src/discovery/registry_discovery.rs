//! 基于注册中心订阅的服务发现
//!
//! 每个服务标识只订阅一次，推送的数据保存在内存中；
//! 订阅还没有产生数据时回退到注册中心本地缓存

use super::{Discovery, ServiceId, ServiceInstance, filter_unhealthy};
use crate::error::Result;
use crate::registry::{
    CONSUMERS_CATEGORY, NotifyListener, PARAM_CATEGORY, PROVIDERS_CATEGORY, RegisterInfo,
    RegistryCenter, RegistryCenterCache,
};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// 订阅使用的主机，表示消费者自身
const CONSUMER_HOST: &str = "0.0.0.0";

type InstanceSlot = Arc<RwLock<Option<Vec<ServiceInstance>>>>;

struct Subscription {
    info: RegisterInfo,
    listener: Arc<dyn NotifyListener>,
    instances: InstanceSlot,
    subscribed: OnceCell<()>,
}

impl Subscription {
    fn new(protocol: &str, service_id: &ServiceId) -> Self {
        let mut info = RegisterInfo::new(protocol, CONSUMER_HOST, 0, service_id.service_name())
            .with_parameter(PARAM_CATEGORY, CONSUMERS_CATEGORY);
        if let Some(version) = service_id.version() {
            info = info.with_parameter("version", version);
        }
        if let Some(group) = service_id.group() {
            info = info.with_parameter("group", group);
        }

        let instances: InstanceSlot = Arc::new(RwLock::new(None));
        let slot = Arc::clone(&instances);
        let service = service_id.to_string();
        let listener: Arc<dyn NotifyListener> =
            Arc::new(move |infos: &[RegisterInfo]| -> Result<()> {
                let providers = to_instances(infos);
                debug!(service = %service, count = providers.len(), "Received provider update");
                *slot.write() = Some(providers);
                Ok(())
            });

        Self {
            info,
            listener,
            instances,
            subscribed: OnceCell::new(),
        }
    }
}

fn to_instances<'a>(infos: impl IntoIterator<Item = &'a RegisterInfo>) -> Vec<ServiceInstance> {
    infos
        .into_iter()
        .filter(|info| info.category() == PROVIDERS_CATEGORY)
        .map(ServiceInstance::from)
        .collect()
}

/// 基于注册中心的服务发现
pub struct RegistryDiscovery {
    registry: Arc<dyn RegistryCenter>,
    cache: Option<RegistryCenterCache>,
    protocol: String,
    subscriptions: DashMap<ServiceId, Arc<Subscription>>,
}

impl RegistryDiscovery {
    pub fn new(registry: Arc<dyn RegistryCenter>, protocol: impl Into<String>) -> Self {
        Self {
            registry,
            cache: None,
            protocol: protocol.into(),
            subscriptions: DashMap::new(),
        }
    }

    /// 订阅没有数据时使用的本地缓存
    pub fn with_cache(mut self, cache: RegistryCenterCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// 当前订阅的服务数
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// 取消全部订阅
    pub async fn close(&self) {
        let subscriptions: Vec<_> = self
            .subscriptions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        self.subscriptions.clear();

        for subscription in subscriptions {
            if subscription.subscribed.get().is_none() {
                continue;
            }
            if let Err(e) = self
                .registry
                .unsubscribe(&subscription.info, Arc::clone(&subscription.listener))
                .await
            {
                warn!(register_info = %subscription.info, error = %e, "Failed to unsubscribe");
            }
        }
        info!("Registry discovery closed");
    }

    fn subscription(&self, service_id: &ServiceId) -> Arc<Subscription> {
        let entry = self
            .subscriptions
            .entry(service_id.clone())
            .or_insert_with(|| Arc::new(Subscription::new(&self.protocol, service_id)));
        Arc::clone(entry.value())
    }
}

#[async_trait]
impl Discovery for RegistryDiscovery {
    async fn list(&self, service_id: &ServiceId) -> Result<Vec<ServiceInstance>> {
        let subscription = self.subscription(service_id);

        let subscribed = subscription
            .subscribed
            .get_or_try_init(|| async {
                self.registry
                    .subscribe(&subscription.info, Arc::clone(&subscription.listener))
                    .await
            })
            .await;
        if let Err(e) = subscribed {
            warn!(service = %service_id, error = %e, "Failed to subscribe, using registry cache");
        }

        let pushed = subscription.instances.read().clone();
        let instances = match pushed {
            Some(instances) => instances,
            None => match &self.cache {
                Some(cache) => {
                    let cached = to_instances(&cache.get_register_infos(service_id.service_name()));
                    debug!(service = %service_id, count = cached.len(), "Using cached providers");
                    cached
                }
                None => Vec::new(),
            },
        };
        Ok(filter_unhealthy(service_id, instances))
    }
}
