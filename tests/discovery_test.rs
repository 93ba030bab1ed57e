//! 服务发现集成测试

use async_trait::async_trait;
use flare_rpc_client::config::{CacheConfig, RegistryConfig};
use flare_rpc_client::discovery::{
    Discovery, PARAM_INCLUDE_UNHEALTHY, RegistryDiscovery, ServiceId, ServiceInstance,
    StaticDiscovery,
};
use flare_rpc_client::error::{FlareError, Result};
use flare_rpc_client::registry::{
    FailbackRegistryCenter, NotifyListener, RegisterInfo, RegistryCenter, RegistryCenterCache,
    RegistryCenterData,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// 内存注册中心，可以切换为不可用
#[derive(Default)]
struct MemoryRegistry {
    down: AtomicBool,
    subscribe_calls: AtomicUsize,
    listeners: Mutex<Vec<Arc<dyn NotifyListener>>>,
}

impl MemoryRegistry {
    fn push(&self, infos: &[RegisterInfo]) {
        for listener in self.listeners.lock().iter() {
            listener.notify(infos).expect("notify");
        }
    }
}

#[async_trait]
impl RegistryCenter for MemoryRegistry {
    async fn register(&self, _info: &RegisterInfo) -> Result<()> {
        Ok(())
    }

    async fn unregister(&self, _info: &RegisterInfo) -> Result<()> {
        Ok(())
    }

    async fn subscribe(
        &self,
        _info: &RegisterInfo,
        listener: Arc<dyn NotifyListener>,
    ) -> Result<()> {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        if self.down.load(Ordering::SeqCst) {
            return Err(FlareError::registry_unavailable("registry down"));
        }
        self.listeners.lock().push(listener);
        Ok(())
    }

    async fn unsubscribe(
        &self,
        _info: &RegisterInfo,
        listener: Arc<dyn NotifyListener>,
    ) -> Result<()> {
        self.listeners.lock().retain(|l| !Arc::ptr_eq(l, &listener));
        Ok(())
    }

    async fn destroy(&self) {}
}

fn provider(host: &str) -> RegisterInfo {
    RegisterInfo::new("flare", host, 9000, "echo")
}

/// 测试：直连发现默认过滤不健康实例
#[test]
fn test_static_discovery_filters_unhealthy() {
    tokio_test::block_on(async {
        let discovery = StaticDiscovery::new().with_service(
            "echo",
            vec![
                ServiceInstance::new("10.0.0.1", 80),
                ServiceInstance::new("10.0.0.2", 80).with_health(false),
            ],
        );

        let healthy = discovery.list(&ServiceId::new("echo")).await.expect("list");
        assert_eq!(healthy, vec![ServiceInstance::new("10.0.0.1", 80)]);

        let all = discovery
            .list(&ServiceId::new("echo").with_parameter(PARAM_INCLUDE_UNHEALTHY, "true"))
            .await
            .expect("list");
        assert_eq!(all.len(), 2);

        assert!(discovery.list(&ServiceId::new("unknown")).await.expect("list").is_empty());
    });
}

/// 测试：同一服务多次查询只订阅一次，并返回推送的数据
#[tokio::test]
async fn test_registry_discovery_subscribes_once() {
    let registry = Arc::new(MemoryRegistry::default());
    let discovery = RegistryDiscovery::new(registry.clone(), "flare");
    let service_id = ServiceId::new("echo");

    assert!(discovery.list(&service_id).await.expect("list").is_empty());
    registry.push(&[provider("10.0.0.1"), provider("10.0.0.2").with_parameter("healthy", "false")]);

    for _ in 0..5 {
        let instances = discovery.list(&service_id).await.expect("list");
        assert_eq!(instances, vec![ServiceInstance::new("10.0.0.1", 9000)]);
    }
    let all = discovery
        .list(&service_id.clone().with_parameter(PARAM_INCLUDE_UNHEALTHY, "true"))
        .await
        .expect("list");
    assert_eq!(all.len(), 2);

    assert_eq!(registry.subscribe_calls.load(Ordering::SeqCst), 1);
    assert_eq!(discovery.subscription_count(), 1);

    discovery.close().await;
    assert!(registry.listeners.lock().is_empty());
    assert_eq!(discovery.subscription_count(), 0);
}

/// 测试：订阅失败时回退到本地缓存，下一次查询重新订阅
#[tokio::test]
async fn test_registry_discovery_falls_back_to_cache() {
    let cache = RegistryCenterCache::new(&CacheConfig::default());
    let cached = vec![provider("10.0.0.7")];
    cache.save(&cached[0], &RegistryCenterData::from_register_infos(&cached));

    let registry = Arc::new(MemoryRegistry::default());
    registry.down.store(true, Ordering::SeqCst);
    let discovery = RegistryDiscovery::new(registry.clone(), "flare").with_cache(cache);
    let service_id = ServiceId::new("echo");

    let instances = discovery.list(&service_id).await.expect("list");
    assert_eq!(instances, vec![ServiceInstance::new("10.0.0.7", 9000)]);

    registry.down.store(false, Ordering::SeqCst);
    discovery.list(&service_id).await.expect("list");
    discovery.list(&service_id).await.expect("list");
    assert_eq!(registry.subscribe_calls.load(Ordering::SeqCst), 2);
}

/// 测试：经过失败重试注册中心的发现，注册中心不可用时由缓存通知兜底
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_discovery_over_failback_registry() {
    let cache = RegistryCenterCache::new(&CacheConfig::default());
    let cached = vec![provider("10.0.0.8"), provider("10.0.0.9")];
    cache.save(&cached[0], &RegistryCenterData::from_register_infos(&cached));

    let backend = Arc::new(MemoryRegistry::default());
    backend.down.store(true, Ordering::SeqCst);
    let config = RegistryConfig::default()
        .with_retry_period(Duration::from_millis(10))
        .with_max_retries(50);
    let failback = Arc::new(
        FailbackRegistryCenter::new(backend.clone(), &config, Some(cache)).expect("registry"),
    );
    let discovery = RegistryDiscovery::new(failback.clone(), "flare");

    let instances = discovery.list(&ServiceId::new("echo")).await.expect("list");
    assert_eq!(instances.len(), 2);

    backend.down.store(false, Ordering::SeqCst);
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while backend.listeners.lock().is_empty() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    backend.push(&[provider("10.0.0.10")]);
    let instances = discovery.list(&ServiceId::new("echo")).await.expect("list");
    assert_eq!(instances, vec![ServiceInstance::new("10.0.0.10", 9000)]);

    failback.destroy().await;
}
