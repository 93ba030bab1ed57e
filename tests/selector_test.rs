//! 选址链路集成测试
//!
//! 使用脚本化的服务发现和熔断器验证 选址 -> 熔断判定 -> 重新选址 的行为

use async_trait::async_trait;
use flare_rpc_client::config::SelectorConfig;
use flare_rpc_client::discovery::{Discovery, ServiceId, ServiceInstance, StaticDiscovery};
use flare_rpc_client::error::{ErrorCode, FlareError, Result};
use flare_rpc_client::selector::{
    CircuitBreaker, ConsecutiveFailureCircuitBreaker, CircuitBreakerConfig, DefaultSelector,
    Extensions, LoadBalance, MetadataRouter, NoneCircuitBreaker, NoneRouter, RandomLoadBalance,
    Request, Selector,
};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// 固定返回实例列表，并记录最后一次查询
struct ScriptedDiscovery {
    instances: Vec<ServiceInstance>,
    last_query: Mutex<Option<ServiceId>>,
}

impl ScriptedDiscovery {
    fn new(instances: Vec<ServiceInstance>) -> Arc<Self> {
        Arc::new(Self {
            instances,
            last_query: Mutex::new(None),
        })
    }
}

#[async_trait]
impl Discovery for ScriptedDiscovery {
    async fn list(&self, service_id: &ServiceId) -> Result<Vec<ServiceInstance>> {
        *self.last_query.lock() = Some(service_id.clone());
        Ok(self.instances.clone())
    }
}

struct FailingDiscovery;

#[async_trait]
impl Discovery for FailingDiscovery {
    async fn list(&self, _service_id: &ServiceId) -> Result<Vec<ServiceInstance>> {
        Err(FlareError::discovery_failed("registry unreachable"))
    }
}

/// 只放行指定主机的熔断器，并统计判定次数
struct AllowHosts {
    hosts: HashSet<String>,
    checks: AtomicUsize,
}

impl AllowHosts {
    fn new(hosts: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            hosts: hosts.iter().map(|h| h.to_string()).collect(),
            checks: AtomicUsize::new(0),
        })
    }
}

impl CircuitBreaker for AllowHosts {
    fn allow_request(&self, instance: &ServiceInstance) -> bool {
        self.checks.fetch_add(1, Ordering::SeqCst);
        self.hosts.contains(instance.host())
    }

    fn report(&self, _instance: &ServiceInstance, _code: i32, _cost_ms: u64) {}
}

/// 记录调用次数的负载均衡器
#[derive(Default)]
struct SpyLoadBalance {
    calls: AtomicUsize,
}

impl LoadBalance for SpyLoadBalance {
    fn do_select<'a>(
        &self,
        instances: &'a [ServiceInstance],
        _request: &Request,
    ) -> Option<&'a ServiceInstance> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        instances.first()
    }
}

fn selector(
    discovery: Arc<dyn Discovery>,
    load_balance: Arc<dyn LoadBalance>,
    circuit_breaker: Arc<dyn CircuitBreaker>,
) -> DefaultSelector {
    DefaultSelector::new(discovery, Arc::new(NoneRouter), load_balance, circuit_breaker)
}

/// 测试：只有 A 可用时，100 次选址都返回 A
#[tokio::test]
async fn test_select_one_skips_circuit_broken_instance() {
    let a = ServiceInstance::new("a", 8080);
    let b = ServiceInstance::new("b", 8080).with_health(false);
    let discovery = ScriptedDiscovery::new(vec![a.clone(), b]);
    let selector = selector(
        discovery,
        Arc::new(RandomLoadBalance),
        AllowHosts::new(&["a"]),
    );

    let service_id = ServiceId::new("echo");
    for _ in 0..100 {
        let mut request = Request::new();
        let chosen = selector
            .select_one(&service_id, &mut request)
            .await
            .expect("select one");
        assert_eq!(chosen, Some(a.clone()));
    }
}

/// 测试：服务发现返回空列表时得到“没有实例”而不是错误
#[tokio::test]
async fn test_select_one_empty_discovery() {
    let selector = selector(
        ScriptedDiscovery::new(vec![]),
        Arc::new(RandomLoadBalance),
        Arc::new(NoneCircuitBreaker),
    );
    let mut request = Request::new();
    let chosen = selector
        .select_one(&ServiceId::new("echo"), &mut request)
        .await
        .expect("select one");
    assert!(chosen.is_none());
}

/// 测试：只有一个候选实例时不调用负载均衡算法
#[tokio::test]
async fn test_singleton_skips_load_balance() {
    let only = ServiceInstance::new("10.0.0.1", 9000);
    let spy = Arc::new(SpyLoadBalance::default());
    let selector = selector(
        ScriptedDiscovery::new(vec![only.clone()]),
        spy.clone(),
        Arc::new(NoneCircuitBreaker),
    );

    let mut request = Request::new();
    let chosen = selector
        .select_one(&ServiceId::new("echo"), &mut request)
        .await
        .expect("select one");
    assert_eq!(chosen, Some(only));
    assert_eq!(spy.calls.load(Ordering::SeqCst), 0);
}

/// 测试：部分实例被熔断时永远不会选中被熔断的实例
#[tokio::test]
async fn test_never_returns_inadmissible_instance() {
    let instances: Vec<ServiceInstance> = ["h1", "h2", "h3", "h4", "h5"]
        .iter()
        .map(|h| ServiceInstance::new(*h, 80))
        .collect();
    let breaker = AllowHosts::new(&["h2", "h4"]);
    let selector = selector(
        ScriptedDiscovery::new(instances),
        Arc::new(RandomLoadBalance),
        breaker,
    );

    let service_id = ServiceId::new("echo");
    let mut seen = HashSet::new();
    for _ in 0..200 {
        let mut request = Request::new();
        let chosen = selector
            .select_one(&service_id, &mut request)
            .await
            .expect("select one")
            .expect("an admissible instance");
        assert!(chosen.host() == "h2" || chosen.host() == "h4");
        seen.insert(chosen.host().to_string());
    }
    // 重新选址在全部可用实例上负载均衡
    assert_eq!(seen.len(), 2);
}

/// 测试：所有实例都被熔断时返回“没有实例”
#[tokio::test]
async fn test_all_circuit_broken_returns_none() {
    let selector = selector(
        ScriptedDiscovery::new(vec![
            ServiceInstance::new("h1", 80),
            ServiceInstance::new("h2", 80),
        ]),
        Arc::new(RandomLoadBalance),
        AllowHosts::new(&[]),
    );
    let mut request = Request::new();
    let chosen = selector
        .select_one(&ServiceId::new("echo"), &mut request)
        .await
        .expect("select one");
    assert!(chosen.is_none());
}

/// 测试：选址时请求服务发现返回全部实例，且不修改调用方的服务标识；路由元数据写入请求上下文
#[tokio::test]
async fn test_select_one_marks_query_and_propagates_metadata() {
    let discovery = ScriptedDiscovery::new(vec![ServiceInstance::new("h1", 80)]);
    let selector = selector(
        discovery.clone(),
        Arc::new(RandomLoadBalance),
        Arc::new(NoneCircuitBreaker),
    );

    let service_id = ServiceId::new("echo").with_metadata("set", "gz.1");
    let mut request = Request::new();
    selector
        .select_one(&service_id, &mut request)
        .await
        .expect("select one");

    let query = discovery.last_query.lock().clone().expect("discovery queried");
    assert!(query.include_unhealthy());
    assert!(query.include_circuit_broken());
    assert!(!service_id.include_unhealthy());
    assert_eq!(request.context_value("set"), Some("gz.1"));
}

/// 测试：元数据路由优先选择匹配的实例
#[tokio::test]
async fn test_metadata_router_in_pipeline() {
    let gz = ServiceInstance::new("h1", 80).with_parameter("set", "gz.1");
    let sh = ServiceInstance::new("h2", 80).with_parameter("set", "sh.1");
    let selector = DefaultSelector::new(
        ScriptedDiscovery::new(vec![gz, sh.clone()]),
        Arc::new(MetadataRouter),
        Arc::new(RandomLoadBalance),
        Arc::new(NoneCircuitBreaker),
    );

    let service_id = ServiceId::new("echo").with_metadata("set", "sh.1");
    for _ in 0..20 {
        let mut request = Request::new();
        let chosen = selector
            .select_one(&service_id, &mut request)
            .await
            .expect("select one");
        assert_eq!(chosen, Some(sh.clone()));
    }
}

/// 测试：select_all 只返回可用实例，空列表时不调用熔断器
#[tokio::test]
async fn test_select_all_filters_by_breaker() {
    let breaker = AllowHosts::new(&["h1"]);
    let selector = selector(
        ScriptedDiscovery::new(vec![
            ServiceInstance::new("h1", 80),
            ServiceInstance::new("h2", 80),
        ]),
        Arc::new(RandomLoadBalance),
        breaker.clone(),
    );
    let all = selector
        .select_all(&ServiceId::new("echo"), &Request::new())
        .await
        .expect("select all");
    assert_eq!(all, vec![ServiceInstance::new("h1", 80)]);

    let empty_breaker = AllowHosts::new(&["h1"]);
    let empty = selector_with_empty(empty_breaker.clone())
        .select_all(&ServiceId::new("echo"), &Request::new())
        .await
        .expect("select all");
    assert!(empty.is_empty());
    assert_eq!(empty_breaker.checks.load(Ordering::SeqCst), 0);
}

fn selector_with_empty(breaker: Arc<AllowHosts>) -> DefaultSelector {
    selector(
        ScriptedDiscovery::new(vec![]),
        Arc::new(RandomLoadBalance),
        breaker,
    )
}

/// 测试：服务发现失败时返回错误
#[tokio::test]
async fn test_discovery_failure_propagates() {
    let selector = selector(
        Arc::new(FailingDiscovery),
        Arc::new(RandomLoadBalance),
        Arc::new(NoneCircuitBreaker),
    );
    let mut request = Request::new();
    let err = selector
        .select_one(&ServiceId::new("echo"), &mut request)
        .await
        .expect_err("discovery failure");
    assert_eq!(err.code(), Some(ErrorCode::DiscoveryFailed));
}

/// 测试：上报失败后熔断器生效，选址转向其他实例
#[tokio::test]
async fn test_report_opens_circuit() {
    let h1 = ServiceInstance::new("h1", 80);
    let h2 = ServiceInstance::new("h2", 80);
    let selector = selector(
        ScriptedDiscovery::new(vec![h1.clone(), h2.clone()]),
        Arc::new(RandomLoadBalance),
        Arc::new(ConsecutiveFailureCircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 2,
            success_threshold: 1,
            reset_timeout: Duration::from_secs(60),
        })),
    );
    selector.report(&h1, -1, 12);
    selector.report(&h1, -1, 15);

    for _ in 0..50 {
        let mut request = Request::new();
        let chosen = selector
            .select_one(&ServiceId::new("echo"), &mut request)
            .await
            .expect("select one");
        assert_eq!(chosen, Some(h2.clone()));
    }
}

/// 测试：按配置名称组装选址器，未知名称返回 ExtensionNotFound
#[tokio::test]
async fn test_from_config_resolves_extensions() {
    let discovery = Arc::new(
        StaticDiscovery::new()
            .with_addresses("echo", "127.0.0.1:8001,127.0.0.1:8002")
            .expect("addresses"),
    );
    let mut extensions = Extensions::with_defaults();
    extensions.register_discovery("direct", discovery);

    let config = SelectorConfig {
        load_balance: "round_robin".to_string(),
        router: "metadata".to_string(),
        circuit_breaker: "consecutive_failure".to_string(),
        discovery: "direct".to_string(),
    };
    let selector = DefaultSelector::from_config(&config, &extensions).expect("selector");
    let mut ports = HashSet::new();
    for _ in 0..4 {
        let mut request = Request::new();
        let chosen = selector
            .select_one(&ServiceId::new("echo"), &mut request)
            .await
            .expect("select one")
            .expect("instance");
        ports.insert(chosen.port());
    }
    assert_eq!(ports.len(), 2);

    let unknown = SelectorConfig {
        load_balance: "weighted".to_string(),
        ..config.clone()
    };
    let err = DefaultSelector::from_config(&unknown, &extensions)
        .err()
        .expect("unknown load balance");
    assert_eq!(err.code(), Some(ErrorCode::ExtensionNotFound));

    // 默认配置使用的直连发现没有注册
    let err = DefaultSelector::from_config(&SelectorConfig::default(), &extensions)
        .err()
        .expect("unregistered discovery");
    assert_eq!(err.code(), Some(ErrorCode::ExtensionNotFound));
}
