//! 熔断器
//!
//! 熔断状态按 (host, port) 维护，不修改服务实例本身。
//!
//! ```text
//! Closed --N 次连续失败--> Open --reset_timeout--> HalfOpen
//!   ^                                                 |
//!   +---------------M 次连续成功----------------------+
//! HalfOpen 中任意一次失败立即回到 Open
//! ```

use crate::discovery::ServiceInstance;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// 熔断器 Trait
pub trait CircuitBreaker: Send + Sync {
    /// 实例当前是否允许请求
    fn allow_request(&self, instance: &ServiceInstance) -> bool;

    /// 上报调用结果，`code == 0` 表示成功
    fn report(&self, instance: &ServiceInstance, code: i32, cost_ms: u64);
}

/// 不熔断
#[derive(Debug, Default, Clone, Copy)]
pub struct NoneCircuitBreaker;

impl CircuitBreaker for NoneCircuitBreaker {
    fn allow_request(&self, _instance: &ServiceInstance) -> bool {
        true
    }

    fn report(&self, _instance: &ServiceInstance, _code: i32, _cost_ms: u64) {}
}

/// 熔断配置
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// 连续失败多少次后熔断
    pub failure_threshold: u32,
    /// 半开状态下连续成功多少次后恢复
    pub success_threshold: u32,
    /// 熔断后多久进入半开
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            reset_timeout: Duration::from_secs(30),
        }
    }
}

/// 熔断状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

#[derive(Debug)]
struct EndpointCircuit {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    last_opened: Option<Instant>,
}

impl EndpointCircuit {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            last_opened: None,
        }
    }

    /// 熔断超时后转入半开
    fn refresh(&mut self, reset_timeout: Duration) {
        if self.state == CircuitState::Open
            && let Some(last_opened) = self.last_opened
            && last_opened.elapsed() >= reset_timeout
        {
            self.state = CircuitState::HalfOpen;
            self.consecutive_successes = 0;
        }
    }

    fn open(&mut self) {
        self.state = CircuitState::Open;
        self.last_opened = Some(Instant::now());
        self.consecutive_successes = 0;
    }
}

type EndpointKey = (String, u16);

/// 连续失败熔断器
#[derive(Debug, Default)]
pub struct ConsecutiveFailureCircuitBreaker {
    circuits: RwLock<HashMap<EndpointKey, EndpointCircuit>>,
    config: CircuitBreakerConfig,
}

impl ConsecutiveFailureCircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            circuits: RwLock::new(HashMap::new()),
            config,
        }
    }

    fn key(instance: &ServiceInstance) -> EndpointKey {
        (instance.host().to_string(), instance.port())
    }

    /// 实例当前的熔断状态，没有记录的实例为 `Closed`
    pub fn state(&self, instance: &ServiceInstance) -> CircuitState {
        let mut circuits = self.circuits.write();
        match circuits.get_mut(&Self::key(instance)) {
            Some(circuit) => {
                circuit.refresh(self.config.reset_timeout);
                circuit.state
            }
            None => CircuitState::Closed,
        }
    }

    /// 熔断关闭时移除记录，只有出现过失败的实例才占用表项
    fn record_success(&self, instance: &ServiceInstance) {
        let key = Self::key(instance);
        let mut circuits = self.circuits.write();
        let Some(circuit) = circuits.get_mut(&key) else {
            return;
        };
        circuit.refresh(self.config.reset_timeout);
        let recovered = match circuit.state {
            CircuitState::Closed => false,
            CircuitState::Open => {
                circuit.consecutive_failures = 0;
                return;
            }
            CircuitState::HalfOpen => {
                circuit.consecutive_successes += 1;
                if circuit.consecutive_successes < self.config.success_threshold {
                    return;
                }
                true
            }
        };
        circuits.remove(&key);
        if recovered {
            info!(
                endpoint = %instance.address(),
                success_threshold = self.config.success_threshold,
                "Circuit closed, recovery confirmed"
            );
        }
    }

    fn record_failure(&self, instance: &ServiceInstance) {
        let mut circuits = self.circuits.write();
        let circuit = circuits
            .entry(Self::key(instance))
            .or_insert_with(EndpointCircuit::new);
        circuit.refresh(self.config.reset_timeout);
        match circuit.state {
            CircuitState::Closed => {
                circuit.consecutive_failures += 1;
                if circuit.consecutive_failures >= self.config.failure_threshold {
                    circuit.open();
                    warn!(
                        endpoint = %instance.address(),
                        consecutive_failures = circuit.consecutive_failures,
                        "Circuit opened, endpoint marked unavailable"
                    );
                }
            }
            CircuitState::HalfOpen => {
                circuit.open();
                warn!(endpoint = %instance.address(), "Probe failed, circuit reopened");
            }
            CircuitState::Open => circuit.last_opened = Some(Instant::now()),
        }
    }
}

impl CircuitBreaker for ConsecutiveFailureCircuitBreaker {
    fn allow_request(&self, instance: &ServiceInstance) -> bool {
        self.state(instance) != CircuitState::Open
    }

    fn report(&self, instance: &ServiceInstance, code: i32, _cost_ms: u64) {
        if code == 0 {
            self.record_success(instance);
        } else {
            self.record_failure(instance);
        }
    }
}
