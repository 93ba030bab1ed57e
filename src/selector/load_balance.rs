//! 负载均衡模块
//!
//! 提供多种负载均衡策略，用于从多个服务实例中选择一个

use super::request::Request;
use crate::discovery::ServiceInstance;
use crate::error::{FlareError, Result};
use rand::Rng;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};

/// 负载均衡 Trait
///
/// 调用方保证传入的列表至少有两个实例，返回值必须是列表中的元素
pub trait LoadBalance: Send + Sync {
    fn do_select<'a>(
        &self,
        instances: &'a [ServiceInstance],
        request: &Request,
    ) -> Option<&'a ServiceInstance>;
}

/// 从实例列表中选择一个实例
///
/// 空列表返回 `None`；只有一个实例时直接返回，不调用负载均衡算法
pub fn select<'a>(
    balancer: &dyn LoadBalance,
    instances: &'a [ServiceInstance],
    request: &Request,
) -> Option<&'a ServiceInstance> {
    match instances {
        [] => None,
        [only] => Some(only),
        _ => balancer.do_select(instances, request),
    }
}

/// 负载均衡策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadBalanceStrategy {
    /// 随机（Random）
    Random,
    /// 轮询（Round Robin）
    RoundRobin,
    /// 一致性哈希（Consistent Hash）
    ConsistentHash,
}

impl LoadBalanceStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadBalanceStrategy::Random => "random",
            LoadBalanceStrategy::RoundRobin => "round_robin",
            LoadBalanceStrategy::ConsistentHash => "consistent_hash",
        }
    }

    /// 创建对应的负载均衡器
    pub fn build(&self) -> Box<dyn LoadBalance> {
        match self {
            LoadBalanceStrategy::Random => Box::new(RandomLoadBalance),
            LoadBalanceStrategy::RoundRobin => Box::new(RoundRobinLoadBalance::new()),
            LoadBalanceStrategy::ConsistentHash => Box::new(ConsistentHashLoadBalance),
        }
    }
}

impl FromStr for LoadBalanceStrategy {
    type Err = FlareError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "random" => Ok(LoadBalanceStrategy::Random),
            "round_robin" | "roundrobin" => Ok(LoadBalanceStrategy::RoundRobin),
            "consistent_hash" | "consistenthash" => Ok(LoadBalanceStrategy::ConsistentHash),
            other => Err(FlareError::extension_not_found("load_balance", other)),
        }
    }
}

/// 均匀随机选择
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomLoadBalance;

impl LoadBalance for RandomLoadBalance {
    fn do_select<'a>(
        &self,
        instances: &'a [ServiceInstance],
        _request: &Request,
    ) -> Option<&'a ServiceInstance> {
        if instances.is_empty() {
            return None;
        }
        let index = rand::thread_rng().gen_range(0..instances.len());
        instances.get(index)
    }
}

/// 轮询选择
#[derive(Debug, Default)]
pub struct RoundRobinLoadBalance {
    index: AtomicUsize,
}

impl RoundRobinLoadBalance {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalance for RoundRobinLoadBalance {
    fn do_select<'a>(
        &self,
        instances: &'a [ServiceInstance],
        _request: &Request,
    ) -> Option<&'a ServiceInstance> {
        if instances.is_empty() {
            return None;
        }
        let index = self.index.fetch_add(1, Ordering::Relaxed);
        instances.get(index % instances.len())
    }
}

/// 一致性哈希选择，同一个哈希键在实例列表不变时总是命中同一实例
///
/// 请求没有哈希键时退化为随机
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsistentHashLoadBalance;

impl LoadBalance for ConsistentHashLoadBalance {
    fn do_select<'a>(
        &self,
        instances: &'a [ServiceInstance],
        request: &Request,
    ) -> Option<&'a ServiceInstance> {
        let Some(key) = request.hash_key() else {
            return RandomLoadBalance.do_select(instances, request);
        };
        if instances.is_empty() {
            return None;
        }
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let hash = hasher.finish();
        instances.get((hash % instances.len() as u64) as usize)
    }
}
