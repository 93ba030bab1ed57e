//! 服务实例与服务标识定义

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::{Hash, Hasher};

/// 实例参数：权重
pub const PARAM_WEIGHT: &str = "weight";
/// 实例参数：可用区
pub const PARAM_ZONE: &str = "zone";
/// 实例参数：健康状态（注册中心推送的实例上携带）
pub const PARAM_HEALTHY: &str = "healthy";

/// 默认权重
pub const DEFAULT_WEIGHT: u32 = 100;

/// 服务实例
///
/// 不可变值类型，按 (host, port, parameters, healthy) 结构化比较。
/// 健康状态变化通过构造新实例表达，熔断状态由熔断器按 (host, port) 另外维护
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ServiceInstance {
    host: String,
    port: u16,
    healthy: bool,
    parameters: BTreeMap<String, String>,
}

impl ServiceInstance {
    /// 创建新的服务实例
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            healthy: true,
            parameters: BTreeMap::new(),
        }
    }

    /// 添加参数
    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// 设置权重
    pub fn with_weight(self, weight: u32) -> Self {
        self.with_parameter(PARAM_WEIGHT, weight.to_string())
    }

    /// 设置健康状态
    pub fn with_health(mut self, healthy: bool) -> Self {
        self.healthy = healthy;
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy
    }

    pub fn parameters(&self) -> &BTreeMap<String, String> {
        &self.parameters
    }

    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).map(String::as_str)
    }

    /// 权重，缺省或非法时使用默认权重
    pub fn weight(&self) -> u32 {
        self.parameter(PARAM_WEIGHT)
            .and_then(|w| w.parse().ok())
            .unwrap_or(DEFAULT_WEIGHT)
    }

    /// `host:port` 形式的地址，IPv6 地址加方括号
    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// 检查是否匹配全部参数过滤条件
    pub fn matches_parameters(&self, filters: &HashMap<String, String>) -> bool {
        filters
            .iter()
            .all(|(key, value)| self.parameter(key) == Some(value.as_str()))
    }
}

impl fmt::Display for ServiceInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.address())
    }
}

/// ServiceId 参数：要求服务发现返回不健康的实例
pub const PARAM_INCLUDE_UNHEALTHY: &str = "include_unhealthy";
/// ServiceId 参数：要求服务发现返回已熔断的实例
pub const PARAM_INCLUDE_CIRCUIT_BROKEN: &str = "include_circuit_broken";
/// ServiceId 参数前缀：路由元数据，选址时会被拷贝到请求上下文
pub const METADATA_PREFIX: &str = "metadata.";

/// 服务标识
///
/// 描述调用方想要访问的逻辑服务。除参数表外构造后不可变；
/// 参数表可以在单次调用中携带选址提示。
/// 相等性和哈希只看身份字段，参数表不参与，因此可以作为并发表的键
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceId {
    service_name: String,
    version: Option<String>,
    group: Option<String>,
    caller_service: Option<String>,
    caller_namespace: Option<String>,
    caller_env: Option<String>,
    parameters: HashMap<String, String>,
}

impl ServiceId {
    /// 创建新的服务标识
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            version: None,
            group: None,
            caller_service: None,
            caller_namespace: None,
            caller_env: None,
            parameters: HashMap::new(),
        }
    }

    /// 设置版本
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// 设置分组
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    /// 设置调用方身份
    pub fn with_caller(
        mut self,
        service: impl Into<String>,
        namespace: impl Into<String>,
        env: impl Into<String>,
    ) -> Self {
        self.caller_service = Some(service.into());
        self.caller_namespace = Some(namespace.into());
        self.caller_env = Some(env.into());
        self
    }

    /// 添加参数
    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// 添加路由元数据
    pub fn with_metadata(self, key: impl AsRef<str>, value: impl Into<String>) -> Self {
        let key = format!("{}{}", METADATA_PREFIX, key.as_ref());
        self.with_parameter(key, value)
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn group(&self) -> Option<&str> {
        self.group.as_deref()
    }

    pub fn caller_service(&self) -> Option<&str> {
        self.caller_service.as_deref()
    }

    pub fn caller_namespace(&self) -> Option<&str> {
        self.caller_namespace.as_deref()
    }

    pub fn caller_env(&self) -> Option<&str> {
        self.caller_env.as_deref()
    }

    pub fn parameters(&self) -> &HashMap<String, String> {
        &self.parameters
    }

    /// 参数表是唯一允许在调用过程中修改的部分
    pub fn parameters_mut(&mut self) -> &mut HashMap<String, String> {
        &mut self.parameters
    }

    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).map(String::as_str)
    }

    fn flag(&self, key: &str) -> bool {
        self.parameter(key)
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }

    /// 是否要求包含不健康实例
    pub fn include_unhealthy(&self) -> bool {
        self.flag(PARAM_INCLUDE_UNHEALTHY)
    }

    /// 是否要求包含已熔断实例
    pub fn include_circuit_broken(&self) -> bool {
        self.flag(PARAM_INCLUDE_CIRCUIT_BROKEN)
    }

    /// 迭代路由元数据（去掉前缀后的键）
    pub fn metadata(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.parameters.iter().filter_map(|(k, v)| {
            k.strip_prefix(METADATA_PREFIX)
                .map(|key| (key, v.as_str()))
        })
    }
}

impl PartialEq for ServiceId {
    fn eq(&self, other: &Self) -> bool {
        self.service_name == other.service_name
            && self.version == other.version
            && self.group == other.group
            && self.caller_service == other.caller_service
            && self.caller_namespace == other.caller_namespace
            && self.caller_env == other.caller_env
    }
}

impl Eq for ServiceId {}

impl Hash for ServiceId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.service_name.hash(state);
        self.version.hash(state);
        self.group.hash(state);
        self.caller_service.hash(state);
        self.caller_namespace.hash(state);
        self.caller_env.hash(state);
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.service_name)?;
        if let Some(version) = &self.version {
            write!(f, ":{}", version)?;
        }
        if let Some(group) = &self.group {
            write!(f, "@{}", group)?;
        }
        Ok(())
    }
}
