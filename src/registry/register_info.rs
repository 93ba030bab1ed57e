//! 注册信息
//!
//! 规范字符串形式：`protocol://host:port/service?k1=v1&k2=v2`。
//! 各部分都做 form-urlencoded 编码，参数按键排序，因此编码结果唯一且可无损解码。
//! 编码后的字符串不含 `|`，可以直接用 `|` 拼接写入缓存文件

use crate::discovery::instance::{PARAM_HEALTHY, ServiceInstance};
use crate::error::{FlareError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use url::form_urlencoded;

/// 注册信息参数：数据类别
pub const PARAM_CATEGORY: &str = "category";

/// 注册中心记录
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegisterInfo {
    protocol: String,
    host: String,
    port: u16,
    service_name: String,
    parameters: BTreeMap<String, String>,
}

impl RegisterInfo {
    pub fn new(
        protocol: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        service_name: impl Into<String>,
    ) -> Self {
        Self {
            protocol: protocol.into(),
            host: host.into(),
            port,
            service_name: service_name.into(),
            parameters: BTreeMap::new(),
        }
    }

    /// 从服务实例构造注册信息
    pub fn from_instance(
        protocol: impl Into<String>,
        service_name: impl Into<String>,
        instance: &ServiceInstance,
    ) -> Self {
        let mut info = Self::new(protocol, instance.host(), instance.port(), service_name);
        info.parameters = instance.parameters().clone();
        if !instance.is_healthy() {
            info.parameters
                .insert(PARAM_HEALTHY.to_string(), "false".to_string());
        }
        info
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn parameters(&self) -> &BTreeMap<String, String> {
        &self.parameters
    }

    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).map(String::as_str)
    }

    /// 数据类别，缺省为 providers
    pub fn category(&self) -> &str {
        self.parameter(PARAM_CATEGORY)
            .unwrap_or(super::data::PROVIDERS_CATEGORY)
    }

    /// 编码为规范字符串
    pub fn encode(&self) -> String {
        let mut encoded = format!(
            "{}://{}:{}/{}",
            encode_component(&self.protocol),
            encode_component(&self.host),
            self.port,
            encode_component(&self.service_name),
        );
        if !self.parameters.is_empty() {
            let query = form_urlencoded::Serializer::new(String::new())
                .extend_pairs(self.parameters.iter())
                .finish();
            encoded.push('?');
            encoded.push_str(&query);
        }
        encoded
    }

    /// 从规范字符串解码
    pub fn decode(encoded: &str) -> Result<Self> {
        let (protocol, rest) = encoded
            .split_once("://")
            .ok_or_else(|| FlareError::decode_failed(format!("missing scheme: {}", encoded)))?;
        let (location, query) = match rest.split_once('?') {
            Some((location, query)) => (location, Some(query)),
            None => (rest, None),
        };
        let (authority, path) = location
            .split_once('/')
            .ok_or_else(|| FlareError::decode_failed(format!("missing service: {}", encoded)))?;
        let (host, port) = authority
            .rsplit_once(':')
            .ok_or_else(|| FlareError::decode_failed(format!("missing port: {}", encoded)))?;
        let port = port
            .parse::<u16>()
            .map_err(|e| FlareError::decode_failed(format!("invalid port in {}: {}", encoded, e)))?;

        let parameters = query
            .map(|q| form_urlencoded::parse(q.as_bytes()).into_owned().collect())
            .unwrap_or_default();

        Ok(Self {
            protocol: decode_component(protocol),
            host: decode_component(host),
            port,
            service_name: decode_component(path),
            parameters,
        })
    }
}

fn encode_component(raw: &str) -> String {
    form_urlencoded::byte_serialize(raw.as_bytes()).collect()
}

// 编码后的分量不含 `&` 和 `=`，整体会被解析成唯一一个键
fn decode_component(encoded: &str) -> String {
    form_urlencoded::parse(encoded.as_bytes())
        .next()
        .map(|(key, _)| key.into_owned())
        .unwrap_or_default()
}

impl fmt::Display for RegisterInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for RegisterInfo {
    type Err = FlareError;

    fn from_str(s: &str) -> Result<Self> {
        Self::decode(s)
    }
}

impl From<&RegisterInfo> for ServiceInstance {
    fn from(info: &RegisterInfo) -> Self {
        let healthy = info
            .parameter(PARAM_HEALTHY)
            .map(|v| !v.eq_ignore_ascii_case("false"))
            .unwrap_or(true);
        info.parameters
            .iter()
            .fold(ServiceInstance::new(info.host.clone(), info.port), |inst, (k, v)| {
                inst.with_parameter(k.clone(), v.clone())
            })
            .with_health(healthy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn component() -> impl Strategy<Value = String> {
        prop_oneof!["[a-zA-Z0-9:/?&=|#+%. ]{0,12}", "\\PC{0,8}"]
    }

    proptest! {
        #[test]
        fn decode_inverts_encode(
            protocol in component(),
            host in component(),
            port in any::<u16>(),
            service in component(),
            parameters in proptest::collection::btree_map(component(), component(), 0..4),
        ) {
            let mut info = RegisterInfo::new(protocol, host, port, service);
            for (key, value) in parameters {
                info = info.with_parameter(key, value);
            }
            let encoded = info.encode();
            prop_assert!(!encoded.contains('|'));
            prop_assert_eq!(RegisterInfo::decode(&encoded).expect("decode"), info);
        }
    }

    #[test]
    fn encode_is_canonical() {
        let info = RegisterInfo::new("trpc", "127.0.0.1", 8080, "trpc.demo.Greeter")
            .with_parameter("zone", "sz")
            .with_parameter("env", "test");
        assert_eq!(
            info.encode(),
            "trpc://127.0.0.1:8080/trpc.demo.Greeter?env=test&zone=sz"
        );
    }

    #[test]
    fn decode_restores_special_characters() {
        let info = RegisterInfo::new("trpc", "::1", 9000, "svc/with|pipe?")
            .with_parameter("a&b", "c=d|e")
            .with_parameter("space", "x y");
        let encoded = info.encode();
        assert!(!encoded.contains('|'));
        assert_eq!(RegisterInfo::decode(&encoded).unwrap(), info);
    }

    #[test]
    fn decode_rejects_malformed_input() {
        assert!(RegisterInfo::decode("no-scheme").is_err());
        assert!(RegisterInfo::decode("trpc://host-only").is_err());
        assert!(RegisterInfo::decode("trpc://host:notaport/svc").is_err());
    }

    #[test]
    fn unhealthy_flag_survives_instance_conversion() {
        let instance = ServiceInstance::new("10.0.0.1", 1000).with_health(false);
        let info = RegisterInfo::from_instance("trpc", "svc", &instance);
        let back = ServiceInstance::from(&info);
        assert!(!back.is_healthy());
        assert_eq!(back.host(), "10.0.0.1");
    }
}
