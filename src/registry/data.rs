//! 注册中心订阅数据

use super::register_info::RegisterInfo;
use std::collections::BTreeMap;

/// 服务提供者
pub const PROVIDERS_CATEGORY: &str = "providers";
/// 服务消费者
pub const CONSUMERS_CATEGORY: &str = "consumers";

/// 单个订阅服务在注册中心侧的数据：类别 -> 注册信息列表
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryCenterData {
    entries: BTreeMap<String, Vec<RegisterInfo>>,
}

impl RegistryCenterData {
    pub fn new() -> Self {
        Self::default()
    }

    /// 按类别对注册信息分组
    pub fn from_register_infos(infos: &[RegisterInfo]) -> Self {
        let mut data = Self::new();
        for info in infos {
            data.entries
                .entry(info.category().to_string())
                .or_default()
                .push(info.clone());
        }
        data
    }

    /// 替换某个类别下的全部注册信息，空列表会移除该类别
    pub fn put(&mut self, category: impl Into<String>, infos: Vec<RegisterInfo>) {
        let category = category.into();
        if infos.is_empty() {
            self.entries.remove(&category);
        } else {
            self.entries.insert(category, infos);
        }
    }

    pub fn get(&self, category: &str) -> &[RegisterInfo] {
        self.entries.get(category).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// 所有类别的注册信息
    pub fn register_infos(&self) -> impl Iterator<Item = &RegisterInfo> {
        self.entries.values().flatten()
    }

    /// 是否没有任何注册信息，决定缓存是删除还是写入
    pub fn is_empty(&self) -> bool {
        self.entries.values().all(Vec::is_empty)
    }
}
