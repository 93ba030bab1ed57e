//! 注册中心 Trait 定义

use super::register_info::RegisterInfo;
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// 订阅数据变化的监听器
///
/// 返回错误表示投递失败，由失败重试注册中心负责重新投递
pub trait NotifyListener: Send + Sync {
    fn notify(&self, register_infos: &[RegisterInfo]) -> Result<()>;
}

impl<F> NotifyListener for F
where
    F: Fn(&[RegisterInfo]) -> Result<()> + Send + Sync,
{
    fn notify(&self, register_infos: &[RegisterInfo]) -> Result<()> {
        self(register_infos)
    }
}

/// 监听器身份：按 `Arc` 指针区分同一个注册信息上的不同监听器
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerKey(usize);

impl ListenerKey {
    pub fn of(listener: &Arc<dyn NotifyListener>) -> Self {
        Self(Arc::as_ptr(listener) as *const () as usize)
    }
}

/// 注册中心 Trait
///
/// 远程调用可能失败，失败是触发重试任务的唯一来源
#[async_trait]
pub trait RegistryCenter: Send + Sync {
    /// 注册
    async fn register(&self, info: &RegisterInfo) -> Result<()>;

    /// 注销
    async fn unregister(&self, info: &RegisterInfo) -> Result<()>;

    /// 订阅，数据变化时回调监听器
    async fn subscribe(&self, info: &RegisterInfo, listener: Arc<dyn NotifyListener>) -> Result<()>;

    /// 取消订阅
    async fn unsubscribe(&self, info: &RegisterInfo, listener: Arc<dyn NotifyListener>)
    -> Result<()>;

    /// 销毁，需要幂等
    async fn destroy(&self);

    /// 是否可用
    fn is_available(&self) -> bool {
        true
    }
}
