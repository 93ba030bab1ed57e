//! 注册中心模块
//!
//! 注册信息编码、注册中心抽象、失败重试任务、失败重试注册中心和本地缓存

pub mod cache;
pub mod center;
pub mod data;
pub mod failback;
pub mod register_info;
pub mod retry;

pub use cache::{
    EXPIRE_TIME_SECS_KEY, REGISTER_INFO_SEPARATOR, RegistryCenterCache, UPDATE_TIME_SECS_KEY,
    UPDATE_VERSION_KEY,
};
pub use center::{ListenerKey, NotifyListener, RegistryCenter};
pub use data::{CONSUMERS_CATEGORY, PROVIDERS_CATEGORY, RegistryCenterData};
pub use failback::FailbackRegistryCenter;
pub use register_info::{PARAM_CATEGORY, RegisterInfo};
pub use retry::{RetryHost, RetryKind, RetryOperation, RetryScheduler, RetryState, RetryTask};
