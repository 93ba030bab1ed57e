//! 失败重试注册中心
//!
//! 包装任意一个注册中心后端：后端调用失败时不向调用方报错，而是生成重试任务，
//! 同一操作在已有重试任务时不会重复创建。订阅推送的数据会写入本地缓存，
//! 订阅失败时先用缓存数据通知监听器。

use super::cache::RegistryCenterCache;
use super::center::{ListenerKey, NotifyListener, RegistryCenter};
use super::data::{PROVIDERS_CATEGORY, RegistryCenterData};
use super::register_info::RegisterInfo;
use super::retry::{RetryHost, RetryKind, RetryOperation, RetryScheduler, RetryTask};
use crate::config::RegistryConfig;
use crate::error::{FlareError, Result};
use async_trait::async_trait;
use dashmap::mapref::entry::{Entry, VacantEntry};
use dashmap::{DashMap, DashSet};
use futures::future::join_all;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

/// 失败任务表的键
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct TaskKey {
    info: RegisterInfo,
    listener: Option<ListenerKey>,
}

impl TaskKey {
    fn of(info: &RegisterInfo) -> Self {
        Self {
            info: info.clone(),
            listener: None,
        }
    }

    fn with_listener(info: &RegisterInfo, listener: &Arc<dyn NotifyListener>) -> Self {
        Self {
            info: info.clone(),
            listener: Some(ListenerKey::of(listener)),
        }
    }
}

type TaskTable = DashMap<TaskKey, Arc<RetryTask>>;

/// 订阅记录，后端看到的是包装后的监听器，推送经过它进入缓存和重试逻辑
struct Subscription {
    backend_listener: Arc<dyn NotifyListener>,
}

/// 失败重试注册中心
#[derive(Clone)]
pub struct FailbackRegistryCenter {
    inner: Arc<FailbackInner>,
}

struct FailbackInner {
    backend: Arc<dyn RegistryCenter>,
    cache: Option<RegistryCenterCache>,
    scheduler: RetryScheduler,
    registered: DashSet<RegisterInfo>,
    subscribed: DashMap<TaskKey, Subscription>,
    notified: DashMap<RegisterInfo, RegistryCenterData>,
    failed_registered: TaskTable,
    failed_unregistered: TaskTable,
    failed_subscribed: TaskTable,
    failed_unsubscribed: TaskTable,
    failed_notified: TaskTable,
    destroyed: AtomicBool,
}

impl FailbackRegistryCenter {
    /// 使用当前 tokio 运行时创建
    pub fn new(
        backend: Arc<dyn RegistryCenter>,
        config: &RegistryConfig,
        cache: Option<RegistryCenterCache>,
    ) -> Result<Self> {
        let handle = Handle::try_current().map_err(|e| {
            FlareError::system(format!("no tokio runtime for registry retry: {}", e))
        })?;
        Ok(Self::with_handle(backend, config, cache, handle))
    }

    /// 使用指定运行时执行重试任务
    pub fn with_handle(
        backend: Arc<dyn RegistryCenter>,
        config: &RegistryConfig,
        cache: Option<RegistryCenterCache>,
        handle: Handle,
    ) -> Self {
        let scheduler = RetryScheduler::new(handle, config.retry_period(), config.max_retries);
        Self {
            inner: Arc::new(FailbackInner {
                backend,
                cache,
                scheduler,
                registered: DashSet::new(),
                subscribed: DashMap::new(),
                notified: DashMap::new(),
                failed_registered: DashMap::new(),
                failed_unregistered: DashMap::new(),
                failed_subscribed: DashMap::new(),
                failed_unsubscribed: DashMap::new(),
                failed_notified: DashMap::new(),
                destroyed: AtomicBool::new(false),
            }),
        }
    }

    pub fn cache(&self) -> Option<&RegistryCenterCache> {
        self.inner.cache.as_ref()
    }

    /// 某类操作当前挂起的重试任务数
    pub fn pending_task_count(&self, kind: RetryKind) -> usize {
        self.inner.table(kind).len()
    }

    /// 查找某个注册信息上挂起的重试任务
    pub fn pending_tasks(&self, kind: RetryKind, info: &RegisterInfo) -> Vec<Arc<RetryTask>> {
        self.inner
            .table(kind)
            .iter()
            .filter(|entry| entry.key().info == *info)
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// 已注册的注册信息
    pub fn registered(&self) -> Vec<RegisterInfo> {
        self.inner.registered.iter().map(|r| r.key().clone()).collect()
    }

    /// 某个订阅最近一次收到的数据
    pub fn notified(&self, info: &RegisterInfo) -> Option<RegistryCenterData> {
        self.inner.notified.get(info).map(|d| d.value().clone())
    }

    /// 注册中心恢复连接后，重新注册和订阅全部数据
    pub fn recover(&self) {
        let inner = &self.inner;
        if inner.is_destroyed() {
            return;
        }
        let registered = self.registered();
        info!(count = registered.len(), "Recovering registered register infos");
        for info in registered {
            inner.add_failed(TaskKey::of(&info), info, RetryOperation::Register);
        }
        let subscriptions: Vec<_> = inner
            .subscribed
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(&entry.value().backend_listener)))
            .collect();
        info!(count = subscriptions.len(), "Recovering subscriptions");
        for (key, backend_listener) in subscriptions {
            let info = key.info.clone();
            inner.add_failed(key, info, RetryOperation::Subscribe(backend_listener));
        }
    }
}

#[async_trait]
impl RegistryCenter for FailbackRegistryCenter {
    async fn register(&self, info: &RegisterInfo) -> Result<()> {
        let inner = &self.inner;
        inner.ensure_alive()?;
        inner.registered.insert(info.clone());
        let key = TaskKey::of(info);
        inner.remove_failed(RetryKind::Register, &key);
        inner.remove_failed(RetryKind::Unregister, &key);

        if let Err(e) = inner.backend.register(info).await {
            warn!(register_info = %info, error = %e, "Failed to register, waiting for retry");
            inner.add_failed(key, info.clone(), RetryOperation::Register);
        }
        Ok(())
    }

    async fn unregister(&self, info: &RegisterInfo) -> Result<()> {
        let inner = &self.inner;
        inner.ensure_alive()?;
        inner.registered.remove(info);
        let key = TaskKey::of(info);
        inner.remove_failed(RetryKind::Register, &key);
        inner.remove_failed(RetryKind::Unregister, &key);

        if let Err(e) = inner.backend.unregister(info).await {
            warn!(register_info = %info, error = %e, "Failed to unregister, waiting for retry");
            inner.add_failed(key, info.clone(), RetryOperation::Unregister);
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        info: &RegisterInfo,
        listener: Arc<dyn NotifyListener>,
    ) -> Result<()> {
        let inner = &self.inner;
        inner.ensure_alive()?;
        let key = TaskKey::with_listener(info, &listener);
        let backend_listener: Arc<dyn NotifyListener> = Arc::new(FailbackListener {
            center: Arc::downgrade(inner),
            info: info.clone(),
            listener: Arc::clone(&listener),
        });
        let backend_listener = Arc::clone(
            &inner
                .subscribed
                .entry(key.clone())
                .or_insert(Subscription { backend_listener })
                .backend_listener,
        );
        inner.remove_failed(RetryKind::Subscribe, &key);
        inner.remove_failed(RetryKind::Unsubscribe, &key);

        if let Err(e) = inner.backend.subscribe(info, Arc::clone(&backend_listener)).await {
            warn!(register_info = %info, error = %e, "Failed to subscribe, waiting for retry");
            let cached = inner
                .cache
                .as_ref()
                .map(|cache| cache.get_register_infos(info.service_name()))
                .unwrap_or_default();
            if !cached.is_empty() {
                info!(
                    service = %info.service_name(),
                    count = cached.len(),
                    "Notify subscriber from registry cache"
                );
                inner.deliver(info, &listener, &cached);
            }
            inner.add_failed(key, info.clone(), RetryOperation::Subscribe(backend_listener));
        }
        Ok(())
    }

    async fn unsubscribe(
        &self,
        info: &RegisterInfo,
        listener: Arc<dyn NotifyListener>,
    ) -> Result<()> {
        let inner = &self.inner;
        inner.ensure_alive()?;
        let key = TaskKey::with_listener(info, &listener);
        inner.remove_failed(RetryKind::Subscribe, &key);
        inner.remove_failed(RetryKind::Unsubscribe, &key);
        inner.remove_failed(RetryKind::Notify, &key);

        let Some((_, subscription)) = inner.subscribed.remove(&key) else {
            debug!(register_info = %info, "Unsubscribe without subscription, ignored");
            return Ok(());
        };
        let still_subscribed = inner.subscribed.iter().any(|entry| entry.key().info == *info);
        if !still_subscribed {
            inner.notified.remove(info);
        }

        if let Err(e) = inner
            .backend
            .unsubscribe(info, Arc::clone(&subscription.backend_listener))
            .await
        {
            warn!(register_info = %info, error = %e, "Failed to unsubscribe, waiting for retry");
            inner.add_failed(
                key,
                info.clone(),
                RetryOperation::Unsubscribe(subscription.backend_listener),
            );
        }
        Ok(())
    }

    async fn destroy(&self) {
        let inner = &self.inner;
        if inner.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Destroying failback registry center");

        inner.scheduler.cancel();
        for kind in [
            RetryKind::Register,
            RetryKind::Unregister,
            RetryKind::Subscribe,
            RetryKind::Unsubscribe,
            RetryKind::Notify,
        ] {
            let table = inner.table(kind);
            for entry in table.iter() {
                entry.value().cancel();
            }
            table.clear();
        }
        inner.scheduler.drain().await;

        let backend = &inner.backend;
        join_all(self.registered().into_iter().map(|info| async move {
            if let Err(e) = backend.unregister(&info).await {
                warn!(register_info = %info, error = %e, "Failed to unregister on destroy");
            }
        }))
        .await;
        inner.registered.clear();

        let subscriptions: Vec<_> = inner
            .subscribed
            .iter()
            .map(|entry| (entry.key().info.clone(), Arc::clone(&entry.value().backend_listener)))
            .collect();
        join_all(subscriptions.into_iter().map(|(info, listener)| async move {
            if let Err(e) = backend.unsubscribe(&info, listener).await {
                warn!(register_info = %info, error = %e, "Failed to unsubscribe on destroy");
            }
        }))
        .await;
        inner.subscribed.clear();

        inner.backend.destroy().await;
        if let Some(cache) = &inner.cache {
            cache.flush().await;
        }
    }

    fn is_available(&self) -> bool {
        !self.inner.is_destroyed() && self.inner.backend.is_available()
    }
}

impl FailbackInner {
    fn table(&self, kind: RetryKind) -> &TaskTable {
        match kind {
            RetryKind::Register => &self.failed_registered,
            RetryKind::Unregister => &self.failed_unregistered,
            RetryKind::Subscribe => &self.failed_subscribed,
            RetryKind::Unsubscribe => &self.failed_unsubscribed,
            RetryKind::Notify => &self.failed_notified,
        }
    }

    fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.is_destroyed() {
            return Err(FlareError::registry_destroyed());
        }
        Ok(())
    }

    /// 为失败的操作创建重试任务，已有任务时不重复创建
    fn add_failed(self: &Arc<Self>, key: TaskKey, info: RegisterInfo, operation: RetryOperation) {
        if self.is_destroyed() {
            return;
        }
        let kind = operation.kind();
        match self.table(kind).entry(key) {
            Entry::Occupied(_) => {
                debug!(kind = %kind, register_info = %info, "Retry task already pending");
            }
            Entry::Vacant(vacant) => self.start_task(vacant, info, operation),
        }
    }

    fn start_task(
        self: &Arc<Self>,
        vacant: VacantEntry<'_, TaskKey, Arc<RetryTask>>,
        info: RegisterInfo,
        operation: RetryOperation,
    ) {
        let host: Weak<dyn RetryHost> = Arc::downgrade(self) as Weak<dyn RetryHost>;
        let task = RetryTask::new(info, operation, host, &self.scheduler);
        vacant.insert(Arc::clone(&task));
        task.schedule();
    }

    fn remove_failed(&self, kind: RetryKind, key: &TaskKey) {
        if let Some((_, task)) = self.table(kind).remove(key) {
            task.cancel();
        }
    }

    /// 处理后端推送：更新订阅数据、写缓存、投递给监听器
    fn notify(
        self: &Arc<Self>,
        info: &RegisterInfo,
        listener: &Arc<dyn NotifyListener>,
        infos: &[RegisterInfo],
    ) {
        let data = {
            let mut data = self.notified.entry(info.clone()).or_default();
            if infos.is_empty() {
                data.put(PROVIDERS_CATEGORY, Vec::new());
            } else {
                let grouped = RegistryCenterData::from_register_infos(infos);
                for category in grouped.categories() {
                    data.put(category, grouped.get(category).to_vec());
                }
            }
            data.clone()
        };
        if let Some(cache) = &self.cache {
            cache.save(info, &data);
        }
        self.deliver(info, listener, infos);
    }

    /// 投递通知，失败时交给通知重试任务；已有任务时把数据累积到该任务
    fn deliver(
        self: &Arc<Self>,
        info: &RegisterInfo,
        listener: &Arc<dyn NotifyListener>,
        infos: &[RegisterInfo],
    ) {
        let Err(e) = listener.notify(infos) else {
            return;
        };
        warn!(register_info = %info, error = %e, "Failed to notify listener, waiting for retry");
        if self.is_destroyed() {
            return;
        }
        // 查找与创建在同一个分片锁内完成，并发失败的投递只会落到同一个任务上
        match self.failed_notified.entry(TaskKey::with_listener(info, listener)) {
            Entry::Occupied(task) => task.get().add_pending(infos),
            Entry::Vacant(vacant) => self.start_task(
                vacant,
                info.clone(),
                RetryOperation::notify(Arc::clone(listener), infos.to_vec()),
            ),
        }
    }

    /// 待投递数据为空时才移除通知任务，判断和移除都在分片锁内
    fn finish_notify(&self, key: &TaskKey, task: &RetryTask) -> bool {
        self.failed_notified.remove_if(key, |_, pending| {
            std::ptr::eq(Arc::as_ptr(pending), task) && task.pending().is_empty()
        });
        task.pending().is_empty()
    }
}

#[async_trait]
impl RetryHost for FailbackInner {
    async fn retry(&self, task: &RetryTask) -> Result<()> {
        let info = task.register_info();
        match task.operation() {
            RetryOperation::Register => self.backend.register(info).await,
            RetryOperation::Unregister => self.backend.unregister(info).await,
            RetryOperation::Subscribe(listener) => {
                self.backend.subscribe(info, Arc::clone(listener)).await
            }
            RetryOperation::Unsubscribe(listener) => {
                self.backend.unsubscribe(info, Arc::clone(listener)).await
            }
            RetryOperation::Notify { listener, .. } => {
                let key = TaskKey::with_listener(info, listener);
                // 投递期间可能有新的数据累积进来
                loop {
                    let pending = task.pending();
                    if pending.is_empty() {
                        if self.finish_notify(&key, task) {
                            return Ok(());
                        }
                        continue;
                    }
                    listener.notify(&pending)?;
                    task.ack_pending(pending.len());
                }
            }
        }
    }

    fn remove_task(&self, task: &RetryTask) {
        self.table(task.kind())
            .retain(|_, pending| !std::ptr::eq(Arc::as_ptr(pending), task));
    }
}

/// 交给后端的监听器
struct FailbackListener {
    center: Weak<FailbackInner>,
    info: RegisterInfo,
    listener: Arc<dyn NotifyListener>,
}

impl NotifyListener for FailbackListener {
    fn notify(&self, register_infos: &[RegisterInfo]) -> Result<()> {
        match self.center.upgrade() {
            Some(center) if !center.is_destroyed() => {
                center.notify(&self.info, &self.listener, register_infos);
            }
            _ => debug!(register_info = %self.info, "Registry center gone, drop notification"),
        }
        Ok(())
    }
}
