//! 注册中心失败重试任务
//!
//! 一个 [`RetryTask`] 对应一次失败的注册中心操作（注册、注销、订阅、取消订阅、通知投递），
//! 由 [`RetryScheduler`] 的定时器按固定间隔重新执行，直到成功、被取消或超过最大重试次数。
//!
//! 状态流转：
//! - `Pending`：已调度，等待定时器触发
//! - `Running`：定时器触发，正在执行操作
//! - `Succeeded`：执行成功，任务已从所属注册中心的失败表中移除
//! - `Exhausted`：重试次数达到上限，放弃
//! - `Cancelled`：任务自身或所属定时器被取消
//!
//! 执行失败时重试计数加一，回到 `Pending` 并在 `retry_period` 之后再次触发。

use super::center::NotifyListener;
use super::register_info::RegisterInfo;
use crate::error::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// 重试操作类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RetryKind {
    Register,
    Unregister,
    Subscribe,
    Unsubscribe,
    Notify,
}

impl RetryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetryKind::Register => "register",
            RetryKind::Unregister => "unregister",
            RetryKind::Subscribe => "subscribe",
            RetryKind::Unsubscribe => "unsubscribe",
            RetryKind::Notify => "notify",
        }
    }
}

impl fmt::Display for RetryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 重试操作及其所需数据
pub enum RetryOperation {
    Register,
    Unregister,
    Subscribe(Arc<dyn NotifyListener>),
    Unsubscribe(Arc<dyn NotifyListener>),
    /// 待重新投递的通知，后续投递失败的数据会累积到这里
    Notify {
        listener: Arc<dyn NotifyListener>,
        pending: Mutex<Vec<RegisterInfo>>,
    },
}

impl RetryOperation {
    /// 创建通知投递操作
    pub fn notify(listener: Arc<dyn NotifyListener>, infos: Vec<RegisterInfo>) -> Self {
        RetryOperation::Notify {
            listener,
            pending: Mutex::new(infos),
        }
    }

    pub fn kind(&self) -> RetryKind {
        match self {
            RetryOperation::Register => RetryKind::Register,
            RetryOperation::Unregister => RetryKind::Unregister,
            RetryOperation::Subscribe(_) => RetryKind::Subscribe,
            RetryOperation::Unsubscribe(_) => RetryKind::Unsubscribe,
            RetryOperation::Notify { .. } => RetryKind::Notify,
        }
    }

    pub fn listener(&self) -> Option<&Arc<dyn NotifyListener>> {
        match self {
            RetryOperation::Register | RetryOperation::Unregister => None,
            RetryOperation::Subscribe(listener) | RetryOperation::Unsubscribe(listener) => {
                Some(listener)
            }
            RetryOperation::Notify { listener, .. } => Some(listener),
        }
    }
}

/// 重试任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    Pending,
    Running,
    Succeeded,
    Exhausted,
    Cancelled,
}

/// 拥有失败任务表的一方（通常是注册中心）
#[async_trait]
pub trait RetryHost: Send + Sync {
    /// 执行真正的注册中心操作
    async fn retry(&self, task: &RetryTask) -> Result<()>;

    /// 把任务从失败任务表中移除，只有表中仍是同一个任务时才移除
    fn remove_task(&self, task: &RetryTask);
}

/// 重试定时器
///
/// 所有任务共享同一个根取消令牌，取消定时器即取消全部任务
#[derive(Clone)]
pub struct RetryScheduler {
    handle: Handle,
    timer: CancellationToken,
    tracker: TaskTracker,
    period: Duration,
    max_retries: u32,
}

impl RetryScheduler {
    pub fn new(handle: Handle, period: Duration, max_retries: u32) -> Self {
        Self {
            handle,
            timer: CancellationToken::new(),
            tracker: TaskTracker::new(),
            period,
            max_retries,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn is_cancelled(&self) -> bool {
        self.timer.is_cancelled()
    }

    /// 取消定时器，之后触发的任务都不会再执行
    pub fn cancel(&self) {
        self.timer.cancel();
        self.tracker.close();
    }

    /// 等待所有已调度的任务退出
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }
}

/// 单个失败操作的重试任务
pub struct RetryTask {
    info: RegisterInfo,
    operation: RetryOperation,
    host: Weak<dyn RetryHost>,
    scheduler: RetryScheduler,
    timer: CancellationToken,
    attempts: AtomicU32,
    cancelled: AtomicBool,
    state: Mutex<RetryState>,
}

impl RetryTask {
    pub fn new(
        info: RegisterInfo,
        operation: RetryOperation,
        host: Weak<dyn RetryHost>,
        scheduler: &RetryScheduler,
    ) -> Arc<Self> {
        Arc::new(Self {
            info,
            operation,
            host,
            timer: scheduler.timer.child_token(),
            scheduler: scheduler.clone(),
            attempts: AtomicU32::new(0),
            cancelled: AtomicBool::new(false),
            state: Mutex::new(RetryState::Pending),
        })
    }

    pub fn register_info(&self) -> &RegisterInfo {
        &self.info
    }

    pub fn operation(&self) -> &RetryOperation {
        &self.operation
    }

    pub fn kind(&self) -> RetryKind {
        self.operation.kind()
    }

    /// 已执行的重试次数
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> RetryState {
        *self.state.lock()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst) || self.timer.is_cancelled()
    }

    /// 取消任务，单向且幂等
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.timer.cancel();
        let mut state = self.state.lock();
        if *state == RetryState::Pending {
            *state = RetryState::Cancelled;
        }
    }

    /// 追加待投递的通知数据，已存在的条目不会重复追加
    pub fn add_pending(&self, infos: &[RegisterInfo]) {
        if let RetryOperation::Notify { pending, .. } = &self.operation {
            let mut pending = pending.lock();
            for info in infos {
                if !pending.contains(info) {
                    pending.push(info.clone());
                }
            }
        }
    }

    /// 当前待投递的通知数据
    pub fn pending(&self) -> Vec<RegisterInfo> {
        match &self.operation {
            RetryOperation::Notify { pending, .. } => pending.lock().clone(),
            _ => Vec::new(),
        }
    }

    /// 移除前 `delivered` 条已投递成功的通知数据
    pub fn ack_pending(&self, delivered: usize) {
        if let RetryOperation::Notify { pending, .. } = &self.operation {
            let mut pending = pending.lock();
            let delivered = delivered.min(pending.len());
            pending.drain(..delivered);
        }
    }

    /// 在 `retry_period` 之后触发一次执行
    pub fn schedule(self: &Arc<Self>) {
        if self.is_cancelled() {
            self.set_state(RetryState::Cancelled);
            return;
        }
        let task = Arc::clone(self);
        let timer = self.timer.clone();
        let period = self.scheduler.period;
        self.scheduler.tracker.spawn_on(
            async move {
                tokio::select! {
                    biased;
                    _ = timer.cancelled() => task.set_state(RetryState::Cancelled),
                    _ = tokio::time::sleep(period) => task.run().await,
                }
            },
            &self.scheduler.handle,
        );
    }

    async fn run(self: Arc<Self>) {
        if self.is_cancelled() {
            self.set_state(RetryState::Cancelled);
            return;
        }

        let Some(host) = self.host.upgrade() else {
            debug!(kind = %self.kind(), "Retry host dropped, abandoning task");
            self.set_state(RetryState::Cancelled);
            return;
        };

        if self.attempts() >= self.scheduler.max_retries {
            warn!(
                kind = %self.kind(),
                register_info = %self.info,
                max_retries = self.scheduler.max_retries,
                "Retry attempts exhausted, giving up"
            );
            self.set_state(RetryState::Exhausted);
            host.remove_task(&self);
            return;
        }

        self.set_state(RetryState::Running);
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;

        match self.do_retry(host.as_ref()).await {
            Ok(()) => {
                self.set_state(RetryState::Succeeded);
                info!(
                    kind = %self.kind(),
                    register_info = %self.info,
                    attempt,
                    "Retry succeeded"
                );
            }
            Err(e) => {
                warn!(
                    kind = %self.kind(),
                    register_info = %self.info,
                    attempt,
                    error = %e,
                    "Retry failed, rescheduling"
                );
                // 取消可能与执行并发发生
                if self.is_cancelled() {
                    self.set_state(RetryState::Cancelled);
                    return;
                }
                self.set_state(RetryState::Pending);
                self.schedule();
            }
        }
    }

    async fn do_retry(&self, host: &dyn RetryHost) -> Result<()> {
        host.retry(self).await?;
        host.remove_task(self);
        Ok(())
    }

    fn set_state(&self, next: RetryState) {
        let mut state = self.state.lock();
        // 终态不再变化
        if matches!(
            *state,
            RetryState::Succeeded | RetryState::Exhausted | RetryState::Cancelled
        ) {
            return;
        }
        *state = next;
    }
}

impl fmt::Debug for RetryTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryTask")
            .field("kind", &self.kind())
            .field("register_info", &self.info.encode())
            .field("attempts", &self.attempts())
            .field("state", &self.state())
            .finish()
    }
}
