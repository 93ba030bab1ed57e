//! 注册中心本地缓存
//!
//! 内存中维护 服务名 -> `|` 拼接的注册信息 表，并持久化成 `key=value` 形式的文本文件，
//! 注册中心不可用或进程重启时可以用最后一次成功的数据兜底。
//!
//! 每次落盘前都会给表打上严格递增的版本号和当前时间（秒），
//! 落盘时发现已有更新的版本则直接丢弃本次写入。
//! 写文件前先对同目录下的 `.lock` 文件加操作系统级的排他锁，保证跨进程同时只有一个写者。

use super::data::RegistryCenterData;
use super::register_info::RegisterInfo;
use crate::config::CacheConfig;
use crate::error::{ErrorCode, FlareError, Result, ResultExt};
use fs2::FileExt;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// 保留键：最后更新时间（秒）
pub const UPDATE_TIME_SECS_KEY: &str = "update_time_secs";
/// 保留键：版本号
pub const UPDATE_VERSION_KEY: &str = "update_version";
/// 保留键：过期时间（秒）
pub const EXPIRE_TIME_SECS_KEY: &str = "expire_time_secs";

/// 注册信息之间的分隔符
pub const REGISTER_INFO_SEPARATOR: &str = "|";

const RESERVED_KEYS: [&str; 3] = [UPDATE_TIME_SECS_KEY, UPDATE_VERSION_KEY, EXPIRE_TIME_SECS_KEY];

/// 落盘失败的最大重试次数
const MAX_SAVE_RETRY_TIMES: u32 = 3;

const FILE_HEADER: &str = "#Flare Registry Cache";

/// 注册中心本地缓存，克隆后共享同一份数据
#[derive(Clone)]
pub struct RegistryCenterCache {
    inner: Arc<CacheInner>,
}

struct CacheInner {
    table: Mutex<BTreeMap<String, String>>,
    version: AtomicU64,
    file: Option<CacheFile>,
    sync_save: bool,
    alive_secs: u64,
    sender: Option<mpsc::UnboundedSender<SyncJob>>,
}

enum SyncJob {
    Save { version: u64 },
    Flush(oneshot::Sender<()>),
}

impl RegistryCenterCache {
    /// 创建缓存，异步落盘使用当前 tokio 运行时
    pub fn new(config: &CacheConfig) -> Self {
        Self::with_handle(config, Handle::try_current().ok())
    }

    /// 创建缓存，异步落盘使用指定的运行时
    ///
    /// 没有可用运行时时退化为同步落盘
    pub fn with_handle(config: &CacheConfig, handle: Option<Handle>) -> Self {
        let file = match (&config.file_path, config.persisted) {
            (Some(path), true) => Some(CacheFile::new(path.clone())),
            _ => None,
        };

        let table = file.as_ref().map(CacheFile::load).unwrap_or_default();
        let loaded_version = table
            .get(UPDATE_VERSION_KEY)
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0);

        let mut sync_save = config.sync_save;
        let mut receiver = None;
        let sender = match (&file, sync_save, &handle) {
            (Some(_), false, Some(_)) => {
                let (tx, rx) = mpsc::unbounded_channel();
                receiver = Some(rx);
                Some(tx)
            }
            (Some(path), false, None) => {
                warn!(
                    path = %path.path.display(),
                    "No async runtime available, registry cache falls back to sync save"
                );
                sync_save = true;
                None
            }
            _ => None,
        };

        let inner = Arc::new(CacheInner {
            table: Mutex::new(table),
            version: AtomicU64::new(loaded_version),
            file,
            sync_save,
            alive_secs: config.alive_secs,
            sender,
        });

        if let (Some(rx), Some(handle)) = (receiver, handle) {
            handle.spawn(run_sync_worker(Arc::downgrade(&inner), rx));
        }

        Self { inner }
    }

    /// 读取某个服务缓存的注册信息，缓存过期或不存在时返回空列表
    pub fn get_register_infos(&self, service_name: &str) -> Vec<RegisterInfo> {
        let value = {
            let table = self.inner.table.lock();
            if is_expired(&table) {
                debug!(service = %service_name, "Registry cache expired");
                return Vec::new();
            }
            match table.get(service_name) {
                Some(value) => value.clone(),
                None => return Vec::new(),
            }
        };

        value
            .split(REGISTER_INFO_SEPARATOR)
            .filter(|s| !s.is_empty())
            .filter_map(|s| match RegisterInfo::decode(s) {
                Ok(info) => Some(info),
                Err(e) => {
                    warn!(service = %service_name, error = %e, "Skip corrupt registry cache entry");
                    None
                }
            })
            .collect()
    }

    /// 更新某个服务的缓存并触发落盘，`data` 为空时删除该服务
    ///
    /// 服务名与保留键同名时不写入缓存
    pub fn save(&self, register_info: &RegisterInfo, data: &RegistryCenterData) {
        let service_name = register_info.service_name();
        if RESERVED_KEYS.contains(&service_name) {
            warn!(
                service = %service_name,
                "Service name collides with a reserved registry cache key, skip caching"
            );
            return;
        }
        {
            let mut table = self.inner.table.lock();
            if data.is_empty() {
                table.remove(service_name);
            } else {
                let encoded = data
                    .register_infos()
                    .map(RegisterInfo::encode)
                    .collect::<Vec<_>>()
                    .join(REGISTER_INFO_SEPARATOR);
                table.insert(service_name.to_string(), encoded);
            }
        }
        self.sync();
    }

    /// 把缓存标记为在 `alive_secs` 秒后过期
    pub fn expire_cache(&self) {
        let expire_at = now_secs() + self.inner.alive_secs as i64;
        self.expire_cache_at(expire_at);
    }

    /// 把缓存标记为在指定时间（秒）过期
    pub fn expire_cache_at(&self, expire_at_secs: i64) {
        self.inner
            .table
            .lock()
            .insert(EXPIRE_TIME_SECS_KEY.to_string(), expire_at_secs.to_string());
        self.sync();
    }

    /// 取消过期标记
    pub fn cancel_expire_cache(&self) {
        let removed = self.inner.table.lock().remove(EXPIRE_TIME_SECS_KEY);
        if removed.is_some() {
            self.sync();
        }
    }

    pub fn is_expired(&self) -> bool {
        is_expired(&self.inner.table.lock())
    }

    /// 最后一次打上的版本号
    pub fn version(&self) -> u64 {
        self.inner.version.load(Ordering::SeqCst)
    }

    /// 缓存文件路径
    pub fn file_path(&self) -> Option<&Path> {
        self.inner.file.as_ref().map(|f| f.path.as_path())
    }

    /// 等待调用前已入队的落盘任务执行完毕
    pub async fn flush(&self) {
        let Some(sender) = &self.inner.sender else {
            return;
        };
        let (tx, rx) = oneshot::channel();
        if sender.send(SyncJob::Flush(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    fn sync(&self) {
        let version = self.inner.stamp();
        if self.inner.file.is_none() {
            return;
        }
        match &self.inner.sender {
            Some(sender) if !self.inner.sync_save => {
                if sender.send(SyncJob::Save { version }).is_err() {
                    warn!(version, "Registry cache sync worker stopped, saving inline");
                    self.inner.save_inline(version);
                }
            }
            _ => self.inner.save_inline(version),
        }
    }
}

impl CacheInner {
    /// 打上新的版本号和更新时间
    fn stamp(&self) -> u64 {
        let mut table = self.table.lock();
        let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
        table.insert(UPDATE_VERSION_KEY.to_string(), version.to_string());
        table.insert(UPDATE_TIME_SECS_KEY.to_string(), now_secs().to_string());
        version
    }

    fn is_stale(&self, version: u64) -> bool {
        version < self.version.load(Ordering::SeqCst)
    }

    fn do_save(&self, version: u64) -> Result<()> {
        if self.is_stale(version) {
            debug!(version, "Skip stale registry cache sync");
            return Ok(());
        }
        let Some(file) = &self.file else {
            return Ok(());
        };
        let snapshot = self.table.lock().clone();
        file.write(&snapshot)?;
        debug!(version, path = %file.path.display(), "Registry cache saved");
        Ok(())
    }

    /// 处理一次落盘失败，返回需要重新落盘的版本
    fn on_save_failed(
        &self,
        version: u64,
        retry_times: &mut u32,
        error: &FlareError,
    ) -> Option<u64> {
        *retry_times += 1;
        if *retry_times >= MAX_SAVE_RETRY_TIMES {
            warn!(
                version,
                retry_times = *retry_times,
                error = %error,
                "Failed to save registry cache after retries, giving up"
            );
            *retry_times = 0;
            return None;
        }
        if self.is_stale(version) {
            // 更新的版本会带上最新的数据
            *retry_times = 0;
            return None;
        }
        warn!(
            version,
            retry_times = *retry_times,
            error = %error,
            "Failed to save registry cache, retrying"
        );
        Some(self.stamp())
    }

    fn save_inline(&self, version: u64) {
        let mut retry_times = 0;
        let mut version = version;
        loop {
            match self.do_save(version) {
                Ok(()) => return,
                Err(e) => match self.on_save_failed(version, &mut retry_times, &e) {
                    Some(next) => version = next,
                    None => return,
                },
            }
        }
    }
}

/// 单个后台 worker 串行执行落盘，保证同一进程内的写入顺序
async fn run_sync_worker(inner: Weak<CacheInner>, mut rx: mpsc::UnboundedReceiver<SyncJob>) {
    let mut retry_times = 0u32;
    while let Some(job) = rx.recv().await {
        let version = match job {
            SyncJob::Flush(done) => {
                let _ = done.send(());
                continue;
            }
            SyncJob::Save { version } => version,
        };
        let Some(cache) = inner.upgrade() else {
            break;
        };

        let worker_cache = Arc::clone(&cache);
        let result = tokio::task::spawn_blocking(move || worker_cache.do_save(version))
            .await
            .unwrap_or_else(|e| {
                Err(FlareError::system(format!("cache sync task panicked: {}", e)))
            });

        match result {
            Ok(()) => retry_times = 0,
            Err(e) => {
                if let Some(next) = cache.on_save_failed(version, &mut retry_times, &e) {
                    if let Some(sender) = &cache.sender {
                        let _ = sender.send(SyncJob::Save { version: next });
                    }
                }
            }
        }
    }
    debug!("Registry cache sync worker stopped");
}

fn is_expired(table: &BTreeMap<String, String>) -> bool {
    table
        .get(EXPIRE_TIME_SECS_KEY)
        .and_then(|v| v.parse::<i64>().ok())
        .map(|expire_at| now_secs() > expire_at)
        .unwrap_or(false)
}

fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

/// 缓存文件及其锁文件
struct CacheFile {
    path: PathBuf,
    lock_path: PathBuf,
}

impl CacheFile {
    fn new(path: PathBuf) -> Self {
        let lock_path = sibling(&path, ".lock");
        Self { path, lock_path }
    }

    /// 读取缓存文件，失败时记录日志并返回空表
    fn load(&self) -> BTreeMap<String, String> {
        match fs::read_to_string(&self.path) {
            Ok(content) => {
                let table = parse_properties(&content);
                info!(
                    path = %self.path.display(),
                    entries = table.len(),
                    "Loaded registry cache"
                );
                table
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to load registry cache");
                BTreeMap::new()
            }
        }
    }

    fn write(&self, table: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let lock_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&self.lock_path)?;
        FileExt::try_lock_exclusive(&lock_file).map_err(|e| {
            FlareError::cache_lock_failed(format!(
                "can not lock registry cache file {}: {}",
                self.lock_path.display(),
                e
            ))
        })?;

        let result = self.write_locked(table);
        let _ = FileExt::unlock(&lock_file);
        result
    }

    fn write_locked(&self, table: &BTreeMap<String, String>) -> Result<()> {
        let tmp_path = sibling(&self.path, ".tmp");
        {
            let mut writer = BufWriter::new(File::create(&tmp_path)?);
            writeln!(writer, "{}", FILE_HEADER)?;
            for (key, value) in table {
                writeln!(writer, "{}={}", escape(key, true), escape(value, false))?;
            }
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)
            .into_flare(ErrorCode::CacheIoError, "failed to replace registry cache file")
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

fn escape(raw: &str, is_key: bool) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            '=' | '#' | '!' | ':' if is_key => {
                escaped.push('\\');
                escaped.push(c);
            }
            _ => escaped.push(c),
        }
    }
    escaped
}

fn parse_properties(content: &str) -> BTreeMap<String, String> {
    content
        .lines()
        .filter(|line| !line.is_empty() && !line.starts_with(['#', '!']))
        .filter_map(parse_property)
        .collect()
}

fn parse_property(line: &str) -> Option<(String, String)> {
    let mut key = String::new();
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => key.push(unescape(chars.next()?)),
            '=' => {
                let mut value = String::new();
                while let Some(c) = chars.next() {
                    if c == '\\' {
                        value.push(unescape(chars.next()?));
                    } else {
                        value.push(c);
                    }
                }
                return Some((key, value));
            }
            _ => key.push(c),
        }
    }
    None
}

fn unescape(c: char) -> char {
    match c {
        'n' => '\n',
        'r' => '\r',
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn properties_escape_round_trip() {
        let mut table = BTreeMap::new();
        table.insert("svc=a\\b".to_string(), "x=y\nz".to_string());
        table.insert("#svc".to_string(), "a".to_string());
        table.insert("!svc".to_string(), "b".to_string());
        table.insert(UPDATE_VERSION_KEY.to_string(), "7".to_string());
        let content = table
            .iter()
            .map(|(k, v)| format!("{}={}", escape(k, true), escape(v, false)))
            .collect::<Vec<_>>()
            .join("\n");
        assert_eq!(parse_properties(&content), table);
    }

    #[test]
    fn expiry_compares_against_wall_clock() {
        let mut table = BTreeMap::new();
        assert!(!is_expired(&table));
        table.insert(EXPIRE_TIME_SECS_KEY.to_string(), (now_secs() - 10).to_string());
        assert!(is_expired(&table));
        table.insert(EXPIRE_TIME_SECS_KEY.to_string(), (now_secs() + 60).to_string());
        assert!(!is_expired(&table));
    }

    #[test]
    fn stale_retry_is_skipped_and_resets_counter() {
        let cache = RegistryCenterCache::with_handle(&CacheConfig::default(), None);
        let inner = &cache.inner;
        let error = FlareError::cache_lock_failed("locked");
        let mut retry_times = 0;

        let first = inner.stamp();
        let retried = inner.on_save_failed(first, &mut retry_times, &error);
        assert_eq!(retried, Some(first + 1));
        assert_eq!(retry_times, 1);

        // 重试期间产生了更新的版本
        let newer = inner.stamp();
        assert_eq!(inner.on_save_failed(first + 1, &mut retry_times, &error), None);
        assert_eq!(retry_times, 0);

        assert_eq!(inner.on_save_failed(newer, &mut retry_times, &error), Some(newer + 1));
        assert_eq!(inner.on_save_failed(newer + 1, &mut retry_times, &error), Some(newer + 2));
        assert_eq!(inner.on_save_failed(newer + 2, &mut retry_times, &error), None);
        assert_eq!(retry_times, 0);
    }
}
