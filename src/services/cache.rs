//! 结果缓存服务 - 业务能力层
//!
//! 以请求的规范形式为键，缓存解析后的定位结果。
//! 只缓存成功结果（包括"没有匹配"），失败永远不缓存。

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{self, Display};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::error::{GeocoderError, GeocoderResult};
use crate::infrastructure::{HttpRequest, RequestBody};
use crate::models::Location;

/// 默认过期时间：30 天
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// 文件缓存两次落盘之间的最短间隔
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(5);

/// 缓存键：{服务, 方法, 端点, 全部影响结果的参数} 的规范序列化
///
/// 参数先排序再拼接，所以参数顺序不同的两个请求得到同一个键。
/// 凭证参数不进入键，缓存文件里不会出现 api key。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    /// 从请求描述计算缓存键
    ///
    /// # 参数
    /// - `service`: 服务名
    /// - `request`: 请求描述
    /// - `secret`: 需要排除的凭证参数名
    pub fn from_request(service: &str, request: &HttpRequest, secret: &[&str]) -> Self {
        let mut params: Vec<(String, String)> = request
            .url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        if let RequestBody::Form(fields) = &request.body {
            params.extend(fields.iter().cloned());
        }
        params.retain(|(name, _)| !secret.contains(&name.as_str()));
        params.sort();

        let mut endpoint = request.url.clone();
        endpoint.set_query(None);
        endpoint.set_fragment(None);

        let canonical: BTreeMap<&str, serde_json::Value> = BTreeMap::from([
            ("service", serde_json::json!(service)),
            ("method", serde_json::json!(format!("{:?}", request.method))),
            ("endpoint", serde_json::json!(endpoint.as_str())),
            ("params", serde_json::json!(params)),
        ]);

        // BTreeMap 序列化不会失败
        Self(serde_json::to_string(&canonical).unwrap_or_default())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 缓存条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub locations: Vec<Location>,
    pub created_at: DateTime<Utc>,
    /// None 表示永不过期
    pub expires_at: Option<DateTime<Utc>>,
}

impl CacheEntry {
    pub fn new(locations: Vec<Location>, ttl: Option<Duration>) -> Self {
        let created_at = Utc::now();
        let expires_at = ttl
            .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
            .map(|ttl| created_at + ttl);
        Self {
            locations,
            created_at,
            expires_at,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| now >= expires_at)
    }
}

/// 可插拔的缓存后端，必须支持并发访问
pub trait CacheBackend: Send + Sync {
    /// 读取未过期的条目；过期条目视为缺失
    fn get(&self, key: &CacheKey) -> Option<CacheEntry>;

    /// 写入（覆盖）条目
    fn set(&self, key: CacheKey, locations: Vec<Location>, ttl: Option<Duration>)
        -> GeocoderResult<()>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 把尚未持久化的写入落盘；内存后端什么都不做
    fn flush(&self) -> GeocoderResult<()> {
        Ok(())
    }
}

/// 内存缓存（默认后端）
#[derive(Default)]
pub struct MemoryCache {
    entries: DashMap<CacheKey, CacheEntry>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheBackend for MemoryCache {
    fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        let entry = self.entries.get(key)?.clone();
        if entry.is_expired(Utc::now()) {
            // 惰性淘汰，只删除仍然过期的那个版本
            self.entries
                .remove_if(key, |_, current| current.is_expired(Utc::now()));
            return None;
        }
        Some(entry)
    }

    fn set(
        &self,
        key: CacheKey,
        locations: Vec<Location>,
        ttl: Option<Duration>,
    ) -> GeocoderResult<()> {
        self.entries.insert(key, CacheEntry::new(locations, ttl));
        Ok(())
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

#[derive(Serialize, Deserialize)]
struct StoredEntry {
    key: CacheKey,
    entry: CacheEntry,
}

/// JSON 文件持久化缓存
///
/// 启动时从文件加载。写入先进内存，距上次落盘超过 `flush_interval`
/// 才整体重写文件（先写临时文件再改名）；`flush` 和 drop 时写出剩余部分。
pub struct FileCache {
    entries: DashMap<CacheKey, CacheEntry>,
    path: PathBuf,
    write_lock: Mutex<()>,
    flush_interval: Duration,
    last_persist: Mutex<Instant>,
    dirty: AtomicBool,
}

impl FileCache {
    /// 打开（或新建）缓存文件
    pub fn open(path: impl Into<PathBuf>) -> GeocoderResult<Self> {
        let path = path.into();
        let entries = DashMap::new();

        if path.exists() {
            let content = fs::read_to_string(&path)
                .map_err(|e| GeocoderError::Io(format!("无法读取缓存文件 {}: {}", path.display(), e)))?;
            let stored: Vec<StoredEntry> = serde_json::from_str(&content).map_err(|e| {
                GeocoderError::Io(format!("无法解析缓存文件 {}: {}", path.display(), e))
            })?;

            let now = Utc::now();
            for item in stored.into_iter().filter(|item| !item.entry.is_expired(now)) {
                entries.insert(item.key, item.entry);
            }
            info!("📂 从 {} 加载了 {} 条缓存", path.display(), entries.len());
        } else if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        Ok(Self {
            entries,
            path,
            write_lock: Mutex::new(()),
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            last_persist: Mutex::new(Instant::now()),
            dirty: AtomicBool::new(false),
        })
    }

    /// 设置落盘间隔；`Duration::ZERO` 表示每次写入都落盘
    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist_due(&self) -> bool {
        let mut last = self.last_persist.lock();
        if last.elapsed() >= self.flush_interval {
            *last = Instant::now();
            true
        } else {
            false
        }
    }

    fn persist(&self) -> GeocoderResult<()> {
        let _guard = self.write_lock.lock();

        let stored: Vec<StoredEntry> = self
            .entries
            .iter()
            .map(|item| StoredEntry {
                key: item.key().clone(),
                entry: item.value().clone(),
            })
            .collect();
        let json = serde_json::to_string(&stored)
            .map_err(|e| GeocoderError::Io(format!("无法序列化缓存: {}", e)))?;

        let tmp_path = self.path.with_extension("tmp");
        fs::write(&tmp_path, json)?;
        fs::rename(&tmp_path, &self.path)?;

        debug!("💾 缓存已写入 {} ({} 条)", self.path.display(), stored.len());
        Ok(())
    }
}

impl CacheBackend for FileCache {
    fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        let entry = self.entries.get(key)?.clone();
        if entry.is_expired(Utc::now()) {
            self.entries
                .remove_if(key, |_, current| current.is_expired(Utc::now()));
            return None;
        }
        Some(entry)
    }

    fn set(
        &self,
        key: CacheKey,
        locations: Vec<Location>,
        ttl: Option<Duration>,
    ) -> GeocoderResult<()> {
        self.entries.insert(key, CacheEntry::new(locations, ttl));
        self.dirty.store(true, Ordering::SeqCst);
        if self.persist_due() {
            self.flush()
        } else {
            Ok(())
        }
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn flush(&self) -> GeocoderResult<()> {
        if !self.dirty.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        self.persist().inspect_err(|_| self.dirty.store(true, Ordering::SeqCst))
    }
}

impl Drop for FileCache {
    fn drop(&mut self) {
        if let Err(e) = CacheBackend::flush(self) {
            warn!("⚠️ 缓存落盘失败 {}: {}", self.path.display(), e);
        }
    }
}

/// 客户端持有的结果缓存
#[derive(Clone)]
pub struct ResultCache {
    backend: Arc<dyn CacheBackend>,
    ttl: Option<Duration>,
}

impl ResultCache {
    /// # 参数
    /// - `backend`: 缓存后端
    /// - `ttl`: 过期时间，None 表示永不过期
    pub fn new(backend: Arc<dyn CacheBackend>, ttl: Option<Duration>) -> Self {
        Self { backend, ttl }
    }

    /// 默认内存缓存，30 天过期
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryCache::new()), Some(DEFAULT_CACHE_TTL))
    }

    pub fn lookup(&self, key: &CacheKey) -> Option<Vec<Location>> {
        let hit = self.backend.get(key).map(|entry| entry.locations);
        debug!(
            "{} 缓存 {}",
            if hit.is_some() { "✓ 命中" } else { "✗ 未命中" },
            key
        );
        hit
    }

    /// 写入缓存；后端写入失败只记录警告，不影响本次查询结果
    pub fn store(&self, key: CacheKey, locations: &[Location]) {
        if let Err(e) = self.backend.set(key, locations.to_vec(), self.ttl) {
            warn!("⚠️ 写入缓存失败: {}", e);
        }
    }

    /// 写出尚未持久化的条目；失败只记录警告
    pub fn flush(&self) {
        if let Err(e) = self.backend.flush() {
            warn!("⚠️ 缓存落盘失败: {}", e);
        }
    }

    pub fn len(&self) -> usize {
        self.backend.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backend.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::HttpRequest;

    fn key(params: &[(&str, &str)]) -> CacheKey {
        let params: Vec<(String, String)> = params
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let request = HttpRequest::get("https://example.org/search", &params).unwrap();
        CacheKey::from_request("test", &request, &["apiKey"])
    }

    fn paris() -> Location {
        Location::new("Paris", 48.8566, 2.3522, serde_json::Value::Null).unwrap()
    }

    #[test]
    fn test_key_is_order_independent() {
        assert_eq!(
            key(&[("q", "Paris"), ("limit", "1")]),
            key(&[("limit", "1"), ("q", "Paris")])
        );
        assert_ne!(key(&[("q", "Paris")]), key(&[("q", "Lyon")]));
    }

    #[test]
    fn test_key_leaves_out_credentials() {
        let with_key = key(&[("q", "Paris"), ("apiKey", "s3cr3t")]);
        assert_eq!(with_key, key(&[("apiKey", "other"), ("q", "Paris")]));
        assert!(!with_key.as_str().contains("s3cr3t"));
    }

    #[test]
    fn test_memory_cache_roundtrip_and_no_result() {
        let cache = ResultCache::in_memory();
        let k = key(&[("q", "Paris")]);
        assert!(cache.lookup(&k).is_none());

        cache.store(k.clone(), &[paris()]);
        assert_eq!(cache.lookup(&k), Some(vec![paris()]));

        // "没有匹配"也是可缓存的稳定结果
        let empty = key(&[("q", "nowhere")]);
        cache.store(empty.clone(), &[]);
        assert_eq!(cache.lookup(&empty), Some(vec![]));
    }

    #[test]
    fn test_expired_entry_is_miss() {
        let cache = ResultCache::new(
            Arc::new(MemoryCache::new()),
            Some(Duration::from_millis(10)),
        );
        let k = key(&[("q", "Paris")]);
        cache.store(k.clone(), &[paris()]);
        std::thread::sleep(Duration::from_millis(30));

        assert!(cache.lookup(&k).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_file_cache_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let k = key(&[("q", "Paris")]);

        {
            let cache = FileCache::open(&path).unwrap();
            cache.set(k.clone(), vec![paris()], None).unwrap();
        }

        let reopened = FileCache::open(&path).unwrap();
        assert_eq!(reopened.len(), 1);
        assert_eq!(reopened.get(&k).unwrap().locations, vec![paris()]);
    }

    #[test]
    fn test_file_cache_defers_writes_until_flush() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let cache = FileCache::open(&path)
            .unwrap()
            .with_flush_interval(Duration::from_secs(3600));

        for city in ["Paris", "Lyon", "Nantes"] {
            cache.set(key(&[("q", city)]), vec![paris()], None).unwrap();
        }
        assert!(!path.exists());

        cache.flush().unwrap();
        assert_eq!(FileCache::open(&path).unwrap().len(), 3);
    }

    #[test]
    fn test_file_cache_zero_interval_writes_every_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let cache = FileCache::open(&path).unwrap().with_flush_interval(Duration::ZERO);

        cache.set(key(&[("q", "Paris")]), vec![paris()], None).unwrap();
        assert_eq!(FileCache::open(&path).unwrap().len(), 1);
    }
}
