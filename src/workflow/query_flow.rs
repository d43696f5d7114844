//! 单条查询流程 - 流程层
//!
//! 核心职责：定义"一条查询"的完整处理流程
//!
//! 流程顺序：
//! 1. 校验查询 → 构造请求 → 计算缓存键
//! 2. 命中缓存直接返回（不限流、不发请求）
//! 3. 限流 → 传输 → 解析 → 写入缓存
//!
//! 协作式和阻塞式两个执行器共用 `ExecutorCore`，
//! 区别只在于等待限流和执行传输的方式。

use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::error::GeocoderResult;
use crate::infrastructure::{AsyncTransport, BlockingTransport, DecodedBody, HttpRequest};
use crate::models::{Location, Query};
use crate::providers::Provider;
use crate::services::{CacheKey, RateLimiter, ResultCache};

/// 准备阶段的结果
enum Prepared {
    /// 缓存命中
    Cached(Vec<Location>),
    /// 需要发出远程请求
    Remote {
        request: HttpRequest,
        key: CacheKey,
    },
}

/// 两种执行器共享的部分
///
/// - 不持有传输资源
/// - 限流器和缓存属于客户端，所有并发调用共享同一份
#[derive(Clone)]
pub struct ExecutorCore {
    provider: Arc<dyn Provider>,
    limiter: Arc<RateLimiter>,
    cache: Option<ResultCache>,
    default_timeout: Duration,
}

impl ExecutorCore {
    /// # 参数
    /// - `provider`: 服务适配器
    /// - `limiter`: 客户端的限流器
    /// - `cache`: 结果缓存，None 表示不缓存
    /// - `default_timeout`: 查询未指定超时时使用
    pub fn new(
        provider: Arc<dyn Provider>,
        limiter: Arc<RateLimiter>,
        cache: Option<ResultCache>,
        default_timeout: Duration,
    ) -> Self {
        Self {
            provider,
            limiter,
            cache,
            default_timeout,
        }
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn cache(&self) -> Option<&ResultCache> {
        self.cache.as_ref()
    }

    fn prepare(&self, query: &Query) -> GeocoderResult<Prepared> {
        query.validate()?;

        let timeout = query.options.timeout.unwrap_or(self.default_timeout);
        let request = self.provider.build_request(query)?.with_timeout(timeout);
        let key = CacheKey::from_request(
            self.provider.name(),
            &request,
            self.provider.secret_params(),
        );

        if let Some(locations) = self.cache.as_ref().and_then(|cache| cache.lookup(&key)) {
            return Ok(Prepared::Cached(shape(query, locations)));
        }

        debug!("[{}] 🔍 {}", self.provider.name(), query);
        Ok(Prepared::Remote { request, key })
    }

    fn finish(&self, query: &Query, key: CacheKey, body: DecodedBody) -> GeocoderResult<Vec<Location>> {
        let locations = self.provider.decode(query, body)?;
        if let Some(cache) = &self.cache {
            cache.store(key, &locations);
        }
        debug!(
            "[{}] ✓ {} 个结果: {}",
            self.provider.name(),
            locations.len(),
            query
        );
        Ok(shape(query, locations))
    }
}

/// 按 `exactly_one` 截断；缓存里保存的是完整结果
fn shape(query: &Query, mut locations: Vec<Location>) -> Vec<Location> {
    if query.options.exactly_one {
        locations.truncate(1);
    }
    locations
}

/// 协作式执行器：在等待限流和网络时挂起任务
#[derive(Clone)]
pub struct AsyncExecutor {
    core: ExecutorCore,
    transport: Arc<dyn AsyncTransport>,
}

impl AsyncExecutor {
    pub fn new(core: ExecutorCore, transport: Arc<dyn AsyncTransport>) -> Self {
        Self { core, transport }
    }

    pub fn core(&self) -> &ExecutorCore {
        &self.core
    }

    pub fn transport(&self) -> &Arc<dyn AsyncTransport> {
        &self.transport
    }

    /// 解析一条查询
    ///
    /// # 返回
    /// 零个或多个定位结果；`exactly_one` 时最多一个
    pub async fn resolve(&self, query: &Query) -> GeocoderResult<Vec<Location>> {
        let (request, key) = match self.core.prepare(query)? {
            Prepared::Cached(locations) => return Ok(locations),
            Prepared::Remote { request, key } => (request, key),
        };

        self.core.limiter.acquire().await;
        let body = self.transport.execute(&request).await?;
        self.core.finish(query, key, body)
    }
}

/// 阻塞式执行器：调用线程一直被占用直到结果返回
#[derive(Clone)]
pub struct BlockingExecutor {
    core: ExecutorCore,
    transport: Arc<dyn BlockingTransport>,
}

impl BlockingExecutor {
    pub fn new(core: ExecutorCore, transport: Arc<dyn BlockingTransport>) -> Self {
        Self { core, transport }
    }

    pub fn core(&self) -> &ExecutorCore {
        &self.core
    }

    pub fn transport(&self) -> &Arc<dyn BlockingTransport> {
        &self.transport
    }

    pub fn resolve(&self, query: &Query) -> GeocoderResult<Vec<Location>> {
        let (request, key) = match self.core.prepare(query)? {
            Prepared::Cached(locations) => return Ok(locations),
            Prepared::Remote { request, key } => (request, key),
        };

        self.core.limiter.acquire_blocking();
        let body = self.transport.execute(&request)?;
        self.core.finish(query, key, body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GeocoderError;
    use crate::providers::BanFrance;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// 返回两个 BAN 结果，并记录调用次数
    #[derive(Default)]
    struct CountingTransport {
        calls: AtomicUsize,
        fail: bool,
    }

    impl CountingTransport {
        fn reply(&self) -> GeocoderResult<DecodedBody> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(GeocoderError::ServiceUnavailable {
                    status: Some(503),
                    message: "down".to_string(),
                });
            }
            Ok(DecodedBody::Json(serde_json::json!({
                "features": [
                    {"geometry": {"coordinates": [2.316138, 48.86931]},
                     "properties": {"label": "13 Rue de la Paix 75002 Paris"}},
                    {"geometry": {"coordinates": [2.3, 48.8]},
                     "properties": {"label": "Rue de la Paix 75002 Paris"}}
                ]
            })))
        }
    }

    #[async_trait]
    impl AsyncTransport for CountingTransport {
        async fn execute(&self, _request: &HttpRequest) -> GeocoderResult<DecodedBody> {
            self.reply()
        }
    }

    impl BlockingTransport for CountingTransport {
        fn execute(&self, _request: &HttpRequest) -> GeocoderResult<DecodedBody> {
            self.reply()
        }
    }

    fn core(cache: Option<ResultCache>) -> ExecutorCore {
        ExecutorCore::new(
            Arc::new(BanFrance::new()),
            Arc::new(RateLimiter::disabled()),
            cache,
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn test_cache_hit_skips_transport() {
        let transport = Arc::new(CountingTransport::default());
        let executor = AsyncExecutor::new(core(Some(ResultCache::in_memory())), transport.clone());
        let query = Query::address("13 Rue de la Paix, Paris");

        let first = executor.resolve(&query).await.unwrap();
        let second = executor.resolve(&query).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exactly_one_applies_after_cache() {
        let transport = Arc::new(CountingTransport::default());
        let executor = AsyncExecutor::new(core(Some(ResultCache::in_memory())), transport.clone());

        let one = executor.resolve(&Query::address("Paix")).await.unwrap();
        let all = executor
            .resolve(&Query::address("Paix").all_results())
            .await
            .unwrap();

        assert_eq!(one.len(), 1);
        assert_eq!(all.len(), 2);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_errors_are_not_cached() {
        let transport = Arc::new(CountingTransport {
            fail: true,
            ..Default::default()
        });
        let cache = ResultCache::in_memory();
        let executor = AsyncExecutor::new(core(Some(cache.clone())), transport.clone());

        for _ in 0..2 {
            assert!(executor.resolve(&Query::address("Paris")).await.is_err());
        }
        assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_invalid_query_never_reaches_transport() {
        let transport = Arc::new(CountingTransport::default());
        let executor = BlockingExecutor::new(core(None), transport.clone());

        assert!(matches!(
            executor.resolve(&Query::address("   ")),
            Err(GeocoderError::Query(_))
        ));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_blocking_without_cache_calls_every_time() {
        let transport = Arc::new(CountingTransport::default());
        let executor = BlockingExecutor::new(core(None), transport.clone());

        for _ in 0..3 {
            let locations = executor.resolve(&Query::address("Paris")).unwrap();
            assert_eq!(locations[0].latitude, 48.86931);
        }
        assert_eq!(transport.calls.load(Ordering::SeqCst), 3);
    }
}
