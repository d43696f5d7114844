/// 地理编码客户端
///
/// 对外的统一调用入口：`Geocoder`（协作式）和 `BlockingGeocoder`（阻塞式）。
/// 两者的调用契约相同，调度模型在构造时选定。
use std::sync::Arc;
use tokio::time::Instant;
use tracing::warn;

use crate::config::Config;
use crate::error::GeocoderResult;
use crate::infrastructure::{
    AsyncTransport, BlockingTransport, ReqwestBlockingTransport, ReqwestTransport,
};
use crate::models::{BatchOutcome, Location, Point, Query};
use crate::orchestrator::{self, BatchStats, BatchStrategy};
use crate::providers::{self, Provider};
use crate::services::{CacheBackend, FileCache, MemoryCache, RateLimiter, ResultCache};
use crate::utils::logging::{log_batch_complete, log_batch_start};
use crate::workflow::{AsyncExecutor, BlockingExecutor, ExecutorCore};

/// 按配置组装执行器共享的部分：限流器、缓存、默认超时
fn build_core(provider: Arc<dyn Provider>, config: &Config) -> GeocoderResult<ExecutorCore> {
    config.validate()?;

    let min_interval = config
        .min_interval()
        .unwrap_or_else(|| provider.min_interval());
    let limiter = Arc::new(RateLimiter::new(min_interval));

    let cache = if config.cache_enabled {
        let backend: Arc<dyn CacheBackend> = match &config.cache_path {
            Some(path) => Arc::new(FileCache::open(path)?),
            None => Arc::new(MemoryCache::new()),
        };
        Some(ResultCache::new(backend, config.cache_ttl()))
    } else {
        None
    };

    Ok(ExecutorCore::new(provider, limiter, cache, config.timeout()))
}

fn select_strategy(provider: &dyn Provider, config: &Config) -> BatchStrategy {
    if config.native_bulk && provider.supports_native_batch() {
        BatchStrategy::NativeBulk
    } else {
        BatchStrategy::FanOut
    }
}

fn first(locations: Vec<Location>) -> Option<Location> {
    locations.into_iter().next()
}

fn log_outcomes(provider: &str, outcomes: &[BatchOutcome]) {
    let stats = BatchStats::from_outcomes(outcomes);
    log_batch_complete(provider, stats.matched, stats.unmatched, stats.failed);
}

/// 协作式地理编码客户端
#[derive(Clone)]
pub struct Geocoder {
    executor: AsyncExecutor,
    config: Config,
}

impl Geocoder {
    /// 按 `config.provider` 创建客户端
    pub fn from_config(config: Config) -> GeocoderResult<Self> {
        let provider = providers::for_service(&config.provider, &config)?;
        Self::new(provider, config)
    }

    /// 使用 reqwest 传输创建客户端
    pub fn new(provider: Arc<dyn Provider>, config: Config) -> GeocoderResult<Self> {
        let transport = Arc::new(ReqwestTransport::new(&config.user_agent, config.timeout())?);
        Self::with_transport(provider, config, transport)
    }

    /// 使用自定义传输创建客户端
    ///
    /// # 参数
    /// - `provider`: 服务适配器
    /// - `config`: 配置，构造时校验
    /// - `transport`: 传输实现
    pub fn with_transport(
        provider: Arc<dyn Provider>,
        config: Config,
        transport: Arc<dyn AsyncTransport>,
    ) -> GeocoderResult<Self> {
        let core = build_core(provider, &config)?;
        Ok(Self {
            executor: AsyncExecutor::new(core, transport),
            config,
        })
    }

    pub fn provider_name(&self) -> &str {
        self.executor.core().provider().name()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cache(&self) -> Option<&ResultCache> {
        self.executor.core().cache()
    }

    /// 本客户端批量时使用的策略
    pub fn strategy(&self) -> BatchStrategy {
        select_strategy(self.executor.core().provider().as_ref(), &self.config)
    }

    /// 解析一条查询，返回全部（或按 `exactly_one` 截断后的）结果
    pub async fn resolve(&self, query: &Query) -> GeocoderResult<Vec<Location>> {
        self.executor.resolve(query).await
    }

    /// 地址 → 坐标，返回最匹配的一个
    pub async fn geocode(&self, address: &str) -> GeocoderResult<Option<Location>> {
        self.resolve(&Query::address(address)).await.map(first)
    }

    /// 坐标 → 地址，返回最匹配的一个
    pub async fn reverse(&self, point: Point) -> GeocoderResult<Option<Location>> {
        self.resolve(&Query::reverse(point)).await.map(first)
    }

    /// 批量解析
    ///
    /// # 参数
    /// - `queries`: 查询序列（可以是惰性的），元素可以是 `&str`、`String`、`Point` 或 `Query`
    ///
    /// # 返回
    /// - `Err`: 配置错误，整批在发出任何请求之前失败
    /// - `Ok(outcomes)`: 与输入一一对应，每个位置是结果或错误标记
    pub async fn geocode_batch<I>(&self, queries: I) -> GeocoderResult<Vec<BatchOutcome>>
    where
        I: IntoIterator,
        I::Item: Into<Query>,
    {
        let strategy = self.strategy();
        let provider = self.provider_name();
        log_batch_start(provider, strategy.label());

        let queries = queries.into_iter().map(Into::into);
        let outcomes = match strategy {
            BatchStrategy::FanOut => {
                let deadline = self.config.batch_timeout().map(|t| Instant::now() + t);
                orchestrator::fan_out(&self.executor, queries, self.config.max_concurrent, deadline)
                    .await?
            }
            BatchStrategy::NativeBulk => {
                orchestrator::native_bulk(
                    &self.executor,
                    queries,
                    self.config.max_concurrent,
                    self.config.max_chunk_bytes,
                    self.config.bulk_timeout(),
                )
                .await?
            }
        };

        // 缓存落盘是阻塞 I/O，放到阻塞线程池
        if let Some(cache) = self.cache().cloned() {
            if let Err(e) = tokio::task::spawn_blocking(move || cache.flush()).await {
                warn!("⚠️ 缓存落盘任务失败: {}", e);
            }
        }

        log_outcomes(provider, &outcomes);
        Ok(outcomes)
    }
}

/// 阻塞式地理编码客户端
///
/// `reqwest::blocking` 不能在异步运行时线程上使用，
/// 在异步程序里请放进 `tokio::task::spawn_blocking`。
#[derive(Clone)]
pub struct BlockingGeocoder {
    executor: BlockingExecutor,
    config: Config,
}

impl BlockingGeocoder {
    pub fn from_config(config: Config) -> GeocoderResult<Self> {
        let provider = providers::for_service(&config.provider, &config)?;
        Self::new(provider, config)
    }

    pub fn new(provider: Arc<dyn Provider>, config: Config) -> GeocoderResult<Self> {
        let transport = Arc::new(ReqwestBlockingTransport::new(
            &config.user_agent,
            config.timeout(),
        )?);
        Self::with_transport(provider, config, transport)
    }

    pub fn with_transport(
        provider: Arc<dyn Provider>,
        config: Config,
        transport: Arc<dyn BlockingTransport>,
    ) -> GeocoderResult<Self> {
        let core = build_core(provider, &config)?;
        Ok(Self {
            executor: BlockingExecutor::new(core, transport),
            config,
        })
    }

    pub fn provider_name(&self) -> &str {
        self.executor.core().provider().name()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cache(&self) -> Option<&ResultCache> {
        self.executor.core().cache()
    }

    pub fn strategy(&self) -> BatchStrategy {
        select_strategy(self.executor.core().provider().as_ref(), &self.config)
    }

    pub fn resolve(&self, query: &Query) -> GeocoderResult<Vec<Location>> {
        self.executor.resolve(query)
    }

    pub fn geocode(&self, address: &str) -> GeocoderResult<Option<Location>> {
        self.resolve(&Query::address(address)).map(first)
    }

    pub fn reverse(&self, point: Point) -> GeocoderResult<Option<Location>> {
        self.resolve(&Query::reverse(point)).map(first)
    }

    /// 批量解析，逐条（或逐块）顺序执行
    pub fn geocode_batch<I>(&self, queries: I) -> GeocoderResult<Vec<BatchOutcome>>
    where
        I: IntoIterator,
        I::Item: Into<Query>,
    {
        let strategy = self.strategy();
        let provider = self.provider_name();
        log_batch_start(provider, strategy.label());

        let queries = queries.into_iter().map(Into::into);
        let outcomes = match strategy {
            BatchStrategy::FanOut => {
                let deadline = self.config.batch_timeout().map(|t| Instant::now() + t);
                orchestrator::fan_out_blocking(&self.executor, queries, deadline)
            }
            BatchStrategy::NativeBulk => orchestrator::native_bulk_blocking(
                &self.executor,
                queries,
                self.config.max_chunk_bytes,
                self.config.bulk_timeout(),
            )?,
        };

        if let Some(cache) = self.cache() {
            cache.flush();
        }

        log_outcomes(provider, &outcomes);
        Ok(outcomes)
    }
}
