//! 扇出批量处理器 - 编排层
//!
//! 每条查询都走单条查询流程（缓存 + 限流），
//! 协作式时用 Semaphore 限制同时在途的数量，阻塞式时严格顺序执行。
//!
//! - 输入按需消费，不需要先收集成 Vec
//! - 每个结果放在它原来的位置
//! - 一条失败不会取消其他查询

use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{error, warn};

use crate::error::{GeocoderError, GeocoderResult};
use crate::models::{BatchOutcome, Query};
use crate::workflow::{AsyncExecutor, BlockingExecutor};

/// 协作式扇出
///
/// # 参数
/// - `executor`: 单条查询执行器（所有任务共享它的限流器和缓存）
/// - `queries`: 查询序列，可以是惰性产生的
/// - `max_concurrent`: 同时在途的查询上限
/// - `deadline`: 整批的截止时刻，到点仍未完成的位置得到 `TimedOut`
///
/// # 返回
/// 与输入一一对应的结果
pub async fn fan_out<I>(
    executor: &AsyncExecutor,
    queries: I,
    max_concurrent: usize,
    deadline: Option<Instant>,
) -> GeocoderResult<Vec<BatchOutcome>>
where
    I: IntoIterator<Item = Query>,
{
    if max_concurrent == 0 {
        return Err(GeocoderError::Configuration(
            "max_concurrent 必须大于 0".to_string(),
        ));
    }

    let semaphore = Arc::new(Semaphore::new(max_concurrent));
    let mut handles = Vec::new();

    for (index, query) in queries.into_iter().enumerate() {
        // 先拿许可再取下一条，输入只会被消费到在途上限为止
        let permit = semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| GeocoderError::Internal(e.to_string()))?;

        let executor = executor.clone();
        let handle = tokio::spawn(async move {
            let _permit = permit;
            let resolve = executor.resolve(&query);
            let outcome = match deadline {
                // 超时会丢弃正在进行的请求
                Some(deadline) => tokio::time::timeout_at(deadline, resolve)
                    .await
                    .unwrap_or_else(|_| Err(deadline_error())),
                None => resolve.await,
            }
            .map(|locations| locations.into_iter().next());
            if let Err(e) = &outcome {
                warn!("[#{}] ⚠️ 查询失败 ({}): {}", index + 1, query, e);
            }
            outcome
        });
        handles.push(handle);
    }

    let outcomes = join_all(handles)
        .await
        .into_iter()
        .enumerate()
        .map(|(index, joined)| match joined {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("[#{}] 任务执行失败: {}", index + 1, e);
                Err(GeocoderError::Internal(e.to_string()))
            }
        })
        .collect();

    Ok(outcomes)
}

fn deadline_error() -> GeocoderError {
    GeocoderError::TimedOut("批量截止时间已到".to_string())
}

/// 阻塞式扇出：逐条顺序执行，限流器照常生效
///
/// 截止时刻过后剩下的查询不再发出，直接得到 `TimedOut`；
/// 已经在途的那一条由它自己的请求超时约束。
pub fn fan_out_blocking<I>(
    executor: &BlockingExecutor,
    queries: I,
    deadline: Option<Instant>,
) -> Vec<BatchOutcome>
where
    I: IntoIterator<Item = Query>,
{
    queries
        .into_iter()
        .enumerate()
        .map(|(index, query)| {
            let expired = deadline.is_some_and(|deadline| Instant::now() >= deadline);
            let outcome = if expired {
                Err(deadline_error())
            } else {
                executor.resolve(&query)
            }
            .map(|locations| locations.into_iter().next());
            if let Err(e) = &outcome {
                warn!("[#{}] ⚠️ 查询失败 ({}): {}", index + 1, query, e);
            }
            outcome
        })
        .collect()
}
