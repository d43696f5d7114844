//! 原生批量处理器 - 编排层
//!
//! ## 流程
//!
//! 1. 逐条序列化查询，按上传上限切分成块（表头 + 若干行）
//! 2. 每块写入一个临时文件，作为一次上传请求发出
//! 3. 按行号把结果放回原来的位置
//! 4. 响应读完后立即删除临时文件，无论成功失败
//!
//! 批量接口绕过结果缓存，但每次上传仍然经过限流器。

use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::error::{GeocoderError, GeocoderResult};
use crate::infrastructure::FilePart;
use crate::models::{BatchOutcome, Location, Query};
use crate::providers::{BulkProtocol, Provider};
use crate::workflow::{AsyncExecutor, BlockingExecutor};

/// 待上传的一块
#[derive(Debug, Clone, PartialEq)]
pub struct PendingChunk {
    /// 每一行对应的原始位置
    pub positions: Vec<usize>,
    /// 表头 + 行
    pub payload: Vec<u8>,
}

/// 按大小上限切块
///
/// 只有加入下一行会超过上限时才开始新块，所以每块都尽量满。
pub struct ChunkPlanner<'a> {
    bulk: &'a dyn BulkProtocol,
    header: Vec<u8>,
    ceiling: usize,
    current: Option<PendingChunk>,
}

impl<'a> ChunkPlanner<'a> {
    /// # 参数
    /// - `bulk`: 服务的批量协议
    /// - `max_chunk_bytes`: 调用方配置的上限，与服务声明的上限取较小值
    pub fn new(bulk: &'a dyn BulkProtocol, max_chunk_bytes: usize) -> GeocoderResult<Self> {
        let ceiling = max_chunk_bytes.min(bulk.max_chunk_bytes());
        let header = bulk.header()?;
        if header.len() >= ceiling {
            return Err(GeocoderError::Configuration(format!(
                "上传上限 {} 字节放不下表头 ({} 字节)",
                ceiling,
                header.len()
            )));
        }
        Ok(Self {
            bulk,
            header,
            ceiling,
            current: None,
        })
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    /// 加入一条查询
    ///
    /// # 返回
    /// - `Ok(Some(chunk))`: 当前块已满并被交出，这条查询进入新块
    /// - `Ok(None)`: 已加入当前块
    /// - `Err(e)`: 这条查询无法上传（校验失败、序列化失败或单行超过上限），应在它的位置放错误标记
    pub fn push(&mut self, position: usize, query: &Query) -> GeocoderResult<Option<PendingChunk>> {
        query.validate()?;
        let row = self.bulk.serialize_row(query)?;
        if self.header.len() + row.len() > self.ceiling {
            return Err(GeocoderError::Query(format!(
                "单行 {} 字节超过上传上限 {} 字节",
                row.len(),
                self.ceiling
            )));
        }

        let full = self
            .current
            .as_ref()
            .is_some_and(|chunk| chunk.payload.len() + row.len() > self.ceiling);
        let flushed = if full { self.current.take() } else { None };

        let header = &self.header;
        let chunk = self.current.get_or_insert_with(|| PendingChunk {
            positions: Vec::new(),
            payload: header.clone(),
        });
        chunk.positions.push(position);
        chunk.payload.extend_from_slice(&row);

        Ok(flushed)
    }

    /// 交出最后一块（如果有）
    pub fn finish(self) -> Option<PendingChunk> {
        self.current
    }
}

/// 一块上传内容对应的临时文件
///
/// 生命周期：`create` → `file_part` 用于请求 → `dispose`。
/// 即使忘记 `dispose`，drop 时文件也会被删除。
pub struct ChunkArtifact {
    file: NamedTempFile,
}

impl ChunkArtifact {
    pub fn create(payload: &[u8]) -> GeocoderResult<Self> {
        let mut file = tempfile::Builder::new()
            .prefix("geocode_hub_")
            .suffix(".csv")
            .tempfile()?;
        file.write_all(payload)?;
        file.flush()?;
        Ok(Self { file })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// 上传用的文件描述
    pub fn file_part(&self) -> FilePart {
        FilePart {
            field: "data".to_string(),
            path: self.path().to_path_buf(),
            file_name: "data.csv".to_string(),
            mime: "text/csv".to_string(),
        }
    }

    pub fn dispose(self) {
        let path = self.path().to_path_buf();
        match self.file.close() {
            Ok(()) => debug!("🗑️ 已删除临时文件 {}", path.display()),
            Err(e) => warn!("⚠️ 删除临时文件 {} 失败: {}", path.display(), e),
        }
    }
}

/// 行数必须与提交的查询数一致，否则整块视为解析失败
fn check_rows(rows: Vec<Option<Location>>, expected: usize) -> GeocoderResult<Vec<Option<Location>>> {
    if rows.len() != expected {
        return Err(GeocoderError::Parse(format!(
            "批量响应有 {} 行，提交了 {} 条查询",
            rows.len(),
            expected
        )));
    }
    Ok(rows)
}

/// 把一块的结果放回各自的位置；失败时每个位置都得到同一个错误
fn scatter(
    slots: &mut [Option<BatchOutcome>],
    positions: &[usize],
    result: GeocoderResult<Vec<Option<Location>>>,
) {
    match result {
        Ok(rows) => {
            for (&position, row) in positions.iter().zip(rows) {
                slots[position] = Some(Ok(row));
            }
        }
        Err(e) => {
            for &position in positions {
                slots[position] = Some(Err(e.clone()));
            }
        }
    }
}

fn collect(slots: Vec<Option<BatchOutcome>>) -> Vec<BatchOutcome> {
    slots
        .into_iter()
        .map(|slot| slot.unwrap_or_else(|| Err(GeocoderError::Internal("缺少结果".to_string()))))
        .collect()
}

fn bulk_protocol(provider: &dyn Provider) -> GeocoderResult<&dyn BulkProtocol> {
    provider.bulk().ok_or_else(|| {
        GeocoderError::Configuration(format!("{} 不支持原生批量接口", provider.name()))
    })
}

async fn upload_chunk(
    executor: &AsyncExecutor,
    chunk: &PendingChunk,
    timeout: Duration,
) -> GeocoderResult<Vec<Option<Location>>> {
    let provider = executor.core().provider().clone();
    let bulk = bulk_protocol(provider.as_ref())?;

    // 文件读写放到阻塞线程池，不占用运行时线程
    let payload = chunk.payload.clone();
    let artifact = tokio::task::spawn_blocking(move || ChunkArtifact::create(&payload))
        .await
        .map_err(|e| GeocoderError::Internal(e.to_string()))??;
    let result: GeocoderResult<Vec<Option<Location>>> = async {
        let request = bulk.build_upload(artifact.file_part())?.with_timeout(timeout);
        executor.core().limiter().acquire().await;
        let body = executor.transport().execute(&request).await?;
        bulk.decode_rows(body)
    }
    .await;
    if let Err(e) = tokio::task::spawn_blocking(move || artifact.dispose()).await {
        warn!("⚠️ 删除临时文件的任务失败: {}", e);
    }

    check_rows(result?, chunk.positions.len())
}

fn upload_chunk_blocking(
    executor: &BlockingExecutor,
    chunk: &PendingChunk,
    timeout: Duration,
) -> GeocoderResult<Vec<Option<Location>>> {
    let bulk = bulk_protocol(executor.core().provider().as_ref())?;

    let artifact = ChunkArtifact::create(&chunk.payload)?;
    let result: GeocoderResult<Vec<Option<Location>>> = (|| {
        let request = bulk.build_upload(artifact.file_part())?.with_timeout(timeout);
        executor.core().limiter().acquire_blocking();
        let body = executor.transport().execute(&request)?;
        bulk.decode_rows(body)
    })();
    artifact.dispose();

    check_rows(result?, chunk.positions.len())
}

type UploadHandle = tokio::task::JoinHandle<GeocoderResult<Vec<Option<Location>>>>;

/// 拿到许可后把一块交给后台任务上传
async fn spawn_upload(
    executor: &AsyncExecutor,
    semaphore: &Arc<Semaphore>,
    chunk: PendingChunk,
    number: usize,
    timeout: Duration,
) -> GeocoderResult<(Vec<usize>, UploadHandle)> {
    let permit = semaphore
        .clone()
        .acquire_owned()
        .await
        .map_err(|e| GeocoderError::Internal(e.to_string()))?;
    info!(
        "📤 上传第 {} 块 ({} 行, {} 字节)",
        number,
        chunk.positions.len(),
        chunk.payload.len()
    );

    let executor = executor.clone();
    let positions = chunk.positions.clone();
    let handle = tokio::spawn(async move {
        let _permit = permit;
        upload_chunk(&executor, &chunk, timeout).await
    });
    Ok((positions, handle))
}

/// 协作式原生批量
///
/// # 参数
/// - `executor`: 提供服务、限流器和传输
/// - `queries`: 查询序列，可以是惰性产生的
/// - `max_concurrent`: 同时上传的块数上限
/// - `max_chunk_bytes`: 单块大小上限
/// - `timeout`: 单次上传超时
///
/// # 返回
/// 配置错误时整体失败（不会发出任何请求），否则与输入一一对应的结果
pub async fn native_bulk<I>(
    executor: &AsyncExecutor,
    queries: I,
    max_concurrent: usize,
    max_chunk_bytes: usize,
    timeout: Duration,
) -> GeocoderResult<Vec<BatchOutcome>>
where
    I: IntoIterator<Item = Query>,
{
    if max_concurrent == 0 {
        return Err(GeocoderError::Configuration(
            "max_concurrent 必须大于 0".to_string(),
        ));
    }
    let provider = executor.core().provider().clone();
    let mut planner = ChunkPlanner::new(bulk_protocol(provider.as_ref())?, max_chunk_bytes)?;

    let semaphore = Arc::new(Semaphore::new(max_concurrent));
    let mut slots: Vec<Option<BatchOutcome>> = Vec::new();
    let mut handles = Vec::new();

    for (position, query) in queries.into_iter().enumerate() {
        slots.push(None);
        match planner.push(position, &query) {
            Ok(Some(chunk)) => {
                let number = handles.len() + 1;
                handles.push(spawn_upload(executor, &semaphore, chunk, number, timeout).await?);
            }
            Ok(None) => {}
            Err(e) => {
                warn!("[#{}] ⚠️ 无法加入批量上传 ({}): {}", position + 1, query, e);
                slots[position] = Some(Err(e));
            }
        }
    }
    if let Some(chunk) = planner.finish() {
        let number = handles.len() + 1;
        handles.push(spawn_upload(executor, &semaphore, chunk, number, timeout).await?);
    }

    for (number, (positions, handle)) in handles.into_iter().enumerate() {
        let result = match handle.await {
            Ok(result) => result,
            Err(e) => Err(GeocoderError::Internal(e.to_string())),
        };
        if let Err(e) = &result {
            error!("❌ 第 {} 块上传失败 ({} 行): {}", number + 1, positions.len(), e);
        }
        scatter(&mut slots, &positions, result);
    }

    Ok(collect(slots))
}

/// 阻塞式原生批量：逐块顺序上传
pub fn native_bulk_blocking<I>(
    executor: &BlockingExecutor,
    queries: I,
    max_chunk_bytes: usize,
    timeout: Duration,
) -> GeocoderResult<Vec<BatchOutcome>>
where
    I: IntoIterator<Item = Query>,
{
    let mut planner = ChunkPlanner::new(
        bulk_protocol(executor.core().provider().as_ref())?,
        max_chunk_bytes,
    )?;

    let mut slots: Vec<Option<BatchOutcome>> = Vec::new();
    let mut uploaded = 0;
    let mut send = |slots: &mut Vec<Option<BatchOutcome>>, chunk: PendingChunk| {
        uploaded += 1;
        info!(
            "📤 上传第 {} 块 ({} 行, {} 字节)",
            uploaded,
            chunk.positions.len(),
            chunk.payload.len()
        );
        let result = upload_chunk_blocking(executor, &chunk, timeout);
        if let Err(e) = &result {
            error!("❌ 第 {} 块上传失败 ({} 行): {}", uploaded, chunk.positions.len(), e);
        }
        scatter(slots, &chunk.positions, result);
    };

    for (position, query) in queries.into_iter().enumerate() {
        slots.push(None);
        match planner.push(position, &query) {
            Ok(Some(chunk)) => send(&mut slots, chunk),
            Ok(None) => {}
            Err(e) => {
                warn!("[#{}] ⚠️ 无法加入批量上传 ({}): {}", position + 1, query, e);
                slots[position] = Some(Err(e));
            }
        }
    }
    if let Some(chunk) = planner.finish() {
        send(&mut slots, chunk);
    }

    Ok(collect(slots))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::{
        AsyncTransport, BlockingTransport, CsvTable, DecodedBody, HttpRequest, RequestBody,
    };
    use crate::providers::IgnFrance;
    use crate::services::RateLimiter;
    use crate::workflow::ExecutorCore;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::path::PathBuf;

    /// 读取上传的 CSV，每行回一个结果；记录每次上传的文件路径、大小和查询
    #[derive(Default)]
    struct CsvEchoTransport {
        uploads: Mutex<Vec<(PathBuf, usize)>>,
        queries: Mutex<Vec<String>>,
        drop_last_row: bool,
        fail_upload: bool,
    }

    impl CsvEchoTransport {
        fn respond(&self, request: &HttpRequest) -> GeocoderResult<DecodedBody> {
            let RequestBody::Multipart { file, .. } = &request.body else {
                return Err(GeocoderError::Internal("期望 multipart".to_string()));
            };
            let bytes = std::fs::read(&file.path)?;
            self.uploads.lock().push((file.path.clone(), bytes.len()));

            let mut reader = csv::Reader::from_reader(bytes.as_slice());
            let mut rows: Vec<Vec<String>> = reader
                .records()
                .map(|record| {
                    let query = record.map(|r| r[0].to_string()).unwrap_or_default();
                    self.queries.lock().push(query.clone());
                    let status = if query.contains("nowhere") { "not-found" } else { "ok" };
                    vec![query.clone(), "48.86931".into(), "2.316138".into(), query, status.into()]
                })
                .collect();
            if self.fail_upload {
                return Err(GeocoderError::TimedOut("上传超时".to_string()));
            }
            if self.drop_last_row {
                rows.pop();
            }
            Ok(DecodedBody::Csv(CsvTable {
                headers: ["query", "latitude", "longitude", "result_label", "result_status"]
                    .map(String::from)
                    .to_vec(),
                rows,
            }))
        }

        fn all_removed(&self) -> bool {
            let uploads = self.uploads.lock();
            !uploads.is_empty() && uploads.iter().all(|(path, _)| !path.exists())
        }
    }

    impl BlockingTransport for CsvEchoTransport {
        fn execute(&self, request: &HttpRequest) -> GeocoderResult<DecodedBody> {
            self.respond(request)
        }
    }

    #[async_trait]
    impl AsyncTransport for CsvEchoTransport {
        async fn execute(&self, request: &HttpRequest) -> GeocoderResult<DecodedBody> {
            self.respond(request)
        }
    }

    fn core() -> ExecutorCore {
        ExecutorCore::new(
            Arc::new(IgnFrance::new()),
            Arc::new(RateLimiter::disabled()),
            None,
            Duration::from_secs(5),
        )
    }

    fn executor(transport: Arc<CsvEchoTransport>) -> BlockingExecutor {
        BlockingExecutor::new(core(), transport)
    }

    fn async_executor(transport: Arc<CsvEchoTransport>) -> AsyncExecutor {
        AsyncExecutor::new(core(), transport)
    }

    #[test]
    fn test_planner_respects_ceiling() {
        let ign = IgnFrance::new();
        // "query\n" 6 字节 + 每行 "addr-NN\n" 8 字节，上限 30 放得下 3 行
        let mut planner = ChunkPlanner::new(&ign, 30).unwrap();
        let mut chunks = Vec::new();
        for i in 0..7 {
            if let Some(chunk) = planner.push(i, &Query::address(format!("addr-{:02}", i))).unwrap() {
                chunks.push(chunk);
            }
        }
        chunks.extend(planner.finish());

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].positions, vec![0, 1, 2]);
        assert_eq!(chunks[2].positions, vec![6]);
        assert!(chunks.iter().all(|c| c.payload.len() <= 30));
        assert!(chunks.iter().all(|c| c.payload.starts_with(b"query\n")));
    }

    #[test]
    fn test_planner_rejects_oversized_row_and_header() {
        let ign = IgnFrance::new();
        let mut planner = ChunkPlanner::new(&ign, 16).unwrap();
        assert!(matches!(
            planner.push(0, &Query::address("a very long address line")),
            Err(GeocoderError::Query(_))
        ));
        assert!(planner.finish().is_none());

        assert!(matches!(
            ChunkPlanner::new(&ign, 6),
            Err(GeocoderError::Configuration(_))
        ));
    }

    #[test]
    fn test_artifact_is_removed_on_dispose() {
        let artifact = ChunkArtifact::create(b"query\nParis\n").unwrap();
        let path = artifact.path().to_path_buf();
        assert_eq!(std::fs::read(&path).unwrap(), b"query\nParis\n");

        artifact.dispose();
        assert!(!path.exists());
    }

    #[test]
    fn test_bulk_blocking_keeps_order_and_cleans_up() {
        let transport = Arc::new(CsvEchoTransport::default());
        let queries = (0..10).map(|i| {
            if i == 4 {
                Query::address("nowhere")
            } else {
                Query::address(format!("{} rue de la Paix", i))
            }
        });

        let outcomes = native_bulk_blocking(&executor(transport.clone()), queries, 64, Duration::from_secs(5))
            .unwrap();

        assert_eq!(outcomes.len(), 10);
        assert!(outcomes[4].as_ref().unwrap().is_none());
        assert_eq!(
            outcomes[7].as_ref().unwrap().as_ref().unwrap().address,
            "7 rue de la Paix"
        );

        let uploads = transport.uploads.lock();
        assert!(uploads.len() > 1);
        for (path, size) in uploads.iter() {
            assert!(*size <= 64);
            assert!(!path.exists());
        }
    }

    #[test]
    fn test_row_count_mismatch_fails_whole_chunk() {
        let transport = Arc::new(CsvEchoTransport {
            drop_last_row: true,
            ..Default::default()
        });
        let queries = ["Paris", "Lyon", "Nantes"].map(Query::address);

        let outcomes =
            native_bulk_blocking(&executor(transport.clone()), queries, 1024, Duration::from_secs(5))
                .unwrap();

        assert!(outcomes
            .iter()
            .all(|o| matches!(o, Err(GeocoderError::Parse(_)))));
        assert!(transport.all_removed());
    }

    #[test]
    fn test_failed_upload_removes_artifact() {
        let transport = Arc::new(CsvEchoTransport {
            fail_upload: true,
            ..Default::default()
        });
        let queries = ["Paris", "Lyon", "Nantes"].map(Query::address);

        let outcomes =
            native_bulk_blocking(&executor(transport.clone()), queries, 1024, Duration::from_secs(5))
                .unwrap();

        assert!(outcomes
            .iter()
            .all(|o| matches!(o, Err(GeocoderError::TimedOut(_)))));
        assert!(transport.all_removed());
    }

    #[test]
    fn test_invalid_query_is_marked_and_not_uploaded() {
        let transport = Arc::new(CsvEchoTransport::default());
        let queries = vec![
            Query::address("Paris"),
            Query::address("   "),
            Query::address("Lyon").with_limit(0),
            Query::address("Nantes"),
        ];

        let outcomes =
            native_bulk_blocking(&executor(transport.clone()), queries, 1024, Duration::from_secs(5))
                .unwrap();

        assert!(outcomes[0].is_ok());
        assert!(matches!(outcomes[1], Err(GeocoderError::Query(_))));
        assert!(matches!(outcomes[2], Err(GeocoderError::Query(_))));
        assert!(outcomes[3].is_ok());
        assert_eq!(*transport.queries.lock(), vec!["Paris", "Nantes"]);
    }

    #[tokio::test]
    async fn test_async_bulk_removes_artifacts_on_every_path() {
        let ok = Arc::new(CsvEchoTransport::default());
        let queries = (0..6).map(|i| Query::address(format!("{} rue de la Paix", i)));
        let outcomes = native_bulk(&async_executor(ok.clone()), queries, 2, 64, Duration::from_secs(5))
            .await
            .unwrap();
        assert!(outcomes.iter().all(|o| o.is_ok()));
        assert!(ok.uploads.lock().len() > 1);
        assert!(ok.all_removed());

        let failing = Arc::new(CsvEchoTransport {
            fail_upload: true,
            ..Default::default()
        });
        let outcomes = native_bulk(
            &async_executor(failing.clone()),
            ["Paris", "Lyon"].map(Query::address),
            2,
            1024,
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        assert!(outcomes
            .iter()
            .all(|o| matches!(o, Err(GeocoderError::TimedOut(_)))));
        assert!(failing.all_removed());

        let short = Arc::new(CsvEchoTransport {
            drop_last_row: true,
            ..Default::default()
        });
        let outcomes = native_bulk(
            &async_executor(short.clone()),
            ["Paris", "Lyon"].map(Query::address),
            2,
            1024,
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        assert!(outcomes
            .iter()
            .all(|o| matches!(o, Err(GeocoderError::Parse(_)))));
        assert!(short.all_removed());
    }

    #[tokio::test]
    async fn test_async_bulk_marks_blank_query() {
        let transport = Arc::new(CsvEchoTransport::default());
        let queries = ["Paris", "   "].map(Query::address);

        let outcomes = native_bulk(&async_executor(transport.clone()), queries, 2, 1024, Duration::from_secs(5))
            .await
            .unwrap();

        assert!(matches!(outcomes[0], Ok(Some(_))));
        assert!(matches!(outcomes[1], Err(GeocoderError::Query(_))));
        assert_eq!(*transport.queries.lock(), vec!["Paris"]);
    }

    #[test]
    fn test_reverse_query_gets_error_marker_only() {
        let transport = Arc::new(CsvEchoTransport::default());
        let queries = vec![
            Query::address("Paris"),
            Query::reverse(crate::models::Point::new(48.8, 2.3).unwrap()),
            Query::address("Lyon"),
        ];

        let outcomes =
            native_bulk_blocking(&executor(transport.clone()), queries, 1024, Duration::from_secs(5))
                .unwrap();

        assert!(outcomes[0].is_ok());
        assert!(matches!(outcomes[1], Err(GeocoderError::Query(_))));
        assert!(outcomes[2].is_ok());
        assert_eq!(transport.uploads.lock().len(), 1);
    }
}
