//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责批量查询的调度，把一批查询变成与输入一一对应的结果序列。
//!
//! ## 模块划分
//!
//! ### `fan_out` - 扇出批量
//! - 每条查询走单条查询流程（缓存 + 限流）
//! - 协作式：Semaphore 限制在途数量；阻塞式：顺序执行
//!
//! ### `bulk` - 原生批量
//! - 按上传上限切块，每块一个临时文件
//! - 按行号把结果放回原位，绕过缓存
//!
//! ## 层次关系
//!
//! ```text
//! clients::Geocoder (选择策略)
//!     ↓
//! orchestrator::{fan_out, bulk}
//!     ↓
//! workflow::{AsyncExecutor, BlockingExecutor}
//!     ↓
//! services (限流 / 缓存)  +  providers (构造请求 / 解析)
//!     ↓
//! infrastructure (传输)
//! ```

pub mod bulk;
pub mod fan_out;

pub use bulk::{native_bulk, native_bulk_blocking, ChunkArtifact, ChunkPlanner, PendingChunk};
pub use fan_out::{fan_out, fan_out_blocking};

use crate::models::BatchOutcome;

/// 批量策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStrategy {
    FanOut,
    NativeBulk,
}

impl BatchStrategy {
    pub fn label(&self) -> &'static str {
        match self {
            BatchStrategy::FanOut => "fan-out",
            BatchStrategy::NativeBulk => "native bulk",
        }
    }
}

/// 批量处理统计
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchStats {
    pub matched: usize,
    pub unmatched: usize,
    pub failed: usize,
}

impl BatchStats {
    pub fn from_outcomes(outcomes: &[BatchOutcome]) -> Self {
        outcomes
            .iter()
            .fold(Self::default(), |mut stats, outcome| {
                match outcome {
                    Ok(Some(_)) => stats.matched += 1,
                    Ok(None) => stats.unmatched += 1,
                    Err(_) => stats.failed += 1,
                }
                stats
            })
    }

    pub fn total(&self) -> usize {
        self.matched + self.unmatched + self.failed
    }
}
