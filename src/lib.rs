//! # Geocode Hub
//!
//! 统一的地理编码客户端：用同一套调用契约访问不同的地理编码服务，
//! 同时保护远程服务不被压垮、避免重复请求。
//!
//! ## 架构设计
//!
//! 本系统采用严格的四层架构：
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/` - 持有稀缺资源（HTTP 客户端），只暴露"执行请求"的能力
//! - `AsyncTransport` / `BlockingTransport` - 同一契约的两种形式
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 限流和缓存，按客户端实例共享
//! - `RateLimiter` - 最小请求间隔
//! - `ResultCache` - 按请求规范形式缓存结果，带过期时间
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义"一条查询"的完整处理流程
//! - 缓存 → 限流 → 传输 → 解析 → 写缓存
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/fan_out` - 有界并发的扇出批量
//! - `orchestrator/bulk` - 服务原生的分块上传批量
//!
//! 另外：`providers/` 是各服务的适配器（只构造请求和解析响应），
//! `clients/` 是对外的 `Geocoder` / `BlockingGeocoder`。
//!
//! ## 模块结构

pub mod app;
pub mod clients;
pub mod config;
pub mod error;
pub mod infrastructure;
pub mod models;
pub mod orchestrator;
pub mod providers;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use app::App;
pub use clients::{BlockingGeocoder, Geocoder};
pub use config::{Config, Scheduling};
pub use error::{GeocoderError, GeocoderResult};
pub use models::{BatchOutcome, Location, Point, Query, QueryOptions, QueryTarget};
pub use orchestrator::{BatchStats, BatchStrategy};
pub use providers::{BulkProtocol, Provider};
