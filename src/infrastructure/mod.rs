//! 基础设施层（Infrastructure）
//!
//! 持有稀缺资源（HTTP 客户端），只暴露"执行请求"的能力。
//! 两种形式共用一个契约：`AsyncTransport`（协作式）和 `BlockingTransport`（阻塞式）。

pub mod blocking_transport;
pub mod http_transport;
pub mod request;

pub use blocking_transport::{BlockingTransport, ReqwestBlockingTransport};
pub use http_transport::{AsyncTransport, ReqwestTransport};
pub use request::{
    CsvTable, DecodedBody, FilePart, HttpMethod, HttpRequest, RequestBody, ResponseFormat,
};
