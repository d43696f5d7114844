//! 协作式传输适配器 - 基础设施层
//!
//! 持有唯一的 `reqwest::Client`，只暴露"执行一次请求"的能力。
//! 挂起点只在网络 I/O 上；不重试、不缓存、不限流。

use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use std::time::Duration;
use tracing::debug;

use crate::error::GeocoderResult;
use crate::infrastructure::request::{
    classify_failure, decode_body, parse_retry_after, DecodedBody, HttpMethod, HttpRequest,
    RequestBody,
};

/// 协作式传输接口
#[async_trait]
pub trait AsyncTransport: Send + Sync {
    /// 执行请求并返回解码后的响应体
    async fn execute(&self, request: &HttpRequest) -> GeocoderResult<DecodedBody>;
}

/// 基于 reqwest 的协作式传输
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// 创建传输适配器
    ///
    /// # 参数
    /// - `user_agent`: 每个请求携带的 User-Agent
    /// - `timeout`: 请求未指定超时时使用的默认值
    pub fn new(user_agent: &str, timeout: Duration) -> GeocoderResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl AsyncTransport for ReqwestTransport {
    async fn execute(&self, request: &HttpRequest) -> GeocoderResult<DecodedBody> {
        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(request.url.clone()),
            HttpMethod::Post => self.client.post(request.url.clone()),
        };

        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        builder = match &request.body {
            RequestBody::Empty => builder,
            RequestBody::Form(fields) => builder.form(fields),
            RequestBody::Multipart { fields, file } => {
                let bytes = tokio::fs::read(&file.path).await?;
                let part = reqwest::multipart::Part::bytes(bytes)
                    .file_name(file.file_name.clone())
                    .mime_str(&file.mime)?;
                let mut form = reqwest::multipart::Form::new();
                for (name, value) in fields {
                    form = form.text(name.clone(), value.clone());
                }
                builder.multipart(form.part(file.field.clone(), part))
            }
        };

        debug!("➡️ {:?} {}", request.method, request.url);

        let response = builder.send().await?;
        let status = response.status();
        let retry_after = parse_retry_after(
            response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok()),
        );
        let bytes = response.bytes().await?;

        debug!("⬅️ {} ({} 字节)", status, bytes.len());

        if !status.is_success() {
            return Err(classify_failure(status.as_u16(), &bytes, retry_after));
        }

        decode_body(request.format, &bytes)
    }
}
