//! 阻塞式传输适配器 - 基础设施层
//!
//! 调用线程一直被占用，直到网络往返结束或超时。
//! 注意：`reqwest::blocking` 不能在异步运行时的线程上创建或使用。

use reqwest::header::RETRY_AFTER;
use std::time::Duration;
use tracing::debug;

use crate::error::GeocoderResult;
use crate::infrastructure::request::{
    classify_failure, decode_body, parse_retry_after, DecodedBody, HttpMethod, HttpRequest,
    RequestBody,
};

/// 阻塞式传输接口，与 `AsyncTransport` 契约相同
pub trait BlockingTransport: Send + Sync {
    fn execute(&self, request: &HttpRequest) -> GeocoderResult<DecodedBody>;
}

/// 基于 `reqwest::blocking` 的传输
pub struct ReqwestBlockingTransport {
    client: reqwest::blocking::Client,
}

impl ReqwestBlockingTransport {
    pub fn new(user_agent: &str, timeout: Duration) -> GeocoderResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

impl BlockingTransport for ReqwestBlockingTransport {
    fn execute(&self, request: &HttpRequest) -> GeocoderResult<DecodedBody> {
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
                let bytes = std::fs::read(&file.path)?;
                let part = reqwest::blocking::multipart::Part::bytes(bytes)
                    .file_name(file.file_name.clone())
                    .mime_str(&file.mime)?;
                let mut form = reqwest::blocking::multipart::Form::new();
                for (name, value) in fields {
                    form = form.text(name.clone(), value.clone());
                }
                builder.multipart(form.part(file.field.clone(), part))
            }
        };

        debug!("➡️ {:?} {}", request.method, request.url);

        let response = builder.send()?;
        let status = response.status();
        let retry_after = parse_retry_after(
            response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok()),
        );
        let bytes = response.bytes()?;

        debug!("⬅️ {} ({} 字节)", status, bytes.len());

        if !status.is_success() {
            return Err(classify_failure(status.as_u16(), &bytes, retry_after));
        }

        decode_body(request.format, &bytes)
    }
}
