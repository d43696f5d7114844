//! 请求描述与响应解码
//!
//! 传输层只认识这里的 `HttpRequest` 和 `DecodedBody`，
//! 不认识 Query / Location，也不做缓存或限流

use crate::error::{GeocoderError, GeocoderResult};
use crate::utils::logging::truncate_text;
use serde_json::Value as JsonValue;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

/// 期望的响应格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFormat {
    Json,
    Xml,
    Csv,
    Text,
}

/// 上传文件（批量地理编码的临时 CSV）
#[derive(Debug, Clone, PartialEq)]
pub struct FilePart {
    /// 表单字段名
    pub field: String,
    pub path: PathBuf,
    pub file_name: String,
    pub mime: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Empty,
    Form(Vec<(String, String)>),
    Multipart {
        fields: Vec<(String, String)>,
        file: FilePart,
    },
}

/// 一次 HTTP 请求的完整描述
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: RequestBody,
    pub timeout: Option<Duration>,
    pub format: ResponseFormat,
}

impl HttpRequest {
    /// 构造 GET 请求，查询参数按给定顺序编码
    pub fn get(base: &str, params: &[(String, String)]) -> GeocoderResult<Self> {
        let url = Url::parse_with_params(base, params)?;
        Ok(Self {
            method: HttpMethod::Get,
            url,
            headers: Vec::new(),
            body: RequestBody::Empty,
            timeout: None,
            format: ResponseFormat::Json,
        })
    }

    /// 构造带文件的 multipart POST 请求
    pub fn post_multipart(
        base: &str,
        fields: Vec<(String, String)>,
        file: FilePart,
    ) -> GeocoderResult<Self> {
        Ok(Self {
            method: HttpMethod::Post,
            url: Url::parse(base)?,
            headers: Vec::new(),
            body: RequestBody::Multipart { fields, file },
            timeout: None,
            format: ResponseFormat::Json,
        })
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn expect(mut self, format: ResponseFormat) -> Self {
        self.format = format;
        self
    }
}

/// 表格形式的 CSV 响应
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CsvTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl CsvTable {
    /// 列名 → 列索引
    pub fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// 取某行某列，空字符串视为缺失
    pub fn cell<'a>(&'a self, row: &'a [String], name: &str) -> Option<&'a str> {
        self.column(name)
            .and_then(|idx| row.get(idx))
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }
}

/// 解码后的响应体
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedBody {
    Json(JsonValue),
    Xml(String),
    Csv(CsvTable),
    Text(String),
}

impl DecodedBody {
    pub fn into_json(self) -> GeocoderResult<JsonValue> {
        match self {
            DecodedBody::Json(value) => Ok(value),
            other => Err(GeocoderError::Parse(format!(
                "期望 JSON 响应，实际为 {}",
                other.kind()
            ))),
        }
    }

    pub fn into_csv(self) -> GeocoderResult<CsvTable> {
        match self {
            DecodedBody::Csv(table) => Ok(table),
            other => Err(GeocoderError::Parse(format!(
                "期望 CSV 响应，实际为 {}",
                other.kind()
            ))),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            DecodedBody::Json(_) => "JSON",
            DecodedBody::Xml(_) => "XML",
            DecodedBody::Csv(_) => "CSV",
            DecodedBody::Text(_) => "文本",
        }
    }
}

/// 按期望格式解码响应体
pub fn decode_body(format: ResponseFormat, bytes: &[u8]) -> GeocoderResult<DecodedBody> {
    match format {
        ResponseFormat::Json => Ok(DecodedBody::Json(serde_json::from_slice(bytes)?)),
        ResponseFormat::Csv => {
            let mut reader = csv::ReaderBuilder::new()
                .has_headers(true)
                .from_reader(bytes);
            let headers = reader.headers()?.iter().map(str::to_string).collect();
            let mut rows = Vec::new();
            for record in reader.records() {
                rows.push(record?.iter().map(str::to_string).collect());
            }
            Ok(DecodedBody::Csv(CsvTable { headers, rows }))
        }
        ResponseFormat::Xml => Ok(DecodedBody::Xml(utf8(bytes)?)),
        ResponseFormat::Text => Ok(DecodedBody::Text(utf8(bytes)?)),
    }
}

fn utf8(bytes: &[u8]) -> GeocoderResult<String> {
    String::from_utf8(bytes.to_vec()).map_err(|e| GeocoderError::Parse(e.to_string()))
}

/// 非成功状态码 → 分类错误
pub fn classify_failure(status: u16, body: &[u8], retry_after: Option<u64>) -> GeocoderError {
    let message = truncate_text(&String::from_utf8_lossy(body), 200);
    GeocoderError::from_status(status, message, retry_after)
}

/// 解析 `Retry-After` 头（仅支持秒数形式）
pub fn parse_retry_after(value: Option<&str>) -> Option<u64> {
    value.and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_encodes_params() {
        let request = HttpRequest::get(
            "https://api-adresse.data.gouv.fr/search",
            &[("q".to_string(), "8 bd du port".to_string())],
        )
        .unwrap();
        assert_eq!(request.url.query(), Some("q=8+bd+du+port"));
        assert_eq!(request.method, HttpMethod::Get);
    }

    #[test]
    fn test_decode_csv() {
        let body = b"query,result_status\n\"a, b\",ok\nc,not-found\n";
        let table = decode_body(ResponseFormat::Csv, body)
            .unwrap()
            .into_csv()
            .unwrap();
        assert_eq!(table.headers, vec!["query", "result_status"]);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.cell(&table.rows[0], "query"), Some("a, b"));
        assert_eq!(table.cell(&table.rows[1], "result_status"), Some("not-found"));
    }

    #[test]
    fn test_decode_invalid_json_is_parse_error() {
        let err = decode_body(ResponseFormat::Json, b"<html>").unwrap_err();
        assert!(matches!(err, GeocoderError::Parse(_)));
    }

    #[test]
    fn test_wrong_body_kind() {
        let body = DecodedBody::Text("hello".to_string());
        assert!(matches!(body.into_json(), Err(GeocoderError::Parse(_))));
    }
}
