//! 服务适配层（Providers）
//!
//! 每个远程地理编码服务实现一个 `Provider`：只负责"构造请求"和"解析响应"，
//! 都是纯函数，不做 I/O，不碰共享状态。核心只依赖这里的接口。

pub mod ban_france;
pub mod geoapify;
pub mod ign_france;
pub mod nominatim;

pub use ban_france::BanFrance;
pub use geoapify::Geoapify;
pub use ign_france::IgnFrance;
pub use nominatim::Nominatim;

use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::error::{GeocoderError, GeocoderResult};
use crate::infrastructure::{DecodedBody, FilePart, HttpRequest};
use crate::models::{Location, Query};

/// 服务能力接口
pub trait Provider: Send + Sync {
    /// 服务名（用于日志和缓存键）
    fn name(&self) -> &str;

    /// 服务方公布的最小请求间隔
    fn min_interval(&self) -> Duration;

    /// 构造请求描述
    fn build_request(&self, query: &Query) -> GeocoderResult<HttpRequest>;

    /// 把响应体解析成零个、一个或多个定位结果
    fn decode(&self, query: &Query, body: DecodedBody) -> GeocoderResult<Vec<Location>>;

    /// 携带凭证的参数名，不进入缓存键
    fn secret_params(&self) -> &[&'static str] {
        &[]
    }

    /// 原生批量协议（没有则返回 None）
    fn bulk(&self) -> Option<&dyn BulkProtocol> {
        None
    }

    fn supports_native_batch(&self) -> bool {
        self.bulk().is_some()
    }
}

/// 原生批量协议：分块上传 + 按行解析
///
/// 行与查询之间只靠行号对应，没有显式 ID。
pub trait BulkProtocol: Send + Sync {
    /// 服务方声明的单次上传大小上限（字节）
    fn max_chunk_bytes(&self) -> usize;

    /// 每个分块开头的表头
    fn header(&self) -> GeocoderResult<Vec<u8>>;

    /// 序列化一个查询为一行
    fn serialize_row(&self, query: &Query) -> GeocoderResult<Vec<u8>>;

    /// 构造上传请求
    fn build_upload(&self, file: FilePart) -> GeocoderResult<HttpRequest>;

    /// 解析响应，每行一个结果；状态不是成功的行返回 None
    fn decode_rows(&self, body: DecodedBody) -> GeocoderResult<Vec<Option<Location>>>;
}

/// 按服务名创建 Provider
///
/// # 参数
/// - `name`: 服务名，大小写不敏感
/// - `config`: 提供 api_key / base_url 等
pub fn for_service(name: &str, config: &Config) -> GeocoderResult<Arc<dyn Provider>> {
    let base_url = config.base_url.clone();
    let provider: Arc<dyn Provider> = match name.to_ascii_lowercase().as_str() {
        "ban" | "banfrance" => Arc::new(match base_url {
            Some(url) => BanFrance::with_base_url(url),
            None => BanFrance::new(),
        }),
        "ign" | "ignfrance" => Arc::new(match base_url {
            Some(url) => IgnFrance::with_base_url(url),
            None => IgnFrance::new(),
        }),
        "geoapify" => {
            let api_key = config.api_key.clone().ok_or_else(|| {
                GeocoderError::Configuration("Geoapify 需要 api_key".to_string())
            })?;
            let provider = Geoapify::new(api_key);
            Arc::new(match base_url {
                Some(url) => provider.with_base_url(url),
                None => provider,
            })
        }
        "nominatim" | "osm" => Arc::new(match base_url {
            Some(url) => Nominatim::with_base_url(url),
            None => Nominatim::new(),
        }),
        other => {
            return Err(GeocoderError::Configuration(format!(
                "未知的地理编码服务: {}",
                other
            )))
        }
    };
    Ok(provider)
}

// ========== 解析辅助函数 ==========

/// 取 JSON 数值，兼容字符串形式（Nominatim 返回 "48.85"）
pub(crate) fn json_f64(value: &JsonValue) -> Option<f64> {
    match value {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// 取 GeoJSON Point 的 (纬度, 经度)
pub(crate) fn geojson_point(feature: &JsonValue) -> GeocoderResult<(f64, f64)> {
    let coordinates = feature
        .pointer("/geometry/coordinates")
        .and_then(JsonValue::as_array)
        .ok_or_else(|| GeocoderError::Parse("Feature 缺少 geometry.coordinates".to_string()))?;

    match (
        coordinates.first().and_then(json_f64),
        coordinates.get(1).and_then(json_f64),
    ) {
        (Some(lon), Some(lat)) => Ok((lat, lon)),
        _ => Err(GeocoderError::Parse(format!(
            "无效的坐标: {:?}",
            coordinates
        ))),
    }
}

/// 统一处理 `limit` 参数
pub(crate) fn push_limit(params: &mut Vec<(String, String)>, limit: Option<usize>) {
    if let Some(limit) = limit {
        params.push(("limit".to_string(), limit.to_string()));
    }
}

/// 去掉末尾的斜杠
pub(crate) fn trim_base(url: impl Into<String>) -> String {
    url.into().trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_service_known_and_unknown() {
        let config = Config::default();
        assert_eq!(for_service("BANFrance", &config).unwrap().name(), "BANFrance");
        assert!(for_service("ign", &config).unwrap().supports_native_batch());
        assert!(matches!(
            for_service("geoapify", &config),
            Err(GeocoderError::Configuration(_))
        ));
        assert!(matches!(
            for_service("nope", &config),
            Err(GeocoderError::Configuration(_))
        ));
    }

    #[test]
    fn test_geojson_point_order() {
        let feature = serde_json::json!({"geometry": {"coordinates": [2.316138, 48.86931]}});
        assert_eq!(geojson_point(&feature).unwrap(), (48.86931, 2.316138));
    }
}
