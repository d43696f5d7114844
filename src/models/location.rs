use crate::error::{GeocoderError, GeocoderResult};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt::{self, Display};

/// 定位结果
///
/// 由各服务的解析器产生，坐标保证有效：解析器拿到越界或非数字的坐标时返回解析错误，
/// 不会构造出半成品。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// 展示用地址
    pub address: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
    /// 服务端原始数据
    #[serde(default)]
    pub raw: JsonValue,
}

impl Location {
    /// 创建定位结果并校验坐标
    pub fn new(
        address: impl Into<String>,
        latitude: f64,
        longitude: f64,
        raw: JsonValue,
    ) -> GeocoderResult<Self> {
        if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
            return Err(GeocoderError::Parse(format!("无效纬度: {}", latitude)));
        }
        if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
            return Err(GeocoderError::Parse(format!("无效经度: {}", longitude)));
        }
        Ok(Self {
            address: address.into(),
            latitude,
            longitude,
            altitude: None,
            raw,
        })
    }

    pub fn with_altitude(mut self, altitude: f64) -> Self {
        self.altitude = Some(altitude);
        self
    }
}

impl Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} {}]\t {}", self.latitude, self.longitude, self.address)
    }
}

/// 批量结果中的一个位置：成功（可能没有匹配）或错误标记
pub type BatchOutcome = GeocoderResult<Option<Location>>;
