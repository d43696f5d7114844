//! 查询模型
//!
//! 一个 `Query` 就是一次（正向或反向）地理编码请求，构造后不可变

use crate::error::{GeocoderError, GeocoderResult};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{self, Display};
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;

/// 坐标点（WGS84，十进制度）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub latitude: f64,
    pub longitude: f64,
}

impl Point {
    /// 创建坐标点，校验经纬度范围
    pub fn new(latitude: f64, longitude: f64) -> GeocoderResult<Self> {
        if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
            return Err(GeocoderError::Query(format!("纬度越界: {}", latitude)));
        }
        if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
            return Err(GeocoderError::Query(format!("经度越界: {}", longitude)));
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }
}

fn point_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\s*([-+]?\d+(?:\.\d+)?)\s*[,;\s]\s*([-+]?\d+(?:\.\d+)?)\s*$")
            .expect("坐标正则表达式无效")
    })
}

impl FromStr for Point {
    type Err = GeocoderError;

    /// 解析 `"48.154587, 3.221237"` 形式的坐标字符串
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let caps = point_pattern()
            .captures(s)
            .ok_or_else(|| GeocoderError::Query(format!("必须是坐标对: {:?}", s)))?;

        let parse = |idx: usize| -> GeocoderResult<f64> {
            caps[idx]
                .parse::<f64>()
                .map_err(|e| GeocoderError::Query(format!("无法解析坐标 {:?}: {}", s, e)))
        };

        Point::new(parse(1)?, parse(2)?)
    }
}

impl Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {}", self.latitude, self.longitude)
    }
}

/// 查询目标：地址文本或坐标
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum QueryTarget {
    /// 正向地理编码
    Address(String),
    /// 反向地理编码
    Reverse(Point),
}

/// 查询选项
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryOptions {
    /// 服务端返回结果的最大数量
    pub limit: Option<usize>,
    /// 结果语言（ISO 639-1）
    pub language: Option<String>,
    /// 只保留第一个结果
    pub exactly_one: bool,
    /// 服务特有的过滤参数（例如 IGN 的 `index` / `type`）
    pub filters: BTreeMap<String, String>,
    /// 覆盖客户端默认超时
    #[serde(skip)]
    pub timeout: Option<Duration>,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            limit: None,
            language: None,
            exactly_one: true,
            filters: BTreeMap::new(),
            timeout: None,
        }
    }
}

/// 一次地理编码请求
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub target: QueryTarget,
    pub options: QueryOptions,
}

impl Query {
    /// 地址 → 坐标
    pub fn address(text: impl Into<String>) -> Self {
        Self {
            target: QueryTarget::Address(text.into()),
            options: QueryOptions::default(),
        }
    }

    /// 坐标 → 地址
    pub fn reverse(point: Point) -> Self {
        Self {
            target: QueryTarget::Reverse(point),
            options: QueryOptions::default(),
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.options.limit = Some(limit);
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.options.language = Some(language.into());
        self
    }

    pub fn with_filter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.filters.insert(key.into(), value.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout = Some(timeout);
        self
    }

    /// 返回全部结果而不是只取第一个
    pub fn all_results(mut self) -> Self {
        self.options.exactly_one = false;
        self
    }

    /// 校验查询是否可以发出
    pub fn validate(&self) -> GeocoderResult<()> {
        match &self.target {
            QueryTarget::Address(text) if text.trim().is_empty() => {
                Err(GeocoderError::Query("地址文本为空".to_string()))
            }
            QueryTarget::Address(_) => Ok(()),
            QueryTarget::Reverse(point) => Point::new(point.latitude, point.longitude).map(|_| ()),
        }?;

        if self.options.limit == Some(0) {
            return Err(GeocoderError::Query("limit 必须大于 0".to_string()));
        }
        Ok(())
    }

    /// 地址文本（反向查询时为 None）
    pub fn text(&self) -> Option<&str> {
        match &self.target {
            QueryTarget::Address(text) => Some(text),
            QueryTarget::Reverse(_) => None,
        }
    }
}

impl From<&str> for Query {
    fn from(text: &str) -> Self {
        Query::address(text)
    }
}

impl From<String> for Query {
    fn from(text: String) -> Self {
        Query::address(text)
    }
}

impl From<Point> for Query {
    fn from(point: Point) -> Self {
        Query::reverse(point)
    }
}

impl Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target {
            QueryTarget::Address(text) => write!(f, "{}", text),
            QueryTarget::Reverse(point) => write!(f, "({})", point),
        }
    }
}
