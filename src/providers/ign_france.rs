//! IGN France 地理编码服务（Géoplateforme）
//!
//! 文档: https://geoservices.ign.fr/services-web-essentiels
//!
//! 除了单条查询，还提供 `/search/csv` 原生批量接口：
//! 上传一个只有 `query` 列的 CSV，返回逐行对应的 CSV 结果。

use serde_json::{Map, Value as JsonValue};
use std::time::Duration;

use super::{geojson_point, push_limit, trim_base, BulkProtocol, Provider};
use crate::error::{GeocoderError, GeocoderResult};
use crate::infrastructure::{CsvTable, DecodedBody, FilePart, HttpRequest, ResponseFormat};
use crate::models::{Location, Query, QueryTarget};

const DEFAULT_BASE_URL: &str = "https://data.geopf.fr/geocodage";
const VALID_INDEXES: [&str; 3] = ["address", "parcel", "poi"];
const VALID_TYPES: [&str; 4] = ["housenumber", "street", "locality", "municipality"];

/// 官方上限是 50 MB，这里保守地只用 1 MB
const MAX_UPLOAD_BYTES: usize = 1024 * 1024;

pub struct IgnFrance {
    base_url: String,
    bulk_indexes: String,
}

impl IgnFrance {
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: trim_base(base_url),
            bulk_indexes: "address,poi".to_string(),
        }
    }

    /// 批量接口使用的索引（逗号分隔）
    pub fn with_bulk_indexes(mut self, indexes: &str) -> GeocoderResult<Self> {
        self.bulk_indexes = parse_index(indexes)?.join(",");
        Ok(self)
    }

    fn parse_feature(feature: &JsonValue) -> GeocoderResult<Location> {
        let kind = feature.get("type").and_then(JsonValue::as_str);
        if kind != Some("Feature") {
            return Err(GeocoderError::Parse(format!(
                "期望 Feature，实际为 {:?}",
                kind
            )));
        }

        let (latitude, longitude) = geojson_point(feature)?;
        let properties = feature.get("properties").cloned().unwrap_or_default();

        let label = match properties.get("label").and_then(JsonValue::as_str) {
            Some(label) => label.to_string(),
            // POI 不一定有 label，拼成 "<toponym> <postcode> <city>"
            None => fallback_label(
                properties.get("toponym").and_then(JsonValue::as_str),
                first_str(properties.get("postcode")),
                first_str(properties.get("city")),
            ),
        };

        Location::new(label, latitude, longitude, feature.clone())
    }

    fn parse_row(table: &CsvTable, row: &[String]) -> GeocoderResult<Option<Location>> {
        if table.cell(row, "result_status") != Some("ok") {
            return Ok(None);
        }

        let number = |name: &str| -> GeocoderResult<f64> {
            table
                .cell(row, name)
                .and_then(|v| v.parse().ok())
                .ok_or_else(|| GeocoderError::Parse(format!("CSV 行缺少有效的 {}", name)))
        };
        let latitude = number("latitude")?;
        let longitude = number("longitude")?;

        let label = match table.cell(row, "result_label") {
            Some(label) => label.to_string(),
            None => fallback_label(
                table.cell(row, "result_toponym"),
                table.cell(row, "result_postcode"),
                table.cell(row, "result_city"),
            ),
        };

        let mut raw = Map::new();
        for (idx, header) in table.headers.iter().enumerate() {
            let keep = header.starts_with("result_") || header == "query";
            if !keep || header == "result_status" {
                continue;
            }
            let value = row
                .get(idx)
                .filter(|v| !v.is_empty())
                .map(|v| JsonValue::String(v.clone()))
                .unwrap_or(JsonValue::Null);
            raw.insert(header.trim_start_matches("result_").to_string(), value);
        }

        Location::new(label, latitude, longitude, JsonValue::Object(raw)).map(Some)
    }
}

impl Default for IgnFrance {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_index(index: &str) -> GeocoderResult<Vec<String>> {
    let indexes: Vec<String> = index.split(',').map(|s| s.trim().to_string()).collect();
    let illegal: Vec<&String> = indexes
        .iter()
        .filter(|i| !VALID_INDEXES.contains(&i.as_str()))
        .collect();
    if !illegal.is_empty() {
        return Err(GeocoderError::Query(format!(
            "无效的 index: {:?}，可选值: address, parcel, poi",
            illegal
        )));
    }
    Ok(indexes)
}

fn check_type(kind: &str) -> GeocoderResult<()> {
    if VALID_TYPES.contains(&kind) {
        Ok(())
    } else {
        Err(GeocoderError::Query(format!("无效的 type: {}", kind)))
    }
}

fn first_str(value: Option<&JsonValue>) -> Option<&str> {
    match value? {
        JsonValue::Array(items) => items.first().and_then(JsonValue::as_str),
        other => other.as_str(),
    }
}

fn fallback_label(toponym: Option<&str>, postcode: Option<&str>, city: Option<&str>) -> String {
    [toponym, postcode, city]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(" ")
}

impl Provider for IgnFrance {
    fn name(&self) -> &str {
        "IGNFrance"
    }

    fn min_interval(&self) -> Duration {
        // 文档写的是 50 次/秒，留一点余量按 49 次算
        Duration::from_secs(1) / 49
    }

    fn build_request(&self, query: &Query) -> GeocoderResult<HttpRequest> {
        let mut params = Vec::new();
        let path = match &query.target {
            QueryTarget::Address(text) => {
                params.push(("q".to_string(), text.clone()));
                "search"
            }
            QueryTarget::Reverse(point) => {
                params.push(("lat".to_string(), point.latitude.to_string()));
                params.push(("lon".to_string(), point.longitude.to_string()));
                "reverse"
            }
        };

        let index = query
            .options
            .filters
            .get("index")
            .map(String::as_str)
            .unwrap_or("address");
        params.push(("index".to_string(), parse_index(index)?.join(",")));

        if let Some(kind) = query.options.filters.get("type") {
            check_type(kind)?;
            params.push(("type".to_string(), kind.clone()));
        }

        push_limit(&mut params, query.options.limit);

        HttpRequest::get(&format!("{}/{}", self.base_url, path), &params)
    }

    fn decode(&self, _query: &Query, body: DecodedBody) -> GeocoderResult<Vec<Location>> {
        let json = body.into_json()?;
        match json.get("features").and_then(JsonValue::as_array) {
            Some(features) => features.iter().map(Self::parse_feature).collect(),
            None => Ok(Vec::new()),
        }
    }

    fn bulk(&self) -> Option<&dyn BulkProtocol> {
        Some(self)
    }
}

impl BulkProtocol for IgnFrance {
    fn max_chunk_bytes(&self) -> usize {
        MAX_UPLOAD_BYTES
    }

    fn header(&self) -> GeocoderResult<Vec<u8>> {
        write_csv_record(&["query"])
    }

    fn serialize_row(&self, query: &Query) -> GeocoderResult<Vec<u8>> {
        match &query.target {
            QueryTarget::Address(text) => write_csv_record(&[text.as_str()]),
            QueryTarget::Reverse(_) => Err(GeocoderError::Query(
                "IGN 批量接口只支持地址查询".to_string(),
            )),
        }
    }

    fn build_upload(&self, file: FilePart) -> GeocoderResult<HttpRequest> {
        let fields = vec![
            ("columns".to_string(), "query".to_string()),
            ("indexes".to_string(), self.bulk_indexes.clone()),
        ];
        Ok(HttpRequest::post_multipart(
            &format!("{}/search/csv", self.base_url),
            fields,
            file,
        )?
        .expect(ResponseFormat::Csv))
    }

    fn decode_rows(&self, body: DecodedBody) -> GeocoderResult<Vec<Option<Location>>> {
        let table = body.into_csv()?;
        table
            .rows
            .iter()
            .map(|row| Self::parse_row(&table, row))
            .collect()
    }
}

fn write_csv_record(fields: &[&str]) -> GeocoderResult<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    writer.write_record(fields)?;
    writer
        .into_inner()
        .map_err(|e| GeocoderError::Io(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Point;

    #[test]
    fn test_build_request_validates_filters() {
        let ign = IgnFrance::new();
        let request = ign
            .build_request(&Query::address("Camp des Landes").with_filter("index", "address,poi"))
            .unwrap();
        assert!(request.url.as_str().contains("index=address%2Cpoi"));

        assert!(matches!(
            ign.build_request(&Query::address("x").with_filter("index", "cadastre")),
            Err(GeocoderError::Query(_))
        ));
        assert!(matches!(
            ign.build_request(&Query::address("x").with_filter("type", "country")),
            Err(GeocoderError::Query(_))
        ));
    }

    #[test]
    fn test_poi_label_fallback() {
        let body = DecodedBody::Json(serde_json::json!({
            "features": [{
                "type": "Feature",
                "geometry": {"coordinates": [2.31688, 48.869397]},
                "properties": {"toponym": "Palais de l'Élysée", "postcode": ["75008"], "city": ["Paris"]}
            }]
        }));
        let locations = IgnFrance::new()
            .decode(&Query::reverse(Point::new(48.8, 2.3).unwrap()), body)
            .unwrap();
        assert_eq!(locations[0].address, "Palais de l'Élysée 75008 Paris");
    }

    #[test]
    fn test_non_feature_is_parse_error() {
        let body = DecodedBody::Json(serde_json::json!({
            "features": [{"type": "Other", "geometry": {"coordinates": [0, 0]}}]
        }));
        assert!(matches!(
            IgnFrance::new().decode(&Query::address("x"), body),
            Err(GeocoderError::Parse(_))
        ));
    }

    #[test]
    fn test_serialize_row_quotes_commas() {
        let ign = IgnFrance::new();
        assert_eq!(ign.header().unwrap(), b"query\n");
        assert_eq!(
            ign.serialize_row(&Query::address("13 Rue de la Paix, 75002 Paris"))
                .unwrap(),
            b"\"13 Rue de la Paix, 75002 Paris\"\n"
        );
        assert!(ign
            .serialize_row(&Query::reverse(Point::new(1.0, 1.0).unwrap()))
            .is_err());
    }

    #[test]
    fn test_decode_rows_status() {
        let table = CsvTable {
            headers: vec![
                "query".into(),
                "latitude".into(),
                "longitude".into(),
                "result_label".into(),
                "result_status".into(),
            ],
            rows: vec![
                vec![
                    "13 Rue de la Paix".into(),
                    "48.86931".into(),
                    "2.316138".into(),
                    "13 Rue de la Paix 75002 Paris".into(),
                    "ok".into(),
                ],
                vec!["???".into(), "".into(), "".into(), "".into(), "not-found".into()],
            ],
        };
        let rows = IgnFrance::new()
            .decode_rows(DecodedBody::Csv(table))
            .unwrap();
        assert_eq!(rows.len(), 2);
        let first = rows[0].as_ref().unwrap();
        assert_eq!(first.address, "13 Rue de la Paix 75002 Paris");
        assert_eq!(first.raw["label"], "13 Rue de la Paix 75002 Paris");
        assert!(rows[1].is_none());
    }
}
