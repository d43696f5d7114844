//! Nominatim (OpenStreetMap)
//!
//! 使用政策要求每秒最多一次请求，并且必须带有可识别的 User-Agent。

use serde_json::Value as JsonValue;
use std::time::Duration;

use super::{json_f64, push_limit, trim_base, Provider};
use crate::error::{GeocoderError, GeocoderResult};
use crate::infrastructure::{DecodedBody, HttpRequest};
use crate::models::{Location, Query, QueryTarget};

const DEFAULT_BASE_URL: &str = "https://nominatim.openstreetmap.org";

pub struct Nominatim {
    base_url: String,
}

impl Nominatim {
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: trim_base(base_url),
        }
    }

    fn parse_place(place: &JsonValue) -> GeocoderResult<Location> {
        let latitude = place.get("lat").and_then(json_f64);
        let longitude = place.get("lon").and_then(json_f64);
        let (latitude, longitude) = latitude
            .zip(longitude)
            .ok_or_else(|| GeocoderError::Parse("结果缺少 lat/lon".to_string()))?;
        let display_name = place
            .get("display_name")
            .and_then(JsonValue::as_str)
            .unwrap_or_default();
        Location::new(display_name, latitude, longitude, place.clone())
    }
}

impl Default for Nominatim {
    fn default() -> Self {
        Self::new()
    }
}

impl Provider for Nominatim {
    fn name(&self) -> &str {
        "Nominatim"
    }

    fn min_interval(&self) -> Duration {
        Duration::from_secs(1)
    }

    fn build_request(&self, query: &Query) -> GeocoderResult<HttpRequest> {
        let mut params = vec![("format".to_string(), "json".to_string())];
        let path = match &query.target {
            QueryTarget::Address(text) => {
                params.push(("q".to_string(), text.clone()));
                push_limit(&mut params, query.options.limit);
                "search"
            }
            QueryTarget::Reverse(point) => {
                params.push(("lat".to_string(), point.latitude.to_string()));
                params.push(("lon".to_string(), point.longitude.to_string()));
                "reverse"
            }
        };
        if let Some(language) = &query.options.language {
            params.push(("accept-language".to_string(), language.clone()));
        }
        for (key, value) in &query.options.filters {
            params.push((key.clone(), value.clone()));
        }

        HttpRequest::get(&format!("{}/{}", self.base_url, path), &params)
    }

    fn decode(&self, _query: &Query, body: DecodedBody) -> GeocoderResult<Vec<Location>> {
        match body.into_json()? {
            JsonValue::Array(places) => places.iter().map(Self::parse_place).collect(),
            // reverse 返回单个对象；找不到时是 {"error": "Unable to geocode"}
            place @ JsonValue::Object(_) if place.get("error").is_none() => {
                Ok(vec![Self::parse_place(&place)?])
            }
            _ => Ok(Vec::new()),
        }
    }
}
