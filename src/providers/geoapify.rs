//! Geoapify
//!
//! 文档: https://apidocs.geoapify.com/docs/geocoding/

use serde_json::Value as JsonValue;
use std::time::Duration;

use super::{json_f64, push_limit, trim_base, Provider};
use crate::error::{GeocoderError, GeocoderResult};
use crate::infrastructure::{DecodedBody, HttpRequest};
use crate::models::{Location, Query, QueryTarget};

const DEFAULT_BASE_URL: &str = "https://api.geoapify.com";
const DEFAULT_LIMIT: usize = 5;

pub struct Geoapify {
    api_key: String,
    base_url: String,
}

impl Geoapify {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = trim_base(base_url);
        self
    }

    fn parse_result(result: &JsonValue) -> GeocoderResult<Location> {
        let latitude = result.get("lat").and_then(json_f64);
        let longitude = result.get("lon").and_then(json_f64);
        let (latitude, longitude) = latitude
            .zip(longitude)
            .ok_or_else(|| GeocoderError::Parse("结果缺少 lat/lon".to_string()))?;
        let formatted = result
            .get("formatted")
            .and_then(JsonValue::as_str)
            .unwrap_or_default();
        Location::new(formatted, latitude, longitude, result.clone())
    }
}

impl Provider for Geoapify {
    fn name(&self) -> &str {
        "Geoapify"
    }

    fn min_interval(&self) -> Duration {
        Duration::from_secs(1) / 45
    }

    fn secret_params(&self) -> &[&'static str] {
        &["apiKey"]
    }

    fn build_request(&self, query: &Query) -> GeocoderResult<HttpRequest> {
        let mut params = vec![("apiKey".to_string(), self.api_key.clone())];
        let path = match &query.target {
            QueryTarget::Address(text) => {
                params.push(("text".to_string(), text.clone()));
                "v1/geocode/search"
            }
            QueryTarget::Reverse(point) => {
                params.push(("lat".to_string(), point.latitude.to_string()));
                params.push(("lon".to_string(), point.longitude.to_string()));
                "v1/geocode/reverse"
            }
        };
        params.push(("format".to_string(), "json".to_string()));
        push_limit(&mut params, Some(query.options.limit.unwrap_or(DEFAULT_LIMIT)));
        if let Some(language) = &query.options.language {
            params.push(("lang".to_string(), language.clone()));
        }

        HttpRequest::get(&format!("{}/{}", self.base_url, path), &params)
    }

    fn decode(&self, _query: &Query, body: DecodedBody) -> GeocoderResult<Vec<Location>> {
        let json = body.into_json()?;
        match json.get("results").and_then(JsonValue::as_array) {
            Some(results) => results.iter().map(Self::parse_result).collect(),
            None => Ok(Vec::new()),
        }
    }
}
