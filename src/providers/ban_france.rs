//! Base Adresse Nationale (France)
//!
//! 文档: https://adresse.data.gouv.fr/api

use serde_json::Value as JsonValue;
use std::time::Duration;

use super::{geojson_point, push_limit, trim_base, Provider};
use crate::error::GeocoderResult;
use crate::infrastructure::{DecodedBody, HttpRequest};
use crate::models::{Location, Query, QueryTarget};

const DEFAULT_BASE_URL: &str = "https://api-adresse.data.gouv.fr";

pub struct BanFrance {
    base_url: String,
}

impl BanFrance {
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: trim_base(base_url),
        }
    }

    fn parse_feature(feature: &JsonValue) -> GeocoderResult<Location> {
        let (latitude, longitude) = geojson_point(feature)?;
        let label = feature
            .pointer("/properties/label")
            .and_then(JsonValue::as_str)
            .unwrap_or_default();
        Location::new(label, latitude, longitude, feature.clone())
    }
}

impl Default for BanFrance {
    fn default() -> Self {
        Self::new()
    }
}

impl Provider for BanFrance {
    fn name(&self) -> &str {
        "BANFrance"
    }

    fn min_interval(&self) -> Duration {
        // 50 次/秒
        Duration::from_millis(20)
    }

    fn build_request(&self, query: &Query) -> GeocoderResult<HttpRequest> {
        match &query.target {
            QueryTarget::Address(text) => {
                let mut params = vec![("q".to_string(), text.clone())];
                push_limit(&mut params, query.options.limit);
                HttpRequest::get(&format!("{}/search", self.base_url), &params)
            }
            QueryTarget::Reverse(point) => {
                let params = vec![
                    ("lat".to_string(), point.latitude.to_string()),
                    ("lon".to_string(), point.longitude.to_string()),
                ];
                HttpRequest::get(&format!("{}/reverse", self.base_url), &params)
            }
        }
    }

    fn decode(&self, _query: &Query, body: DecodedBody) -> GeocoderResult<Vec<Location>> {
        let json = body.into_json()?;
        match json.get("features").and_then(JsonValue::as_array) {
            Some(features) => features.iter().map(Self::parse_feature).collect(),
            None => Ok(Vec::new()),
        }
    }
}
