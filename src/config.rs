use crate::error::{GeocoderError, GeocoderResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// 调度模型，在客户端构造时选定
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheduling {
    /// 每次调用占用一个线程
    Blocking,
    /// 单线程事件循环上的可挂起任务
    Cooperative,
}

impl FromStr for Scheduling {
    type Err = GeocoderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "blocking" | "sync" => Ok(Scheduling::Blocking),
            "cooperative" | "async" => Ok(Scheduling::Cooperative),
            other => Err(GeocoderError::Configuration(format!(
                "未知的调度模型: {}",
                other
            ))),
        }
    }
}

/// 程序配置
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// 地理编码服务名
    pub provider: String,
    pub api_key: Option<String>,
    /// 覆盖服务默认地址（测试或自建服务）
    pub base_url: Option<String>,
    pub user_agent: String,
    /// 默认请求超时（秒）
    pub timeout_secs: u64,
    /// 最小请求间隔（毫秒），不设置则使用服务方公布的值
    pub min_interval_ms: Option<u64>,
    // --- 缓存 ---
    pub cache_enabled: bool,
    /// 设置后使用 JSON 文件缓存，否则使用内存缓存
    pub cache_path: Option<String>,
    /// 缓存过期时间（秒），0 表示永不过期
    pub cache_ttl_secs: u64,
    // --- 批量 ---
    pub scheduling: Scheduling,
    /// 批量并发上限
    pub max_concurrent: usize,
    /// 原生批量上传的单块大小上限（字节）
    pub max_chunk_bytes: usize,
    /// 服务支持时是否使用原生批量接口
    pub native_bulk: bool,
    /// 单次批量上传的超时（秒）
    pub bulk_timeout_secs: u64,
    /// 整批扇出的截止时间（秒），不设置则不限
    pub batch_timeout_secs: Option<u64>,
    /// 示例程序读取的地址文件（每行一个）
    pub input_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider: "banfrance".to_string(),
            api_key: None,
            base_url: None,
            user_agent: concat!("geocode_hub/", env!("CARGO_PKG_VERSION")).to_string(),
            timeout_secs: 10,
            min_interval_ms: None,
            cache_enabled: false,
            cache_path: None,
            cache_ttl_secs: 30 * 24 * 60 * 60,
            scheduling: Scheduling::Cooperative,
            max_concurrent: 5,
            max_chunk_bytes: 1024 * 1024,
            native_bulk: true,
            bulk_timeout_secs: 60,
            batch_timeout_secs: None,
            input_file: "addresses.txt".to_string(),
        }
    }
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

impl Config {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            provider: std::env::var("GEOCODER_PROVIDER").unwrap_or(default.provider),
            api_key: std::env::var("GEOCODER_API_KEY").ok().or(default.api_key),
            base_url: std::env::var("GEOCODER_BASE_URL").ok().or(default.base_url),
            user_agent: std::env::var("GEOCODER_USER_AGENT").unwrap_or(default.user_agent),
            timeout_secs: env_parse("GEOCODER_TIMEOUT_SECS").unwrap_or(default.timeout_secs),
            min_interval_ms: env_parse("GEOCODER_MIN_INTERVAL_MS").or(default.min_interval_ms),
            cache_enabled: env_parse("GEOCODER_CACHE").unwrap_or(default.cache_enabled),
            cache_path: std::env::var("GEOCODER_CACHE_PATH").ok().or(default.cache_path),
            cache_ttl_secs: env_parse("GEOCODER_CACHE_TTL_SECS").unwrap_or(default.cache_ttl_secs),
            scheduling: env_parse("GEOCODER_SCHEDULING").unwrap_or(default.scheduling),
            max_concurrent: env_parse("GEOCODER_MAX_CONCURRENT").unwrap_or(default.max_concurrent),
            max_chunk_bytes: env_parse("GEOCODER_MAX_CHUNK_BYTES").unwrap_or(default.max_chunk_bytes),
            native_bulk: env_parse("GEOCODER_NATIVE_BULK").unwrap_or(default.native_bulk),
            bulk_timeout_secs: env_parse("GEOCODER_BULK_TIMEOUT_SECS").unwrap_or(default.bulk_timeout_secs),
            batch_timeout_secs: env_parse("GEOCODER_BATCH_TIMEOUT_SECS").or(default.batch_timeout_secs),
            input_file: std::env::var("GEOCODER_INPUT_FILE").unwrap_or(default.input_file),
        }
    }

    /// 从 TOML 文件加载，缺省字段使用默认值
    pub fn from_toml_file(path: impl AsRef<Path>) -> GeocoderResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            GeocoderError::Configuration(format!("无法读取配置文件 {}: {}", path.display(), e))
        })?;
        toml::from_str(&content).map_err(|e| {
            GeocoderError::Configuration(format!("无法解析配置文件 {}: {}", path.display(), e))
        })
    }

    /// 在任何请求发出之前检查配置
    pub fn validate(&self) -> GeocoderResult<()> {
        if self.max_concurrent == 0 {
            return Err(GeocoderError::Configuration(
                "max_concurrent 必须大于 0".to_string(),
            ));
        }
        if self.max_chunk_bytes == 0 {
            return Err(GeocoderError::Configuration(
                "max_chunk_bytes 必须大于 0".to_string(),
            ));
        }
        if self.timeout_secs == 0 || self.bulk_timeout_secs == 0 {
            return Err(GeocoderError::Configuration("超时必须大于 0".to_string()));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn bulk_timeout(&self) -> Duration {
        Duration::from_secs(self.bulk_timeout_secs)
    }

    pub fn batch_timeout(&self) -> Option<Duration> {
        self.batch_timeout_secs.map(Duration::from_secs)
    }

    pub fn min_interval(&self) -> Option<Duration> {
        self.min_interval_ms.map(Duration::from_millis)
    }

    /// 缓存过期时间，None 表示永不过期
    pub fn cache_ttl(&self) -> Option<Duration> {
        (self.cache_ttl_secs > 0).then(|| Duration::from_secs(self.cache_ttl_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert!(!config.cache_enabled);
        assert_eq!(config.cache_ttl(), Some(Duration::from_secs(2_592_000)));
        assert_eq!(config.max_concurrent, 5);
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let config = Config {
            max_concurrent: 0,
            ..Config::default()
        };
        assert!(matches!(
            config.validate(),
            Err(GeocoderError::Configuration(_))
        ));
    }

    #[test]
    fn test_from_toml_file_partial() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("geocoder.toml");
        std::fs::write(
            &path,
            "provider = \"ignfrance\"\nscheduling = \"blocking\"\ncache_ttl_secs = 0\n",
        )
        .unwrap();

        let config = Config::from_toml_file(&path).unwrap();
        assert_eq!(config.provider, "ignfrance");
        assert_eq!(config.scheduling, Scheduling::Blocking);
        assert_eq!(config.cache_ttl(), None);
        assert_eq!(config.timeout_secs, 10);
    }

    #[test]
    fn test_scheduling_from_str() {
        assert_eq!("ASYNC".parse::<Scheduling>().unwrap(), Scheduling::Cooperative);
        assert!("threads".parse::<Scheduling>().is_err());
    }
}
