//! 示例程序 - 应用入口
//!
//! 从 `input_file` 读取地址（每行一个，`#` 开头为注释），
//! 用配置的服务和调度模型批量地理编码，逐行打印结果。

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::clients::{BlockingGeocoder, Geocoder};
use crate::config::{Config, Scheduling};
use crate::models::BatchOutcome;
use crate::orchestrator::BatchStats;
use crate::utils::logging::{log_startup, print_final_stats};

/// 应用主结构
pub struct App {
    config: Config,
}

impl App {
    /// 初始化应用（配置错误在这里直接返回）
    pub fn initialize(config: Config) -> Result<Self> {
        config.validate().context("配置无效")?;

        let scheduling = match config.scheduling {
            Scheduling::Blocking => "blocking",
            Scheduling::Cooperative => "cooperative",
        };
        log_startup(&config.provider, scheduling, config.max_concurrent);

        Ok(Self { config })
    }

    /// 运行应用主逻辑
    pub async fn run(&self) -> Result<()> {
        let addresses = load_addresses(&self.config.input_file).await?;
        if addresses.is_empty() {
            warn!("⚠️ {} 中没有地址，程序结束", self.config.input_file);
            return Ok(());
        }
        info!("✓ 读取到 {} 条地址", addresses.len());

        let outcomes = self.geocode_all(addresses.clone()).await?;

        for (address, outcome) in addresses.iter().zip(&outcomes) {
            match outcome {
                Ok(Some(location)) => println!("{}", location),
                Ok(None) => println!("[-]\t {} (无匹配)", address),
                Err(e) => println!("[!]\t {} ({})", address, e),
            }
        }

        let stats = BatchStats::from_outcomes(&outcomes);
        print_final_stats(stats.matched, stats.failed, stats.total());
        Ok(())
    }

    async fn geocode_all(&self, addresses: Vec<String>) -> Result<Vec<BatchOutcome>> {
        let config = self.config.clone();
        match config.scheduling {
            Scheduling::Cooperative => {
                let geocoder = Geocoder::from_config(config).context("创建客户端失败")?;
                Ok(geocoder.geocode_batch(addresses).await?)
            }
            // 阻塞式客户端不能在运行时线程上使用
            Scheduling::Blocking => {
                let outcomes = tokio::task::spawn_blocking(move || {
                    BlockingGeocoder::from_config(config)?.geocode_batch(addresses)
                })
                .await
                .context("阻塞任务执行失败")??;
                Ok(outcomes)
            }
        }
    }
}

/// 读取地址文件
async fn load_addresses(path: &str) -> Result<Vec<String>> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("无法读取地址文件: {}", path))?;

    Ok(parse_addresses(&content))
}

fn parse_addresses(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}
