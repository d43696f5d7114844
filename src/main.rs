use anyhow::Result;
use geocode_hub::utils::logging;
use geocode_hub::{App, Config};

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志
    logging::init();

    // 加载配置：传入路径则读 TOML，否则读环境变量
    let config = match std::env::args().nth(1) {
        Some(path) => Config::from_toml_file(&path)?,
        None => Config::from_env(),
    };

    // 初始化并运行应用
    App::initialize(config)?.run().await?;

    Ok(())
}
