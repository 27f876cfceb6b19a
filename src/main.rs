use anyhow::Result;
use qa_generator::utils::logging;
use qa_generator::{App, Config};

#[tokio::main]
async fn main() -> Result<()> {
    // 先初始化日志，配置加载时的警告才能输出
    logging::init(logging::verbose_from_env());

    // 加载配置
    let config = Config::load()?;

    // 初始化并运行应用
    App::initialize(config).await?.run().await?;

    Ok(())
}
