use anyhow::Result;
use attachment_submit::utils::logging;
use attachment_submit::{App, Config, SubmitRequest};
use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    let request = SubmitRequest::parse();

    // 加载配置
    let config = Config::load()?;

    // 初始化日志
    logging::init(config.verbose_logging);

    // 初始化并运行应用
    let app = App::initialize(config).await?;
    app.run(request).await?;

    Ok(())
}
