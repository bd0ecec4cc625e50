// ShellRelay - 多会话 SSH 终端中继服务
// 应用入口

use anyhow::Result;
use tracing::warn;

mod gateway;
mod services;
mod settings;
mod ssh;

use gateway::RelayServer;
use settings::RelaySettings;

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志系统
    // 可以通过 RUST_LOG 环境变量控制日志级别，例如：RUST_LOG=debug cargo run
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_target(false) // 不显示 target（模块路径）
        .init();

    // 配置文件损坏不拦启动，回落到默认值
    let settings = settings::load_settings().unwrap_or_else(|e| {
        warn!("[Settings] Failed to load settings, using defaults: {:#}", e);
        RelaySettings::default()
    });

    RelayServer::new(settings).start().await
}
