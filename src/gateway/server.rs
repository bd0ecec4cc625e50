// 网关服务器
// 组装注册表、集线器与路由，跑 axum 直到收到退出信号

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::settings::RelaySettings;
use crate::ssh::{SessionEvent, SessionRegistry};

use super::clients::{route_events, ClientHub};
use super::routes::{self, AppState};

/// 中继服务器
pub struct RelayServer {
    settings: RelaySettings,
    registry: Arc<SessionRegistry>,
    hub: Arc<ClientHub>,
    /// 核心事件接收端，start 时交给路由任务
    events: Option<mpsc::UnboundedReceiver<SessionEvent>>,
}

impl RelayServer {
    /// 创建服务器
    pub fn new(settings: RelaySettings) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let registry = Arc::new(SessionRegistry::new(event_tx, settings.shell_term.clone()));
        Self {
            settings,
            registry,
            hub: Arc::new(ClientHub::new()),
            events: Some(event_rx),
        }
    }

    /// 获取会话注册表（供嵌入方使用）
    pub fn registry(&self) -> Arc<SessionRegistry> {
        self.registry.clone()
    }

    /// 启动服务器，阻塞直到退出信号
    pub async fn start(mut self) -> Result<()> {
        let events = self.events.take().context("Server already started")?;
        let router_task = tokio::spawn(route_events(self.hub.clone(), events));

        let state = AppState {
            registry: self.registry.clone(),
            hub: self.hub.clone(),
        };

        // 浏览器端跨域直连
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        let app = routes::create_router(state).layer(cors);

        let listener = tokio::net::TcpListener::bind(&self.settings.bind_addr)
            .await
            .with_context(|| format!("Failed to bind {}", self.settings.bind_addr))?;
        info!("[Gateway] Listening on {}", self.settings.bind_addr);
        info!(
            "[Gateway] WebSocket endpoint: ws://{}/ws",
            self.settings.bind_addr
        );

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("Server error")?;

        // 退出前拆掉所有会话，给远端发 disconnect
        self.registry.shutdown().await;
        router_task.abort();
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("[Gateway] Cannot listen for shutdown signal: {}", err);
        std::future::pending::<()>().await;
    }
    info!("[Gateway] Shutdown signal received, draining sessions");
}
