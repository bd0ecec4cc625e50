// 网关路由
// WebSocket 入口 + 会话/文件 REST 接口

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket},
        State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use futures::{SinkExt, StreamExt};
use tracing::{info, warn};
use uuid::Uuid;

use crate::services::files::{self, FileError};
use crate::ssh::{SessionKey, SessionRegistry, SshError};

use super::clients::ClientHub;
use super::protocol::{ClientMessage, ExecStatus, ServerMessage};

/// 路由间共享的应用状态
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub hub: Arc<ClientHub>,
}

/// 组装全部路由
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // WebSocket 入口
        .route("/ws", get(websocket_handler))
        // 会话查询
        .route("/api/sessions", get(list_sessions))
        // 文件操作（走会话的 SSH 连接执行）
        .route("/api/files/list", post(list_files))
        .route("/api/files/read", post(read_file))
        .route("/api/files/write", post(write_file))
        .route("/api/files/delete", post(delete_file))
        .route("/api/files/create", post(create_file))
        .route("/api/files/backup", post(backup_file))
        .with_state(state)
}

/// GET /ws - WebSocket 升级入口
async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// 单个 WebSocket 客户端的完整生命周期
async fn handle_socket(socket: WebSocket, state: AppState) {
    let client_id = Uuid::new_v4().to_string();
    info!("[Gateway] Client {} connected", client_id);

    let mut outbound = state.hub.register(&client_id).await;
    let (mut ws_sink, mut ws_stream) = socket.split();

    // 出站任务：把通道里的消息序列化后写给 WebSocket
    let send_task = tokio::spawn(async move {
        while let Some(msg) = outbound.recv().await {
            if let Ok(json) = serde_json::to_string(&msg) {
                if ws_sink.send(WsMessage::Text(json)).await.is_err() {
                    break;
                }
            }
        }
    });

    // 告知客户端分配到的 ID，REST 调用要带上它
    state
        .hub
        .send_to(
            &client_id,
            ServerMessage::Ready {
                client_id: client_id.clone(),
            },
        )
        .await;

    // 入站循环
    while let Some(Ok(msg)) = ws_stream.next().await {
        if let WsMessage::Text(text) = msg {
            match serde_json::from_str::<ClientMessage>(&text) {
                Ok(client_msg) => {
                    handle_client_message(&client_id, client_msg, &state).await;
                }
                Err(err) => {
                    warn!("[Gateway] Client {} sent invalid message: {}", client_id, err);
                }
            }
        }
    }

    // 客户端断开：注销通道并拆掉它的全部会话
    info!("[Gateway] Client {} disconnected", client_id);
    state.hub.unregister(&client_id).await;
    state.registry.disconnect_all(&client_id).await;
    send_task.abort();
}

/// 处理一条客户端消息
async fn handle_client_message(client_id: &str, message: ClientMessage, state: &AppState) {
    match message {
        ClientMessage::Connect { session_id, config } => {
            let key = SessionKey::new(client_id, session_id);
            state.registry.connect(key, config).await;
        }
        ClientMessage::ShellInput { session_id, data } => {
            let key = SessionKey::new(client_id, session_id);
            state
                .registry
                .send_shell_input(&key, data.into_bytes())
                .await;
        }
        ClientMessage::Command {
            session_id,
            command,
        } => {
            let key = SessionKey::new(client_id, session_id);
            state.registry.send_command(&key, command).await;
        }
        ClientMessage::Resize {
            session_id,
            cols,
            rows,
        } => {
            let key = SessionKey::new(client_id, session_id);
            state.registry.resize(&key, cols, rows).await;
        }
        ClientMessage::Exec {
            id,
            session_id,
            command,
        } => {
            // 慢命令不能卡住 WebSocket 读循环，应答异步送回
            let key = SessionKey::new(client_id, session_id.clone());
            let registry = state.registry.clone();
            let hub = state.hub.clone();
            let client_id = client_id.to_string();
            tokio::spawn(async move {
                let reply = match registry.exec(&key, command).await {
                    Ok(output) => ServerMessage::ExecResult {
                        id,
                        session_id,
                        status: ExecStatus::Ok,
                        output: Some(output.text()),
                        message: None,
                    },
                    Err(err) => ServerMessage::ExecResult {
                        id,
                        session_id,
                        status: ExecStatus::Error,
                        output: None,
                        message: Some(err.to_string()),
                    },
                };
                hub.send_to(&client_id, reply).await;
            });
        }
        ClientMessage::Disconnect { session_id } => {
            let key = SessionKey::new(client_id, session_id);
            state.registry.disconnect(&key).await;
        }
    }
}

/// GET /api/sessions - 当前会话快照
async fn list_sessions(State(state): State<AppState>) -> Json<serde_json::Value> {
    let sessions: Vec<serde_json::Value> = state
        .registry
        .list_sessions()
        .await
        .into_iter()
        .map(|(key, session_state)| {
            serde_json::json!({
                "client_id": key.client_id,
                "session_id": key.session_id,
                "state": session_state,
            })
        })
        .collect();
    Json(serde_json::json!({ "sessions": sessions }))
}

/// 文件操作的目标定位（客户端 + 会话 + 远端路径）
#[derive(Debug, serde::Deserialize)]
struct FileTarget {
    client_id: String,
    session_id: String,
    path: String,
}

impl FileTarget {
    fn key(&self) -> SessionKey {
        SessionKey::new(&self.client_id, &self.session_id)
    }
}

/// 写文件请求
#[derive(Debug, serde::Deserialize)]
struct FileWriteRequest {
    client_id: String,
    session_id: String,
    path: String,
    content: String,
}

/// POST /api/files/list - 列目录
async fn list_files(
    State(state): State<AppState>,
    Json(req): Json<FileTarget>,
) -> Result<Json<serde_json::Value>, AppError> {
    let entries = files::list_dir(&state.registry, &req.key(), &req.path).await?;
    Ok(Json(serde_json::json!({ "entries": entries })))
}

/// POST /api/files/read - 读文件内容
async fn read_file(
    State(state): State<AppState>,
    Json(req): Json<FileTarget>,
) -> Result<Json<serde_json::Value>, AppError> {
    let content = files::read_file(&state.registry, &req.key(), &req.path).await?;
    Ok(Json(serde_json::json!({ "content": content })))
}

/// POST /api/files/write - 写文件内容
async fn write_file(
    State(state): State<AppState>,
    Json(req): Json<FileWriteRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let key = SessionKey::new(&req.client_id, &req.session_id);
    files::write_file(&state.registry, &key, &req.path, req.content.as_bytes()).await?;
    Ok(Json(serde_json::json!({ "success": true })))
}

/// POST /api/files/delete - 删除文件或目录
async fn delete_file(
    State(state): State<AppState>,
    Json(req): Json<FileTarget>,
) -> Result<Json<serde_json::Value>, AppError> {
    files::delete_path(&state.registry, &req.key(), &req.path).await?;
    Ok(Json(serde_json::json!({ "success": true })))
}

/// POST /api/files/create - 创建空文件
async fn create_file(
    State(state): State<AppState>,
    Json(req): Json<FileTarget>,
) -> Result<Json<serde_json::Value>, AppError> {
    files::create_file(&state.registry, &req.key(), &req.path).await?;
    Ok(Json(serde_json::json!({ "success": true })))
}

/// POST /api/files/backup - 生成带时间戳后缀的备份
async fn backup_file(
    State(state): State<AppState>,
    Json(req): Json<FileTarget>,
) -> Result<Json<serde_json::Value>, AppError> {
    let backup_path = files::backup_file(&state.registry, &req.key(), &req.path).await?;
    Ok(Json(serde_json::json!({ "backup_path": backup_path })))
}

/// REST 错误应答
#[derive(Debug)]
struct AppError(FileError);

impl From<FileError> for AppError {
    fn from(err: FileError) -> Self {
        AppError(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let AppError(err) = self;
        let status = match &err {
            FileError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            FileError::Ssh(SshError::SessionNotFound(_)) => StatusCode::NOT_FOUND,
            FileError::Ssh(_) => StatusCode::BAD_GATEWAY,
            FileError::Remote(_) | FileError::Decode(_) => StatusCode::BAD_GATEWAY,
        };

        let body = Json(serde_json::json!({
            "error": err.to_string(),
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_router_builds() {
        let (event_tx, _event_rx) = mpsc::unbounded_channel();
        let state = AppState {
            registry: Arc::new(SessionRegistry::new(event_tx, "xterm-256color".to_string())),
            hub: Arc::new(ClientHub::new()),
        };
        let _router = create_router(state);
    }
}
