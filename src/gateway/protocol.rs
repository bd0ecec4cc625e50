// 网关线上协议
// WebSocket 文本帧承载 JSON 信封：type 区分消息种类，载荷放在 data 里

use serde::{Deserialize, Serialize};

use crate::ssh::{SessionEvent, SessionStatus, SshConfig, SshErrorKind};

/// 客户端到服务端的消息
#[derive(Debug, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// 建立 SSH 会话；同 key 重复 connect 会拆旧建新
    Connect {
        session_id: String,
        config: SshConfig,
    },
    /// 终端按键流（原样写入 Shell）
    ShellInput { session_id: String, data: String },
    /// 整行命令（末尾自动补换行）
    Command { session_id: String, command: String },
    /// 终端尺寸变化
    Resize {
        session_id: String,
        cols: u32,
        rows: u32,
    },
    /// 一次性命令；id 由客户端生成，用于配对 exec-result
    Exec {
        id: u64,
        session_id: String,
        command: String,
    },
    /// 断开会话（幂等）
    Disconnect { session_id: String },
}

/// 服务端到客户端的消息
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// 通道就绪，携带服务端分配的客户端 ID
    Ready { client_id: String },
    /// 会话状态变化
    Status {
        session_id: String,
        status: SessionStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// 终端输出（有损 UTF-8 文本）
    Data { session_id: String, data: String },
    /// 会话错误（kind 已在连接边界归类）
    Error {
        session_id: String,
        kind: SshErrorKind,
        message: String,
    },
    /// 一次性命令应答
    ExecResult {
        id: u64,
        session_id: String,
        status: ExecStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        output: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

/// exec 应答状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecStatus {
    Ok,
    Error,
}

/// 把核心事件转成发往所属客户端的消息
/// 返回 (client_id, message)，由调用方完成路由
pub fn event_to_message(event: SessionEvent) -> (String, ServerMessage) {
    match event {
        SessionEvent::Status {
            key,
            status,
            message,
        } => (
            key.client_id,
            ServerMessage::Status {
                session_id: key.session_id,
                status,
                message,
            },
        ),
        SessionEvent::Data { key, data } => (
            key.client_id,
            ServerMessage::Data {
                session_id: key.session_id,
                data: String::from_utf8_lossy(&data).to_string(),
            },
        ),
        SessionEvent::Error { key, kind, message } => (
            key.client_id,
            ServerMessage::Error {
                session_id: key.session_id,
                kind,
                message,
            },
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh::SessionKey;

    #[test]
    fn test_parse_connect_message() {
        let json = r#"{
            "type": "connect",
            "data": {
                "session_id": "server-1",
                "config": {
                    "host": "10.0.0.8",
                    "username": "root",
                    "auth": { "method": "password", "password": "pw" }
                }
            }
        }"#;
        match serde_json::from_str::<ClientMessage>(json).unwrap() {
            ClientMessage::Connect { session_id, config } => {
                assert_eq!(session_id, "server-1");
                assert_eq!(config.host, "10.0.0.8");
                assert_eq!(config.port, 22);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_parse_kebab_case_types() {
        let json = r#"{ "type": "shell-input", "data": { "session_id": "s", "data": "ls\n" } }"#;
        assert!(matches!(
            serde_json::from_str::<ClientMessage>(json).unwrap(),
            ClientMessage::ShellInput { .. }
        ));

        let json = r#"{ "type": "exec", "data": { "id": 7, "session_id": "s", "command": "uptime" } }"#;
        match serde_json::from_str::<ClientMessage>(json).unwrap() {
            ClientMessage::Exec { id, command, .. } => {
                assert_eq!(id, 7);
                assert_eq!(command, "uptime");
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_status_message_wire_shape() {
        let msg = ServerMessage::Status {
            session_id: "server-1".to_string(),
            status: SessionStatus::Connected,
            message: Some("Connected to 10.0.0.8".to_string()),
        };
        let value: serde_json::Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "status");
        assert_eq!(value["data"]["status"], "connected");
        assert_eq!(value["data"]["message"], "Connected to 10.0.0.8");

        // message 为 None 时字段整个不出现
        let msg = ServerMessage::Status {
            session_id: "server-1".to_string(),
            status: SessionStatus::Disconnected,
            message: None,
        };
        let value: serde_json::Value = serde_json::to_value(&msg).unwrap();
        assert!(value["data"].get("message").is_none());
    }

    #[test]
    fn test_exec_result_wire_shape() {
        let msg = ServerMessage::ExecResult {
            id: 3,
            session_id: "server-1".to_string(),
            status: ExecStatus::Ok,
            output: Some("ok\n".to_string()),
            message: None,
        };
        let value: serde_json::Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "exec-result");
        assert_eq!(value["data"]["status"], "ok");
        assert_eq!(value["data"]["output"], "ok\n");
    }

    #[test]
    fn test_event_routing_carries_client_id() {
        let event = SessionEvent::Data {
            key: SessionKey::new("client-9", "server-1"),
            data: b"hello".to_vec(),
        };
        let (client_id, msg) = event_to_message(event);
        assert_eq!(client_id, "client-9");
        match msg {
            ServerMessage::Data { session_id, data } => {
                assert_eq!(session_id, "server-1");
                assert_eq!(data, "hello");
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }
}
