// 会话事件定义
//
// 核心通过一条无界 mpsc 通道把会话事件推给网关，网关按 client_id 路由。
// 事件始终携带所属 SessionKey，核心不关心订阅者是谁。

use serde::{Deserialize, Serialize};

use super::error::SshErrorKind;

/// 会话复合标识：客户端 ID + 调用方自定义的逻辑会话 ID
///
/// 逻辑会话 ID 对核心是不透明字符串，含义由调用方决定
/// （例如同一主机的「终端」会话与「文件管理」会话用不同后缀区分）。
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    /// 客户端（传输通道）ID
    pub client_id: String,
    /// 逻辑会话 ID
    pub session_id: String,
}

impl SessionKey {
    pub fn new(client_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            session_id: session_id.into(),
        }
    }

    /// 判断该会话是否属于指定客户端（disconnectAll 的筛选条件）
    pub fn belongs_to(&self, client_id: &str) -> bool {
        self.client_id == client_id
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.client_id, self.session_id)
    }
}

/// 对外的会话状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Connecting,
    Connected,
    Disconnected,
    Error,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Error => "error",
        }
    }
}

/// 核心向外推送的会话事件
#[derive(Clone, Debug)]
pub enum SessionEvent {
    /// 状态变化（connecting / connected / disconnected / error）
    Status {
        key: SessionKey,
        status: SessionStatus,
        message: Option<String>,
    },
    /// Shell 原始输出（stdout 与 stderr 汇入同一条数据流）
    Data { key: SessionKey, data: Vec<u8> },
    /// 连接级错误（已在连接边界归类）
    Error {
        key: SessionKey,
        kind: SshErrorKind,
        message: String,
    },
}

impl SessionEvent {
    /// 事件所属的会话
    pub fn key(&self) -> &SessionKey {
        match self {
            Self::Status { key, .. } => key,
            Self::Data { key, .. } => key,
            Self::Error { key, .. } => key,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_display_joins_with_colon() {
        let key = SessionKey::new("client-1", "server-a");
        assert_eq!(key.to_string(), "client-1:server-a");
    }

    #[test]
    fn test_belongs_to_matches_exact_client() {
        let key = SessionKey::new("client-1", "server-a");
        assert!(key.belongs_to("client-1"));
        assert!(!key.belongs_to("client-10"));
        assert!(!key.belongs_to("client"));
    }

    #[test]
    fn test_status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&SessionStatus::Connecting).unwrap(),
            "\"connecting\""
        );
        assert_eq!(SessionStatus::Error.as_str(), "error");
    }

    #[test]
    fn test_event_reports_owning_key() {
        let key = SessionKey::new("c", "s");
        let event = SessionEvent::Data {
            key: key.clone(),
            data: b"hello".to_vec(),
        };
        assert_eq!(event.key(), &key);
    }
}
