// SSH 错误类型定义
//
// SshError 是连接层内部的错误类型；SshErrorKind 是对外暴露的稳定分类，
// 在连接边界处从原始错误文本/元数据一次性归类，上层只看到分类结果。

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// SSH 错误类型
#[derive(Debug, Error)]
pub enum SshError {
    /// 配置错误
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO 错误（网络连接等）
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// 认证失败
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// SSH 协议错误
    #[error("SSH protocol error: {0}")]
    Protocol(String),

    /// 密钥错误
    #[error("Key error: {0}")]
    Key(String),

    /// 连接超时
    #[error("Connection timed out ({0}s)")]
    Timeout(u64),

    /// 通道错误
    #[error("Channel error: {0}")]
    Channel(String),

    /// 会话已断开
    #[error("Session disconnected: {0}")]
    Disconnected(String),

    /// 会话不存在（exec 等操作要求已建立的会话）
    #[error("Session not found: {0}")]
    SessionNotFound(String),
}

impl From<russh::Error> for SshError {
    fn from(e: russh::Error) -> Self {
        SshError::Protocol(e.to_string())
    }
}

impl From<russh::keys::Error> for SshError {
    fn from(e: russh::keys::Error) -> Self {
        SshError::Key(e.to_string())
    }
}

impl SshError {
    /// 在连接边界归类为稳定的错误类别
    pub fn kind(&self) -> SshErrorKind {
        match self {
            SshError::Timeout(_) => SshErrorKind::Timeout,
            SshError::Auth(_) => SshErrorKind::AuthFailed,
            SshError::Key(_) => SshErrorKind::AuthFailed,
            SshError::Io(e) => match e.kind() {
                std::io::ErrorKind::ConnectionRefused => SshErrorKind::ConnectionRefused,
                std::io::ErrorKind::TimedOut => SshErrorKind::Timeout,
                _ => SshErrorKind::classify(&e.to_string()),
            },
            other => SshErrorKind::classify(&other.to_string()),
        }
    }
}

/// 对外的连接错误分类
///
/// 上层（会话、注册表、网关）只依赖这些类别，不解析原始错误文本。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SshErrorKind {
    Timeout,
    ConnectionRefused,
    AuthFailed,
    HostNotFound,
    HandshakeFailed,
    PermissionDenied,
    Unknown,
}

impl SshErrorKind {
    /// 根据原始错误文本做尽力而为的模式匹配归类
    pub fn classify(raw: &str) -> Self {
        let text = raw.to_lowercase();

        if text.contains("econnrefused") || text.contains("connection refused") {
            Self::ConnectionRefused
        } else if text.contains("client-timeout")
            || text.contains("timed out")
            || text.contains("timeout")
        {
            Self::Timeout
        } else if text.contains("authentication failed")
            || text.contains("authentication methods")
            || text.contains("auth failed")
        {
            Self::AuthFailed
        } else if text.contains("permission denied") || text.contains("access denied") {
            Self::PermissionDenied
        } else if text.contains("enotfound")
            || text.contains("getaddrinfo")
            || text.contains("name or service not known")
            || text.contains("failed to resolve")
            || text.contains("no valid address")
            || text.contains("failed to lookup")
        {
            Self::HostNotFound
        } else if text.contains("handshake")
            || text.contains("key exchange")
            || text.contains("kex")
            || text.contains("version exchange")
        {
            Self::HandshakeFailed
        } else {
            Self::Unknown
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::ConnectionRefused => "connection-refused",
            Self::AuthFailed => "auth-failed",
            Self::HostNotFound => "host-not-found",
            Self::HandshakeFailed => "handshake-failed",
            Self::PermissionDenied => "permission-denied",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for SshErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_connection_refused() {
        assert_eq!(
            SshErrorKind::classify("connect ECONNREFUSED 127.0.0.1:22"),
            SshErrorKind::ConnectionRefused
        );
        assert_eq!(
            SshErrorKind::classify("Connection refused (os error 111)"),
            SshErrorKind::ConnectionRefused
        );
    }

    #[test]
    fn test_classify_timeout() {
        assert_eq!(
            SshErrorKind::classify("Connection timed out (5s)"),
            SshErrorKind::Timeout
        );
        assert_eq!(
            SshErrorKind::classify("level: client-timeout"),
            SshErrorKind::Timeout
        );
    }

    #[test]
    fn test_classify_auth_failed() {
        assert_eq!(
            SshErrorKind::classify("Authentication failed: All configured authentication methods failed"),
            SshErrorKind::AuthFailed
        );
    }

    #[test]
    fn test_classify_host_not_found() {
        assert_eq!(
            SshErrorKind::classify("getaddrinfo ENOTFOUND example.invalid"),
            SshErrorKind::HostNotFound
        );
        assert_eq!(
            SshErrorKind::classify("Configuration error: Failed to resolve address: oops"),
            SshErrorKind::HostNotFound
        );
    }

    #[test]
    fn test_classify_handshake_and_permission() {
        assert_eq!(
            SshErrorKind::classify("key exchange init failed"),
            SshErrorKind::HandshakeFailed
        );
        assert_eq!(
            SshErrorKind::classify("Permission denied, please try again."),
            SshErrorKind::PermissionDenied
        );
    }

    #[test]
    fn test_classify_unmatched_is_unknown() {
        assert_eq!(
            SshErrorKind::classify("something completely different"),
            SshErrorKind::Unknown
        );
    }

    #[test]
    fn test_structural_kinds_take_priority() {
        assert_eq!(SshError::Timeout(5).kind(), SshErrorKind::Timeout);
        assert_eq!(
            SshError::Auth("rejected".into()).kind(),
            SshErrorKind::AuthFailed
        );

        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        assert_eq!(SshError::Io(io).kind(), SshErrorKind::ConnectionRefused);

        assert_eq!(
            SshError::Channel("all terminal types rejected".into()).kind(),
            SshErrorKind::Unknown
        );
    }

    #[test]
    fn test_kind_serializes_kebab_case() {
        let json = serde_json::to_string(&SshErrorKind::ConnectionRefused).unwrap();
        assert_eq!(json, "\"connection-refused\"");
        assert_eq!(SshErrorKind::AuthFailed.as_str(), "auth-failed");
    }
}
