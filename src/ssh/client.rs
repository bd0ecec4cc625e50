// SSH 客户端核心实现

use std::net::ToSocketAddrs;
use std::sync::Arc;
use std::time::Duration;

use russh::client::Handle;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info};

use super::config::{AuthMethod, PrivateKeySource, SshConfig};
use super::connection::SshConnection;
use super::error::SshError;
use super::handler::SshClientHandler;

/// SSH 客户端
/// 负责建立 SSH 连接并返回 SshConnection
pub struct SshClient {
    /// 连接配置
    config: SshConfig,
}

impl SshClient {
    /// 创建新的 SSH 客户端
    pub fn new(config: SshConfig) -> Self {
        Self { config }
    }

    /// 执行连接（异步）
    /// 返回 SshConnection 用于后续操作
    pub async fn connect(&self) -> Result<SshConnection, SshError> {
        info!(
            "[SSH] Connecting to {}@{}:{}",
            self.config.username, self.config.host, self.config.port
        );

        // 解析地址
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let socket_addr = addr
            .to_socket_addrs()
            .map_err(|e| SshError::Config(format!("Failed to resolve address: {}", e)))?
            .next()
            .ok_or_else(|| SshError::Config("No valid address found".to_string()))?;

        // TCP 连接
        let connect_timeout = Duration::from_secs(self.config.connect_timeout);
        let tcp_stream = timeout(connect_timeout, TcpStream::connect(socket_addr))
            .await
            .map_err(|_| SshError::Timeout(self.config.connect_timeout))?
            .map_err(SshError::Io)?;

        debug!("[SSH] TCP connection established to {}", socket_addr);

        // SSH 握手
        let russh_config = Arc::new(self.config.to_russh_config());
        let handler = SshClientHandler::new(
            self.config.host_verification.clone(),
            self.config.host.clone(),
        );

        let mut handle = timeout(
            connect_timeout,
            russh::client::connect_stream(russh_config, tcp_stream, handler),
        )
        .await
        .map_err(|_| SshError::Timeout(self.config.connect_timeout))?
        .map_err(SshError::from)?;

        debug!("[SSH] Handshake completed with {}", self.config.host);

        // 认证
        self.authenticate(&mut handle).await?;

        info!(
            "[SSH] Authenticated as '{}' on {}",
            self.config.username, self.config.host
        );

        Ok(SshConnection::new(
            Arc::new(handle),
            self.config.host.clone(),
            self.config.username.clone(),
        ))
    }

    /// 执行认证
    async fn authenticate(&self, handle: &mut Handle<SshClientHandler>) -> Result<(), SshError> {
        use russh::client::AuthResult;

        let primary = match &self.config.auth {
            AuthMethod::Password { password } => {
                debug!("[SSH] Using password authentication");
                handle
                    .authenticate_password(&self.config.username, password)
                    .await
                    .map_err(SshError::from)?
            }
            AuthMethod::PublicKey { key, passphrase } => {
                debug!("[SSH] Using public key authentication");
                let key = load_private_key(key, passphrase.as_deref()).await?;
                let key_with_alg = russh::keys::PrivateKeyWithHashAlg::new(
                    Arc::new(key),
                    None, // 使用默认哈希算法
                );
                handle
                    .authenticate_publickey(&self.config.username, key_with_alg)
                    .await
                    .map_err(SshError::from)?
            }
        };

        match primary {
            AuthResult::Success => Ok(()),
            AuthResult::Failure {
                remaining_methods,
                partial_success,
            } => {
                if partial_success {
                    return Err(SshError::Auth(
                        "Partial authentication - additional auth required".to_string(),
                    ));
                }
                debug!(
                    "[SSH] Primary authentication rejected, server suggests: {:?}",
                    remaining_methods
                );

                // 部分服务器只开放 keyboard-interactive，被拒后回退尝试
                let password = self.config.auth.fallback_password();
                if self.try_keyboard_interactive(handle, &password).await? {
                    return Ok(());
                }

                Err(SshError::Auth(format!(
                    "Authentication failed for user '{}'",
                    self.config.username
                )))
            }
        }
    }

    /// keyboard-interactive 认证，用同一密码应答所有提示
    async fn try_keyboard_interactive(
        &self,
        handle: &mut Handle<SshClientHandler>,
        password: &str,
    ) -> Result<bool, SshError> {
        use russh::client::KeyboardInteractiveAuthResponse;

        debug!("[SSH] Falling back to keyboard-interactive authentication");

        let mut response = handle
            .authenticate_keyboard_interactive_start(&self.config.username, None)
            .await
            .map_err(SshError::from)?;

        // 应答轮数设上限，不跟服务器无限对答
        for _ in 0..10 {
            match response {
                KeyboardInteractiveAuthResponse::Success => return Ok(true),
                KeyboardInteractiveAuthResponse::InfoRequest { prompts, .. } => {
                    let answers = vec![password.to_string(); prompts.len()];
                    response = handle
                        .authenticate_keyboard_interactive_respond(answers)
                        .await
                        .map_err(SshError::from)?;
                }
                _ => return Ok(false),
            }
        }

        Ok(false)
    }
}

/// 加载私钥（内联 PEM 或服务端本地文件）
async fn load_private_key(
    source: &PrivateKeySource,
    passphrase: Option<&str>,
) -> Result<russh::keys::PrivateKey, SshError> {
    let pem = match source {
        PrivateKeySource::Inline { pem } => pem.clone(),
        PrivateKeySource::File { path } => {
            debug!("[SSH] Loading private key from {:?}", path);
            let key_data = tokio::fs::read(path)
                .await
                .map_err(|e| SshError::Key(format!("Failed to read key file: {}", e)))?;
            String::from_utf8_lossy(&key_data).into_owned()
        }
    };

    russh::keys::decode_secret_key(&pem, passphrase)
        .map_err(|e| SshError::Key(format!("Failed to decode key: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh::error::SshErrorKind;

    #[tokio::test]
    async fn test_load_private_key_missing_file() {
        let source = PrivateKeySource::File {
            path: "/nonexistent/id_ed25519".into(),
        };
        let err = load_private_key(&source, None).await.unwrap_err();
        assert!(matches!(err, SshError::Key(_)));
        assert_eq!(err.kind(), SshErrorKind::AuthFailed);
    }

    #[tokio::test]
    async fn test_load_private_key_invalid_pem() {
        let source = PrivateKeySource::Inline {
            pem: "not a key".to_string(),
        };
        let err = load_private_key(&source, None).await.unwrap_err();
        assert!(matches!(err, SshError::Key(_)));
    }

    #[tokio::test]
    async fn test_connect_rejected_port_maps_to_connection_refused() {
        // 端口 1 在本机不太可能有监听，connect 会立即被拒
        let config = SshConfig {
            host: "127.0.0.1".to_string(),
            port: 1,
            username: "nobody".to_string(),
            connect_timeout: 2,
            ..SshConfig::default()
        };
        let err = SshClient::new(config).connect().await.unwrap_err();
        assert_eq!(err.kind(), SshErrorKind::ConnectionRefused);
    }

    #[tokio::test]
    async fn test_connect_unresolvable_host() {
        let config = SshConfig {
            host: "host.invalid".to_string(),
            port: 22,
            username: "nobody".to_string(),
            connect_timeout: 2,
            ..SshConfig::default()
        };
        let err = SshClient::new(config).connect().await.unwrap_err();
        assert_eq!(err.kind(), SshErrorKind::HostNotFound);
    }
}
