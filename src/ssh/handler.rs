// SSH 客户端 Handler 实现
// 实现 russh::client::Handler trait

use russh::keys::PublicKey;
use std::future::Future;
use tracing::{debug, info, warn};

use super::config::HostVerification;

/// SSH 客户端 Handler
/// 处理 SSH 连接过程中的各种回调
pub struct SshClientHandler {
    /// 服务器公钥校验策略
    verification: HostVerification,
    /// 服务器主机名（用于日志）
    host: String,
}

impl SshClientHandler {
    /// 创建新的 Handler
    pub fn new(verification: HostVerification, host: String) -> Self {
        Self { verification, host }
    }
}

/// 指纹去掉 "SHA256:" 前缀后比较，两种写法都接受
fn fingerprint_matches(expected: &str, actual: &str) -> bool {
    let strip = |s: &str| s.trim().trim_start_matches("SHA256:").to_string();
    strip(expected) == strip(actual)
}

impl russh::client::Handler for SshClientHandler {
    type Error = russh::Error;

    /// 检查服务器公钥
    fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> impl Future<Output = Result<bool, Self::Error>> + Send {
        // 获取密钥指纹
        let fingerprint = server_public_key
            .fingerprint(russh::keys::ssh_key::HashAlg::Sha256)
            .to_string();

        info!(
            "[SSH] Server key fingerprint for {}: {}",
            self.host, fingerprint
        );
        debug!("[SSH] Server key type: {}", server_public_key.algorithm());

        let accepted = match &self.verification {
            HostVerification::AcceptAll => true,
            HostVerification::Fingerprints { fingerprints } => {
                let matched = fingerprints
                    .iter()
                    .any(|expected| fingerprint_matches(expected, &fingerprint));
                if !matched {
                    warn!(
                        "[SSH] Server key for {} not in pinned fingerprint list, rejecting",
                        self.host
                    );
                }
                matched
            }
        };

        async move { Ok(accepted) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_comparison_ignores_prefix() {
        assert!(fingerprint_matches("SHA256:abc123", "SHA256:abc123"));
        assert!(fingerprint_matches("abc123", "SHA256:abc123"));
        assert!(fingerprint_matches("SHA256:abc123", "abc123"));
        assert!(!fingerprint_matches("SHA256:abc123", "SHA256:def456"));
    }

    #[test]
    fn test_fingerprint_comparison_trims_whitespace() {
        assert!(fingerprint_matches(" SHA256:abc123 ", "SHA256:abc123"));
    }
}
