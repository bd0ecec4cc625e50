// SSH 连接模块
//
// 模块结构:
// - config: 连接配置 (SshConfig, AuthMethod, AlgorithmConfig)
// - error: 错误类型 (SshError, SshErrorKind)
// - event: 会话事件 (SessionKey, SessionStatus, SessionEvent)
// - handler: russh Handler 实现
// - client: SSH 客户端核心（建连与认证）
// - connection: 认证后的连接 (SshConnection, ShellChannel, ExecChannel)
// - session: 会话运行器（状态机 + 数据泵）
// - registry: 会话注册表（key 到会话任务的唯一映射）

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod event;
pub mod handler;
pub mod registry;
pub mod session;

// 公开导出
pub use client::SshClient;
pub use config::{
    AlgorithmConfig, AuthMethod, HostVerification, KeepaliveConfig, PrivateKeySource, SshConfig,
};
pub use connection::{
    open_shell_with_fallback, CommandOutput, ExecChannel, PtyRequest, ShellChannel, ShellOpener,
    SshConnection,
};
pub use error::{SshError, SshErrorKind};
pub use event::{SessionEvent, SessionKey, SessionStatus};
pub use registry::SessionRegistry;
pub use session::{SessionCommand, SessionState};
