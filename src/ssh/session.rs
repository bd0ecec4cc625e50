// SSH 会话运行器
// 每个会话一个独立任务，负责从建连到 Shell 断开的完整生命周期

use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::client::SshClient;
use super::config::SshConfig;
use super::connection::{open_shell_with_fallback, CommandOutput, ShellChannel, SshConnection};
use super::error::SshError;
use super::event::{SessionEvent, SessionKey, SessionStatus};

/// 会话生命周期状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionState {
    /// TCP/握手/认证进行中
    Connecting,
    /// 认证通过，还没开 Shell
    Authenticated,
    /// 正在协商 PTY 与 Shell
    ShellNegotiating,
    /// Shell 就绪，数据双向转发中
    ShellActive,
    /// 正常断开（终态）
    Disconnected,
    /// 建连或协商阶段失败（终态）
    Failed,
}

impl SessionState {
    /// 是否为终态
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Disconnected | SessionState::Failed)
    }

    /// 状态机允许的迁移
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (Connecting, Authenticated) => true,
            (Authenticated, ShellNegotiating) => true,
            (ShellNegotiating, ShellActive) => true,
            // 建联的任何阶段都可能被主动断开
            (Connecting | Authenticated | ShellNegotiating | ShellActive, Disconnected) => true,
            // Shell 跑起来之后的异常走 Disconnected，Failed 只属于建联阶段
            (Connecting | Authenticated | ShellNegotiating, Failed) => true,
            _ => false,
        }
    }
}

/// 发往会话任务的指令
pub enum SessionCommand {
    /// 终端原始输入（按键流，原样写入）
    Input(Vec<u8>),
    /// 整行命令（末尾没有换行时补上）
    Command(String),
    /// 调整终端大小
    Resize { cols: u32, rows: u32 },
    /// 在同一连接上执行一次性命令（独立通道，不经过 Shell）
    Exec {
        command: String,
        reply: oneshot::Sender<Result<CommandOutput, SshError>>,
    },
}

/// 会话运行器
/// 由注册表 spawn，独占指令接收端与状态发送端
pub struct SessionRunner {
    pub(crate) key: SessionKey,
    pub(crate) config: SshConfig,
    /// 请求的终端类型（作为回退候选列表的首位）
    pub(crate) term: String,
    pub(crate) cols: u32,
    pub(crate) rows: u32,
    pub(crate) events: mpsc::UnboundedSender<SessionEvent>,
    pub(crate) commands: mpsc::UnboundedReceiver<SessionCommand>,
    pub(crate) cancel: CancellationToken,
    pub(crate) state: watch::Sender<SessionState>,
}

impl SessionRunner {
    /// 运行会话直到断开
    pub async fn run(mut self) {
        // 建连（可被取消）
        let client = SshClient::new(self.config.clone());
        let connection = tokio::select! {
            _ = self.cancel.cancelled() => {
                debug!("[Session] {} cancelled while connecting", self.key);
                self.finish_disconnected(None);
                return;
            }
            result = client.connect() => match result {
                Ok(connection) => connection,
                Err(err) => {
                    self.fail(&err);
                    return;
                }
            },
        };

        self.set_state(SessionState::Authenticated);
        self.emit_status(
            SessionStatus::Connected,
            Some(format!("Connected to {}", connection.host())),
        );

        // 打开 Shell，TERM 被拒时按候选列表回退
        self.set_state(SessionState::ShellNegotiating);
        let shell = tokio::select! {
            _ = self.cancel.cancelled() => {
                debug!("[Session] {} cancelled while opening shell", self.key);
                connection.end();
                self.finish_disconnected(None);
                return;
            }
            result = open_shell_with_fallback(&connection, &self.term, self.cols, self.rows) => {
                match result {
                    Ok((shell, term)) => {
                        info!(
                            "[Session] {} shell active as {}@{} (TERM={})",
                            self.key,
                            connection.username(),
                            connection.host(),
                            term
                        );
                        shell
                    }
                    Err(err) => {
                        connection.end();
                        self.fail(&err);
                        return;
                    }
                }
            }
        };

        self.set_state(SessionState::ShellActive);
        self.pump(connection, shell).await;
    }

    /// Shell 数据泵：转发输出、消费指令，直到任意一方结束
    async fn pump(&mut self, connection: SshConnection, shell: ShellChannel) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!("[Session] {} shutting down", self.key);
                    let _ = shell.close().await;
                    connection.end();
                    self.finish_disconnected(None);
                    return;
                }

                cmd = self.commands.recv() => match cmd {
                    Some(SessionCommand::Input(data)) => {
                        if let Err(err) = shell.write(&data).await {
                            warn!("[Session] {} input write failed: {}", self.key, err);
                        }
                    }
                    Some(SessionCommand::Command(mut line)) => {
                        if !line.ends_with('\n') {
                            line.push('\n');
                        }
                        if let Err(err) = shell.write(line.as_bytes()).await {
                            warn!("[Session] {} command write failed: {}", self.key, err);
                        }
                    }
                    Some(SessionCommand::Resize { cols, rows }) => {
                        if let Err(err) = shell.resize(cols, rows).await {
                            warn!("[Session] {} resize failed: {}", self.key, err);
                        }
                    }
                    Some(SessionCommand::Exec { command, reply }) => {
                        // 独立通道独立任务，慢命令不会卡住数据泵
                        let conn = connection.clone();
                        tokio::spawn(async move {
                            let _ = reply.send(conn.run_command(&command).await);
                        });
                    }
                    None => {
                        // 注册表把句柄丢了，视同关闭
                        let _ = shell.close().await;
                        connection.end();
                        self.finish_disconnected(None);
                        return;
                    }
                },

                read = shell.read() => match read {
                    Ok(Some(data)) => {
                        if !data.is_empty() {
                            self.emit(SessionEvent::Data {
                                key: self.key.clone(),
                                data,
                            });
                        }
                    }
                    Ok(None) => {
                        info!("[Session] {} shell closed by remote", self.key);
                        connection.end();
                        self.finish_disconnected(None);
                        return;
                    }
                    Err(err) => {
                        warn!("[Session] {} shell read failed: {}", self.key, err);
                        self.emit_error(&err);
                        connection.end();
                        self.set_state(SessionState::Disconnected);
                        return;
                    }
                },
            }
        }
    }

    /// 建联阶段失败：记 Failed 终态并上报错误
    fn fail(&self, err: &SshError) {
        warn!("[Session] {} connect failed: {}", self.key, err);
        self.emit_error(err);
        self.set_state(SessionState::Failed);
    }

    /// 正常断开收尾
    fn finish_disconnected(&self, message: Option<String>) {
        self.set_state(SessionState::Disconnected);
        self.emit_status(SessionStatus::Disconnected, message);
    }

    fn set_state(&self, next: SessionState) {
        let current = *self.state.borrow();
        if current.can_transition_to(next) {
            let _ = self.state.send(next);
        } else if current != next {
            debug!(
                "[Session] {} ignoring state change {:?} -> {:?}",
                self.key, current, next
            );
        }
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    fn emit_status(&self, status: SessionStatus, message: Option<String>) {
        self.emit(SessionEvent::Status {
            key: self.key.clone(),
            status,
            message,
        });
    }

    fn emit_error(&self, err: &SshError) {
        self.emit(SessionEvent::Error {
            key: self.key.clone(),
            kind: err.kind(),
            message: err.to_string(),
        });
        self.emit_status(
            SessionStatus::Error,
            Some(format!("Connection error: {}", err)),
        );
    }
}
