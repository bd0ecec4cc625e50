// SSH 连接对象
// 认证完成后的连接，提供多通道支持

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use russh::client::Handle;
use russh::client::Msg;
use russh::ChannelMsg;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::error::SshError;
use super::handler::SshClientHandler;

/// PTY 请求参数
#[derive(Clone, Debug)]
pub struct PtyRequest {
    /// 终端类型
    pub term: String,
    /// 列数
    pub col_width: u32,
    /// 行数
    pub row_height: u32,
    /// 像素宽度
    pub pix_width: u32,
    /// 像素高度
    pub pix_height: u32,
    /// 终端模式
    pub modes: Vec<(russh::Pty, u32)>,
}

impl Default for PtyRequest {
    fn default() -> Self {
        Self {
            term: "xterm-256color".to_string(),
            col_width: 80,
            row_height: 24,
            pix_width: 0,
            pix_height: 0,
            modes: vec![],
        }
    }
}

/// SSH 连接（认证完成后）
/// 内部持有 Handle，支持并发打开多个通道；Clone 共享同一条底层连接
#[derive(Clone)]
pub struct SshConnection {
    /// russh Handle，Arc 共享给所有通道
    handle: Arc<Handle<SshClientHandler>>,
    /// 服务器主机名
    host: String,
    /// 用户名
    username: String,
    /// 连接状态
    is_connected: Arc<AtomicBool>,
}

// russh 的 Handle 未实现 Debug，手动实现并跳过该字段
impl std::fmt::Debug for SshConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshConnection")
            .field("host", &self.host)
            .field("username", &self.username)
            .field("is_connected", &self.is_connected)
            .finish_non_exhaustive()
    }
}

impl SshConnection {
    /// 创建新的连接对象
    pub fn new(handle: Arc<Handle<SshClientHandler>>, host: String, username: String) -> Self {
        Self {
            handle,
            host,
            username,
            is_connected: Arc::new(AtomicBool::new(true)),
        }
    }

    /// 获取主机名
    pub fn host(&self) -> &str {
        &self.host
    }

    /// 获取用户名
    pub fn username(&self) -> &str {
        &self.username
    }

    /// 检查连接是否活跃
    pub fn is_alive(&self) -> bool {
        self.is_connected.load(Ordering::Relaxed)
    }

    /// 打开交互式 Shell 通道
    pub async fn open_shell(&self, pty: PtyRequest) -> Result<ShellChannel, SshError> {
        if !self.is_alive() {
            return Err(SshError::Disconnected(
                "Connection is closed".to_string(),
            ));
        }

        // 打开会话通道
        let channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(SshError::from)?;

        // 请求 PTY
        channel
            .request_pty(
                false, // want_reply
                &pty.term,
                pty.col_width,
                pty.row_height,
                pty.pix_width,
                pty.pix_height,
                &pty.modes,
            )
            .await
            .map_err(SshError::from)?;

        // 请求 Shell
        channel.request_shell(false).await.map_err(SshError::from)?;

        Ok(ShellChannel::new(channel, self.handle.clone()))
    }

    /// 打开执行通道（每条命令单独开一个）
    pub async fn open_exec(&self) -> Result<ExecChannel, SshError> {
        if !self.is_alive() {
            return Err(SshError::Disconnected(
                "Connection is closed".to_string(),
            ));
        }

        let channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(SshError::from)?;

        Ok(ExecChannel::new(channel))
    }

    /// 执行单条命令并收集输出（新开通道，不影响 Shell）
    pub async fn run_command(&self, command: &str) -> Result<CommandOutput, SshError> {
        let exec = self.open_exec().await?;
        exec.exec(command).await
    }

    /// 结束连接（幂等）
    /// 先标记断开，再异步发送 disconnect，多次调用只生效一次
    pub fn end(&self) {
        if self.is_connected.swap(false, Ordering::SeqCst) {
            debug!("[SSH] Closing connection to {}", self.host);
            let handle = self.handle.clone();
            tokio::spawn(async move {
                let _ = handle
                    .disconnect(russh::Disconnect::ByApplication, "Session ended", "en")
                    .await;
            });
        }
    }
}

/// Shell 打开抽象
/// TERM 回退逻辑建立在这个 trait 之上，便于不连真实服务器做验证
#[async_trait]
pub trait ShellOpener {
    type Shell: Send;

    /// 用指定终端类型尝试打开 Shell
    async fn try_term(&self, term: &str, cols: u32, rows: u32) -> Result<Self::Shell, SshError>;
}

#[async_trait]
impl ShellOpener for SshConnection {
    type Shell = ShellChannel;

    async fn try_term(&self, term: &str, cols: u32, rows: u32) -> Result<ShellChannel, SshError> {
        self.open_shell(PtyRequest {
            term: term.to_string(),
            col_width: cols,
            row_height: rows,
            ..PtyRequest::default()
        })
        .await
    }
}

/// 候选终端类型，从请求的类型开始，之后按兼容性从高到低
const TERM_FALLBACKS: [&str; 4] = ["xterm-256color", "xterm", "vt100", "linux"];

/// 生成终端类型候选列表（请求的类型在最前，去重）
pub fn term_candidates(requested: &str) -> Vec<String> {
    let mut candidates = vec![requested.to_string()];
    for fallback in TERM_FALLBACKS {
        if fallback != requested {
            candidates.push(fallback.to_string());
        }
    }
    candidates
}

/// 按候选列表依次尝试打开 Shell，部分服务器会拒绝不认识的 TERM
/// 返回 Shell 和实际生效的终端类型；全部被拒时返回 Channel 错误
pub async fn open_shell_with_fallback<O: ShellOpener>(
    opener: &O,
    requested: &str,
    cols: u32,
    rows: u32,
) -> Result<(O::Shell, String), SshError> {
    for term in term_candidates(requested) {
        match opener.try_term(&term, cols, rows).await {
            Ok(shell) => {
                if term != requested {
                    debug!("[SSH] Shell opened with fallback TERM '{}'", term);
                }
                return Ok((shell, term));
            }
            // 连接已断开时继续尝试没有意义
            Err(err @ SshError::Disconnected(_)) => return Err(err),
            Err(err) => {
                warn!("[SSH] Shell request with TERM '{}' rejected: {}", term, err);
            }
        }
    }

    Err(SshError::Channel(
        "All terminal types rejected by server".to_string(),
    ))
}

// 使用 russh::client::Msg 作为消息类型
type RusshChannel = russh::Channel<Msg>;

/// Shell 通道
/// 分离读写路径以避免死锁：
/// - 读：需要 channel.wait()，会持有 channel 内部状态
/// - 写：直接使用 handle.data()，不需要持有 channel 锁
pub struct ShellChannel {
    id: russh::ChannelId,
    handle: Arc<Handle<SshClientHandler>>,
    channel: Mutex<RusshChannel>,
}

impl ShellChannel {
    fn new(channel: RusshChannel, handle: Arc<Handle<SshClientHandler>>) -> Self {
        Self {
            id: channel.id(),
            channel: Mutex::new(channel),
            handle,
        }
    }

    /// 写入数据到终端
    /// 经 handle 发送而非通道本身，写入不会被读取侧的锁挡住
    pub async fn write(&self, data: &[u8]) -> Result<(), SshError> {
        self.handle
            .data(self.id, data.to_vec().into())
            .await
            .map_err(|_| SshError::Channel("Failed to send data to channel".to_string()))
    }

    /// 读取终端输出（stdout 与 stderr 都算）
    /// 通道关闭后返回 None
    pub async fn read(&self) -> Result<Option<Vec<u8>>, SshError> {
        let mut channel = self.channel.lock().await;
        loop {
            match channel.wait().await {
                Some(ChannelMsg::Data { data }) => return Ok(Some(data.to_vec())),
                Some(ChannelMsg::ExtendedData { data, .. }) => return Ok(Some(data.to_vec())),
                Some(ChannelMsg::Eof | ChannelMsg::Close) => return Ok(None),
                // ExitStatus 等控制消息不产生终端数据，继续等下一条
                Some(_) => continue,
                None => return Ok(None),
            }
        }
    }

    /// 调整终端大小
    pub async fn resize(&self, cols: u32, rows: u32) -> Result<(), SshError> {
        let channel = self.channel.lock().await;
        channel
            .window_change(cols, rows, 0, 0)
            .await
            .map_err(|e| SshError::Channel(e.to_string()))
    }

    /// 关闭通道
    pub async fn close(&self) -> Result<(), SshError> {
        let channel = self.channel.lock().await;
        channel
            .eof()
            .await
            .map_err(|e| SshError::Channel(e.to_string()))
    }
}

/// 执行通道（一次性命令）
pub struct ExecChannel {
    channel: Mutex<RusshChannel>,
}

impl ExecChannel {
    fn new(channel: RusshChannel) -> Self {
        Self {
            channel: Mutex::new(channel),
        }
    }

    /// 执行命令并收集全部输出
    /// stdout 与 stderr 按到达顺序合并为一个流；不设超时，由调用方决定等多久
    pub async fn exec(&self, command: &str) -> Result<CommandOutput, SshError> {
        let mut channel = self.channel.lock().await;

        channel
            .exec(true, command)
            .await
            .map_err(|e| SshError::Channel(e.to_string()))?;

        let mut output = Vec::new();
        let mut exit_code = None;

        loop {
            match channel.wait().await {
                Some(ChannelMsg::Data { data }) => {
                    output.extend_from_slice(&data);
                }
                Some(ChannelMsg::ExtendedData { data, ext }) => {
                    if ext == 1 {
                        // stderr
                        output.extend_from_slice(&data);
                    }
                }
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    exit_code = Some(exit_status);
                }
                Some(ChannelMsg::Eof) => {
                    // exit-status 通常跟在 EOF 后面，还没拿到就继续等 Close
                    if exit_code.is_some() {
                        break;
                    }
                }
                Some(ChannelMsg::Close) => break,
                Some(_) => {}
                None => break,
            }
        }

        Ok(CommandOutput {
            output,
            exit_code: exit_code.unwrap_or(0),
        })
    }
}

/// 命令输出
#[derive(Debug)]
pub struct CommandOutput {
    /// 合并后的输出（stdout 与 stderr 按到达顺序）
    pub output: Vec<u8>,
    /// 退出码
    pub exit_code: u32,
}

impl CommandOutput {
    /// 获取输出字符串
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.output).to_string()
    }

    /// 退出码为 0 视为成功
    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh::error::SshErrorKind;
    use std::sync::Mutex as StdMutex;

    /// 不连真实服务器的 ShellOpener 实现
    struct FakeOpener {
        /// 接受的终端类型，None 表示全部拒绝
        accept: Option<&'static str>,
        /// 是否在第一次尝试时报连接断开
        disconnected: bool,
        attempts: StdMutex<Vec<String>>,
    }

    impl FakeOpener {
        fn accepting(term: &'static str) -> Self {
            Self {
                accept: Some(term),
                disconnected: false,
                attempts: StdMutex::new(Vec::new()),
            }
        }

        fn rejecting_all() -> Self {
            Self {
                accept: None,
                disconnected: false,
                attempts: StdMutex::new(Vec::new()),
            }
        }

        fn attempts(&self) -> Vec<String> {
            self.attempts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ShellOpener for FakeOpener {
        type Shell = String;

        async fn try_term(&self, term: &str, _cols: u32, _rows: u32) -> Result<String, SshError> {
            self.attempts.lock().unwrap().push(term.to_string());
            if self.disconnected {
                return Err(SshError::Disconnected("gone".to_string()));
            }
            match self.accept {
                Some(ok) if ok == term => Ok(term.to_string()),
                _ => Err(SshError::Channel(format!("TERM '{}' rejected", term))),
            }
        }
    }

    #[test]
    fn test_term_candidates_requested_first_and_deduped() {
        let candidates = term_candidates("rxvt");
        assert_eq!(
            candidates,
            vec!["rxvt", "xterm-256color", "xterm", "vt100", "linux"]
        );

        let candidates = term_candidates("xterm");
        assert_eq!(candidates, vec!["xterm", "xterm-256color", "vt100", "linux"]);
    }

    #[tokio::test]
    async fn test_fallback_accepts_requested_term() {
        let opener = FakeOpener::accepting("xterm-256color");
        let (shell, term) = open_shell_with_fallback(&opener, "xterm-256color", 80, 24)
            .await
            .unwrap();
        assert_eq!(shell, "xterm-256color");
        assert_eq!(term, "xterm-256color");
        assert_eq!(opener.attempts().len(), 1);
    }

    #[tokio::test]
    async fn test_fallback_walks_candidates_in_order() {
        let opener = FakeOpener::accepting("vt100");
        let (_, term) = open_shell_with_fallback(&opener, "rxvt", 80, 24)
            .await
            .unwrap();
        assert_eq!(term, "vt100");
        assert_eq!(
            opener.attempts(),
            vec!["rxvt", "xterm-256color", "xterm", "vt100"]
        );
    }

    #[tokio::test]
    async fn test_fallback_exhaustion_is_channel_error() {
        let opener = FakeOpener::rejecting_all();
        let err = open_shell_with_fallback(&opener, "xterm", 80, 24)
            .await
            .unwrap_err();
        assert!(matches!(err, SshError::Channel(_)));
        assert_eq!(err.kind(), SshErrorKind::Unknown);
        assert_eq!(opener.attempts().len(), 4);
    }

    #[tokio::test]
    async fn test_fallback_stops_when_disconnected() {
        let opener = FakeOpener {
            accept: None,
            disconnected: true,
            attempts: StdMutex::new(Vec::new()),
        };
        let err = open_shell_with_fallback(&opener, "xterm", 80, 24)
            .await
            .unwrap_err();
        assert!(matches!(err, SshError::Disconnected(_)));
        assert_eq!(opener.attempts().len(), 1);
    }
}
