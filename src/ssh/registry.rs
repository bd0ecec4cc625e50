// 会话注册表
// (客户端, 会话) 键到会话任务的唯一映射，所有会话的创建与销毁都经过这里

use std::collections::HashMap;

use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::config::SshConfig;
use super::connection::CommandOutput;
use super::error::SshError;
use super::event::{SessionEvent, SessionKey, SessionStatus};
use super::session::{SessionCommand, SessionRunner, SessionState};

/// 新会话的默认终端尺寸，客户端连上后会立即发 resize 纠正
const DEFAULT_COLS: u32 = 80;
const DEFAULT_ROWS: u32 = 24;

/// 注册表持有的会话句柄
struct SessionHandle {
    commands: mpsc::UnboundedSender<SessionCommand>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
    state: watch::Receiver<SessionState>,
}

/// 会话注册表
pub struct SessionRegistry {
    /// 会话表；替换与销毁期间持锁，保证同 key 操作串行
    sessions: Mutex<HashMap<SessionKey, SessionHandle>>,
    /// 会话事件出口（网关消费）
    events: mpsc::UnboundedSender<SessionEvent>,
    /// 新会话的默认终端类型
    default_term: String,
}

impl SessionRegistry {
    /// 创建注册表
    pub fn new(events: mpsc::UnboundedSender<SessionEvent>, default_term: String) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            events,
            default_term,
        }
    }

    // ========================================================================
    // 会话生命周期
    // ========================================================================

    /// 建立会话
    ///
    /// 同 key 已有会话时先拆掉旧的再建新的（后连的赢）。结果通过事件上报，
    /// 这里只负责把任务跑起来。
    pub async fn connect(&self, key: SessionKey, config: SshConfig) {
        let mut sessions = self.sessions.lock().await;

        if let Some(old) = sessions.remove(&key) {
            info!("[Registry] Replacing existing session {}", key);
            shutdown_handle(&key, old).await;
        }

        info!(
            "[Registry] Starting session {} -> {}@{}:{}",
            key, config.username, config.host, config.port
        );

        // connecting 先于任务自身产出的任何事件
        let _ = self.events.send(SessionEvent::Status {
            key: key.clone(),
            status: SessionStatus::Connecting,
            message: None,
        });

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SessionState::Connecting);
        let cancel = CancellationToken::new();

        let runner = SessionRunner {
            key: key.clone(),
            config,
            term: self.default_term.clone(),
            cols: DEFAULT_COLS,
            rows: DEFAULT_ROWS,
            events: self.events.clone(),
            commands: cmd_rx,
            cancel: cancel.clone(),
            state: state_tx,
        };
        let task = tokio::spawn(runner.run());

        sessions.insert(
            key,
            SessionHandle {
                commands: cmd_tx,
                cancel,
                task,
                state: state_rx,
            },
        );
    }

    /// 断开会话（幂等，会话不存在时是空操作）
    /// 返回是否实际拆掉了一个会话
    pub async fn disconnect(&self, key: &SessionKey) -> bool {
        let removed = self.sessions.lock().await.remove(key);
        match removed {
            Some(handle) => {
                info!("[Registry] Disconnecting session {}", key);
                shutdown_handle(key, handle).await;
                true
            }
            None => {
                debug!("[Registry] Disconnect for unknown session {}", key);
                false
            }
        }
    }

    /// 断开某个客户端的全部会话，返回拆掉的数量
    pub async fn disconnect_all(&self, client_id: &str) -> usize {
        let drained: Vec<(SessionKey, SessionHandle)> = {
            let mut sessions = self.sessions.lock().await;
            let keys: Vec<SessionKey> = sessions
                .keys()
                .filter(|key| key.belongs_to(client_id))
                .cloned()
                .collect();
            keys.into_iter()
                .filter_map(|key| sessions.remove(&key).map(|handle| (key, handle)))
                .collect()
        };

        let count = drained.len();
        if count > 0 {
            info!(
                "[Registry] Disconnecting {} session(s) of client {}",
                count, client_id
            );
        }
        for (key, handle) in drained {
            shutdown_handle(&key, handle).await;
        }
        count
    }

    /// 拆掉所有会话（进程退出前调用）
    pub async fn shutdown(&self) {
        let drained: Vec<(SessionKey, SessionHandle)> =
            self.sessions.lock().await.drain().collect();
        if !drained.is_empty() {
            info!("[Registry] Shutting down {} session(s)", drained.len());
        }
        for (key, handle) in drained {
            shutdown_handle(&key, handle).await;
        }
    }

    // ========================================================================
    // 会话操作
    // ========================================================================

    /// 发送终端输入；会话不存在或 Shell 未就绪时是空操作
    pub async fn send_shell_input(&self, key: &SessionKey, data: Vec<u8>) {
        if let Some(sender) = self.active_sender(key, "input").await {
            let _ = sender.send(SessionCommand::Input(data));
        }
    }

    /// 发送整行命令（自动补换行）；会话不存在或 Shell 未就绪时是空操作
    pub async fn send_command(&self, key: &SessionKey, command: String) {
        if let Some(sender) = self.active_sender(key, "command").await {
            let _ = sender.send(SessionCommand::Command(command));
        }
    }

    /// 调整终端大小；会话不存在或 Shell 未就绪时是空操作
    pub async fn resize(&self, key: &SessionKey, cols: u32, rows: u32) {
        if let Some(sender) = self.active_sender(key, "resize").await {
            let _ = sender.send(SessionCommand::Resize { cols, rows });
        }
    }

    /// 在会话的连接上执行一次性命令并等待完整输出
    pub async fn exec(&self, key: &SessionKey, command: String) -> Result<CommandOutput, SshError> {
        let (sender, state) = {
            let sessions = self.sessions.lock().await;
            match sessions.get(key) {
                Some(handle) => (handle.commands.clone(), *handle.state.borrow()),
                None => return Err(SshError::SessionNotFound(key.to_string())),
            }
        };

        // 已死的表项等同不存在
        if state.is_terminal() {
            return Err(SshError::SessionNotFound(key.to_string()));
        }
        if state != SessionState::ShellActive {
            return Err(SshError::Disconnected("Session is not ready".to_string()));
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        sender
            .send(SessionCommand::Exec {
                command,
                reply: reply_tx,
            })
            .map_err(|_| SshError::SessionNotFound(key.to_string()))?;

        reply_rx
            .await
            .map_err(|_| SshError::Disconnected("Session closed during exec".to_string()))?
    }

    // ========================================================================
    // 查询
    // ========================================================================

    /// 当前会话快照（含已死但尚未清理的表项）
    pub async fn list_sessions(&self) -> Vec<(SessionKey, SessionState)> {
        self.sessions
            .lock()
            .await
            .iter()
            .map(|(key, handle)| (key.clone(), *handle.state.borrow()))
            .collect()
    }

    /// 查询单个会话状态
    pub async fn state_of(&self, key: &SessionKey) -> Option<SessionState> {
        self.sessions
            .lock()
            .await
            .get(key)
            .map(|handle| *handle.state.borrow())
    }

    /// 会话数量
    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// 取 Shell 已就绪会话的指令发送端，未就绪时记日志并返回 None
    async fn active_sender(
        &self,
        key: &SessionKey,
        what: &str,
    ) -> Option<mpsc::UnboundedSender<SessionCommand>> {
        let sessions = self.sessions.lock().await;
        match sessions.get(key) {
            Some(handle) if *handle.state.borrow() == SessionState::ShellActive => {
                Some(handle.commands.clone())
            }
            Some(handle) => {
                debug!(
                    "[Registry] Dropping {} for {}, session state is {:?}",
                    what,
                    key,
                    *handle.state.borrow()
                );
                None
            }
            None => {
                debug!("[Registry] Dropping {} for unknown session {}", what, key);
                None
            }
        }
    }
}

/// 拆会话：发取消信号并等任务退出
async fn shutdown_handle(key: &SessionKey, handle: SessionHandle) {
    handle.cancel.cancel();
    if let Err(err) = handle.task.await {
        warn!("[Registry] Session {} task ended abnormally: {}", key, err);
    }
}
