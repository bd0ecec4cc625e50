// 客户端集线器
// 每个 WebSocket 客户端一条无界出站通道，核心事件按 client_id 路由投递

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use crate::ssh::SessionEvent;

use super::protocol::{event_to_message, ServerMessage};

/// 客户端出站通道表
#[derive(Default)]
pub struct ClientHub {
    clients: Mutex<HashMap<String, mpsc::UnboundedSender<ServerMessage>>>,
}

impl ClientHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册客户端，返回出站接收端（由该客户端的 WebSocket 发送任务消费）
    pub async fn register(&self, client_id: &str) -> mpsc::UnboundedReceiver<ServerMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.clients.lock().await.insert(client_id.to_string(), tx);
        rx
    }

    /// 注销客户端
    pub async fn unregister(&self, client_id: &str) {
        self.clients.lock().await.remove(client_id);
    }

    /// 给指定客户端发消息；客户端不在或通道已关闭时丢弃
    pub async fn send_to(&self, client_id: &str, message: ServerMessage) {
        let sender = self.clients.lock().await.get(client_id).cloned();
        match sender {
            Some(sender) => {
                if sender.send(message).is_err() {
                    debug!(
                        "[Gateway] Client {} channel closed, dropping message",
                        client_id
                    );
                }
            }
            None => {
                debug!("[Gateway] No client {} for outbound message", client_id);
            }
        }
    }

    /// 在线客户端数
    pub async fn client_count(&self) -> usize {
        self.clients.lock().await.len()
    }
}

/// 事件路由循环：把核心事件翻译成协议消息投递给所属客户端
/// 事件通道关闭时退出
pub async fn route_events(hub: Arc<ClientHub>, mut events: mpsc::UnboundedReceiver<SessionEvent>) {
    while let Some(event) = events.recv().await {
        let (client_id, message) = event_to_message(event);
        hub.send_to(&client_id, message).await;
    }
    debug!("[Gateway] Event channel closed, router exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh::{SessionKey, SessionStatus};

    #[tokio::test]
    async fn test_register_send_unregister() {
        let hub = ClientHub::new();
        let mut rx = hub.register("c1").await;
        assert_eq!(hub.client_count().await, 1);

        hub.send_to("c1", ServerMessage::Ready {
            client_id: "c1".to_string(),
        })
        .await;
        assert!(matches!(
            rx.recv().await.unwrap(),
            ServerMessage::Ready { .. }
        ));

        hub.unregister("c1").await;
        assert_eq!(hub.client_count().await, 0);
    }

    #[tokio::test]
    async fn test_send_to_unknown_client_is_noop() {
        let hub = ClientHub::new();
        hub.send_to("ghost", ServerMessage::Ready {
            client_id: "ghost".to_string(),
        })
        .await;
    }

    #[tokio::test]
    async fn test_route_events_targets_owning_client() {
        let hub = Arc::new(ClientHub::new());
        let mut rx_a = hub.register("client-a").await;
        let mut rx_b = hub.register("client-b").await;

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let router = tokio::spawn(route_events(hub.clone(), event_rx));

        event_tx
            .send(SessionEvent::Status {
                key: SessionKey::new("client-b", "s1"),
                status: SessionStatus::Connecting,
                message: None,
            })
            .unwrap();

        match rx_b.recv().await.unwrap() {
            ServerMessage::Status {
                session_id, status, ..
            } => {
                assert_eq!(session_id, "s1");
                assert_eq!(status, SessionStatus::Connecting);
            }
            other => panic!("unexpected message: {:?}", other),
        }
        assert!(rx_a.try_recv().is_err());

        drop(event_tx);
        router.await.unwrap();
    }
}
