// 网关模块
//
// 模块结构:
// - protocol: 线上协议 (ClientMessage, ServerMessage)
// - clients: 客户端集线器与事件路由 (ClientHub)
// - routes: WebSocket 入口与 REST 路由
// - server: 服务器装配与启动 (RelayServer)

pub mod clients;
pub mod protocol;
pub mod routes;
pub mod server;

pub use clients::ClientHub;
pub use protocol::{ClientMessage, ExecStatus, ServerMessage};
pub use server::RelayServer;
