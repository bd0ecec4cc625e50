// 服务层模块
// - files: 基于会话命令通道的远端文件操作

pub mod files;

pub use files::{EntryKind, FileError, RemoteEntry};
