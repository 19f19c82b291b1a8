//! 小优服务端：WebSocket连接生命周期、会话路由与后台维护
//!
//! 连接管理器负责准入和心跳存活，会话路由拥有每连接的接收循环，
//! 慢操作（LLM、TTS）经由调度器在事件循环之外执行。

pub mod collaborators;
pub mod connection;
pub mod connection_manager;
pub mod handler;
pub mod maintenance;
pub mod routes;

pub use connection::{ClientConnection, ConnectionId, WsConnection};
pub use connection_manager::ConnectionManager;
pub use handler::MessageHandler;
pub use routes::{create_router, AppState};
