//! 客户端连接抽象
//!
//! 连接管理器和消息路由只依赖`ClientConnection`窄接口，
//! 真实的WebSocket发送端和测试替身都实现它。

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures::stream::SplitSink;
use futures::SinkExt;
use tokio::sync::Mutex;
use uuid::Uuid;

use xiaoyou_core::{XiaoyouError, XiaoyouResult};

/// 连接唯一标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// 双工连接的发送侧
#[async_trait]
pub trait ClientConnection: Send + Sync {
    /// 发送一条文本帧
    async fn send_text(&self, text: &str) -> XiaoyouResult<()>;

    /// 尽力而为地优雅关闭
    async fn close(&self) -> XiaoyouResult<()>;
}

/// axum WebSocket发送端的封装
///
/// 发送端由接收循环、广播和心跳清扫并发使用，内部用锁串行化。
pub struct WsConnection {
    sink: Mutex<SplitSink<WebSocket, Message>>,
}

impl WsConnection {
    pub fn new(sink: SplitSink<WebSocket, Message>) -> Arc<Self> {
        Arc::new(Self {
            sink: Mutex::new(sink),
        })
    }
}

#[async_trait]
impl ClientConnection for WsConnection {
    async fn send_text(&self, text: &str) -> XiaoyouResult<()> {
        self.sink
            .lock()
            .await
            .send(Message::Text(text.to_owned().into()))
            .await
            .map_err(|e| XiaoyouError::ConnectionIo(e.to_string()))
    }

    async fn close(&self) -> XiaoyouResult<()> {
        self.sink
            .lock()
            .await
            .send(Message::Close(None))
            .await
            .map_err(|e| XiaoyouError::ConnectionIo(e.to_string()))
    }
}
