//! 连接管理器：准入控制、心跳存活跟踪与广播
//!
//! 活跃连接集和心跳表是本模块实例自有的状态，
//! 由组装根构造一次，接收循环、维护循环和广播并发访问。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use xiaoyou_core::XiaoyouResult;
use xiaoyou_domain::ServerMessage;

use crate::connection::{ClientConnection, ConnectionId};

struct ConnectionEntry {
    conn: Arc<dyn ClientConnection>,
    last_heartbeat: Instant,
}

/// 连接管理器
pub struct ConnectionManager {
    max_connections: usize,
    heartbeat_timeout: Duration,
    entries: RwLock<HashMap<ConnectionId, ConnectionEntry>>,
}

impl ConnectionManager {
    pub fn new(max_connections: usize, heartbeat_timeout: Duration) -> Self {
        Self {
            max_connections,
            heartbeat_timeout,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// 准入新连接
    ///
    /// 活跃数已达上限时返回None且无任何副作用，
    /// 连接的关闭由调用方负责（管理器不代发拒绝原因）。
    pub async fn connect(&self, conn: Arc<dyn ClientConnection>) -> Option<ConnectionId> {
        let mut entries = self.entries.write().await;
        if entries.len() >= self.max_connections {
            warn!(
                active = entries.len(),
                max = self.max_connections,
                "连接数已达上限，拒绝新连接"
            );
            return None;
        }

        let id = ConnectionId::new();
        entries.insert(
            id,
            ConnectionEntry {
                conn,
                last_heartbeat: Instant::now(),
            },
        );
        info!(connection_id = %id, active = entries.len(), "新连接已注册");
        Some(id)
    }

    /// 移除连接（幂等，未知连接不报错）
    pub async fn disconnect(&self, id: ConnectionId) {
        let mut entries = self.entries.write().await;
        if entries.remove(&id).is_some() {
            info!(connection_id = %id, active = entries.len(), "连接已注销");
        }
    }

    /// 刷新心跳时间戳（未跟踪的连接为no-op）
    pub async fn update_heartbeat(&self, id: ConnectionId) {
        if let Some(entry) = self.entries.write().await.get_mut(&id) {
            entry.last_heartbeat = Instant::now();
        }
    }

    /// 清扫超时连接
    ///
    /// 先在锁内摘除超时项，再在锁外尽力关闭（关闭失败忽略，
    /// 连接无论关闭成功与否都已从跟踪中移除）。返回移除数量。
    pub async fn check_heartbeats(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<(ConnectionId, Arc<dyn ClientConnection>)> = {
            let mut entries = self.entries.write().await;
            let ids: Vec<ConnectionId> = entries
                .iter()
                .filter(|(_, entry)| now.duration_since(entry.last_heartbeat) > self.heartbeat_timeout)
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| entries.remove(&id).map(|entry| (id, entry.conn)))
                .collect()
        };

        for (id, conn) in &expired {
            warn!(connection_id = %id, "心跳超时，关闭连接");
            if let Err(e) = conn.close().await {
                debug!(connection_id = %id, error = %e, "关闭超时连接失败（忽略）");
            }
        }
        expired.len()
    }

    pub async fn get_active_count(&self) -> usize {
        self.entries.read().await.len()
    }

    /// 广播消息到所有活跃连接
    ///
    /// 消息只序列化一次，序列化失败时整个广播中止（不发任何半成品）。
    /// 单个连接发送失败不影响其余连接，失败的连接在循环结束后统一移除
    /// （视为已死）。返回成功投递数。
    pub async fn broadcast(&self, message: &ServerMessage) -> XiaoyouResult<usize> {
        let raw = message.serialize()?;

        let targets: Vec<(ConnectionId, Arc<dyn ClientConnection>)> = self
            .entries
            .read()
            .await
            .iter()
            .map(|(id, entry)| (*id, Arc::clone(&entry.conn)))
            .collect();

        let mut delivered = 0;
        let mut dead = Vec::new();
        for (id, conn) in targets {
            match conn.send_text(&raw).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(connection_id = %id, error = %e, "广播发送失败，连接将被移除");
                    dead.push(id);
                }
            }
        }

        if !dead.is_empty() {
            let mut entries = self.entries.write().await;
            for id in dead {
                entries.remove(&id);
            }
        }
        Ok(delivered)
    }
}
