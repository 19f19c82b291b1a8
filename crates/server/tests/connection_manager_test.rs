use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use xiaoyou_core::{XiaoyouError, XiaoyouResult};
use xiaoyou_domain::ServerMessage;
use xiaoyou_server::connection_manager::ConnectionManager;
use xiaoyou_server::ClientConnection;

/// 记录发送内容的连接替身
struct StubConnection {
    sent: Mutex<Vec<String>>,
    fail_sends: bool,
    closed: AtomicBool,
}

impl StubConnection {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            fail_sends: false,
            closed: AtomicBool::new(false),
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            fail_sends: true,
            closed: AtomicBool::new(false),
        })
    }

    fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl ClientConnection for StubConnection {
    async fn send_text(&self, text: &str) -> XiaoyouResult<()> {
        if self.fail_sends {
            return Err(XiaoyouError::ConnectionIo("模拟发送失败".to_string()));
        }
        self.sent.lock().unwrap().push(text.to_string());
        Ok(())
    }

    async fn close(&self) -> XiaoyouResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn test_admission_ceiling() {
    // 上限10时第11个连接被拒且集合不变
    let manager = ConnectionManager::new(10, Duration::from_secs(60));

    for _ in 0..10 {
        let conn = StubConnection::new();
        assert!(manager.connect(conn).await.is_some());
    }
    assert_eq!(manager.get_active_count().await, 10);

    let rejected = StubConnection::new();
    assert!(manager.connect(Arc::clone(&rejected) as Arc<dyn ClientConnection>).await.is_none());
    assert_eq!(manager.get_active_count().await, 10);
    // 管理器不负责关闭被拒连接
    assert!(!rejected.closed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_disconnect_is_idempotent() {
    let manager = ConnectionManager::new(10, Duration::from_secs(60));
    let id = manager.connect(StubConnection::new()).await.unwrap();

    manager.disconnect(id).await;
    assert_eq!(manager.get_active_count().await, 0);
    // 重复注销和注销未知连接都是no-op
    manager.disconnect(id).await;
    assert_eq!(manager.get_active_count().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_timeout_sweep() {
    // 三个连接只刷新其中两个，超时后恰好移除一个
    let manager = ConnectionManager::new(10, Duration::from_secs(60));

    let stale = StubConnection::new();
    let stale_id = manager
        .connect(Arc::clone(&stale) as Arc<dyn ClientConnection>)
        .await
        .unwrap();
    let fresh_a = manager.connect(StubConnection::new()).await.unwrap();
    let fresh_b = manager.connect(StubConnection::new()).await.unwrap();

    tokio::time::advance(Duration::from_secs(30)).await;
    manager.update_heartbeat(fresh_a).await;
    manager.update_heartbeat(fresh_b).await;

    // 尚未超时时不得移除
    assert_eq!(manager.check_heartbeats().await, 0);
    assert_eq!(manager.get_active_count().await, 3);

    tokio::time::advance(Duration::from_secs(31)).await;
    let removed = manager.check_heartbeats().await;
    assert_eq!(removed, 1);
    assert_eq!(manager.get_active_count().await, 2);
    assert!(stale.closed.load(Ordering::SeqCst));

    // 被移除的连接不再被追踪，再次清扫无变化
    manager.update_heartbeat(stale_id).await;
    assert_eq!(manager.check_heartbeats().await, 0);
}

#[tokio::test]
async fn test_broadcast_isolates_failing_connection() {
    // P7：单个连接发送失败不影响其余连接，且失败连接被移除
    let manager = ConnectionManager::new(10, Duration::from_secs(60));

    let ok_a = StubConnection::new();
    let dead = StubConnection::failing();
    let ok_b = StubConnection::new();
    manager
        .connect(Arc::clone(&ok_a) as Arc<dyn ClientConnection>)
        .await
        .unwrap();
    manager
        .connect(Arc::clone(&dead) as Arc<dyn ClientConnection>)
        .await
        .unwrap();
    manager
        .connect(Arc::clone(&ok_b) as Arc<dyn ClientConnection>)
        .await
        .unwrap();

    let delivered = manager
        .broadcast(&ServerMessage::system("大家好"))
        .await
        .unwrap();
    assert_eq!(delivered, 2);
    assert_eq!(manager.get_active_count().await, 2);

    // 消息只序列化一次，所有接收方收到的字节一致
    let a = ok_a.sent();
    let b = ok_b.sent();
    assert_eq!(a.len(), 1);
    assert_eq!(a, b);
    assert!(a[0].contains(r#""type":"system""#));
}
