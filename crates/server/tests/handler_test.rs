use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use xiaoyou_core::{ChatTurn, LlmService, MemoryService, SttService, XiaoyouError, XiaoyouResult};
use xiaoyou_scheduler::TaskScheduler;
use xiaoyou_server::collaborators::{InMemoryMemory, PlaceholderStt, SilentTts};
use xiaoyou_server::connection_manager::ConnectionManager;
use xiaoyou_server::{ClientConnection, ConnectionId, MessageHandler};

struct StubConnection {
    sent: Mutex<Vec<String>>,
}

impl StubConnection {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
        })
    }

    fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl ClientConnection for StubConnection {
    async fn send_text(&self, text: &str) -> XiaoyouResult<()> {
        self.sent.lock().unwrap().push(text.to_string());
        Ok(())
    }

    async fn close(&self) -> XiaoyouResult<()> {
        Ok(())
    }
}

/// 固定回复的LLM替身
struct CannedLlm(&'static str);

#[async_trait]
impl LlmService for CannedLlm {
    async fn query(&self, _: &str, _: &str, _: &[ChatTurn]) -> XiaoyouResult<String> {
        Ok(self.0.to_string())
    }
}

/// 必定失败的LLM替身
struct FailingLlm;

#[async_trait]
impl LlmService for FailingLlm {
    async fn query(&self, _: &str, _: &str, _: &[ChatTurn]) -> XiaoyouResult<String> {
        Err(XiaoyouError::Collaborator {
            collaborator: "llm",
            message: "模型不可用".to_string(),
        })
    }
}

/// 识别前睡眠的STT替身，模拟数十秒级的模型调用
struct SlowStt(Duration);

#[async_trait]
impl SttService for SlowStt {
    async fn transcribe(&self, _: &[u8]) -> XiaoyouResult<String> {
        tokio::time::sleep(self.0).await;
        Ok("转写完成".to_string())
    }
}

struct Harness {
    handler: Arc<MessageHandler>,
    manager: Arc<ConnectionManager>,
    memory: Arc<InMemoryMemory>,
    scheduler: TaskScheduler,
    conn: Arc<StubConnection>,
    conn_id: ConnectionId,
}

async fn harness(llm: Arc<dyn LlmService>) -> Harness {
    harness_with_stt(llm, Arc::new(PlaceholderStt)).await
}

async fn harness_with_stt(llm: Arc<dyn LlmService>, stt: Arc<dyn SttService>) -> Harness {
    let manager = Arc::new(ConnectionManager::new(10, Duration::from_secs(60)));
    let scheduler = TaskScheduler::new(2);
    scheduler.start(2).await;
    let memory = Arc::new(InMemoryMemory::new(100));

    let handler = Arc::new(MessageHandler::new(
        Arc::clone(&manager),
        scheduler.clone(),
        llm,
        stt,
        Arc::new(SilentTts),
        Arc::clone(&memory) as Arc<dyn MemoryService>,
    ));

    let conn = StubConnection::new();
    let conn_id = manager
        .connect(Arc::clone(&conn) as Arc<dyn ClientConnection>)
        .await
        .unwrap();

    Harness {
        handler,
        manager,
        memory,
        scheduler,
        conn,
        conn_id,
    }
}

/// 轮询等待异步回包就位
async fn wait_for_sent(conn: &StubConnection, count: usize) -> Vec<String> {
    for _ in 0..100 {
        let sent = conn.sent();
        if sent.len() >= count {
            return sent;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("等待回包超时，目前只有: {:?}", conn.sent());
}

#[tokio::test]
async fn test_text_input_acks_then_replies() {
    let h = harness(Arc::new(CannedLlm("今天也要加油哦"))).await;
    let conn: Arc<dyn ClientConnection> = h.conn.clone();

    h.handler
        .handle_message(h.conn_id, &conn, r#"{"type": "text_input", "text": "早上好"}"#)
        .await
        .unwrap();

    let sent = wait_for_sent(&h.conn, 2).await;
    // 先"思考中"确认，后正式回复
    assert!(sent[0].contains(r#""type":"system""#));
    assert!(sent[1].contains(r#""type":"message""#));
    assert!(sent[1].contains("今天也要加油哦"));
    assert_eq!(h.handler.total_queries(), 1);

    h.scheduler.stop(Some(Duration::from_secs(1))).await;
}

#[tokio::test]
async fn test_text_input_records_conversation_memory() {
    let h = harness(Arc::new(CannedLlm("记住了"))).await;
    let conn: Arc<dyn ClientConnection> = h.conn.clone();

    h.handler
        .handle_message(h.conn_id, &conn, r#"{"type": "text_input", "text": "我喜欢猫"}"#)
        .await
        .unwrap();
    wait_for_sent(&h.conn, 2).await;

    // 助手侧记忆写入在回发之后异步进行
    for _ in 0..100 {
        if h.memory.history().await.len() >= 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let history = h.memory.history().await;
    assert_eq!(history[0].role, "user");
    assert_eq!(history[0].content, "我喜欢猫");
    assert_eq!(history[1].role, "assistant");

    h.scheduler.stop(Some(Duration::from_secs(1))).await;
}

#[tokio::test]
async fn test_failing_llm_still_produces_message_response() {
    // LLM抛错时连接收到message类型的失败说明，而非断开
    let h = harness(Arc::new(FailingLlm)).await;
    let conn: Arc<dyn ClientConnection> = h.conn.clone();

    h.handler
        .handle_message(h.conn_id, &conn, r#"{"type": "text_input", "text": "hello"}"#)
        .await
        .unwrap();

    let sent = wait_for_sent(&h.conn, 2).await;
    assert!(sent[1].contains(r#""type":"message""#));
    assert!(sent[1].contains("抱歉"));
    // 连接没有因协作方失败被移除
    assert_eq!(h.manager.get_active_count().await, 1);

    h.scheduler.stop(Some(Duration::from_secs(1))).await;
}

#[tokio::test]
async fn test_audio_input_returns_transcription() {
    let h = harness(Arc::new(CannedLlm(""))).await;
    let conn: Arc<dyn ClientConnection> = h.conn.clone();

    h.handler
        .handle_message(
            h.conn_id,
            &conn,
            r#"{"type": "audio_input", "audio_data": "abcd"}"#,
        )
        .await
        .unwrap();

    // 识别结果由后台任务异步回发
    let sent = wait_for_sent(&h.conn, 1).await;
    assert!(sent[0].contains(r#""type":"transcription""#));

    h.scheduler.stop(Some(Duration::from_secs(1))).await;
}

#[tokio::test]
async fn test_slow_stt_does_not_block_dispatch() {
    // 慢识别不能卡住接收循环的分发
    let h = harness_with_stt(
        Arc::new(CannedLlm("ok")),
        Arc::new(SlowStt(Duration::from_millis(500))),
    )
    .await;
    let conn: Arc<dyn ClientConnection> = h.conn.clone();

    let started = std::time::Instant::now();
    h.handler
        .handle_message(
            h.conn_id,
            &conn,
            r#"{"type": "audio_input", "audio_data": "abcd"}"#,
        )
        .await
        .unwrap();
    assert!(
        started.elapsed() < Duration::from_millis(100),
        "音频分发被识别调用阻塞了{:?}",
        started.elapsed()
    );

    let sent = wait_for_sent(&h.conn, 1).await;
    assert!(sent[0].contains("转写完成"));

    h.scheduler.stop(Some(Duration::from_secs(1))).await;
}

#[tokio::test(start_paused = true)]
async fn test_any_inbound_message_refreshes_liveness() {
    // 持续发普通消息、从不发心跳的连接不能被清扫掉
    let h = harness(Arc::new(CannedLlm("ok"))).await;
    let conn: Arc<dyn ClientConnection> = h.conn.clone();

    // 心跳超时60秒；每10秒发一条普通消息，总时长超过超时阈值
    for _ in 0..7 {
        tokio::time::advance(Duration::from_secs(10)).await;
        h.handler
            .handle_message(h.conn_id, &conn, r#"{"type": "system_status"}"#)
            .await
            .unwrap();
    }

    assert_eq!(h.manager.check_heartbeats().await, 0);
    assert_eq!(h.manager.get_active_count().await, 1);

    h.scheduler.stop(Some(Duration::from_secs(1))).await;
}

#[tokio::test]
async fn test_system_status_reports_counters() {
    let h = harness(Arc::new(CannedLlm("ok"))).await;
    let conn: Arc<dyn ClientConnection> = h.conn.clone();

    h.handler
        .handle_message(h.conn_id, &conn, r#"{"type": "text_input", "text": "hi"}"#)
        .await
        .unwrap();
    wait_for_sent(&h.conn, 2).await;

    h.handler
        .handle_message(h.conn_id, &conn, r#"{"type": "system_status"}"#)
        .await
        .unwrap();

    let sent = wait_for_sent(&h.conn, 3).await;
    let status = sent.last().unwrap();
    assert!(status.contains(r#""type":"system_status""#));
    assert!(status.contains(r#""active_users":1"#));
    assert!(status.contains(r#""total_queries":1"#));

    h.scheduler.stop(Some(Duration::from_secs(1))).await;
}

#[tokio::test]
async fn test_malformed_json_is_dropped_silently() {
    let h = harness(Arc::new(CannedLlm("ok"))).await;
    let conn: Arc<dyn ClientConnection> = h.conn.clone();

    // 非法JSON不报错、不回包、不断开
    h.handler
        .handle_message(h.conn_id, &conn, "{not json")
        .await
        .unwrap();
    assert!(h.conn.sent().is_empty());
    assert_eq!(h.manager.get_active_count().await, 1);

    h.scheduler.stop(Some(Duration::from_secs(1))).await;
}

#[tokio::test]
async fn test_unknown_type_is_ignored() {
    let h = harness(Arc::new(CannedLlm("ok"))).await;
    let conn: Arc<dyn ClientConnection> = h.conn.clone();

    h.handler
        .handle_message(
            h.conn_id,
            &conn,
            r#"{"type": "video_input", "frame": "..."}"#,
        )
        .await
        .unwrap();
    assert!(h.conn.sent().is_empty());
    assert_eq!(h.handler.total_queries(), 0);

    h.scheduler.stop(Some(Duration::from_secs(1))).await;
}

#[tokio::test]
async fn test_heartbeat_refreshes_liveness_without_response() {
    let h = harness(Arc::new(CannedLlm("ok"))).await;
    let conn: Arc<dyn ClientConnection> = h.conn.clone();

    h.handler
        .handle_message(h.conn_id, &conn, r#"{"type": "heartbeat"}"#)
        .await
        .unwrap();
    // 心跳只刷新存活，不回包
    assert!(h.conn.sent().is_empty());
    assert_eq!(h.manager.get_active_count().await, 1);

    h.scheduler.stop(Some(Duration::from_secs(1))).await;
}
