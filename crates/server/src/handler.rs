//! 会话路由：每连接的接收循环与消息分发
//!
//! 接收循环按`type`字段分类入站消息并路由。单连接内的分类与分发
//! 严格按接收顺序进行，但LLM等慢操作以任务形式交给调度器，
//! 其完成顺序不做保证，避免一个慢调用阻塞成千上万个其它连接。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::StreamExt;
use serde_json::Value;
use tracing::{debug, info, warn};

use xiaoyou_core::{
    LlmService, MemoryService, SttService, TraceContext, TtsService, XiaoyouResult,
};
use xiaoyou_domain::{ClientMessage, ServerMessage, TaskLane, TaskPriority};
use xiaoyou_scheduler::{TaskPayload, TaskScheduler};

use crate::connection::{ClientConnection, ConnectionId, WsConnection};
use crate::connection_manager::ConnectionManager;

/// 消息处理器
pub struct MessageHandler {
    manager: Arc<ConnectionManager>,
    scheduler: TaskScheduler,
    llm: Arc<dyn LlmService>,
    stt: Arc<dyn SttService>,
    tts: Arc<dyn TtsService>,
    memory: Arc<dyn MemoryService>,
    total_queries: AtomicU64,
}

impl MessageHandler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        manager: Arc<ConnectionManager>,
        scheduler: TaskScheduler,
        llm: Arc<dyn LlmService>,
        stt: Arc<dyn SttService>,
        tts: Arc<dyn TtsService>,
        memory: Arc<dyn MemoryService>,
    ) -> Self {
        Self {
            manager,
            scheduler,
            llm,
            stt,
            tts,
            memory,
            total_queries: AtomicU64::new(0),
        }
    }

    pub fn total_queries(&self) -> u64 {
        self.total_queries.load(Ordering::Relaxed)
    }

    /// 接管一条WebSocket连接的完整生命周期
    ///
    /// 准入失败立即关闭；进入活跃状态后循环接收并分发；
    /// 无论接收循环因何退出（客户端关闭、出错、外层任务取消），
    /// 都保证注销连接。
    pub async fn handle_socket(self: Arc<Self>, socket: WebSocket) {
        let (sink, mut stream) = socket.split();
        let conn: Arc<dyn ClientConnection> = WsConnection::new(sink);

        let Some(conn_id) = self.manager.connect(Arc::clone(&conn)).await else {
            let _ = conn.close().await;
            return;
        };

        while let Some(frame) = stream.next().await {
            match frame {
                Ok(Message::Text(text)) => {
                    let result = TraceContext::scope(
                        TraceContext::new_id(),
                        self.handle_message(conn_id, &conn, text.as_str()),
                    )
                    .await;
                    if let Err(e) = result {
                        warn!(connection_id = %conn_id, error = %e, "消息处理失败");
                    }
                }
                Ok(Message::Close(_)) => {
                    debug!(connection_id = %conn_id, "客户端请求关闭");
                    break;
                }
                // ping/pong由axum自动应答，二进制帧忽略
                Ok(_) => {}
                Err(e) => {
                    debug!(connection_id = %conn_id, error = %e, "接收出错，结束会话");
                    break;
                }
            }
        }

        self.manager.disconnect(conn_id).await;
        info!(connection_id = %conn_id, "会话已结束");
    }

    /// 分类并分发一条入站消息
    ///
    /// 任何成功解析的入站消息都刷新连接的心跳时间戳，
    /// 持续对话的客户端不需要额外发心跳。
    /// 非法JSON直接丢弃（记录日志，不回包，不断开）。
    pub async fn handle_message(
        &self,
        conn_id: ConnectionId,
        conn: &Arc<dyn ClientConnection>,
        raw: &str,
    ) -> XiaoyouResult<()> {
        let message = match ClientMessage::parse(raw) {
            Ok(m) => m,
            Err(e) => {
                debug!(connection_id = %conn_id, error = %e, "丢弃非法JSON消息");
                return Ok(());
            }
        };

        self.manager.update_heartbeat(conn_id).await;

        match message {
            ClientMessage::Heartbeat => Ok(()),
            ClientMessage::TextInput { text } => self.handle_text_input(conn_id, conn, text).await,
            ClientMessage::AudioInput { audio_data } => {
                self.handle_audio_input(conn_id, conn, audio_data).await
            }
            ClientMessage::SystemStatus => {
                let status = ServerMessage::status(
                    self.manager.get_active_count().await,
                    self.total_queries.load(Ordering::Relaxed),
                );
                conn.send_text(&status.serialize()?).await
            }
            ClientMessage::Unknown => {
                warn!(connection_id = %conn_id, "忽略未识别的消息类型");
                Ok(())
            }
        }
    }

    /// 处理文本输入
    ///
    /// 立即回"思考中"确认，LLM调用作为任务交给调度器；
    /// 等待结果、回发、TTS和记忆持久化都在独立任务中进行，
    /// 不阻塞本连接后续消息的分发。
    async fn handle_text_input(
        &self,
        conn_id: ConnectionId,
        conn: &Arc<dyn ClientConnection>,
        text: String,
    ) -> XiaoyouResult<()> {
        self.total_queries.fetch_add(1, Ordering::Relaxed);
        self.memory.add_message("user", &text).await;

        conn.send_text(&ServerMessage::system("小优正在思考中...").serialize()?)
            .await?;

        let llm = Arc::clone(&self.llm);
        let history = self.memory.history().await;
        let user_id = conn_id.to_string();
        let prompt = text.clone();
        let task_id = self
            .scheduler
            .schedule_task(
                TaskPayload::from_async(move || async move {
                    let reply = llm.query(&user_id, &prompt, &history).await?;
                    Ok(Value::String(reply))
                }),
                "llm_query",
                TaskPriority::High,
                TaskLane::Default,
                None,
            )
            .await?;

        let scheduler = self.scheduler.clone();
        let conn = Arc::clone(conn);
        let tts = Arc::clone(&self.tts);
        let memory = Arc::clone(&self.memory);
        tokio::spawn(async move {
            let reply = match scheduler.wait_result(task_id).await {
                Ok(value) => value.as_str().unwrap_or_default().to_string(),
                Err(e) => {
                    warn!(connection_id = %conn_id, error = %e, "LLM调用失败");
                    "抱歉，我刚才走神了，能再说一遍吗？".to_string()
                }
            };

            let raw = match ServerMessage::message(reply.clone()).serialize() {
                Ok(raw) => raw,
                Err(e) => {
                    warn!(connection_id = %conn_id, error = %e, "回复序列化失败");
                    return;
                }
            };
            if let Err(e) = conn.send_text(&raw).await {
                warn!(connection_id = %conn_id, error = %e, "回复发送失败");
                return;
            }

            // TTS走GPU通道，尽力而为
            let speak_text = reply.clone();
            let tts_result = scheduler
                .schedule_gpu_task(
                    TaskPayload::from_async(move || async move {
                        tts.speak(&speak_text).await?;
                        Ok(Value::Null)
                    }),
                    "tts_speak",
                    TaskPriority::Low,
                )
                .await;
            if let Err(e) = tts_result {
                debug!(error = %e, "TTS任务提交失败（忽略）");
            }

            memory.add_message("assistant", &reply).await;
            if memory.should_auto_save().await {
                let save_result = scheduler
                    .schedule_task(
                        TaskPayload::from_async(move || async move {
                            memory.save().await?;
                            Ok(Value::Null)
                        }),
                        "memory_save",
                        TaskPriority::Low,
                        TaskLane::Default,
                        None,
                    )
                    .await;
                if let Err(e) = save_result {
                    debug!(error = %e, "记忆持久化任务提交失败（忽略）");
                }
            }
        });

        Ok(())
    }

    /// 处理语音输入
    ///
    /// 识别是模型调用，和文本输入一样交给调度器后台执行，
    /// 结果由独立任务回发，接收循环不等待。
    /// 响应类型为`transcription`，与文本回复区分；
    /// 识别失败仍回同类型消息说明失败，不断开连接。
    async fn handle_audio_input(
        &self,
        conn_id: ConnectionId,
        conn: &Arc<dyn ClientConnection>,
        audio_data: String,
    ) -> XiaoyouResult<()> {
        let stt = Arc::clone(&self.stt);
        let task_id = self
            .scheduler
            .schedule_cpu_task(
                TaskPayload::from_async(move || async move {
                    let text = stt.transcribe(audio_data.as_bytes()).await?;
                    Ok(Value::String(text))
                }),
                "stt_transcribe",
                TaskPriority::High,
            )
            .await?;

        let scheduler = self.scheduler.clone();
        let conn = Arc::clone(conn);
        tokio::spawn(async move {
            let content = match scheduler.wait_result(task_id).await {
                Ok(value) => value.as_str().unwrap_or_default().to_string(),
                Err(e) => {
                    warn!(connection_id = %conn_id, error = %e, "语音识别失败");
                    "语音识别失败了，请再试一次".to_string()
                }
            };
            match ServerMessage::transcription(content).serialize() {
                Ok(raw) => {
                    if let Err(e) = conn.send_text(&raw).await {
                        warn!(connection_id = %conn_id, error = %e, "识别结果发送失败");
                    }
                }
                Err(e) => warn!(connection_id = %conn_id, error = %e, "识别结果序列化失败"),
            }
        });

        Ok(())
    }
}
