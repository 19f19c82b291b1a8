use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use xiaoyou_core::{AppConfig, LlmService, MemoryService, SttService, TtsService};
use xiaoyou_scheduler::TaskScheduler;
use xiaoyou_server::collaborators::{CompanionLlm, InMemoryMemory, PlaceholderStt, SilentTts};
use xiaoyou_server::maintenance::{spawn_heartbeat_sweep, spawn_task_cleanup};
use xiaoyou_server::{create_router, AppState, ConnectionManager, MessageHandler};

/// 主应用程序
///
/// 组装根：每个组件在这里显式构造一次并以引用传递，
/// 不使用隐藏的全局单例。
pub struct Application {
    config: AppConfig,
    scheduler: TaskScheduler,
    manager: Arc<ConnectionManager>,
    handler: Arc<MessageHandler>,
}

impl Application {
    pub fn new(config: AppConfig) -> Self {
        info!("初始化应用程序");

        let scheduler = TaskScheduler::new(config.scheduler.cpu_pool_size);
        let manager = Arc::new(ConnectionManager::new(
            config.server.max_connections,
            Duration::from_secs(config.server.heartbeat_timeout_seconds),
        ));

        // 协作方实现在此处选定注入，核心代码不做运行时探测
        let llm: Arc<dyn LlmService> = Arc::new(CompanionLlm::new(&config.companion.persona_name));
        let stt: Arc<dyn SttService> = Arc::new(PlaceholderStt);
        let tts: Arc<dyn TtsService> = Arc::new(SilentTts);
        if !config.companion.tts_enabled {
            info!("TTS已在配置中禁用，使用静默实现");
        }
        let memory: Arc<dyn MemoryService> =
            Arc::new(InMemoryMemory::new(config.companion.auto_save_threshold));

        let handler = Arc::new(MessageHandler::new(
            Arc::clone(&manager),
            scheduler.clone(),
            llm,
            stt,
            tts,
            memory,
        ));

        Self {
            config,
            scheduler,
            manager,
            handler,
        }
    }

    /// 运行应用程序直至收到关闭信号
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        self.scheduler.start(self.config.scheduler.worker_count).await;

        // 两个后台维护循环：心跳清扫和任务表清理
        let sweep_handle = spawn_heartbeat_sweep(
            Arc::clone(&self.manager),
            Duration::from_secs(self.config.server.heartbeat_check_interval_seconds),
            shutdown_rx.resubscribe(),
        );
        let cleanup_handle = spawn_task_cleanup(
            self.scheduler.clone(),
            Duration::from_secs(self.config.scheduler.task_cleanup_interval_seconds),
            Duration::from_secs(self.config.scheduler.task_retention_seconds),
            shutdown_rx.resubscribe(),
        );

        let state = AppState {
            handler: Arc::clone(&self.handler),
            manager: Arc::clone(&self.manager),
        };
        let app = create_router(state)
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive());

        let listener = TcpListener::bind(&self.config.server.bind_address)
            .await
            .with_context(|| format!("绑定地址失败: {}", self.config.server.bind_address))?;
        info!("服务已启动，监听 {}", self.config.server.bind_address);

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await
            .context("HTTP服务运行失败")?;

        info!("HTTP服务已停止，关闭后台组件");

        // 维护循环收到同一关闭信号后自行退出
        for (name, handle) in [("心跳清扫", sweep_handle), ("任务表清理", cleanup_handle)] {
            match tokio::time::timeout(Duration::from_secs(5), handle).await {
                Ok(_) => {}
                Err(_) => warn!("{name}循环退出超时"),
            }
        }

        self.scheduler.stop(Some(Duration::from_secs(10))).await;
        info!("应用程序已停止");
        Ok(())
    }
}
