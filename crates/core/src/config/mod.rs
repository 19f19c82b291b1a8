use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// 系统配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub scheduler: SchedulerConfig,
    pub companion: CompanionConfig,
}

/// WebSocket服务配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind_address: String,
    /// 连接数上限（准入控制）
    pub max_connections: usize,
    /// 心跳超时阈值（秒）
    pub heartbeat_timeout_seconds: u64,
    /// 心跳巡检间隔（秒）
    pub heartbeat_check_interval_seconds: u64,
}

/// 任务调度器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// 消费者worker数量
    pub worker_count: usize,
    /// CPU密集型任务线程池大小
    pub cpu_pool_size: usize,
    /// 已完成任务清理间隔（秒）
    pub task_cleanup_interval_seconds: u64,
    /// 终态任务保留时长（秒）
    pub task_retention_seconds: u64,
}

/// AI伴侣协作方配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompanionConfig {
    /// 伴侣名称（用于内置回复）
    pub persona_name: String,
    /// 对话记忆自动保存阈值（消息条数）
    pub auto_save_threshold: usize,
    /// 是否启用TTS合成
    pub tts_enabled: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                bind_address: "0.0.0.0:8765".to_string(),
                max_connections: 100,
                heartbeat_timeout_seconds: 60,
                heartbeat_check_interval_seconds: 30,
            },
            scheduler: SchedulerConfig {
                worker_count: 4,
                cpu_pool_size: 2,
                task_cleanup_interval_seconds: 600,
                task_retention_seconds: 3600,
            },
            companion: CompanionConfig {
                persona_name: "小优".to_string(),
                auto_save_threshold: 10,
                tts_enabled: false,
            },
        }
    }
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 加载顺序:
    /// 1. 默认配置
    /// 2. 配置文件（TOML格式）
    /// 3. 环境变量覆盖（前缀: XIAOYOU_）
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let defaults = AppConfig::default();
        let mut builder = ConfigBuilder::builder()
            .add_source(config::File::from_str(
                &toml::to_string(&defaults).context("序列化默认配置失败")?,
                FileFormat::Toml,
            ));

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("配置文件不存在: {path}"));
            }
        } else {
            // 尝试默认配置文件路径
            let default_paths = ["config/xiaoyou.toml", "xiaoyou.toml"];
            for path in &default_paths {
                if Path::new(path).exists() {
                    builder = builder.add_source(File::new(path, FileFormat::Toml));
                    break;
                }
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("XIAOYOU")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("解析配置失败")?;

        config.validate()?;
        Ok(config)
    }

    /// 校验配置合法性
    pub fn validate(&self) -> Result<()> {
        if self.server.max_connections == 0 {
            return Err(anyhow::anyhow!("server.max_connections 必须大于0"));
        }
        if self.server.heartbeat_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("server.heartbeat_timeout_seconds 必须大于0"));
        }
        if self.scheduler.worker_count == 0 {
            return Err(anyhow::anyhow!("scheduler.worker_count 必须大于0"));
        }
        if self.scheduler.cpu_pool_size == 0 {
            return Err(anyhow::anyhow!("scheduler.cpu_pool_size 必须大于0"));
        }
        if self.scheduler.task_retention_seconds == 0 {
            return Err(anyhow::anyhow!("scheduler.task_retention_seconds 必须大于0"));
        }
        Ok(())
    }
}
