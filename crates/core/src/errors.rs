use thiserror::Error;

/// 小优核心错误类型定义
#[derive(Debug, Error)]
pub enum XiaoyouError {
    #[error("调度器未运行")]
    SchedulerNotRunning,

    #[error("任务未找到: {id}")]
    TaskNotFound { id: String },

    #[error("任务已取消: {id}")]
    TaskCancelled { id: String },

    #[error("任务执行错误: {0}")]
    TaskExecution(String),

    #[error("连接IO错误: {0}")]
    ConnectionIo(String),

    #[error("协作方调用失败 ({collaborator}): {message}")]
    Collaborator {
        collaborator: &'static str,
        message: String,
    },

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

/// 统一的Result类型
pub type XiaoyouResult<T> = std::result::Result<T, XiaoyouError>;

impl XiaoyouError {
    /// 是否属于可恢复的单次调用失败（不应终止连接或worker循环）
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, XiaoyouError::Configuration(_))
    }
}
