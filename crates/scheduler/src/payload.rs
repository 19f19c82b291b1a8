use std::future::Future;

use futures::future::BoxFuture;
use serde_json::Value;

use xiaoyou_core::XiaoyouResult;

/// 任务执行结果：JSON值或错误
pub type TaskOutput = XiaoyouResult<Value>;

/// 可调度的执行体
///
/// 提交后由调度器独占持有，出队执行后立即释放，
/// 只有元数据（状态/结果）保留在任务表中。
pub enum TaskPayload {
    /// 异步执行体（worker上直接await）
    Async(Box<dyn FnOnce() -> BoxFuture<'static, TaskOutput> + Send>),
    /// 同步阻塞执行体（通过spawn_blocking下放到线程池，避免阻塞事件循环）
    Blocking(Box<dyn FnOnce() -> TaskOutput + Send>),
}

impl TaskPayload {
    pub fn from_async<F, Fut>(f: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = TaskOutput> + Send + 'static,
    {
        TaskPayload::Async(Box::new(move || Box::pin(f())))
    }

    pub fn from_blocking<F>(f: F) -> Self
    where
        F: FnOnce() -> TaskOutput + Send + 'static,
    {
        TaskPayload::Blocking(Box::new(f))
    }
}

impl std::fmt::Debug for TaskPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskPayload::Async(_) => f.write_str("TaskPayload::Async"),
            TaskPayload::Blocking(_) => f.write_str("TaskPayload::Blocking"),
        }
    }
}
