//! 调用链追踪上下文
//!
//! 每条逻辑调用链持有一个trace id，通过tokio任务本地存储传播，
//! 不需要显式参数透传。作用域退出时自动恢复外层值。

use std::future::Future;

use uuid::Uuid;

tokio::task_local! {
    static TRACE_ID: String;
}

/// 未设置trace id时的哨兵值
pub const SYSTEM_TRACE_ID: &str = "system";

pub struct TraceContext;

impl TraceContext {
    /// 当前调用链的trace id，未设置时返回"system"
    pub fn current() -> String {
        TRACE_ID
            .try_with(|id| id.clone())
            .unwrap_or_else(|_| SYSTEM_TRACE_ID.to_string())
    }

    /// 生成一个新的trace id
    pub fn new_id() -> String {
        Uuid::new_v4().simple().to_string()
    }

    /// 在给定trace id的作用域内运行future
    ///
    /// 嵌套调用时内层值只在内层作用域可见，退出后恢复外层值。
    pub async fn scope<F>(trace_id: String, fut: F) -> F::Output
    where
        F: Future,
    {
        TRACE_ID.scope(trace_id, fut).await
    }

    /// 在给定trace id的作用域内运行同步闭包
    ///
    /// 任务本地值不会自动跨线程传播，下放到阻塞线程池的执行体
    /// 用这个入口显式带上调用链的trace id。
    pub fn sync_scope<F, R>(trace_id: String, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        TRACE_ID.sync_scope(trace_id, f)
    }
}
