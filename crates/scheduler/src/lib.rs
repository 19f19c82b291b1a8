//! 全局任务调度器
//!
//! 优先级队列 + 固定worker池，按执行通道路由：
//! GPU密集型全局串行，CPU密集型有界并发，默认通道直接下放线程。
//! 混合时长（50毫秒到数十秒）的并发操作互不阻塞，是整个核心的
//! 正确性基础。

pub mod payload;
mod queue;
pub mod scheduler;

pub use payload::{TaskOutput, TaskPayload};
pub use scheduler::TaskScheduler;
