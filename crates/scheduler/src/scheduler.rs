use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, oneshot, Mutex, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use xiaoyou_core::{TraceContext, XiaoyouError, XiaoyouResult};
use xiaoyou_domain::{TaskId, TaskInfo, TaskLane, TaskPriority, TaskStatus};

use crate::payload::{TaskOutput, TaskPayload};
use crate::queue::TaskQueue;

/// 任务表与结果通道表，由调度器级异步锁统一保护
#[derive(Default)]
struct Tables {
    tasks: HashMap<TaskId, TaskInfo>,
    payloads: HashMap<TaskId, TaskPayload>,
    result_txs: HashMap<TaskId, oneshot::Sender<TaskOutput>>,
    result_rxs: HashMap<TaskId, oneshot::Receiver<TaskOutput>>,
}

struct Inner {
    queue: TaskQueue,
    tables: Mutex<Tables>,
    /// GPU全局互斥：任一时刻至多一个GPU任务在执行
    gpu_lock: Arc<Semaphore>,
    /// CPU密集型任务的有界并发
    cpu_pool: Arc<Semaphore>,
    running: AtomicBool,
    shutdown_tx: broadcast::Sender<()>,
    worker_handles: Mutex<Vec<JoinHandle<()>>>,
    periodic_handles: Mutex<Vec<JoinHandle<()>>>,
}

/// 全局任务调度器
///
/// 接受同步或异步执行体，按优先级出队，在不阻塞调用方的前提下
/// 按执行通道施加资源纪律（GPU串行、CPU有界、默认通道下放线程）。
#[derive(Clone)]
pub struct TaskScheduler {
    inner: Arc<Inner>,
}

impl TaskScheduler {
    pub fn new(cpu_pool_size: usize) -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);
        Self {
            inner: Arc::new(Inner {
                queue: TaskQueue::new(),
                tables: Mutex::new(Tables::default()),
                gpu_lock: Arc::new(Semaphore::new(1)),
                cpu_pool: Arc::new(Semaphore::new(cpu_pool_size.max(1))),
                running: AtomicBool::new(false),
                shutdown_tx,
                worker_handles: Mutex::new(Vec::new()),
                periodic_handles: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// 启动worker消费循环；重复启动是无操作
    pub async fn start(&self, worker_count: usize) {
        if self.inner.running.swap(true, Ordering::AcqRel) {
            warn!("调度器已在运行，忽略重复启动");
            return;
        }

        let mut handles = self.inner.worker_handles.lock().await;
        for worker_id in 0..worker_count.max(1) {
            let inner = Arc::clone(&self.inner);
            let shutdown_rx = self.inner.shutdown_tx.subscribe();
            handles.push(tokio::spawn(worker_loop(worker_id, inner, shutdown_rx)));
        }
        info!(worker_count, "任务调度器已启动");
    }

    /// 提交任务，返回任务id
    ///
    /// 未指定trace id时继承调用方上下文中的值。
    pub async fn schedule_task(
        &self,
        payload: TaskPayload,
        name: impl Into<String>,
        priority: TaskPriority,
        lane: TaskLane,
        trace_id: Option<String>,
    ) -> XiaoyouResult<TaskId> {
        if !self.is_running() {
            return Err(XiaoyouError::SchedulerNotRunning);
        }

        let trace_id = trace_id.unwrap_or_else(TraceContext::current);
        let info = TaskInfo::new(name, priority, lane, trace_id);
        let task_id = info.id;
        let (tx, rx) = oneshot::channel();

        {
            let mut tables = self.inner.tables.lock().await;
            tables.payloads.insert(task_id, payload);
            tables.result_txs.insert(task_id, tx);
            tables.result_rxs.insert(task_id, rx);
            tables.tasks.insert(task_id, info);
        }

        self.inner.queue.push(priority, task_id);
        debug!(%task_id, ?priority, ?lane, "任务已入队");
        Ok(task_id)
    }

    /// 提交CPU密集型任务
    pub async fn schedule_cpu_task(
        &self,
        payload: TaskPayload,
        name: impl Into<String>,
        priority: TaskPriority,
    ) -> XiaoyouResult<TaskId> {
        self.schedule_task(payload, name, priority, TaskLane::CpuBound, None)
            .await
    }

    /// 提交GPU密集型任务
    pub async fn schedule_gpu_task(
        &self,
        payload: TaskPayload,
        name: impl Into<String>,
        priority: TaskPriority,
    ) -> XiaoyouResult<TaskId> {
        self.schedule_task(payload, name, priority, TaskLane::GpuBound, None)
            .await
    }

    /// 领取任务的结果future（每个任务只能领取一次）
    ///
    /// future在任务进入终态时恰好解析一次；重复查询走`get_task_status`。
    pub async fn get_task_future(&self, task_id: TaskId) -> Option<oneshot::Receiver<TaskOutput>> {
        self.inner.tables.lock().await.result_rxs.remove(&task_id)
    }

    /// 等待任务完成并取回结果
    pub async fn wait_result(&self, task_id: TaskId) -> TaskOutput {
        let rx = self
            .get_task_future(task_id)
            .await
            .ok_or_else(|| XiaoyouError::TaskNotFound {
                id: task_id.to_string(),
            })?;
        rx.await.map_err(|_| {
            XiaoyouError::Internal(format!("任务 {task_id} 的结果通道已关闭"))
        })?
    }

    pub async fn get_task_status(&self, task_id: TaskId) -> Option<TaskInfo> {
        self.inner.tables.lock().await.tasks.get(&task_id).cloned()
    }

    /// 取消任务
    ///
    /// PENDING任务立即标记取消并解析其future；RUNNING任务只设置
    /// 协作取消标志（不强制中断线程上的执行体）；终态或未知任务返回false。
    pub async fn cancel_task(&self, task_id: TaskId) -> bool {
        let mut tables = self.inner.tables.lock().await;
        let Some(info) = tables.tasks.get_mut(&task_id) else {
            return false;
        };
        if info.status.is_terminal() {
            return false;
        }

        info.cancel_requested = true;
        match info.status {
            TaskStatus::Pending => {
                info.update_status(TaskStatus::Cancelled);
                info.error = Some("任务在执行前被取消".to_string());
                tables.payloads.remove(&task_id);
                if let Some(tx) = tables.result_txs.remove(&task_id) {
                    let _ = tx.send(Err(XiaoyouError::TaskCancelled {
                        id: task_id.to_string(),
                    }));
                }
                info!(%task_id, "PENDING任务已取消");
            }
            TaskStatus::Running => {
                info!(%task_id, "RUNNING任务收到协作取消请求");
            }
            _ => {}
        }
        true
    }

    /// 执行体轮询协作取消标志的入口
    pub async fn is_cancel_requested(&self, task_id: TaskId) -> bool {
        self.inner
            .tables
            .lock()
            .await
            .tasks
            .get(&task_id)
            .map(|info| info.cancel_requested)
            .unwrap_or(false)
    }

    /// 启动周期性任务：每隔interval以新任务的形式重新提交factory产物
    ///
    /// 下次运行时刻从固定锚点推算，不随循环体耗时漂移。
    /// 周期循环不按id单独取消，由调度器stop时统一终止。
    pub async fn schedule_periodic_task<F>(
        &self,
        factory: F,
        interval: Duration,
        name: impl Into<String>,
        priority: TaskPriority,
    ) where
        F: Fn() -> TaskPayload + Send + Sync + 'static,
    {
        let name = name.into();
        let scheduler = self.clone();
        let mut shutdown_rx = self.inner.shutdown_tx.subscribe();

        let handle = tokio::spawn(async move {
            let anchor = tokio::time::Instant::now();
            let mut next = anchor + interval;
            let mut run: u64 = 0;
            loop {
                tokio::select! {
                    _ = tokio::time::sleep_until(next) => {
                        run += 1;
                        let task_name = format!("{name}#{run}");
                        match scheduler
                            .schedule_task(factory(), task_name, priority, TaskLane::Default, None)
                            .await
                        {
                            Ok(task_id) => debug!(%task_id, name = %name, run, "周期任务已提交"),
                            Err(XiaoyouError::SchedulerNotRunning) => {
                                info!(name = %name, "调度器已停止，周期任务循环退出");
                                break;
                            }
                            Err(e) => warn!(name = %name, error = %e, "周期任务提交失败"),
                        }
                        next += interval;
                    }
                    _ = shutdown_rx.recv() => {
                        info!(name = %name, "周期任务循环收到关闭信号");
                        break;
                    }
                }
            }
        });

        self.inner.periodic_handles.lock().await.push(handle);
    }

    /// 清理终态超过max_age的任务表条目，返回清理数量
    ///
    /// 不触碰PENDING/RUNNING条目。
    pub async fn clean_completed_tasks(&self, max_age: Duration) -> usize {
        let cutoff = chrono::Utc::now()
            - chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::zero());
        let mut tables = self.inner.tables.lock().await;

        let expired: Vec<TaskId> = tables
            .tasks
            .iter()
            .filter(|(_, info)| {
                info.status.is_terminal()
                    && info.completed_at.map(|t| t < cutoff).unwrap_or(false)
            })
            .map(|(id, _)| *id)
            .collect();

        for id in &expired {
            tables.tasks.remove(id);
            tables.result_rxs.remove(id);
        }

        if !expired.is_empty() {
            info!(count = expired.len(), "已清理过期任务条目");
        }
        expired.len()
    }

    /// 停止调度器：取消所有worker与周期循环，清空future表
    ///
    /// 线程池中在途的阻塞工作不等待（尽力而为停止，不做优雅排空）。
    pub async fn stop(&self, timeout: Option<Duration>) {
        if !self.inner.running.swap(false, Ordering::AcqRel) {
            return;
        }
        info!("任务调度器停止中");

        let _ = self.inner.shutdown_tx.send(());

        for handle in self.inner.periodic_handles.lock().await.drain(..) {
            handle.abort();
        }

        let handles: Vec<JoinHandle<()>> =
            self.inner.worker_handles.lock().await.drain(..).collect();
        for handle in handles {
            match timeout {
                Some(t) => {
                    if tokio::time::timeout(t, handle).await.is_err() {
                        warn!("worker退出超时");
                    }
                }
                None => {
                    let _ = handle.await;
                }
            }
        }

        let mut tables = self.inner.tables.lock().await;
        tables.payloads.clear();
        tables.result_txs.clear();
        tables.result_rxs.clear();

        info!("任务调度器已停止");
    }
}

/// worker消费循环：单个任务的任何异常都不会终止循环
async fn worker_loop(worker_id: usize, inner: Arc<Inner>, mut shutdown_rx: broadcast::Receiver<()>) {
    debug!(worker_id, "worker启动");
    loop {
        tokio::select! {
            task_id = inner.queue.pop() => {
                if let Err(e) = execute_task(&inner, task_id).await {
                    error!(worker_id, %task_id, error = %e, "任务簿记异常，worker继续运行");
                }
            }
            _ = shutdown_rx.recv() => {
                debug!(worker_id, "worker收到关闭信号");
                break;
            }
        }
    }
}

async fn execute_task(inner: &Arc<Inner>, task_id: TaskId) -> XiaoyouResult<()> {
    // 取出执行体并检查出队前的取消标志
    let (payload, lane, trace_id) = {
        let mut tables = inner.tables.lock().await;
        let Some(info) = tables.tasks.get_mut(&task_id) else {
            // 任务表条目可能已被stop/清理移除
            tables.payloads.remove(&task_id);
            return Ok(());
        };
        if info.status.is_terminal() {
            // 排队期间已被取消，执行体直接丢弃
            tables.payloads.remove(&task_id);
            return Ok(());
        }
        if info.cancel_requested {
            info.update_status(TaskStatus::Cancelled);
            info.error = Some("任务在执行前被取消".to_string());
            tables.payloads.remove(&task_id);
            if let Some(tx) = tables.result_txs.remove(&task_id) {
                let _ = tx.send(Err(XiaoyouError::TaskCancelled {
                    id: task_id.to_string(),
                }));
            }
            return Ok(());
        }

        let lane = info.lane;
        let trace_id = info.trace_id.clone();
        let payload = tables.payloads.remove(&task_id).ok_or_else(|| {
            XiaoyouError::Internal(format!("任务 {task_id} 缺少执行体"))
        })?;
        (payload, lane, trace_id)
    };

    // 先获取通道许可再标记RUNNING，保证GPU互斥可以从状态上观测到
    let _permit = match lane {
        TaskLane::GpuBound => Some(
            Arc::clone(&inner.gpu_lock)
                .acquire_owned()
                .await
                .map_err(|e| XiaoyouError::Internal(format!("GPU锁获取失败: {e}")))?,
        ),
        TaskLane::CpuBound => Some(
            Arc::clone(&inner.cpu_pool)
                .acquire_owned()
                .await
                .map_err(|e| XiaoyouError::Internal(format!("CPU池许可获取失败: {e}")))?,
        ),
        TaskLane::Default => None,
    };

    {
        let mut tables = inner.tables.lock().await;
        if let Some(info) = tables.tasks.get_mut(&task_id) {
            info.update_status(TaskStatus::Running);
        }
    }
    debug!(%task_id, ?lane, trace = %trace_id, "任务开始执行");

    let outcome = TraceContext::scope(trace_id, run_payload(payload)).await;

    let mut tables = inner.tables.lock().await;
    if let Some(info) = tables.tasks.get_mut(&task_id) {
        match &outcome {
            Ok(value) => {
                info.result = Some(value.clone());
                info.update_status(TaskStatus::Completed);
                debug!(
                    %task_id,
                    duration_ms = info.execution_duration_ms(),
                    "任务执行完成"
                );
            }
            Err(e) => {
                info.error = Some(e.to_string());
                info.update_status(TaskStatus::Failed);
                warn!(%task_id, error = %e, "任务执行失败");
            }
        }
    }
    if let Some(tx) = tables.result_txs.remove(&task_id) {
        // 接收端可能已被丢弃，发送失败不是错误
        let _ = tx.send(outcome);
    }
    Ok(())
}

/// 执行体运行：同步闭包下放到阻塞线程池，异步体直接await
///
/// 任务本地的trace id不跨线程传播，阻塞执行体在目标线程上
/// 重新进入同一trace作用域。
/// 执行体抛出的错误被捕获为任务结果，绝不向worker循环传播。
async fn run_payload(payload: TaskPayload) -> TaskOutput {
    match payload {
        TaskPayload::Async(factory) => factory().await,
        TaskPayload::Blocking(func) => {
            let trace_id = TraceContext::current();
            let handle =
                tokio::task::spawn_blocking(move || TraceContext::sync_scope(trace_id, func));
            match handle.await {
                Ok(output) => output,
                Err(e) => Err(XiaoyouError::TaskExecution(format!(
                    "阻塞执行体join失败: {e}"
                ))),
            }
        }
    }
}
