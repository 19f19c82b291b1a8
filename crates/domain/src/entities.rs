use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 任务唯一标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// 任务优先级，数值越大越先出队
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default,
)]
pub enum TaskPriority {
    #[serde(rename = "LOW")]
    Low = 0,
    #[serde(rename = "NORMAL")]
    #[default]
    Normal = 1,
    #[serde(rename = "HIGH")]
    High = 2,
    #[serde(rename = "CRITICAL")]
    Critical = 3,
}

/// 任务执行通道
///
/// 决定任务走哪种执行策略：默认通道（短小辅助操作）、
/// CPU密集型（有界线程池）、GPU密集型（全局互斥串行）。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum TaskLane {
    #[serde(rename = "DEFAULT")]
    #[default]
    Default,
    #[serde(rename = "CPU_BOUND")]
    CpuBound,
    #[serde(rename = "GPU_BOUND")]
    GpuBound,
}

/// 任务生命周期状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "RUNNING")]
    Running,
    #[serde(rename = "COMPLETED")]
    Completed,
    #[serde(rename = "FAILED")]
    Failed,
    #[serde(rename = "CANCELLED")]
    Cancelled,
}

impl TaskStatus {
    /// 终态一旦进入不再改变
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

/// 任务元数据
///
/// 调度器独占任务表的所有权，调用方只持有TaskId，
/// 状态查询与结果等待都经过调度器。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskInfo {
    pub id: TaskId,
    pub name: String,
    pub priority: TaskPriority,
    pub lane: TaskLane,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub cancel_requested: bool,
    pub trace_id: String,
}

impl TaskInfo {
    pub fn new(
        name: impl Into<String>,
        priority: TaskPriority,
        lane: TaskLane,
        trace_id: String,
    ) -> Self {
        Self {
            id: TaskId::new(),
            name: name.into(),
            priority,
            lane,
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
            cancel_requested: false,
            trace_id,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }

    /// 状态迁移，只在首次进入时打时间戳
    pub fn update_status(&mut self, status: TaskStatus) {
        if self.status.is_terminal() {
            return;
        }
        self.status = status;
        match status {
            TaskStatus::Running => {
                if self.started_at.is_none() {
                    self.started_at = Some(Utc::now());
                }
            }
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled => {
                if self.completed_at.is_none() {
                    self.completed_at = Some(Utc::now());
                }
            }
            TaskStatus::Pending => {}
        }
    }

    pub fn execution_duration_ms(&self) -> Option<i64> {
        if let (Some(started), Some(completed)) = (self.started_at, self.completed_at) {
            Some((completed - started).num_milliseconds())
        } else {
            None
        }
    }
}
