//! 后台维护循环
//!
//! 两个相互独立、可取消的无限循环：心跳清扫和任务表清理。
//! 单次迭代出错只记录日志后继续，循环被取消后不会自动重启，
//! 重启由持有方负责。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use xiaoyou_scheduler::TaskScheduler;

use crate::connection_manager::ConnectionManager;

/// 启动心跳清扫循环
pub fn spawn_heartbeat_sweep(
    manager: Arc<ConnectionManager>,
    interval: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(interval_secs = interval.as_secs(), "心跳清扫循环已启动");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = manager.check_heartbeats().await;
                    if removed > 0 {
                        debug!(removed, "心跳清扫移除超时连接");
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("心跳清扫循环退出");
                    break;
                }
            }
        }
    })
}

/// 启动任务表清理循环
pub fn spawn_task_cleanup(
    scheduler: TaskScheduler,
    interval: Duration,
    retention: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(interval_secs = interval.as_secs(), "任务表清理循环已启动");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = scheduler.clean_completed_tasks(retention).await;
                    if removed > 0 {
                        debug!(removed, "任务表清理移除过期终态任务");
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("任务表清理循环退出");
                    break;
                }
            }
        }
    })
}
