use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Mutex;

use tokio::sync::Notify;

use xiaoyou_domain::{TaskId, TaskPriority};

/// 队列条目，排序键为 (优先级降序, 插入序号升序)
#[derive(Debug)]
struct QueueEntry {
    priority: TaskPriority,
    seq: u64,
    task_id: TaskId,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap是最大堆：优先级高者先出，同优先级按插入顺序FIFO
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// 多worker共享的优先级任务队列
pub(crate) struct TaskQueue {
    heap: Mutex<BinaryHeap<QueueEntry>>,
    notify: Notify,
    next_seq: AtomicU64,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::new()),
            notify: Notify::new(),
            next_seq: AtomicU64::new(0),
        }
    }

    pub fn push(&self, priority: TaskPriority, task_id: TaskId) {
        let seq = self.next_seq.fetch_add(1, AtomicOrdering::Relaxed);
        self.heap
            .lock()
            .expect("task queue lock poisoned")
            .push(QueueEntry {
                priority,
                seq,
                task_id,
            });
        self.notify.notify_one();
    }

    pub fn try_pop(&self) -> Option<TaskId> {
        let mut heap = self.heap.lock().expect("task queue lock poisoned");
        let entry = heap.pop()?;
        if !heap.is_empty() {
            // 队列中还有条目时把通知补给下一个等待的worker
            self.notify.notify_one();
        }
        Some(entry.task_id)
    }

    /// 阻塞等待直到取到一个任务
    pub async fn pop(&self) -> TaskId {
        loop {
            // 先注册通知再检查队列，避免丢失唤醒
            let notified = self.notify.notified();
            if let Some(task_id) = self.try_pop() {
                return task_id;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_higher_priority_pops_first() {
        let queue = TaskQueue::new();
        let low = TaskId::new();
        let high = TaskId::new();
        queue.push(TaskPriority::Low, low);
        queue.push(TaskPriority::High, high);

        assert_eq!(queue.try_pop(), Some(high));
        assert_eq!(queue.try_pop(), Some(low));
        assert_eq!(queue.try_pop(), None);
    }

    #[test]
    fn test_equal_priority_is_fifo() {
        let queue = TaskQueue::new();
        let ids: Vec<TaskId> = (0..5).map(|_| TaskId::new()).collect();
        for id in &ids {
            queue.push(TaskPriority::Normal, *id);
        }
        for id in &ids {
            assert_eq!(queue.try_pop(), Some(*id));
        }
    }

    #[test]
    fn test_mixed_priorities() {
        let queue = TaskQueue::new();
        let n1 = TaskId::new();
        let c = TaskId::new();
        let n2 = TaskId::new();
        queue.push(TaskPriority::Normal, n1);
        queue.push(TaskPriority::Critical, c);
        queue.push(TaskPriority::Normal, n2);

        assert_eq!(queue.try_pop(), Some(c));
        assert_eq!(queue.try_pop(), Some(n1));
        assert_eq!(queue.try_pop(), Some(n2));
    }

    #[tokio::test]
    async fn test_pop_waits_for_push() {
        let queue = std::sync::Arc::new(TaskQueue::new());
        let id = TaskId::new();

        let waiter = {
            let queue = std::sync::Arc::clone(&queue);
            tokio::spawn(async move { queue.pop().await })
        };

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        queue.push(TaskPriority::Normal, id);

        assert_eq!(waiter.await.unwrap(), id);
    }
}
