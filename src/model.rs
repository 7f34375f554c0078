use std::fmt;

use crate::errors::WorkError;

/// Порядковый номер задачи, выдаётся в `submit` начиная с 0.
///
/// Номер берётся до отправки в канал, поэтому отклонённый или брошенный
/// `submit` оставляет пропуск: номера строго возрастают, но не обязательно
/// подряд.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Номер воркера, 1..=N.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WorkerId(pub usize);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Завершённая задача в канале результатов.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion<R> {
    pub task: TaskId,
    pub worker: WorkerId,
    pub outcome: Result<R, WorkError>,
}

impl<R> Completion<R> {
    #[inline]
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn into_result(self) -> Result<R, WorkError> {
        self.outcome
    }
}

#[derive(Debug, Clone)]
pub struct PoolMetrics {
    pub workers: usize,
    pub live_workers: usize,
    pub busy_workers: usize,
    pub queued_tasks: usize,
    pub submitted_tasks: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
}

impl PoolMetrics {
    pub fn utilization(&self) -> f64 {
        if self.live_workers == 0 {
            return 0.0;
        }
        self.busy_workers as f64 / self.live_workers as f64
    }

    pub fn success_rate(&self) -> f64 {
        let total = self.completed_tasks + self.failed_tasks;
        if total == 0 {
            return 1.0;
        }
        self.completed_tasks as f64 / total as f64
    }

    /// Принятые `submit` задачи, ещё не давшие результат.
    pub fn in_flight(&self) -> usize {
        self.submitted_tasks
            .saturating_sub(self.completed_tasks + self.failed_tasks)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOrdering {
    /// По `TaskId`.
    Ordered,
    /// В порядке поступления.
    UnOrdered,
}
