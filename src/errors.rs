use std::time::Duration;

use crate::model::WorkerId;

pub type Result<T> = std::result::Result<T, Error>;

/// Ошибки операций пула и канала.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Конфигурация отклонена, воркеры не запущены.
    #[error("invalid configuration: {reason}")]
    Configuration { reason: String },

    /// Повторный `close` уже закрытого канала.
    #[error("channel closed twice")]
    DoubleClose,

    /// Канал больше не принимает значения.
    #[error("channel is closed")]
    Closed,

    /// Получателей не осталось, значение никто не заберёт.
    #[error("channel has no receivers left")]
    Disconnected,

    #[error("timed out waiting on the channel")]
    Timeout,
}

/// Сбой рабочей функции на одной задаче.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkError {
    #[error("worker {worker} panicked: {message}")]
    Panicked { worker: WorkerId, message: String },

    #[error("worker {worker} timed out after {after:?}")]
    TimedOut { worker: WorkerId, after: Duration },
}
