//! Общие счётчики без гонок данных.
//!
//! [`CounterActor`] отдаёт счётчик одной задаче и сериализует изменения через
//! сообщения, блокировок нет вовсе. [`ViewCounter`] держит значение за
//! read/write lock: читатели делят его, писатель исключает всех.

use crate::errors::{Error, Result};
use tokio::{
    sync::{mpsc, oneshot, RwLock, RwLockReadGuard},
    task::JoinHandle,
};
use tracing::trace;

enum Command {
    Increment,
    Get(oneshot::Sender<u64>),
    Stop,
}

/// Клонируемый handle к [`CounterActor`].
#[derive(Clone)]
pub struct CounterHandle {
    commands: mpsc::Sender<Command>,
}

impl CounterHandle {
    pub async fn increment(&self) -> Result<()> {
        self.commands
            .send(Command::Increment)
            .await
            .map_err(|_| Error::Disconnected)
    }

    pub async fn get(&self) -> Result<u64> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Get(tx))
            .await
            .map_err(|_| Error::Disconnected)?;
        rx.await.map_err(|_| Error::Disconnected)
    }
}

/// Счётчик, которым владеет одна задача.
pub struct CounterActor {
    handle: CounterHandle,
    task: JoinHandle<u64>,
}

impl CounterActor {
    /// Запускает задачу-владельца. `mailbox` ограничивает очередь команд (минимум 1).
    pub fn spawn(mailbox: usize) -> Self {
        let (tx, mut rx) = mpsc::channel(mailbox.max(1));

        let task = tokio::spawn(async move {
            let mut value = 0u64;
            while let Some(command) = rx.recv().await {
                match command {
                    Command::Increment => value += 1,
                    Command::Get(reply) => {
                        let _ = reply.send(value);
                    }
                    Command::Stop => break,
                }
            }
            trace!(value = value, "counter actor stopped");
            value
        });

        Self {
            handle: CounterHandle { commands: tx },
            task,
        }
    }

    pub fn handle(&self) -> CounterHandle {
        self.handle.clone()
    }

    /// Останавливает актор после уже поставленных команд и возвращает итоговое
    /// значение. Оставшиеся handles дальше получают [`Error::Disconnected`].
    pub async fn shutdown(self) -> Result<u64> {
        self.handle
            .commands
            .send(Command::Stop)
            .await
            .map_err(|_| Error::Disconnected)?;
        self.task.await.map_err(|_| Error::Disconnected)
    }
}

/// Счётчик просмотров за read/write lock.
#[derive(Default)]
pub struct ViewCounter {
    views: RwLock<u64>,
}

impl ViewCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Значение после этого просмотра.
    pub async fn record_view(&self) -> u64 {
        let mut views = self.views.write().await;
        *views += 1;
        *views
    }

    /// `None`, пока lock держит читатель или писатель.
    pub fn try_record_view(&self) -> Option<u64> {
        let mut views = self.views.try_write().ok()?;
        *views += 1;
        Some(*views)
    }

    pub async fn views(&self) -> u64 {
        *self.views.read().await
    }

    /// Доступ на чтение: другие читатели проходят, писатели ждут.
    pub async fn read(&self) -> RwLockReadGuard<'_, u64> {
        self.views.read().await
    }
}
