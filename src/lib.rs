//! Ограниченный async пул воркеров с каналами задач и результатов
//!
//! # Features
//! - Фиксированное число воркеров на tokio runtime
//! - Ограниченные каналы задач и результатов с backpressure, ёмкость 0 для rendezvous
//! - Однократное явное закрытие, повторное закрытие - ошибка
//! - Поток результатов закрывается наблюдателем только после выхода всех воркеров
//! - Изоляция паник или остановка воркера, timeout задачи, отмена
//! - Метрики и периодический мониторинг
//!
//! ```no_run
//! use async_workpool::{Config, JoinOrdering, WorkerPool};
//!
//! # async fn demo() -> async_workpool::errors::Result<()> {
//! let pool = WorkerPool::new(Config::new(3, 0, 0), |x: u64| x * 2)?;
//! let results = pool.results();
//!
//! let producer = tokio::spawn(async move {
//!     for x in 1..=5 {
//!         pool.submit(x).await?;
//!     }
//!     pool.close()
//! });
//!
//! let doubled = results.collect(JoinOrdering::Ordered).await;
//! producer.await.expect("producer panicked")?;
//! assert_eq!(doubled.len(), 5);
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod errors;
pub mod model;
pub mod pool;
pub mod results;
pub mod shared;

pub use errors::{Error, WorkError};
pub use model::{Completion, JoinOrdering, PoolMetrics, TaskId, WorkerId};
pub use pool::{Config, FailurePolicy, WorkerPool};
pub use results::Results;
