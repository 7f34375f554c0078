use super::{
    channel::{self, Receiver, Sender},
    errors::{Error, Result, WorkError},
    model::{Completion, PoolMetrics, TaskId, WorkerId},
    results::Results,
};
use futures::{
    future::{join_all, BoxFuture},
    FutureExt,
};
use std::{
    any::Any,
    env::VarError,
    future::Future,
    panic::AssertUnwindSafe,
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
};
use tokio::{task::JoinHandle, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Поведение воркера при панике рабочей функции.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Паника перехватывается и доставляется как `WorkError::Panicked`.
    /// Воркер продолжает работу.
    #[default]
    Isolate,
    /// Паника логируется и воркер останавливается. Результата для задачи нет,
    /// дальше пул работает на одного воркера меньше.
    Terminate,
}

/// Конфигурация пула воркеров
#[derive(Debug, Clone)]
pub struct Config {
    pub workers: usize,
    /// Буфер задач, 0 - передача rendezvous.
    pub task_capacity: usize,
    /// Буфер результатов, 0 - передача rendezvous.
    pub result_capacity: usize,
    /// Работает только для async задач: синхронную функцию после старта
    /// прервать нельзя.
    pub task_timeout: Option<Duration>,
    pub failure_policy: FailurePolicy,
}

impl Default for Config {
    fn default() -> Self {
        let num_cpus = num_cpus::get();
        Self {
            workers: num_cpus,
            task_capacity: num_cpus * 20,
            result_capacity: num_cpus * 20,
            task_timeout: None,
            failure_policy: FailurePolicy::Isolate,
        }
    }
}

impl Config {
    pub fn new(workers: usize, task_capacity: usize, result_capacity: usize) -> Self {
        Self {
            workers,
            task_capacity,
            result_capacity,
            ..Default::default()
        }
    }

    pub fn cpu_bound() -> Self {
        let num_cpus = num_cpus::get();
        Self {
            workers: num_cpus,
            task_capacity: num_cpus * 10,
            result_capacity: num_cpus * 10,
            task_timeout: None,
            failure_policy: FailurePolicy::Isolate,
        }
    }

    pub fn io_bound() -> Self {
        let num_cpus = num_cpus::get();
        Self {
            workers: num_cpus * 2,
            task_capacity: num_cpus * 64,
            result_capacity: num_cpus * 64,
            task_timeout: Some(Duration::from_secs(30)),
            failure_policy: FailurePolicy::Isolate,
        }
    }

    /// Конфигурация по умолчанию, переопределённая `WORKPOOL_WORKERS`,
    /// `WORKPOOL_TASK_CAPACITY`, `WORKPOOL_RESULT_CAPACITY` и
    /// `WORKPOOL_TASK_TIMEOUT_MS`.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Some(workers) = env_usize("WORKPOOL_WORKERS")? {
            config.workers = workers;
        }
        if let Some(capacity) = env_usize("WORKPOOL_TASK_CAPACITY")? {
            config.task_capacity = capacity;
        }
        if let Some(capacity) = env_usize("WORKPOOL_RESULT_CAPACITY")? {
            config.result_capacity = capacity;
        }
        if let Some(millis) = env_usize("WORKPOOL_TASK_TIMEOUT_MS")? {
            config.task_timeout = Some(Duration::from_millis(millis as u64));
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::Configuration {
                reason: "worker count must be positive".into(),
            });
        }
        if self.task_timeout == Some(Duration::ZERO) {
            return Err(Error::Configuration {
                reason: "task timeout must be non-zero".into(),
            });
        }
        Ok(())
    }
}

fn env_usize(key: &str) -> Result<Option<usize>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<usize>()
            .map(Some)
            .map_err(|_| Error::Configuration {
                reason: format!("{key}={raw:?} is not a non-negative integer"),
            }),
        Err(VarError::NotPresent) => Ok(None),
        Err(VarError::NotUnicode(raw)) => Err(Error::Configuration {
            reason: format!("{key}={raw:?} is not valid unicode"),
        }),
    }
}

type WorkFn<T, R> = Arc<dyn Fn(T) -> BoxFuture<'static, R> + Send + Sync>;

struct Job<T> {
    id: TaskId,
    payload: T,
}

#[derive(Default)]
struct Counters {
    live_workers: AtomicUsize,
    busy_workers: AtomicUsize,
    submitted: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
}

/// Пул фиксированного размера из async воркеров с ограниченным каналом задач.
///
/// Воркеры запускаются при создании и живут, пока канал задач не закрыт и не
/// вычитан, или пока пул не отменён. Все результаты идут в один канал,
/// который закрывает отдельный наблюдатель после выхода всех воркеров.
/// Поэтому [`Results`] можно читать до `None`.
///
/// Результаты нужно читать одновременно с отправкой: при полных каналах
/// `submit` ждёт воркеров, а воркеры ждут потребителя.
pub struct WorkerPool<T, R> {
    intake: Sender<Job<T>>,
    results: Receiver<Completion<R>>,
    counters: Arc<Counters>,
    next_task: AtomicU64,
    cancellation_token: CancellationToken,
    stopped: CancellationToken,
    config: Config,
}

impl<T, R> WorkerPool<T, R>
where
    T: Send + 'static,
    R: Send + 'static,
{
    /// Пул с синхронной рабочей функцией.
    ///
    /// Вызывать внутри tokio runtime.
    pub fn new<F>(config: Config, work: F) -> Result<Self>
    where
        F: Fn(T) -> R + Send + Sync + 'static,
    {
        Self::with_async(config, move |task| std::future::ready(work(task)))
    }

    /// Пул с async рабочей функцией.
    pub fn with_async<F, Fut>(config: Config, work: F) -> Result<Self>
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
    {
        config.validate()?;

        let work: WorkFn<T, R> = Arc::new(move |task: T| work(task).boxed());
        let (intake, jobs) = channel::bounded(config.task_capacity);
        let (completions, results) = channel::bounded(config.result_capacity);
        let counters = Arc::new(Counters::default());
        let cancellation_token = CancellationToken::new();
        let stopped = CancellationToken::new();

        let mut handles = Vec::with_capacity(config.workers);
        for ordinal in 1..=config.workers {
            let worker = Worker {
                id: WorkerId(ordinal),
                jobs: jobs.clone(),
                completions: completions.clone(),
                work: work.clone(),
                counters: counters.clone(),
                cancellation_token: cancellation_token.clone(),
                task_timeout: config.task_timeout,
                failure_policy: config.failure_policy,
            };
            counters.live_workers.fetch_add(1, Ordering::SeqCst);
            handles.push(tokio::spawn(worker.run()));
        }
        // Дальше получатель задач есть только у воркеров.
        drop(jobs);

        tokio::spawn(watch_workers(handles, completions, stopped.clone()));

        debug!(
            workers = config.workers,
            task_capacity = config.task_capacity,
            result_capacity = config.result_capacity,
            "worker pool started"
        );

        Ok(Self {
            intake,
            results,
            counters,
            next_task: AtomicU64::new(0),
            cancellation_token,
            stopped,
            config,
        })
    }

    /// Ставит задачу в очередь, ожидая, пока канал задач полон.
    ///
    /// `TaskId` выдаётся до отправки: отклонённый или брошенный до приёма
    /// вызов оставляет пропуск в номерах.
    ///
    /// # Errors
    ///
    /// - [`Error::Closed`] после [`close`](Self::close).
    /// - [`Error::Disconnected`] если не осталось ни одного воркера.
    pub async fn submit(&self, task: T) -> Result<TaskId> {
        let id = TaskId(self.next_task.fetch_add(1, Ordering::Relaxed));
        self.intake.send(Job { id, payload: task }).await?;
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        Ok(id)
    }

    /// Новых задач не будет. Воркеры дорабатывают очередь и выходят.
    ///
    /// # Errors
    ///
    /// [`Error::DoubleClose`] на каждый вызов после первого.
    pub fn close(&self) -> Result<()> {
        self.intake.close()?;
        info!(queued = self.intake.len(), "intake closed, draining");
        Ok(())
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.intake.is_closed()
    }

    /// Handle для чтения результатов. Клоны читают один и тот же поток.
    pub fn results(&self) -> Results<R> {
        Results::new(self.results.clone())
    }

    /// Останавливает воркеров на следующей итерации, задачи в очереди
    /// отбрасываются. Канал результатов всё равно закроется после выхода всех.
    pub fn cancel(&self) {
        info!("worker pool cancelled");
        self.cancellation_token.cancel();
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    /// Завершается, когда все воркеры вышли и канал результатов закрыт.
    pub async fn stopped(&self) {
        self.stopped.cancelled().await;
    }

    #[inline]
    pub fn is_stopped(&self) -> bool {
        self.stopped.is_cancelled()
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[inline]
    pub fn metrics(&self) -> PoolMetrics {
        PoolMetrics {
            workers: self.config.workers,
            live_workers: self.counters.live_workers.load(Ordering::Relaxed),
            busy_workers: self.counters.busy_workers.load(Ordering::Relaxed),
            queued_tasks: self.intake.len(),
            submitted_tasks: self.counters.submitted.load(Ordering::Relaxed),
            completed_tasks: self.counters.completed.load(Ordering::Relaxed),
            failed_tasks: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    /// Мониторинг метрик с callback до отмены токена или остановки пула
    /// ВАЖНО: мониторинг держит Arc на пул, вызовите token.cancel() для освобождения
    pub fn start_monitoring<F>(self: &Arc<Self>, interval: Duration, callback: F) -> CancellationToken
    where
        F: Fn(PoolMetrics) + Send + 'static,
    {
        let pool = Arc::clone(self);
        let token = CancellationToken::new();
        let token_clone = token.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        callback(pool.metrics());
                    }
                    _ = pool.stopped.cancelled() => {
                        callback(pool.metrics());
                        break;
                    }
                    _ = token_clone.cancelled() => break,
                }
            }
        });

        token
    }
}

struct Worker<T, R> {
    id: WorkerId,
    jobs: Receiver<Job<T>>,
    completions: Sender<Completion<R>>,
    work: WorkFn<T, R>,
    counters: Arc<Counters>,
    cancellation_token: CancellationToken,
    task_timeout: Option<Duration>,
    failure_policy: FailurePolicy,
}

impl<T, R> Worker<T, R>
where
    T: Send + 'static,
    R: Send + 'static,
{
    async fn run(self) {
        trace!(worker = %self.id, "worker started");

        loop {
            let job = tokio::select! {
                biased;
                _ = self.cancellation_token.cancelled() => break,
                job = self.jobs.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
            };

            self.counters.busy_workers.fetch_add(1, Ordering::Relaxed);
            let outcome = self.execute(job.payload).await;
            self.counters.busy_workers.fetch_sub(1, Ordering::Relaxed);

            match &outcome {
                Ok(_) => {
                    self.counters.completed.fetch_add(1, Ordering::Relaxed);
                }
                Err(err @ WorkError::Panicked { .. })
                    if self.failure_policy == FailurePolicy::Terminate =>
                {
                    self.counters.failed.fetch_add(1, Ordering::Relaxed);
                    error!(worker = %self.id, task = %job.id, error = %err, "work panicked, worker terminating");
                    break;
                }
                Err(err) => {
                    self.counters.failed.fetch_add(1, Ordering::Relaxed);
                    warn!(worker = %self.id, task = %job.id, error = %err, "task failed");
                }
            }

            let completion = Completion {
                task: job.id,
                worker: self.id,
                outcome,
            };

            tokio::select! {
                biased;
                _ = self.cancellation_token.cancelled() => break,
                sent = self.completions.send(completion) => {
                    if let Err(err) = sent {
                        debug!(worker = %self.id, error = %err, "result channel unavailable, worker exiting");
                        break;
                    }
                }
            }
        }

        self.counters.live_workers.fetch_sub(1, Ordering::SeqCst);
        trace!(worker = %self.id, "worker stopped");
    }

    async fn execute(&self, payload: T) -> std::result::Result<R, WorkError> {
        // async блок откладывает вызов, так что синхронная паника тоже перехватывается
        let run = AssertUnwindSafe(async { (self.work)(payload).await }).catch_unwind();

        let caught = match self.task_timeout {
            Some(after) => match tokio::time::timeout(after, run).await {
                Ok(caught) => caught,
                Err(_) => {
                    return Err(WorkError::TimedOut {
                        worker: self.id,
                        after,
                    })
                }
            },
            None => run.await,
        };

        caught.map_err(|panic| WorkError::Panicked {
            worker: self.id,
            message: panic_message(&*panic),
        })
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Закрывает канал результатов после выхода всех воркеров. Сами воркеры его
/// не закрывают.
async fn watch_workers<R>(
    handles: Vec<JoinHandle<()>>,
    completions: Sender<Completion<R>>,
    stopped: CancellationToken,
) {
    for joined in join_all(handles).await {
        if let Err(err) = joined {
            error!(error = %err, "worker task aborted");
        }
    }

    if let Err(err) = completions.close() {
        error!(error = %err, "result channel closed before all workers exited");
    }
    info!("all workers exited, result channel closed");
    stopped.cancel();
}
