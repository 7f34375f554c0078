use std::{sync::Arc, time::Instant};

use anyhow::Result;
use async_workpool::{
    shared::{CounterActor, ViewCounter},
    Config, JoinOrdering, WorkerPool,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "async_workpool=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    tracing::info!(?config, "pool configuration loaded");

    let now = Instant::now();
    let pool = WorkerPool::new(config, |x: u64| x * 2)?;
    let results = pool.results();
    let counter = CounterActor::spawn(64);
    let views = Arc::new(ViewCounter::new());

    let producer = {
        let counter = counter.handle();
        tokio::spawn(async move {
            for x in 1..=10_000u64 {
                pool.submit(x).await?;
                counter.increment().await?;
            }
            pool.close()?;
            pool.stopped().await;
            anyhow::Ok(pool.metrics())
        })
    };

    let consumer = {
        let views = views.clone();
        tokio::spawn(async move {
            let completions = results.collect(JoinOrdering::Ordered).await;
            for _ in &completions {
                views.record_view().await;
            }
            completions
        })
    };

    let metrics = producer.await??;
    let completions = consumer.await?;
    let sum: u64 = completions
        .into_iter()
        .filter_map(|completion| completion.into_result().ok())
        .sum();

    println!("Отправлено: {}", counter.shutdown().await?);
    println!("Получено:   {}", views.views().await);
    println!("Сумма:      {sum}");
    println!("Success rate: {:.1}%", metrics.success_rate() * 100.0);
    println!("Время:      {:?}", now.elapsed());
    Ok(())
}
