use futures::stream::{self, StreamExt};
use futures_limiter::{iterate, IterateError};
use std::time::{Duration, Instant};
use tracing::info;

async fn download(id: usize) -> Result<usize, String> {
  info!("Item {} starting (should take 1s)", id);
  tokio::time::sleep(Duration::from_secs(1)).await;
  if id == 7 {
    return Err(format!("item {} could not be fetched", id));
  }
  info!("Item {} finished", id);
  Ok(id)
}

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();

  let concurrency_limit: usize = 3;
  let num_items = 10;
  info!(
    "--- Bounded iteration (limit {}): {} items, item 7 fails; expect ~{} secs ---",
    concurrency_limit,
    num_items,
    (num_items as f32 / concurrency_limit as f32).ceil()
  );

  let started_at = Instant::now();
  let producer = stream::iter(0..num_items).map(Ok::<_, String>);

  match iterate(producer, concurrency_limit, download).await {
    Ok(()) => info!("All items processed."),
    Err(IterateError::Aggregated(aggregate)) => {
      info!("Run failed after draining: {}", aggregate);
      for failure in &aggregate {
        info!("  - {}", failure);
      }
    }
    Err(other) => info!("Run failed: {}", other),
  }
  info!("Took {:?}", started_at.elapsed());
}
