//! Write load generator.
//!
//! Flushes the namespace, then writes random batches in a loop and prints
//! per-batch latency and running throughput. A failed batch is reported
//! and retried after a short pause.

use anyhow::{Context, Result};
use coldstore::Registry;
use std::collections::HashMap;
use std::path::Path;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Pause after a failed batch.
const ERROR_BACKOFF: Duration = Duration::from_secs(1);

pub struct BenchOptions {
    pub batch: usize,
    pub value_size: usize,
    pub rounds: Option<u64>,
}

pub async fn execute(config: Option<&Path>, name: &str, options: BenchOptions) -> Result<()> {
    super::init_logging(false);
    let settings = super::load_settings(config)?;
    super::check_settings(&settings)?;

    let registry = Registry::new(settings);
    let store = registry
        .resolve(name)
        .await
        .with_context(|| format!("Failed to resolve {name}"))?;

    store
        .flush()
        .await
        .with_context(|| format!("Failed to flush {name}"))?;
    println!(
        "Writing batches of {} x {} bytes to {name}",
        options.batch, options.value_size
    );

    let started = Instant::now();
    let mut written: u64 = 0;
    let mut round: u64 = 0;

    while options.rounds.is_none_or(|limit| round < limit) {
        round += 1;
        let batch = random_batch(options.batch, options.value_size);
        let batch_started = Instant::now();

        match store.set_many(batch).await {
            Ok(()) => {
                written += options.batch as u64;
                let elapsed = batch_started.elapsed();
                let per_key = elapsed.as_secs_f64() * 1000.0 / options.batch.max(1) as f64;
                let rate = written as f64 / started.elapsed().as_secs_f64().max(f64::EPSILON);
                println!(
                    "batch {round}: {elapsed:.2?} ({per_key:.3} ms/key), {written} keys total, {rate:.0} keys/s"
                );
            },
            Err(e) => {
                eprintln!("batch {round} failed: {e}");
                tokio::time::sleep(ERROR_BACKOFF).await;
            },
        }
    }

    println!("Done: {written} keys in {:.2?}", started.elapsed());
    Ok(())
}

/// Random 32-character keys with values filled from random bytes.
fn random_batch(count: usize, value_size: usize) -> HashMap<String, Vec<u8>> {
    (0..count)
        .map(|_| (Uuid::new_v4().simple().to_string(), random_value(value_size)))
        .collect()
}

fn random_value(size: usize) -> Vec<u8> {
    let mut value = Vec::with_capacity(size);
    while value.len() < size {
        let chunk = Uuid::new_v4();
        let take = (size - value.len()).min(16);
        value.extend_from_slice(&chunk.as_bytes()[..take]);
    }
    value
}
