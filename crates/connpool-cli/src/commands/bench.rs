use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use connpool::{Connector, PoolError, PoolRegistry, PoolStatus, PooledConnector, TcpConnectionFactory};
use connpool_core::config::parse_duration;
use connpool_core::{ConnectionParams, PoolConfigFile, PoolSettings};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Outcome counts of a bench run.
#[derive(Debug, Default)]
pub struct BenchReport {
    pub successes: u64,
    pub timeouts: u64,
    pub failures: u64,
    pub elapsed: Duration,
    pub status: Option<PoolStatus>,
}

pub fn bench(path: &str, threads: usize, iterations: usize, hold: &str) -> Result<()> {
    let hold = parse_duration(hold).ok_or_else(|| anyhow!("invalid --hold duration '{hold}'"))?;
    let file = PoolConfigFile::from_file(Path::new(path))
        .with_context(|| format!("loading {path}"))?;
    let settings = file.settings()?;
    let params = file.connection_params();

    println!(
        "Benchmarking {} threads × {} iterations (hold {:?}) against pool size {}, overflow {}",
        threads, iterations, hold, settings.size, settings.max_overflow
    );
    let report = run(settings, params, threads, iterations, hold);

    println!("✓ Finished in {:.2?}", report.elapsed);
    println!("  successes: {}", report.successes);
    println!("  timeouts:  {}", report.timeouts);
    println!("  failures:  {}", report.failures);
    if let Some(status) = &report.status {
        println!("  {status}");
    }
    Ok(())
}

/// Drive one pool from `threads` threads, each running `iterations`
/// connect/hold/release cycles.
pub fn run(
    settings: PoolSettings,
    params: ConnectionParams,
    threads: usize,
    iterations: usize,
    hold: Duration,
) -> BenchReport {
    let registry = Arc::new(PoolRegistry::new(TcpConnectionFactory::new(CONNECT_TIMEOUT), settings));
    let connector = PooledConnector::new(Arc::clone(&registry));
    let params = Arc::new(params);
    let successes = Arc::new(AtomicU64::new(0));
    let timeouts = Arc::new(AtomicU64::new(0));
    let failures = Arc::new(AtomicU64::new(0));

    let started = Instant::now();
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let connector = connector.clone();
            let params = Arc::clone(&params);
            let (successes, timeouts, failures) =
                (Arc::clone(&successes), Arc::clone(&timeouts), Arc::clone(&failures));
            thread::spawn(move || {
                for _ in 0..iterations {
                    match connector.connect(&params) {
                        Ok(conn) => {
                            thread::sleep(hold);
                            drop(conn);
                            successes.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(PoolError::Timeout { .. }) => {
                            timeouts.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "connect failed");
                            failures.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        if handle.join().is_err() {
            tracing::error!("bench thread panicked");
        }
    }
    let elapsed = started.elapsed();

    let status = registry.statuses().into_iter().next().map(|(_, status)| status);
    registry.shutdown();

    BenchReport {
        successes: successes.load(Ordering::Relaxed),
        timeouts: timeouts.load(Ordering::Relaxed),
        failures: failures.load(Ordering::Relaxed),
        elapsed,
        status,
    }
}
