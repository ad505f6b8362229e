use slotpool::{PoolContext, WorkerPool};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;


const PRIMES_RANGE: u64 = 10_000_000;
const PROGRESS_STEP: u64 = 100_000;

fn is_prime(n: u64) -> bool {
    if n <= 1 {
        return false;
    }
    if n == 2 {
        return true;
    }
    if n % 2 == 0 {
        return false;
    }
    let mut i = 3;
    while i * i <= n {
        if n % i == 0 {
            return false;
        }
        i += 2;
    }
    true
}

/// Считает простые числа в `[start, end]`, отчитываясь о прогрессе через `report`
fn calculate_primes(start: u64, end: u64, report: &dyn Fn(String)) -> Vec<u64> {
    report(format!("Starting calculation from {} to {}...", start, end));

    let mut primes = Vec::new();
    for i in start..=end {
        if is_prime(i) {
            primes.push(i);
        }
        if i % PROGRESS_STEP == 0 && end > start {
            let pct = (i - start) as f64 / (end - start) as f64 * 100.0;
            report(format!("Processing {}/{} ({:.1}%)", i, end, pct));
        }
    }
    primes
}

fn print_summary(primes: &[u64]) {
    println!("Found {} prime numbers", primes.len());
    if primes.is_empty() {
        return;
    }
    println!("First 5 primes in range: {:?}", &primes[..primes.len().min(5)]);
    println!("Last 5 primes in range: {:?}", &primes[primes.len().saturating_sub(5)..]);
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stdout)
        .init();

    let ctx = PoolContext::global();
    let pool = WorkerPool::new(10)?;

    println!("Primes calculation WITHOUT using multithreading");
    let now = Instant::now();
    let primes = calculate_primes(0, PRIMES_RANGE, &|line: String| println!("{line}"));
    print_summary(&primes);
    println!("elapsed: {:?}\n", now.elapsed());

    println!("Primes calculation using multithreading");
    let now = Instant::now();
    let workers = pool.num_workers() as u64;
    let segment = PRIMES_RANGE / workers;

    for i in 0..workers {
        let start = i * segment;
        let end = if i == workers - 1 { PRIMES_RANGE } else { (i + 1) * segment - 1 };
        let dispatcher = ctx.dispatcher().clone();

        pool.submit(move || {
            let progress = dispatcher.clone();
            let primes = calculate_primes(start, end, &move |line: String| {
                progress.enqueue(move || println!("{line}"));
            });
            dispatcher.enqueue(move || {
                println!("Segment {start}..={end}:");
                print_summary(&primes);
            });
        });
    }

    while !pool.wait_idle_timeout(Duration::from_millis(50)) {
        ctx.process_main_thread_queue()?;
    }
    ctx.process_main_thread_queue()?;

    println!("elapsed: {:?}", now.elapsed());
    Ok(())
}
