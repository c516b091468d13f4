//! `demo` subcommand: drive a simulated workload through a layer.
//!
//! Exercises deduplication, caching, retry and throttling against an
//! in-process fake transport, then prints counters as JSON.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;

use crate::executor::{ExecuteOptions, TransportError};
use crate::telemetry::StatsSnapshot;
use crate::{LayerConfig, NetworkLayer};

/// Report printed by the demo.
#[derive(Debug, Serialize)]
pub struct DemoReport {
    pub stats: StatsSnapshot,
    pub transport_calls: u32,
    pub queue_completed: u64,
    pub queue_failed: u64,
    pub failures: Vec<String>,
}

/// Fake transport: answers after `latency`, failing the first `flaky`
/// calls for any key starting with `flaky:` and always 404ing `missing:`.
#[derive(Clone)]
struct SimulatedTransport {
    calls: Arc<AtomicU32>,
    flaky_remaining: Arc<AtomicU32>,
    latency: Duration,
}

impl SimulatedTransport {
    fn new(latency: Duration, flaky: u32) -> Self {
        Self {
            calls: Arc::new(AtomicU32::new(0)),
            flaky_remaining: Arc::new(AtomicU32::new(flaky)),
            latency,
        }
    }

    async fn get(&self, key: String) -> Result<String, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.latency).await;

        if key.starts_with("missing:") {
            return Err(TransportError::status(404, "not found"));
        }
        if key.starts_with("flaky:") {
            let left = self.flaky_remaining.load(Ordering::SeqCst);
            if left > 0 {
                self.flaky_remaining.store(left - 1, Ordering::SeqCst);
                return Err(TransportError::status(503, "unavailable"));
            }
        }
        Ok(format!("result for {key}"))
    }
}

/// Run the demo workload and return the report.
pub async fn run_workload(config: LayerConfig) -> DemoReport {
    let layer: NetworkLayer = NetworkLayer::new(config);
    let transport = SimulatedTransport::new(Duration::from_millis(40), 2);
    let mut failures = Vec::new();

    let fetch = |key: &'static str| {
        let transport = transport.clone();
        move || {
            let transport = transport.clone();
            async move { transport.get(key.to_string()).await }
        }
    };

    // Five concurrent callers share one execution.
    let burst = (0..5).map(|_| {
        layer
            .executor
            .execute("search:demo:10", fetch("search:demo:10"), ExecuteOptions::default())
    });
    for result in join_all(burst).await {
        if let Err(e) = result {
            failures.push(e.to_string());
        }
    }

    // Served from cache.
    if let Err(e) = layer
        .executor
        .execute("search:demo:10", fetch("search:demo:10"), ExecuteOptions::default())
        .await
    {
        failures.push(e.to_string());
    }

    // Two 503s, then success.
    if let Err(e) = layer
        .executor
        .execute("flaky:lyrics", fetch("flaky:lyrics"), ExecuteOptions::default())
        .await
    {
        failures.push(e.to_string());
    }

    // Terminal on the first attempt.
    if let Err(e) = layer
        .executor
        .execute::<String, _, _>("missing:album", fetch("missing:album"), ExecuteOptions::default())
        .await
    {
        failures.push(format!("missing:album -> {e}"));
    }

    // Throttled page fetches, each still deduplicated and cached.
    let keys = ["page:1", "page:2", "page:3", "page:4", "page:5", "page:6"];
    let pages = keys.iter().map(|&key| {
        let executor = layer.executor.clone();
        let op = fetch(key);
        layer
            .queue
            .enqueue(move || async move { executor.execute(key, op, ExecuteOptions::default()).await })
    });
    for result in join_all(pages).await {
        if let Err(e) = result {
            failures.push(e.to_string());
        }
    }

    let report = DemoReport {
        stats: layer.executor.stats(),
        transport_calls: transport.calls.load(Ordering::SeqCst),
        queue_completed: layer.queue.completed(),
        queue_failed: layer.queue.failed(),
        failures,
    };
    layer.shutdown().await;
    report
}

/// Run the demo and print its report. Returns the process exit code.
pub async fn run_demo(config: LayerConfig) -> i32 {
    let report = run_workload(config).await;
    match serde_json::to_string_pretty(&report) {
        Ok(text) => {
            println!("{text}");
            0
        }
        Err(e) => {
            eprintln!("Failed to encode report: {e}");
            1
        }
    }
}
