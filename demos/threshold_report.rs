//! A miniature end-to-end run: work items scheduled on the task loop record
//! latency samples, a sink formats them, and thresholds decide the verdict.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tensile::{DummySink, TaskLoop, Thresholds};
use tokio::sync::watch;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let config = r#"[
        "p(95)<200",
        {"threshold": "rate<0.01", "abortOnFail": true, "delayAbortEval": "2s"}
    ]"#;
    let mut thresholds = Thresholds::from_json(config).expect("invalid threshold config");

    // Simulated samples: (latency ms, failed). A background producer
    // delivers them onto the loop one at a time, the way a real runner's
    // I/O callbacks would arrive.
    let samples = [
        (112.0, false),
        (95.0, false),
        (187.0, false),
        (143.0, true),
        (99.0, false),
    ];

    let recorded: Arc<Mutex<Vec<(f64, bool)>>> = Arc::new(Mutex::new(Vec::new()));
    let task_loop = TaskLoop::new();
    let (_cancel_tx, cancel_rx) = watch::channel(false);

    let seed_loop = Arc::clone(&task_loop);
    let seed_recorded = Arc::clone(&recorded);
    task_loop
        .start(cancel_rx, move || {
            for sample in samples {
                let reservation = seed_loop.reserve();
                let recorded = Arc::clone(&seed_recorded);
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    reservation.commit(move || {
                        recorded.lock().unwrap().push(sample);
                    });
                });
            }
        })
        .await;

    let recorded = recorded.lock().unwrap();
    let mut latencies: Vec<f64> = recorded.iter().map(|(latency, _)| *latency).collect();
    latencies.sort_by(|a, b| a.total_cmp(b));
    let p95 = latencies[(latencies.len() as f64 * 0.95).ceil() as usize - 1];
    let failure_rate =
        recorded.iter().filter(|(_, failed)| *failed).count() as f64 / recorded.len() as f64;

    let sink = DummySink::new([("p(95)", p95), ("rate", failure_rate)]);
    let elapsed = Duration::from_secs(30);
    match thresholds.run(&sink, elapsed) {
        Ok(passed) => {
            println!("thresholds passed: {passed}");
            println!("abort requested: {}", thresholds.abort);
            for threshold in &thresholds.thresholds {
                println!("  {:>12}  failed: {}", threshold.source, threshold.last_failed);
            }
        }
        Err(error) => println!("threshold run error: {error}"),
    }

    println!("config round-trip: {}", thresholds.to_json().unwrap());
}
