//! Periodic report loop aligned to wall-clock multiples of the interval

use super::client::ReportingClient;
use super::counter::RequestCounter;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::info;

/// Time left until the next multiple of `interval` since the epoch
pub fn aligned_wait(interval: Duration, now_unix_nanos: i64) -> Duration {
    let interval_ns = interval.as_nanos().max(1) as i64;
    let wait = interval_ns - now_unix_nanos.rem_euclid(interval_ns);
    Duration::from_nanos(wait as u64)
}

/// Round marker: wall-clock unix nanoseconds
pub fn round_marker() -> i64 {
    chrono::Utc::now()
        .timestamp_nanos_opt()
        .unwrap_or_else(|| chrono::Utc::now().timestamp_micros() * 1_000)
}

/// Report the request count every `interval` until shutdown
pub async fn run_reporter(
    client: Arc<ReportingClient>,
    counter: Arc<RequestCounter>,
    pod_name: String,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let first = aligned_wait(interval, round_marker());
    info!(
        pod = %pod_name,
        interval_ms = interval.as_millis() as u64,
        first_tick_ms = first.as_millis() as u64,
        "Starting load reporter"
    );

    let mut ticker = interval_at(Instant::now() + first, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let a = counter.take();
                let k = round_marker();
                client.report_with_retry(&pod_name, k, a).await;
            }
            _ = shutdown.recv() => {
                info!(pod = %pod_name, "Shutting down load reporter");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporting::ReportingConfig;

    #[test]
    fn test_aligned_wait() {
        let second = Duration::from_secs(1);
        assert_eq!(
            aligned_wait(second, 10_250_000_000),
            Duration::from_millis(750)
        );
        assert_eq!(aligned_wait(second, 10_000_000_000), second);
        assert_eq!(
            aligned_wait(Duration::from_millis(100), 1_234_567),
            Duration::from_nanos(98_765_433)
        );
    }

    #[test]
    fn test_round_marker_is_monotonic_enough() {
        let a = round_marker();
        let b = round_marker();
        assert!(b >= a);
        assert!(a > 1_600_000_000_000_000_000);
    }

    #[tokio::test]
    async fn test_reporter_sends_counts_and_resets() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/")
            .match_query(mockito::Matcher::UrlEncoded("a".into(), "5".into()))
            .with_status(200)
            .expect_at_least(1)
            .create_async()
            .await;
        let _idle = server
            .mock("GET", "/")
            .match_query(mockito::Matcher::UrlEncoded("a".into(), "0".into()))
            .with_status(200)
            .create_async()
            .await;

        let client = Arc::new(ReportingClient::new(ReportingConfig::with_controller(server.url())).unwrap());
        let counter = Arc::new(RequestCounter::new());
        for _ in 0..5 {
            counter.record();
        }

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(run_reporter(
            client,
            counter.clone(),
            "pod-a".to_string(),
            Duration::from_millis(50),
            shutdown_rx,
        ));

        tokio::time::sleep(Duration::from_millis(200)).await;
        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();

        mock.assert_async().await;
        assert_eq!(counter.current(), 0);
    }
}
