//! §4.3 "Flush timing" / §7 "Rate-watchdog timeout" — cancels a flush that
//! is taking longer than the configured minimum data rate allows.

use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::MinDataRate;
use crate::sink::{ByteSink, FlushOutcome};

pub struct RateWatchdog {
    policy: MinDataRate,
}

impl RateWatchdog {
    pub fn new(policy: MinDataRate) -> Self {
        Self { policy }
    }

    fn deadline_for(&self, bytes_since_last_flush: usize) -> Duration {
        let rate = self.policy.bytes_per_second.max(1);
        let seconds = bytes_since_last_flush as f64 / rate as f64;
        self.policy.grace_period + Duration::from_secs_f64(seconds)
    }

    /// Drives `sink.flush()`, racing it against the minimum-data-rate
    /// deadline for `bytes_since_last_flush` and against `cancel`. On a
    /// watchdog trip, invokes `output_aborter` (if provided), aborts the
    /// sink, and returns [`FlushOutcome::TERMINAL`] — matching §7: "the
    /// flush future completes with a cancellation... the engine
    /// transitions to aborted."
    pub async fn timed_flush(
        &self,
        bytes_since_last_flush: usize,
        sink: &mut dyn ByteSink,
        cancel: &CancellationToken,
        output_aborter: Option<Box<dyn FnOnce() + Send>>,
    ) -> FlushOutcome {
        let deadline = self.deadline_for(bytes_since_last_flush);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => FlushOutcome::TERMINAL,
            outcome = sink.flush() => outcome,
            _ = tokio::time::sleep(deadline) => {
                log::error!(
                    "flush watchdog tripped: {bytes_since_last_flush} bytes did not flush within {deadline:?}"
                );
                if let Some(aborter) = output_aborter {
                    aborter();
                }
                sink.abort();
                FlushOutcome::TERMINAL
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Notify;

    struct StallingSink {
        notify: std::sync::Arc<Notify>,
        buf: Vec<u8>,
    }

    #[async_trait::async_trait]
    impl ByteSink for StallingSink {
        fn reserve(&mut self, n: usize) -> &mut [u8] {
            self.buf.resize(n, 0);
            &mut self.buf
        }
        fn advance(&mut self, _k: usize) {}
        fn write(&mut self, bytes: &[u8]) {
            self.buf.extend_from_slice(bytes);
        }
        async fn flush(&mut self) -> FlushOutcome {
            self.notify.notified().await;
            FlushOutcome {
                bytes_flushed: self.buf.len(),
                aborted: false,
            }
        }
        fn abort(&mut self) {}
    }

    #[tokio::test(start_paused = true)]
    async fn trips_when_flush_outruns_the_minimum_rate() {
        let watchdog = RateWatchdog::new(MinDataRate {
            bytes_per_second: 1_000_000,
            grace_period: Duration::from_millis(10),
        });
        let mut sink = StallingSink {
            notify: std::sync::Arc::new(Notify::new()),
            buf: Vec::new(),
        };
        let cancel = CancellationToken::new();
        let outcome = watchdog.timed_flush(10, &mut sink, &cancel, None).await;
        assert!(outcome.aborted);
    }

    #[tokio::test]
    async fn succeeds_when_flush_is_prompt() {
        let watchdog = RateWatchdog::new(MinDataRate {
            bytes_per_second: 1,
            grace_period: Duration::from_secs(60),
        });
        let notify = std::sync::Arc::new(Notify::new());
        notify.notify_one();
        let mut sink = StallingSink {
            notify,
            buf: vec![1, 2, 3],
        };
        let cancel = CancellationToken::new();
        let outcome = watchdog.timed_flush(3, &mut sink, &cancel, None).await;
        assert_eq!(
            outcome,
            FlushOutcome {
                bytes_flushed: 3,
                aborted: false
            }
        );
    }
}
