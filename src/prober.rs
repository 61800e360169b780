//! Convergence probe
//!
//! Answers "has write W become visible at node S within deadline D?" by
//! re-reading S's snapshot until the exact expected value shows up under the
//! write's key, or the deadline passes.
//!
//! An absent key, a stale value and a *newer* value are all treated as
//! "not yet". A newer value means a later write overtook this one, and the
//! probe will run to timeout even though the probed write may well have
//! converged. That case is flagged on the result (`overtaken`) but not
//! reinterpreted.

use std::time::Duration;

use tokio::time::{timeout, Instant};
use tracing::{debug, trace};

use crate::client::ReplicaApi;
use crate::config::ProbeConfig;
use crate::history::{ProbeResult, VersionToken, WriteRecord};
use crate::topology::NodeSpec;

/// Default probe deadline
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct ConsistencyProber {
    deadline: Duration,
    poll_interval: Duration,
}

impl Default for ConsistencyProber {
    fn default() -> Self {
        Self::new(DEFAULT_DEADLINE)
    }
}

impl ConsistencyProber {
    /// Busy-polling prober with the given deadline
    pub fn new(deadline: Duration) -> Self {
        ConsistencyProber {
            deadline,
            poll_interval: Duration::ZERO,
        }
    }

    pub fn from_config(config: &ProbeConfig) -> Self {
        Self::new(config.deadline()).with_poll_interval(config.poll_interval())
    }

    /// Sleep between snapshot reads. Zero keeps back-to-back polling.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Poll `sink` until `write` is visible there or the deadline passes.
    ///
    /// Read failures count as "not yet observed". Each read is cut off at
    /// the deadline, and a match seen after the deadline has already passed
    /// is reported as a timeout, so a successful result's `elapsed` never
    /// exceeds the deadline.
    pub async fn poll_until_visible(
        &self,
        api: &dyn ReplicaApi,
        sink: &NodeSpec,
        write: WriteRecord,
    ) -> ProbeResult {
        let expected = write.value.to_string();
        let start = Instant::now();

        let mut attempts = 0u64;
        let mut read_errors = 0u64;
        let mut last_seen: Option<String> = None;
        let mut overtaken = false;

        let (observed, elapsed) = loop {
            if start.elapsed() >= self.deadline {
                break (false, start.elapsed());
            }

            attempts += 1;
            let remaining = self.deadline.saturating_sub(start.elapsed());
            match timeout(remaining, api.read_snapshot(&sink.address)).await {
                Ok(Ok(snapshot)) => {
                    if let Some(value) = snapshot.get_str(&write.key) {
                        if value == expected {
                            let elapsed = start.elapsed();
                            break (elapsed <= self.deadline, elapsed);
                        }
                        if VersionToken::parse(value).is_some_and(|seen| seen > write.value) {
                            overtaken = true;
                        }
                        last_seen = Some(value.to_string());
                    } else if let Some(other) = snapshot.get(&write.key) {
                        last_seen = Some(other.to_string());
                    }
                }
                Ok(Err(e)) => {
                    read_errors += 1;
                    trace!(sink = %sink.name, error = %e, "snapshot read failed, still polling");
                }
                Err(_) => {
                    read_errors += 1;
                    trace!(sink = %sink.name, "snapshot read outlived the deadline");
                }
            }

            if self.poll_interval.is_zero() {
                tokio::task::yield_now().await;
            } else {
                tokio::time::sleep(self.poll_interval).await;
            }
        };

        if !observed {
            debug!(
                sink = %sink.name,
                key = %write.key,
                expected = %expected,
                last_seen = ?last_seen,
                overtaken,
                attempts,
                "write not visible before deadline"
            );
        }

        ProbeResult {
            sink: sink.name.clone(),
            write,
            observed,
            elapsed,
            timed_out: !observed,
            attempts,
            read_errors,
            last_seen,
            overtaken,
        }
    }
}
