//! Records produced by a campaign
//!
//! Version tokens, individual write and probe records, and the aggregate
//! [`CampaignReport`] used for the final summary and the pass/fail check.

use std::fmt;
use std::time::Duration;

const VERSION_PREFIX: &str = "version-";

/// A campaign-unique write value, rendered as `version-<n>`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VersionToken(pub u64);

impl VersionToken {
    /// Parse a value read back from a node. Returns `None` for anything
    /// this harness did not write.
    pub fn parse(value: &str) -> Option<Self> {
        value
            .strip_prefix(VERSION_PREFIX)
            .and_then(|n| n.parse().ok())
            .map(VersionToken)
    }
}

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", VERSION_PREFIX, self.0)
    }
}

/// Issues strictly increasing tokens, starting at `version-0`.
#[derive(Debug, Default)]
pub struct VersionCounter {
    next: u64,
}

impl VersionCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_token(&mut self) -> VersionToken {
        let token = VersionToken(self.next);
        self.next += 1;
        token
    }

    /// Number of tokens issued so far
    pub fn issued(&self) -> u64 {
        self.next
    }
}

/// One mutation issued against an origin node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WriteRecord {
    /// Key written, which is the origin node's name
    pub key: String,
    pub value: VersionToken,
    pub origin: String,
}

/// Outcome of waiting for a write to show up at a sink.
#[derive(Clone, Debug)]
pub struct ProbeResult {
    pub sink: String,
    pub write: WriteRecord,
    pub observed: bool,
    pub elapsed: Duration,
    pub timed_out: bool,
    /// Snapshot reads issued, including failed ones
    pub attempts: u64,
    /// Reads that failed with a transport error
    pub read_errors: u64,
    /// Last value seen under the probed key
    pub last_seen: Option<String>,
    /// A newer token than the expected one was seen at some point
    pub overtaken: bool,
}

/// What happened in one round.
#[derive(Clone, Debug)]
pub enum RoundOutcome {
    /// The write reached the origin and the probe ran to completion
    Probed(ProbeResult),
    /// The write itself failed, so there was nothing to probe
    WriteFailed {
        write: WriteRecord,
        sink: String,
        error: String,
    },
}

/// One round of a campaign.
#[derive(Clone, Debug)]
pub struct RoundRecord {
    pub index: usize,
    pub outcome: RoundOutcome,
}

impl RoundRecord {
    pub fn write(&self) -> &WriteRecord {
        match &self.outcome {
            RoundOutcome::Probed(probe) => &probe.write,
            RoundOutcome::WriteFailed { write, .. } => write,
        }
    }

    pub fn probe(&self) -> Option<&ProbeResult> {
        match &self.outcome {
            RoundOutcome::Probed(probe) => Some(probe),
            RoundOutcome::WriteFailed { .. } => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.probe().is_some_and(|p| p.timed_out)
    }
}

/// Latency distribution over observed (non-timed-out) probes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LatencyStats {
    pub min: Duration,
    pub mean: Duration,
    pub p50: Duration,
    pub p99: Duration,
    pub max: Duration,
}

impl LatencyStats {
    /// `None` when there are no samples.
    pub fn from_samples(samples: &[Duration]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        let mut sorted = samples.to_vec();
        sorted.sort();

        let total: Duration = sorted.iter().sum();
        let mean = total / sorted.len() as u32;

        Some(LatencyStats {
            min: sorted[0],
            mean,
            p50: percentile(&sorted, 50),
            p99: percentile(&sorted, 99),
            max: sorted[sorted.len() - 1],
        })
    }
}

// Nearest-rank on an ascending, non-empty slice.
fn percentile(sorted: &[Duration], pct: usize) -> Duration {
    let rank = (pct * sorted.len()).div_ceil(100).max(1);
    sorted[rank - 1]
}

/// Aggregated results of a campaign.
#[derive(Clone, Debug)]
pub struct CampaignReport {
    pub rounds: Vec<RoundRecord>,
    pub wall_time: Duration,
}

impl CampaignReport {
    pub fn new(rounds: Vec<RoundRecord>, wall_time: Duration) -> Self {
        CampaignReport { rounds, wall_time }
    }

    pub fn observed(&self) -> usize {
        self.probes().filter(|p| p.observed).count()
    }

    pub fn timeouts(&self) -> usize {
        self.probes().filter(|p| p.timed_out).count()
    }

    /// Timeouts where a newer write was seen at the sink. These may be
    /// measurement artifacts rather than convergence failures.
    pub fn overtaken_timeouts(&self) -> usize {
        self.probes().filter(|p| p.timed_out && p.overtaken).count()
    }

    pub fn write_failures(&self) -> usize {
        self.rounds
            .iter()
            .filter(|r| matches!(r.outcome, RoundOutcome::WriteFailed { .. }))
            .count()
    }

    pub fn latency(&self) -> Option<LatencyStats> {
        let samples: Vec<Duration> = self
            .probes()
            .filter(|p| p.observed)
            .map(|p| p.elapsed)
            .collect();
        LatencyStats::from_samples(&samples)
    }

    /// True when no more than `max_timeouts` probes timed out.
    pub fn passed(&self, max_timeouts: usize) -> bool {
        self.timeouts() <= max_timeouts
    }

    fn probes(&self) -> impl Iterator<Item = &ProbeResult> {
        self.rounds.iter().filter_map(|r| r.probe())
    }
}

impl fmt::Display for CampaignReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} rounds in {:.3}s: {} observed, {} overtime, {} failed writes",
            self.rounds.len(),
            self.wall_time.as_secs_f64(),
            self.observed(),
            self.timeouts(),
            self.write_failures()
        )?;
        if let Some(stats) = self.latency() {
            writeln!(
                f,
                "convergence: min {:?}, mean {:?}, p50 {:?}, p99 {:?}, max {:?}",
                stats.min, stats.mean, stats.p50, stats.p99, stats.max
            )?;
        }
        if self.overtaken_timeouts() > 0 {
            writeln!(
                f,
                "{} overtime rounds saw a newer write at the sink (possible measurement artifact)",
                self.overtaken_timeouts()
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(n: u64) -> WriteRecord {
        WriteRecord {
            key: "server-0".to_string(),
            value: VersionToken(n),
            origin: "server-0".to_string(),
        }
    }

    fn probe(n: u64, elapsed_ms: u64, timed_out: bool, overtaken: bool) -> RoundRecord {
        RoundRecord {
            index: n as usize,
            outcome: RoundOutcome::Probed(ProbeResult {
                sink: "server-1".to_string(),
                write: write(n),
                observed: !timed_out,
                elapsed: Duration::from_millis(elapsed_ms),
                timed_out,
                attempts: 1,
                read_errors: 0,
                last_seen: None,
                overtaken,
            }),
        }
    }

    #[test]
    fn test_token_format_and_parse() {
        assert_eq!(VersionToken(0).to_string(), "version-0");
        assert_eq!(VersionToken::parse("version-17"), Some(VersionToken(17)));
        assert_eq!(VersionToken::parse("version-"), None);
        assert_eq!(VersionToken::parse("v17"), None);
        assert!(VersionToken(3) < VersionToken(10));
    }

    #[test]
    fn test_counter_is_strictly_increasing() {
        let mut counter = VersionCounter::new();
        let tokens: Vec<_> = (0..5).map(|_| counter.next_token()).collect();
        assert_eq!(tokens[0], VersionToken(0));
        assert!(tokens.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(counter.issued(), 5);
    }

    #[test]
    fn test_latency_stats() {
        let samples: Vec<Duration> = [40, 10, 30, 20].iter().map(|&ms| Duration::from_millis(ms)).collect();
        let stats = LatencyStats::from_samples(&samples).unwrap();
        assert_eq!(stats.min, Duration::from_millis(10));
        assert_eq!(stats.max, Duration::from_millis(40));
        assert_eq!(stats.mean, Duration::from_millis(25));
        assert_eq!(stats.p50, Duration::from_millis(20));
        assert_eq!(stats.p99, Duration::from_millis(40));

        assert!(LatencyStats::from_samples(&[]).is_none());
    }

    #[test]
    fn test_report_counts() {
        let report = CampaignReport::new(
            vec![
                probe(0, 5, false, false),
                probe(1, 5000, true, true),
                probe(2, 5000, true, false),
                RoundRecord {
                    index: 3,
                    outcome: RoundOutcome::WriteFailed {
                        write: write(3),
                        sink: "server-2".to_string(),
                        error: "connection refused".to_string(),
                    },
                },
            ],
            Duration::from_secs(11),
        );

        assert_eq!(report.observed(), 1);
        assert_eq!(report.timeouts(), 2);
        assert_eq!(report.overtaken_timeouts(), 1);
        assert_eq!(report.write_failures(), 1);
        assert!(!report.passed(0));
        assert!(report.passed(2));
        assert_eq!(report.latency().unwrap().max, Duration::from_millis(5));
        assert_eq!(report.rounds[3].write().value, VersionToken(3));
        assert!(report.rounds[1].is_timeout());

        let summary = report.to_string();
        assert!(summary.contains("1 observed, 2 overtime, 1 failed writes"));
        assert!(summary.contains("possible measurement artifact"));
    }
}
