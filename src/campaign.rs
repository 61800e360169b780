//! Round driver
//!
//! A campaign is a fixed number of strictly sequential rounds. Each round
//! writes a fresh version token at a random origin and probes a random sink
//! (possibly the origin itself) until the token is visible or the probe
//! deadline passes.

use std::time::Instant;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{info, warn};

use crate::client::ReplicaApi;
use crate::config::CampaignConfig;
use crate::history::{CampaignReport, RoundOutcome, RoundRecord, VersionCounter, WriteRecord};
use crate::prober::ConsistencyProber;
use crate::topology::{NodeSpec, Topology};

/// Campaign shape.
#[derive(Clone, Debug)]
pub struct CampaignSettings {
    pub rounds: usize,
    /// RNG seed; `None` seeds from the OS
    pub seed: Option<u64>,
}

impl Default for CampaignSettings {
    fn default() -> Self {
        Self::from_config(&CampaignConfig::default())
    }
}

impl CampaignSettings {
    pub fn from_config(config: &CampaignConfig) -> Self {
        CampaignSettings {
            rounds: config.rounds,
            seed: config.seed,
        }
    }
}

/// Drives rounds against a fleet. Owns the version counter for the whole campaign.
pub struct Campaign<A> {
    topology: Topology,
    api: A,
    prober: ConsistencyProber,
    settings: CampaignSettings,
    counter: VersionCounter,
    rng: StdRng,
}

impl<A: ReplicaApi> Campaign<A> {
    pub fn new(topology: Topology, api: A, prober: ConsistencyProber, settings: CampaignSettings) -> Self {
        let rng = match settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Campaign {
            topology,
            api,
            prober,
            settings,
            counter: VersionCounter::new(),
            rng,
        }
    }

    /// Run all rounds in order and collect the results.
    pub async fn run(&mut self) -> CampaignReport {
        let start = Instant::now();
        println!("Testing:");

        let mut rounds = Vec::with_capacity(self.settings.rounds);
        for index in 0..self.settings.rounds {
            rounds.push(self.run_round(index).await);
        }

        let report = CampaignReport::new(rounds, start.elapsed());
        info!(
            rounds = report.rounds.len(),
            observed = report.observed(),
            timeouts = report.timeouts(),
            write_failures = report.write_failures(),
            "campaign finished"
        );
        report
    }

    /// One write-then-verify cycle.
    pub async fn run_round(&mut self, index: usize) -> RoundRecord {
        let origin = self.pick_node();
        let sink = self.pick_node();
        let write = WriteRecord {
            key: origin.name.clone(),
            value: self.counter.next_token(),
            origin: origin.name.clone(),
        };

        println!("Write to \"{}\"", origin.name);
        if let Err(e) = self
            .api
            .write(&origin.address, &write.key, &write.value.to_string())
            .await
        {
            warn!(round = index, origin = %origin.name, error = %e, "write failed, skipping probe");
            println!("Write failed: {}\n", e);
            return RoundRecord {
                index,
                outcome: RoundOutcome::WriteFailed {
                    write,
                    sink: sink.name,
                    error: e.to_string(),
                },
            };
        }

        println!("Read back from \"{}\"", sink.name);
        let probe = self.prober.poll_until_visible(&self.api, &sink, write).await;
        if probe.observed {
            println!("Spent {} seconds\n", probe.elapsed.as_secs_f64());
        } else {
            println!("Overtime\n");
        }

        RoundRecord {
            index,
            outcome: RoundOutcome::Probed(probe),
        }
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Tokens issued so far
    pub fn issued(&self) -> u64 {
        self.counter.issued()
    }

    fn pick_node(&mut self) -> NodeSpec {
        let nodes = self.topology.list_nodes();
        nodes[self.rng.random_range(0..nodes.len())].clone()
    }
}
