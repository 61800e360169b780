//! End-to-end campaign tests against an in-process fake fleet
//!
//! The fake nodes speak the real HTTP contract, so these tests exercise the
//! reqwest client, the prober and the round driver together.

use std::collections::BTreeMap;
use std::time::Duration;

use serde_json::Value;

use replica_probe::testing::{FakeCluster, FakeClusterOptions};
use replica_probe::{
    Campaign, CampaignSettings, ConsistencyProber, HarnessError, NodeConfig, ReadinessGate,
    ReplicaApi, ReplicaClient, Topology, TransportError,
};

fn client() -> ReplicaClient {
    ReplicaClient::with_timeouts(Duration::from_millis(500), Duration::from_secs(2)).unwrap()
}

/// Write to a single node and read it straight back.
#[tokio::test]
async fn test_single_node_read_your_write() {
    let cluster = FakeCluster::start(1).await;
    let addr = cluster.node_addr(0).to_string();
    let client = client();

    client.write(&addr, "server-0", "version-0").await.unwrap();
    let snapshot = client.read_snapshot(&addr).await.unwrap();

    let expected: BTreeMap<String, Value> =
        [("server-0".to_string(), Value::String("version-0".to_string()))].into();
    assert_eq!(snapshot.0, expected);

    let mut campaign = Campaign::new(
        cluster.topology(),
        client,
        ConsistencyProber::default(),
        CampaignSettings {
            rounds: 1,
            seed: Some(1),
        },
    );
    let report = campaign.run().await;
    let probe = report.rounds[0].probe().unwrap();
    assert!(probe.observed);
    assert!(probe.elapsed <= Duration::from_secs(5));
    // the campaign has its own counter, so its first token is version-0 again
    assert_eq!(probe.write.value.to_string(), "version-0");

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_snapshot_reads_are_stable_without_writes() {
    let cluster = FakeCluster::start(2).await;
    let client = client();
    let origin = cluster.node_addr(0).to_string();
    let sink = cluster.node_addr(1).to_string();

    client.write(&origin, "server-0", "version-7").await.unwrap();

    let first = client.read_snapshot(&sink).await.unwrap();
    let second = client.read_snapshot(&sink).await.unwrap();
    assert_eq!(first.get_str("server-0"), Some("version-7"));
    assert_eq!(first, second);

    cluster.shutdown().await;
}

/// Five-node mesh, 20 rounds, replication that always converges.
#[tokio::test]
async fn test_full_mesh_campaign_converges() {
    let cluster = FakeCluster::with_options(FakeClusterOptions {
        nodes: 5,
        replication_delay: Duration::from_millis(20),
        isolated: Vec::new(),
    })
    .await;
    let deadline = Duration::from_secs(2);

    let mut campaign = Campaign::new(
        cluster.topology(),
        client(),
        ConsistencyProber::new(deadline),
        CampaignSettings {
            rounds: 20,
            seed: Some(2024),
        },
    );
    let report = campaign.run().await;

    assert_eq!(report.rounds.len(), 20);
    assert_eq!(report.timeouts(), 0, "{}", report);
    assert_eq!(report.write_failures(), 0);
    assert!(report.passed(0));

    let stats = report.latency().unwrap();
    assert!(stats.max <= deadline);
    assert!(stats.min <= stats.p50 && stats.p50 <= stats.max);

    cluster.shutdown().await;
}

/// A node cut off from replication makes exactly the probes aimed at it time out.
#[tokio::test]
async fn test_isolated_replica_is_reported_as_overtime() {
    let cluster = FakeCluster::with_options(FakeClusterOptions {
        nodes: 3,
        replication_delay: Duration::ZERO,
        isolated: vec![2],
    })
    .await;

    let mut campaign = Campaign::new(
        cluster.topology(),
        client(),
        ConsistencyProber::new(Duration::from_millis(150))
            .with_poll_interval(Duration::from_millis(5)),
        CampaignSettings {
            rounds: 15,
            seed: Some(11),
        },
    );
    let report = campaign.run().await;

    let mut expected_timeouts = 0;
    for round in &report.rounds {
        let probe = round.probe().unwrap();
        let should_miss = probe.sink == "server-2" && probe.write.origin != "server-2";
        assert_eq!(probe.timed_out, should_miss, "round {}", round.index);
        assert_eq!(probe.observed, !should_miss);
        if should_miss {
            expected_timeouts += 1;
        }
    }
    assert_eq!(report.timeouts(), expected_timeouts);
    assert_eq!(report.passed(0), expected_timeouts == 0);
    assert!(report.passed(expected_timeouts));

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_unreachable_origin_fails_round_without_probe() {
    let mut cluster = FakeCluster::start(1).await;
    let topology = cluster.topology();
    cluster.stop_node(0);
    tokio::time::sleep(Duration::from_millis(100)).await;

    let err = client()
        .write(&cluster.node_addr(0).to_string(), "server-0", "version-0")
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::Connect { .. }), "{:?}", err);

    let mut campaign = Campaign::new(
        topology,
        client(),
        ConsistencyProber::new(Duration::from_millis(100)),
        CampaignSettings {
            rounds: 2,
            seed: Some(3),
        },
    );
    let report = campaign.run().await;
    assert_eq!(report.write_failures(), 2);
    assert_eq!(report.timeouts(), 0);

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_readiness_probe_against_fleet() {
    let cluster = FakeCluster::start(3).await;
    let gate = ReadinessGate::Probe {
        timeout: Duration::from_secs(2),
        interval: Duration::from_millis(10),
    };
    gate.wait(&client(), &cluster.topology()).await.unwrap();

    // a node whose port has nothing behind it never becomes ready
    let vacant = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().to_string()
    };
    let topology = Topology::new(vec![
        NodeConfig {
            name: "up".to_string(),
            address: cluster.node_addr(0).to_string(),
            peers: vec!["down".to_string()],
        },
        NodeConfig {
            name: "down".to_string(),
            address: vacant,
            peers: vec!["up".to_string()],
        },
    ])
    .unwrap();
    let gate = ReadinessGate::Probe {
        timeout: Duration::from_millis(200),
        interval: Duration::from_millis(20),
    };
    match gate.wait(&client(), &topology).await {
        Err(HarnessError::NotReady { pending, .. }) => assert_eq!(pending, vec!["down"]),
        other => panic!("expected NotReady, got {:?}", other),
    }

    cluster.shutdown().await;
}
