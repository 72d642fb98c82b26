//! Live multi-node cluster tests over the TCP transport: leader election,
//! command replication, commit advancement, and client redirect.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use raft_agent::config::RaftConfig;
use raft_agent::machine::InMemoryStateMachine;
use raft_agent::raft::rpc::{ClientRequest, PeerClient};
use raft_agent::raft::{Node, RoleKind};
use raft_agent::transport::TcpPeerClient;

const CLUSTER_TOKEN: &str = "test-cluster";
const DEADLINE: Duration = Duration::from_secs(20);

struct TestNode {
    addr: String,
    node: Arc<Node>,
    machine: Arc<InMemoryStateMachine>,
    shutdown: CancellationToken,
}

impl Drop for TestNode {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Spin up `n` nodes with shortened timings, all joined to each other.
async fn start_cluster(n: usize, base_port: u16) -> Vec<TestNode> {
    let addrs: Vec<String> = (0..n)
        .map(|i| format!("127.0.0.1:{}", base_port + i as u16))
        .collect();

    let mut nodes = Vec::new();
    for addr in &addrs {
        let mut config = RaftConfig::new(addr.parse().unwrap())
            .with_cluster_token(CLUSTER_TOKEN);
        config.join_addresses = addrs.clone();
        config.retry_count = 1;
        config.election_timeout_min_ms = 150;
        config.election_timeout_max_ms = 300;
        config.heartbeat_interval_ms = 50;

        let machine = Arc::new(InMemoryStateMachine::new());
        let node = Arc::new(Node::new(config, machine.clone()));
        let shutdown = CancellationToken::new();

        let server_node = node.clone();
        let server_shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = server_node.start(server_shutdown).await {
                eprintln!("node exited with error: {e}");
            }
        });

        nodes.push(TestNode {
            addr: addr.clone(),
            node,
            machine,
            shutdown,
        });
    }
    nodes
}

/// Poll until the cluster has settled on exactly one leader: a single
/// leader, every node on the same term, observed on consecutive polls.
/// Panics past the deadline.
async fn wait_for_leader(nodes: &[TestNode]) -> usize {
    let started = Instant::now();
    let mut stable: Option<(usize, u64)> = None;
    loop {
        let mut leaders = Vec::new();
        let mut terms = Vec::new();
        for (i, test_node) in nodes.iter().enumerate() {
            if test_node.node.role().await == RoleKind::Leader {
                leaders.push(i);
            }
            terms.push(test_node.node.current_term().await);
        }

        let converged = leaders.len() == 1 && terms.iter().all(|t| *t == terms[0]);
        if converged {
            let snapshot = (leaders[0], terms[0]);
            if stable == Some(snapshot) {
                return leaders[0];
            }
            stable = Some(snapshot);
        } else {
            stable = None;
        }

        assert!(
            started.elapsed() < DEADLINE,
            "no stable leader elected within the deadline (saw {leaders:?})"
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test]
async fn three_node_cluster_elects_a_single_leader() {
    let nodes = start_cluster(3, 7310).await;

    let leader = wait_for_leader(&nodes).await;

    assert!(nodes[leader].node.current_term().await >= 1);
    // The others settled as followers.
    for (i, test_node) in nodes.iter().enumerate() {
        if i != leader {
            assert_ne!(test_node.node.role().await, RoleKind::Leader);
        }
    }
}

#[tokio::test]
async fn command_replicates_commits_and_applies_everywhere() {
    let nodes = start_cluster(3, 7320).await;
    let leader = wait_for_leader(&nodes).await;

    let client = TcpPeerClient::new(nodes[leader].addr.clone(), CLUSTER_TOKEN, 1);
    let response = client
        .client_invoke(ClientRequest {
            command: "set x=1".to_string(),
        })
        .await
        .expect("client call reaches the leader");
    assert!(response.success);

    // The leader commits after a majority ack, the followers on the next
    // heartbeat carrying the advanced commit index.
    let started = Instant::now();
    loop {
        let mut all_applied = true;
        for test_node in &nodes {
            if test_node.node.commit_index().await < 1 || test_node.node.last_applied().await < 1 {
                all_applied = false;
                break;
            }
        }
        if all_applied {
            break;
        }
        assert!(
            started.elapsed() < DEADLINE,
            "not every node committed and applied the entry within the deadline"
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    for test_node in &nodes {
        let applied = test_node.machine.applied();
        assert_eq!(applied.len(), 1, "exactly one apply on {}", test_node.addr);
        assert_eq!(applied[0].index, 1);
        assert_eq!(applied[0].command, "set x=1");
        assert!(test_node.node.entry(1).await.is_some());
    }
}

#[tokio::test]
async fn follower_forwards_client_commands_to_the_leader() {
    let nodes = start_cluster(3, 7330).await;
    let leader = wait_for_leader(&nodes).await;
    let follower = (0..nodes.len()).find(|i| *i != leader).unwrap();

    // Give the follower a heartbeat cycle to learn its leader.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let client = TcpPeerClient::new(nodes[follower].addr.clone(), CLUSTER_TOKEN, 1);
    let response = client
        .client_invoke(ClientRequest {
            command: "set y=2".to_string(),
        })
        .await
        .expect("client call reaches the follower");
    assert!(response.success, "follower forwarded to the leader");

    let started = Instant::now();
    while nodes[leader].node.commit_index().await < 1 {
        assert!(
            started.elapsed() < DEADLINE,
            "the forwarded command did not commit within the deadline"
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test]
async fn wrong_cluster_token_is_rejected() {
    let nodes = start_cluster(1, 7340).await;

    let client = TcpPeerClient::new(nodes[0].addr.clone(), "wrong-token", 1);
    let err = client
        .client_invoke(ClientRequest {
            command: "set x=1".to_string(),
        })
        .await
        .unwrap_err();

    assert!(err.to_string().contains("token"), "got: {err}");
}
