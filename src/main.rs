use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use raft_agent::config::RaftConfig;
use raft_agent::machine::FileStateMachine;
use raft_agent::raft::rpc::{ClientRequest, PeerClient};
use raft_agent::raft::Node;
use raft_agent::shutdown::install_shutdown_handler;
use raft_agent::transport::TcpPeerClient;

#[derive(Parser, Debug)]
#[command(name = "raft-agent")]
#[command(version)]
#[command(about = "A single-node participant in a Raft consensus cluster")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start a raft-agent server node
    Server(ServerArgs),

    /// Submit a command to the cluster
    Submit(SubmitArgs),
}

#[derive(Parser, Debug)]
struct ServerArgs {
    /// Node id; defaults to the listen address, which is the convention
    /// that makes leader redirects resolvable
    #[arg(long)]
    node_id: Option<String>,

    /// Human-readable node name, used in logs only
    #[arg(long, default_value = "raft-node")]
    name: String,

    /// Address to listen on for cluster RPCs
    #[arg(long, default_value = "127.0.0.1:7201")]
    listen: SocketAddr,

    /// Cluster member addresses, comma-separated, including this node
    /// Example: "127.0.0.1:7201,127.0.0.1:7202,127.0.0.1:7203"
    #[arg(long, default_value = "")]
    join: String,

    /// Shared cluster token checked on every RPC
    #[arg(long, default_value = "")]
    token: String,

    /// Reconnect attempts per outbound call
    #[arg(long, default_value = "3")]
    retry_count: u32,

    /// Lower bound of the randomized election timeout, in milliseconds
    #[arg(long, default_value = "1500")]
    election_timeout_min_ms: u64,

    /// Upper bound of the randomized election timeout, in milliseconds
    #[arg(long, default_value = "3000")]
    election_timeout_max_ms: u64,

    /// Leader heartbeat interval, in milliseconds
    #[arg(long, default_value = "500")]
    heartbeat_interval_ms: u64,
}

#[derive(Parser, Debug)]
struct SubmitArgs {
    /// Server address
    #[arg(long, short = 'a', default_value = "127.0.0.1:7201")]
    addr: String,

    /// Shared cluster token
    #[arg(long, default_value = "")]
    token: String,

    /// The command to replicate
    command: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    match args.command {
        Commands::Server(server) => run_server(server).await,
        Commands::Submit(submit) => run_submit(submit).await,
    }
}

async fn run_server(args: ServerArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = RaftConfig::new(args.listen).with_cluster_token(args.token);
    if let Some(node_id) = args.node_id {
        config.node_id = node_id;
    }
    config.node_name = args.name;
    config.retry_count = args.retry_count;
    config.election_timeout_min_ms = args.election_timeout_min_ms;
    config.election_timeout_max_ms = args.election_timeout_max_ms;
    config.heartbeat_interval_ms = args.heartbeat_interval_ms;
    for addr in args.join.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        config.join_addresses.push(addr.to_string());
    }

    let machine = Arc::new(FileStateMachine::new(&config.node_id));
    let node = Node::new(config, machine);
    let shutdown = install_shutdown_handler();
    node.start(shutdown).await?;
    Ok(())
}

async fn run_submit(args: SubmitArgs) -> Result<(), Box<dyn std::error::Error>> {
    let client = TcpPeerClient::new(args.addr.clone(), args.token.clone(), 3);
    let request = ClientRequest {
        command: args.command.clone(),
    };

    let response = client.client_invoke(request.clone()).await?;
    if response.success {
        println!("accepted");
        return Ok(());
    }

    // The node was not the leader; follow its hint once.
    match response.leader_hint {
        Some(leader) => {
            eprintln!("not the leader, retrying against {leader}");
            let client = TcpPeerClient::new(leader, args.token, 3);
            let response = client.client_invoke(request).await?;
            if response.success {
                println!("accepted");
                Ok(())
            } else {
                Err("cluster has no reachable leader".into())
            }
        }
        None => Err("not the leader and no leader is known yet".into()),
    }
}
