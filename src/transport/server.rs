use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use crate::error::{RaftError, Result};
use crate::raft::host::Host;
use crate::raft::rpc::ClientResponse;
use crate::transport::{read_frame, write_frame, RpcEnvelope, RpcRequest, RpcResponse};

/// Accepts cluster RPC connections and dispatches decoded requests to the
/// host. One task per connection; a connection may carry any number of
/// request/response exchanges.
pub struct RpcServer {
    host: Arc<Host>,
    cluster_token: String,
}

impl RpcServer {
    pub fn new(host: Arc<Host>, cluster_token: String) -> Self {
        Self {
            host,
            cluster_token,
        }
    }

    /// Serve until the shutdown token is cancelled.
    pub async fn serve(&self, addr: SocketAddr, shutdown: CancellationToken) -> Result<()> {
        let listener = TcpListener::bind(addr).await?;
        tracing::info!(%addr, "rpc server listening");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("rpc server shutting down");
                    return Ok(());
                }
                accepted = listener.accept() => {
                    let (stream, peer_addr) = accepted?;
                    let host = self.host.clone();
                    let token = self.cluster_token.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, host, token).await {
                            tracing::debug!(peer = %peer_addr, error = %e, "connection ended with error");
                        }
                    });
                }
            }
        }
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    host: Arc<Host>,
    cluster_token: String,
) -> Result<()> {
    loop {
        let Some(frame) = read_frame(&mut stream).await? else {
            return Ok(());
        };
        let envelope: RpcEnvelope = serde_json::from_slice(&frame)?;

        let response = if envelope.cluster_token != cluster_token {
            tracing::warn!("rejecting request carrying an illegal cluster token");
            RpcResponse::Error(RaftError::IllegalClusterToken.to_string())
        } else {
            dispatch(&host, envelope.request).await
        };

        write_frame(&mut stream, &serde_json::to_vec(&response)?).await?;
    }
}

async fn dispatch(host: &Host, request: RpcRequest) -> RpcResponse {
    match request {
        RpcRequest::AppendEntries(request) => {
            RpcResponse::AppendEntries(host.append_entries_invoke(request).await)
        }
        RpcRequest::Vote(request) => RpcResponse::Vote(host.vote_invoke(request).await),
        RpcRequest::InstallSnapshot(request) => {
            RpcResponse::InstallSnapshot(host.install_snapshot_invoke(request).await)
        }
        RpcRequest::Client(request) => match host.client_invoke(request).await {
            Ok(response) => RpcResponse::Client(response),
            Err(RaftError::NotLeader(hint)) => {
                RpcResponse::Client(ClientResponse::redirect(hint))
            }
            Err(e) => RpcResponse::Error(e.to_string()),
        },
    }
}
