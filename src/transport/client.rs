use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::error::{RaftError, Result};
use crate::raft::rpc::{
    AppendEntriesRequest, AppendEntriesResponse, ClientRequest, ClientResponse,
    InstallSnapshotRequest, InstallSnapshotResponse, PeerClient, VoteRequest, VoteResponse,
};
use crate::transport::{read_frame, write_frame, RpcEnvelope, RpcRequest, RpcResponse};

const CONNECT_TIMEOUT: Duration = Duration::from_millis(500);
const CALL_TIMEOUT: Duration = Duration::from_millis(1000);
const RETRY_DELAY: Duration = Duration::from_millis(100);

/// Remote-peer handle speaking the length-prefixed TCP protocol. Each call
/// dials the peer fresh, with `retry_count` reconnect attempts; a peer that
/// stays unreachable surfaces as an error the caller treats as a missing
/// vote or ack.
pub struct TcpPeerClient {
    address: String,
    cluster_token: String,
    retry_count: u32,
}

impl TcpPeerClient {
    pub fn new(
        address: impl Into<String>,
        cluster_token: impl Into<String>,
        retry_count: u32,
    ) -> Self {
        Self {
            address: address.into(),
            cluster_token: cluster_token.into(),
            retry_count,
        }
    }

    async fn connect(&self) -> Result<TcpStream> {
        let mut attempt = 0;
        loop {
            let result = timeout(CONNECT_TIMEOUT, TcpStream::connect(&self.address)).await;
            match result {
                Ok(Ok(stream)) => return Ok(stream),
                Ok(Err(e)) if attempt >= self.retry_count => return Err(e.into()),
                Err(_) if attempt >= self.retry_count => {
                    return Err(RaftError::Rpc(format!(
                        "connect to {} timed out",
                        self.address
                    )));
                }
                Ok(Err(e)) => {
                    tracing::debug!(peer = %self.address, attempt, error = %e, "connect failed, retrying");
                }
                Err(_) => {
                    tracing::debug!(peer = %self.address, attempt, "connect timed out, retrying");
                }
            }
            attempt += 1;
            tokio::time::sleep(RETRY_DELAY).await;
        }
    }

    async fn call(&self, request: RpcRequest) -> Result<RpcResponse> {
        let mut stream = self.connect().await?;
        let envelope = RpcEnvelope {
            cluster_token: self.cluster_token.clone(),
            request,
        };
        let payload = serde_json::to_vec(&envelope)?;

        let exchange = async move {
            write_frame(&mut stream, &payload).await?;
            match read_frame(&mut stream).await? {
                Some(frame) => Ok(serde_json::from_slice(&frame)?),
                None => Err(RaftError::Rpc(format!(
                    "{} closed the connection before responding",
                    self.address
                ))),
            }
        };
        timeout(CALL_TIMEOUT, exchange)
            .await
            .map_err(|_| RaftError::Rpc(format!("call to {} timed out", self.address)))?
    }
}

#[async_trait]
impl PeerClient for TcpPeerClient {
    async fn append_entries_invoke(
        &self,
        request: AppendEntriesRequest,
    ) -> Result<AppendEntriesResponse> {
        match self.call(RpcRequest::AppendEntries(request)).await? {
            RpcResponse::AppendEntries(response) => Ok(response),
            other => Err(unexpected(other)),
        }
    }

    async fn vote_invoke(&self, request: VoteRequest) -> Result<VoteResponse> {
        match self.call(RpcRequest::Vote(request)).await? {
            RpcResponse::Vote(response) => Ok(response),
            other => Err(unexpected(other)),
        }
    }

    async fn install_snapshot_invoke(
        &self,
        request: InstallSnapshotRequest,
    ) -> Result<InstallSnapshotResponse> {
        match self.call(RpcRequest::InstallSnapshot(request)).await? {
            RpcResponse::InstallSnapshot(response) => Ok(response),
            other => Err(unexpected(other)),
        }
    }

    async fn client_invoke(&self, request: ClientRequest) -> Result<ClientResponse> {
        match self.call(RpcRequest::Client(request)).await? {
            RpcResponse::Client(response) => Ok(response),
            other => Err(unexpected(other)),
        }
    }
}

fn unexpected(response: RpcResponse) -> RaftError {
    match response {
        RpcResponse::Error(message) => RaftError::Rpc(message),
        other => RaftError::Rpc(format!("unexpected response variant: {other:?}")),
    }
}
