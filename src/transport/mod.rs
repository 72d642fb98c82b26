//! TCP transport for the cluster RPC surface.
//!
//! Frames are a 4-byte big-endian length prefix followed by a JSON body.
//! Every request travels inside an [`RpcEnvelope`] carrying the cluster
//! token, which the server checks before dispatching.

pub mod client;
pub mod server;

pub use client::TcpPeerClient;
pub use server::RpcServer;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{RaftError, Result};
use crate::raft::rpc::{
    AppendEntriesRequest, AppendEntriesResponse, ClientRequest, ClientResponse,
    InstallSnapshotRequest, InstallSnapshotResponse, VoteRequest, VoteResponse,
};

/// Upper bound on a single frame; anything larger is a protocol violation.
const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

#[derive(Debug, Serialize, Deserialize)]
pub struct RpcEnvelope {
    pub cluster_token: String,
    pub request: RpcRequest,
}

#[derive(Debug, Serialize, Deserialize)]
pub enum RpcRequest {
    AppendEntries(AppendEntriesRequest),
    Vote(VoteRequest),
    InstallSnapshot(InstallSnapshotRequest),
    Client(ClientRequest),
}

#[derive(Debug, Serialize, Deserialize)]
pub enum RpcResponse {
    AppendEntries(AppendEntriesResponse),
    Vote(VoteResponse),
    InstallSnapshot(InstallSnapshotResponse),
    Client(ClientResponse),
    Error(String),
}

/// Read one length-prefixed frame. `None` means the peer closed the
/// connection cleanly at a frame boundary.
pub(crate) async fn read_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(RaftError::Rpc(format!(
            "frame of {len} bytes exceeds the {MAX_FRAME_LEN} byte limit"
        )));
    }
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(Some(buf))
}

/// Write one length-prefixed frame.
pub(crate) async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let len = u32::try_from(payload.len())
        .map_err(|_| RaftError::Rpc("frame exceeds 4 GiB".to_string()))?;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frame_roundtrip() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"hello").await.unwrap();
        assert_eq!(&buf[..4], &5u32.to_be_bytes());

        let mut reader = std::io::Cursor::new(buf);
        let frame = read_frame(&mut reader).await.unwrap().unwrap();
        assert_eq!(frame, b"hello");
    }

    #[tokio::test]
    async fn clean_eof_reads_as_none() {
        let mut reader = std::io::Cursor::new(Vec::<u8>::new());
        assert!(read_frame(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(u32::MAX).to_be_bytes());
        let mut reader = std::io::Cursor::new(buf);
        assert!(read_frame(&mut reader).await.is_err());
    }

    #[test]
    fn envelope_roundtrip() {
        let envelope = RpcEnvelope {
            cluster_token: "secret".to_string(),
            request: RpcRequest::Vote(VoteRequest {
                term: 3,
                candidate_id: "127.0.0.1:7201".to_string(),
                last_log_index: 0,
                last_log_term: 0,
            }),
        };
        let bytes = serde_json::to_vec(&envelope).unwrap();
        let decoded: RpcEnvelope = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(decoded.cluster_token, "secret");
        let RpcRequest::Vote(vote) = decoded.request else {
            panic!("wrong variant");
        };
        assert_eq!(vote.term, 3);
        assert_eq!(vote.candidate_id, "127.0.0.1:7201");
    }
}
