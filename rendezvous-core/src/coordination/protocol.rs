//! Pool join wire protocol.
//!
//! One request/response per connection:
//!
//! ```text
//! request:  pool_name:string host_id:string cluster_id:string size:i32
//! response: rank:i32 [host_id:string * size, cluster_id:string * size]
//! ```
//!
//! A negative rank is a [`PoolError`] code and carries no member lists.

use tokio::io::{AsyncRead, AsyncWrite};

use crate::codec;
use crate::error::{PoolError, Result};

/// Virtual port the coordination service listens on.
pub const VIRTUAL_PORT: u16 = 301;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinRequest {
    pub pool_name: String,
    pub host_id: String,
    pub cluster_id: String,
    pub size: i32,
}

impl JoinRequest {
    pub async fn read<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Self> {
        let pool_name = codec::read_string(reader, "reading pool name").await?;
        let host_id = codec::read_string(reader, "reading host id").await?;
        let cluster_id = codec::read_string(reader, "reading cluster id").await?;
        let size = codec::read_i32(reader, "reading pool size").await?;
        Ok(Self {
            pool_name,
            host_id,
            cluster_id,
            size,
        })
    }

    pub async fn write<W: AsyncWrite + Unpin>(&self, writer: &mut W) -> Result<()> {
        codec::write_string(writer, &self.pool_name).await?;
        codec::write_string(writer, &self.host_id).await?;
        codec::write_string(writer, &self.cluster_id).await?;
        codec::write_i32(writer, self.size).await?;
        codec::flush(writer).await
    }
}

/// Final membership of a pool as seen by one member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Membership {
    pub rank: i32,
    pub host_ids: Vec<String>,
    pub cluster_ids: Vec<String>,
}

impl Membership {
    pub fn size(&self) -> usize {
        self.host_ids.len()
    }
}

/// Writes a join outcome. Member lists follow only on success.
pub async fn write_join_response<W: AsyncWrite + Unpin>(
    writer: &mut W,
    outcome: &std::result::Result<Membership, PoolError>,
) -> Result<()> {
    match outcome {
        Ok(membership) => {
            codec::write_i32(writer, membership.rank).await?;
            for host in &membership.host_ids {
                codec::write_string(writer, host).await?;
            }
            for cluster in &membership.cluster_ids {
                codec::write_string(writer, cluster).await?;
            }
        }
        Err(err) => codec::write_i32(writer, err.code()).await?,
    }
    codec::flush(writer).await
}

/// Reads a join outcome for a pool of `size` members.
pub async fn read_join_response<R: AsyncRead + Unpin>(
    reader: &mut R,
    size: usize,
) -> Result<std::result::Result<Membership, PoolError>> {
    let rank = codec::read_i32(reader, "reading rank").await?;
    if rank < 0 {
        return Ok(Err(PoolError::from_code(rank)));
    }
    let host_ids = codec::read_strings(reader, size, "reading host ids").await?;
    let cluster_ids = codec::read_strings(reader, size, "reading cluster ids").await?;
    Ok(Ok(Membership {
        rank,
        host_ids,
        cluster_ids,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_request_layout() {
        let request = JoinRequest {
            pool_name: "p".to_string(),
            host_id: "h".to_string(),
            cluster_id: "c".to_string(),
            size: 3,
        };
        let mut buf = Vec::new();
        request.write(&mut buf).await.unwrap();
        assert_eq!(buf, vec![0, 1, b'p', 0, 1, b'h', 0, 1, b'c', 0, 0, 0, 3]);

        let mut reader = buf.as_slice();
        assert_eq!(JoinRequest::read(&mut reader).await.unwrap(), request);
    }

    #[tokio::test]
    async fn test_error_response_has_no_lists() {
        let mut buf = Vec::new();
        write_join_response(&mut buf, &Err(PoolError::PoolClosed))
            .await
            .unwrap();
        assert_eq!(buf, (-2i32).to_be_bytes().to_vec());

        let mut reader = buf.as_slice();
        let outcome = read_join_response(&mut reader, 2).await.unwrap();
        assert_eq!(outcome, Err(PoolError::PoolClosed));
    }

    #[tokio::test]
    async fn test_success_response_lists_in_rank_order() {
        let membership = Membership {
            rank: 1,
            host_ids: vec!["a".to_string(), "b".to_string()],
            cluster_ids: vec!["x".to_string(), "y".to_string()],
        };
        let mut buf = Vec::new();
        write_join_response(&mut buf, &Ok(membership.clone()))
            .await
            .unwrap();

        let mut reader = buf.as_slice();
        let outcome = read_join_response(&mut reader, 2).await.unwrap();
        assert_eq!(outcome, Ok(membership));
    }

    #[tokio::test]
    async fn test_truncated_request_fails() {
        let buf = [0u8, 4, b'p', b'o'];
        let mut reader = &buf[..];
        let err = JoinRequest::read(&mut reader).await.unwrap_err();
        assert!(err.to_string().contains("pool name"));
    }
}
