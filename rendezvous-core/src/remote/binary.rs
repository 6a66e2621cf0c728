//! Fixed-width binary framing of the remote-control protocol.
//!
//! Every reply starts with `status:u8 message:string`; on OK the
//! request-specific payload follows.

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};

use super::protocol::*;
use super::{ClientFraming, ServerFraming};
use crate::codec;
use crate::error::{RendezvousError, Result};
use crate::host::Statistics;

pub struct BinaryFraming<R, W> {
    reader: BufReader<R>,
    writer: BufWriter<W>,
}

impl<R, W> BinaryFraming<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: BufReader::new(reader),
            writer: BufWriter::new(writer),
        }
    }

    /// Unwraps the underlying streams. Buffered input not yet consumed is
    /// lost.
    pub fn into_inner(self) -> (R, W) {
        (self.reader.into_inner(), self.writer.into_inner())
    }

    async fn write_status(&mut self, status: u8, message: &str) -> Result<()> {
        codec::write_u8(&mut self.writer, status).await?;
        codec::write_string(&mut self.writer, message).await
    }

    async fn read_status(&mut self) -> Result<std::result::Result<(), String>> {
        let status = codec::read_u8(&mut self.reader, "reading reply status").await?;
        let message = codec::read_string(&mut self.reader, "reading reply message").await?;
        match status {
            REPLY_OK => Ok(Ok(())),
            REPLY_ERROR => Ok(Err(message)),
            other => Err(RendezvousError::protocol(format!(
                "unknown reply status {other}"
            ))),
        }
    }

    async fn write_statistics(&mut self, stats: &Option<Statistics>) -> Result<()> {
        let w = &mut self.writer;
        codec::write_bool(w, stats.is_some()).await?;
        if let Some(stats) = stats {
            let count = i32::try_from(stats.len())
                .map_err(|_| RendezvousError::protocol("too many statistics to encode"))?;
            codec::write_i32(w, count).await?;
            for (key, value) in stats {
                codec::write_string(w, key).await?;
                codec::write_string(w, encode_value(value)).await?;
            }
        }
        Ok(())
    }

    async fn read_statistics(&mut self) -> Result<Option<Statistics>> {
        let r = &mut self.reader;
        if !codec::read_bool(r, "reading statistics presence").await? {
            return Ok(None);
        }
        let count = codec::read_count(r, "reading statistics count").await?;
        let mut stats = Statistics::new();
        for _ in 0..count {
            let key = codec::read_string(r, "reading statistics key").await?;
            let value = codec::read_string(r, "reading statistics value").await?;
            stats.insert(key, decode_value(value));
        }
        Ok(Some(stats))
    }
}

#[async_trait]
impl<R, W> ServerFraming for BinaryFraming<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn read_hello(&mut self) -> Result<Hello> {
        let magic = codec::read_u8(&mut self.reader, "reading magic byte").await?.into();
        let version = codec::read_i32(&mut self.reader, "reading protocol version").await?;
        Ok(Hello { magic, version })
    }

    async fn write_hello_reply(&mut self, reply: &HelloReply) -> Result<()> {
        match reply {
            HelloReply::Accepted { local_address } => {
                self.write_status(REPLY_OK, keyword::OK).await?;
                codec::write_string(&mut self.writer, local_address).await?;
            }
            HelloReply::Rejected { message } => {
                self.write_status(REPLY_ERROR, message).await?;
            }
        }
        codec::flush(&mut self.writer).await
    }

    async fn read_request(&mut self) -> Result<Request> {
        let r = &mut self.reader;
        let opcode = codec::read_u8(r, "reading opcode").await?;
        let request = match opcode {
            OPCODE_ADD_HUBS => Request::AddHubs(codec::read_string_list(r, "reading hubs").await?),
            OPCODE_GET_HUBS => Request::GetHubs,
            OPCODE_GET_SERVICE_NAMES => Request::GetServiceNames,
            OPCODE_GET_STATISTICS => {
                Request::GetStatistics(codec::read_string(r, "reading service name").await?)
            }
            OPCODE_END => Request::End(codec::read_i64(r, "reading end timeout").await?),
            other => {
                return Err(RendezvousError::protocol(format!("unknown opcode: {other}")));
            }
        };
        Ok(request)
    }

    async fn write_response(&mut self, response: &Response) -> Result<()> {
        self.write_status(REPLY_OK, keyword::OK).await?;
        match response {
            Response::Done => {}
            Response::Hubs(items) | Response::ServiceNames(items) => {
                codec::write_string_list(&mut self.writer, items).await?;
            }
            Response::Statistics(stats) => self.write_statistics(stats).await?,
        }
        codec::flush(&mut self.writer).await
    }

    async fn write_error(&mut self, message: &str) -> Result<()> {
        self.write_status(REPLY_ERROR, message).await?;
        codec::flush(&mut self.writer).await
    }

    async fn close(&mut self) -> Result<()> {
        self.writer
            .shutdown()
            .await
            .map_err(|e| RendezvousError::io("closing remote stream", e))
    }
}

#[async_trait]
impl<R, W> ClientFraming for BinaryFraming<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn write_hello(&mut self, hello: &Hello) -> Result<()> {
        let magic = u8::try_from(hello.magic).map_err(|_| {
            RendezvousError::protocol(format!("magic {} does not fit in a byte", hello.magic))
        })?;
        codec::write_u8(&mut self.writer, magic).await?;
        codec::write_i32(&mut self.writer, hello.version).await?;
        codec::flush(&mut self.writer).await
    }

    async fn read_hello_reply(&mut self) -> Result<HelloReply> {
        match self.read_status().await? {
            Ok(()) => {
                let local_address =
                    codec::read_string(&mut self.reader, "reading local address").await?;
                Ok(HelloReply::Accepted { local_address })
            }
            Err(message) => Ok(HelloReply::Rejected { message }),
        }
    }

    async fn write_request(&mut self, request: &Request) -> Result<()> {
        let w = &mut self.writer;
        codec::write_u8(w, request.opcode()).await?;
        match request {
            Request::AddHubs(hubs) => codec::write_string_list(w, hubs).await?,
            Request::GetStatistics(name) => codec::write_string(w, name).await?,
            Request::End(millis) => codec::write_i64(w, *millis).await?,
            Request::GetHubs | Request::GetServiceNames => {}
        }
        codec::flush(w).await
    }

    async fn read_response(
        &mut self,
        request: &Request,
    ) -> Result<std::result::Result<Response, String>> {
        if let Err(message) = self.read_status().await? {
            return Ok(Err(message));
        }
        let response = match request {
            Request::AddHubs(_) | Request::End(_) => Response::Done,
            Request::GetHubs => {
                Response::Hubs(codec::read_string_list(&mut self.reader, "reading hubs").await?)
            }
            Request::GetServiceNames => Response::ServiceNames(
                codec::read_string_list(&mut self.reader, "reading service names").await?,
            ),
            Request::GetStatistics(_) => Response::Statistics(self.read_statistics().await?),
        };
        Ok(Ok(response))
    }
}
