//! Line-oriented framing of the remote-control protocol.
//!
//! Requests are `KEYWORD field..` lines, replies are `OK|ERROR message
//! field..` lines. Lists are sent as a count followed by the items. The
//! stream may carry other output; only lines with the peer's marker are
//! read.

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};

use super::protocol::*;
use super::{ClientFraming, ServerFraming};
use crate::codec::{self, LineReader, LineWriter};
use crate::error::{RendezvousError, Result};
use crate::host::Statistics;

pub struct LineFraming<R, W> {
    reader: LineReader<BufReader<R>>,
    writer: LineWriter<W>,
}

impl<R, W> LineFraming<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    /// The server end: reads controller lines, writes server lines.
    pub fn server(reader: R, writer: W) -> Self {
        Self {
            reader: LineReader::new(BufReader::new(reader), CLIENT_MARKER),
            writer: LineWriter::new(writer, SERVER_MARKER),
        }
    }

    /// The controller end.
    pub fn client(reader: R, writer: W) -> Self {
        Self {
            reader: LineReader::new(BufReader::new(reader), SERVER_MARKER),
            writer: LineWriter::new(writer, CLIENT_MARKER),
        }
    }

    /// Reads a reply line, returning its payload fields on OK.
    async fn read_reply(&mut self, what: &str) -> Result<std::result::Result<Fields, String>> {
        let mut fields = Fields::new(self.reader.read_fields(what).await?, what);
        let status = fields.next()?;
        let message = fields.next()?;
        match status.as_str() {
            keyword::OK => Ok(Ok(fields)),
            keyword::ERROR => Ok(Err(message)),
            other => Err(RendezvousError::protocol(format!(
                "unknown reply status '{other}' while {what}"
            ))),
        }
    }
}

/// Cursor over the fields of one line.
struct Fields {
    items: std::vec::IntoIter<String>,
    what: String,
}

impl Fields {
    fn new(items: Vec<String>, what: &str) -> Self {
        Self {
            items: items.into_iter(),
            what: what.to_string(),
        }
    }

    fn next(&mut self) -> Result<String> {
        self.items.next().ok_or_else(|| {
            RendezvousError::protocol(format!("missing field while {}", self.what))
        })
    }

    fn next_parsed<T: std::str::FromStr>(&mut self) -> Result<T> {
        let field = self.next()?;
        field.parse().map_err(|_| {
            RendezvousError::protocol(format!("malformed number '{field}' while {}", self.what))
        })
    }

    fn list(&mut self) -> Result<Vec<String>> {
        let count = codec::check_count(self.next_parsed()?, &self.what)?;
        (0..count).map(|_| self.next()).collect()
    }

    fn finish<T>(mut self, value: T) -> Result<T> {
        match self.items.next() {
            None => Ok(value),
            Some(extra) => Err(RendezvousError::protocol(format!(
                "unexpected field '{extra}' while {}",
                self.what
            ))),
        }
    }
}

fn push_list(fields: &mut Vec<String>, items: &[String]) {
    fields.push(items.len().to_string());
    fields.extend(items.iter().cloned());
}

#[async_trait]
impl<R, W> ServerFraming for LineFraming<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn read_hello(&mut self) -> Result<Hello> {
        let what = "reading handshake";
        let mut fields = Fields::new(self.reader.read_fields(what).await?, what);
        let word = fields.next()?;
        if word != keyword::HELLO {
            return Err(RendezvousError::handshake(format!(
                "expected {} but got '{word}'",
                keyword::HELLO
            )));
        }
        let magic = fields.next_parsed()?;
        let version = fields.next_parsed()?;
        fields.finish(Hello { magic, version })
    }

    async fn write_hello_reply(&mut self, reply: &HelloReply) -> Result<()> {
        match reply {
            HelloReply::Accepted { local_address } => {
                self.writer
                    .write_fields(&[keyword::OK, keyword::OK, local_address.as_str()])
                    .await
            }
            HelloReply::Rejected { message } => {
                self.writer.write_fields(&[keyword::ERROR, message.as_str()]).await
            }
        }
    }

    async fn read_request(&mut self) -> Result<Request> {
        let what = "reading request";
        let mut fields = Fields::new(self.reader.read_fields(what).await?, what);
        let word = fields.next()?;
        let request = match word.as_str() {
            keyword::ADD_HUBS => Request::AddHubs(fields.list()?),
            keyword::GET_HUBS => Request::GetHubs,
            keyword::GET_SERVICE_NAMES => Request::GetServiceNames,
            keyword::GET_STATISTICS => Request::GetStatistics(fields.next()?),
            keyword::END => Request::End(fields.next_parsed()?),
            other => {
                return Err(RendezvousError::protocol(format!("unknown opcode: {other}")));
            }
        };
        fields.finish(request)
    }

    async fn write_response(&mut self, response: &Response) -> Result<()> {
        let mut fields = vec![keyword::OK.to_string(), keyword::OK.to_string()];
        match response {
            Response::Done => {}
            Response::Hubs(items) | Response::ServiceNames(items) => push_list(&mut fields, items),
            Response::Statistics(None) => fields.push("0".to_string()),
            Response::Statistics(Some(stats)) => {
                fields.push("1".to_string());
                fields.push(stats.len().to_string());
                for (key, value) in stats {
                    fields.push(key.clone());
                    fields.push(encode_value(value).to_string());
                }
            }
        }
        self.writer.write_fields(&fields).await
    }

    async fn write_error(&mut self, message: &str) -> Result<()> {
        self.writer.write_fields(&[keyword::ERROR, message]).await
    }

    async fn close(&mut self) -> Result<()> {
        self.writer.shutdown().await
    }
}

#[async_trait]
impl<R, W> ClientFraming for LineFraming<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn write_hello(&mut self, hello: &Hello) -> Result<()> {
        self.writer
            .write_fields(&[
                keyword::HELLO.to_string(),
                hello.magic.to_string(),
                hello.version.to_string(),
            ])
            .await
    }

    async fn read_hello_reply(&mut self) -> Result<HelloReply> {
        match self.read_reply("reading handshake reply").await? {
            Ok(mut fields) => {
                let local_address = fields.next()?;
                fields.finish(HelloReply::Accepted { local_address })
            }
            Err(message) => Ok(HelloReply::Rejected { message }),
        }
    }

    async fn write_request(&mut self, request: &Request) -> Result<()> {
        let mut fields = vec![request.keyword().to_string()];
        match request {
            Request::AddHubs(hubs) => push_list(&mut fields, hubs),
            Request::GetStatistics(name) => fields.push(name.clone()),
            Request::End(millis) => fields.push(millis.to_string()),
            Request::GetHubs | Request::GetServiceNames => {}
        }
        self.writer.write_fields(&fields).await
    }

    async fn read_response(
        &mut self,
        request: &Request,
    ) -> Result<std::result::Result<Response, String>> {
        let mut fields = match self.read_reply("reading reply").await? {
            Ok(fields) => fields,
            Err(message) => return Ok(Err(message)),
        };
        let response = match request {
            Request::AddHubs(_) | Request::End(_) => Response::Done,
            Request::GetHubs => Response::Hubs(fields.list()?),
            Request::GetServiceNames => Response::ServiceNames(fields.list()?),
            Request::GetStatistics(_) => {
                if fields.next()? == "0" {
                    Response::Statistics(None)
                } else {
                    let count = codec::check_count(fields.next_parsed()?, "reading statistics")?;
                    let mut stats = Statistics::new();
                    for _ in 0..count {
                        let key = fields.next()?;
                        stats.insert(key, decode_value(fields.next()?));
                    }
                    Response::Statistics(Some(stats))
                }
            }
        };
        fields.finish(Ok(response))
    }
}
