//! Remote control of a [`ServiceHost`](crate::host::ServiceHost) over a
//! duplex byte stream, typically the stdio pipes of a server spawned by
//! its supervising process.

mod binary;
mod client;
mod handler;
mod line;
pub mod protocol;

pub use binary::BinaryFraming;
pub use client::RemoteClient;
pub use handler::{HandlerExit, RemoteHandler};
pub use line::LineFraming;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::config::Framing;
use crate::error::Result;
use protocol::{Hello, HelloReply, Request, Response};

/// Server side of a framing: decodes controller messages, encodes replies.
#[async_trait]
pub trait ServerFraming: Send {
    async fn read_hello(&mut self) -> Result<Hello>;

    async fn write_hello_reply(&mut self, reply: &HelloReply) -> Result<()>;

    async fn read_request(&mut self) -> Result<Request>;

    async fn write_response(&mut self, response: &Response) -> Result<()>;

    /// ERROR reply to input that could not be decoded at all.
    async fn write_error(&mut self, message: &str) -> Result<()>;

    async fn close(&mut self) -> Result<()>;
}

/// Controller side of a framing.
#[async_trait]
pub trait ClientFraming: Send {
    async fn write_hello(&mut self, hello: &Hello) -> Result<()>;

    async fn read_hello_reply(&mut self) -> Result<HelloReply>;

    async fn write_request(&mut self, request: &Request) -> Result<()>;

    /// Reads the reply to `request`. The inner error is the message of a
    /// non-OK reply.
    async fn read_response(
        &mut self,
        request: &Request,
    ) -> Result<std::result::Result<Response, String>>;
}

pub fn server_framing<R, W>(framing: Framing, reader: R, writer: W) -> Box<dyn ServerFraming>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    match framing {
        Framing::Binary => Box::new(BinaryFraming::new(reader, writer)),
        Framing::Line => Box::new(LineFraming::server(reader, writer)),
    }
}

pub fn client_framing<R, W>(framing: Framing, reader: R, writer: W) -> Box<dyn ClientFraming>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    match framing {
        Framing::Binary => Box::new(BinaryFraming::new(reader, writer)),
        Framing::Line => Box::new(LineFraming::client(reader, writer)),
    }
}
