//! Controller side of the remote-control protocol.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

use super::protocol::{Hello, HelloReply, Request, Response};
use super::{client_framing, ClientFraming};
use crate::config::Framing;
use crate::error::{RendezvousError, Result};
use crate::host::Statistics;

/// Drives a rendezvous server over its remote-control stream.
///
/// Calls are serialized; each one writes a request and waits for the
/// matching reply. A non-OK reply surfaces as [`RendezvousError::Remote`].
pub struct RemoteClient {
    framing: Mutex<Box<dyn ClientFraming>>,
    local_address: String,
    child: Option<Child>,
}

impl RemoteClient {
    /// Performs the handshake over an existing stream pair.
    pub async fn connect<R, W>(reader: R, writer: W, framing: Framing) -> Result<Self>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        Self::handshake(client_framing(framing, reader, writer)).await
    }

    /// Starts a server subprocess and connects to its stdio. The server's
    /// stderr is forwarded to ours.
    ///
    /// `command` must start the server in remote mode with the same
    /// framing. The subprocess is killed if the client is dropped before
    /// [`end`](Self::end).
    pub async fn spawn(mut command: Command, framing: Framing) -> Result<Self> {
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .map_err(|e| RendezvousError::io("spawning server", e))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| RendezvousError::protocol("server stdin not captured"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RendezvousError::protocol("server stdout not captured"))?;
        if let Some(mut stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let _ = tokio::io::copy(&mut stderr, &mut tokio::io::stderr()).await;
            });
        }

        let mut client = Self::connect(stdout, stdin, framing).await?;
        client.child = Some(child);
        Ok(client)
    }

    async fn handshake(mut framing: Box<dyn ClientFraming>) -> Result<Self> {
        framing.write_hello(&Hello::current()).await?;
        match framing.read_hello_reply().await? {
            HelloReply::Accepted { local_address } => Ok(Self {
                framing: Mutex::new(framing),
                local_address,
                child: None,
            }),
            HelloReply::Rejected { message } => Err(RendezvousError::handshake(message)),
        }
    }

    /// Address the server reported during the handshake.
    pub fn local_address(&self) -> &str {
        &self.local_address
    }

    pub async fn add_hubs<S: AsRef<str>>(&self, hubs: &[S]) -> Result<()> {
        let hubs = hubs.iter().map(|h| h.as_ref().to_string()).collect();
        match self.call(Request::AddHubs(hubs)).await? {
            Response::Done => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    pub async fn get_hubs(&self) -> Result<Vec<String>> {
        match self.call(Request::GetHubs).await? {
            Response::Hubs(hubs) => Ok(hubs),
            other => Err(unexpected(other)),
        }
    }

    pub async fn get_service_names(&self) -> Result<Vec<String>> {
        match self.call(Request::GetServiceNames).await? {
            Response::ServiceNames(names) => Ok(names),
            other => Err(unexpected(other)),
        }
    }

    /// Statistics of the named service, `None` if the server hosts no
    /// such service.
    pub async fn get_statistics(&self, service_name: &str) -> Result<Option<Statistics>> {
        match self
            .call(Request::GetStatistics(service_name.to_string()))
            .await?
        {
            Response::Statistics(stats) => Ok(stats),
            other => Err(unexpected(other)),
        }
    }

    /// Asks the server to shut down, giving its services up to `timeout`
    /// to finish. For a spawned server, waits for it to exit and returns
    /// its exit status.
    pub async fn end(mut self, timeout: Duration) -> Result<Option<ExitStatus>> {
        let millis = i64::try_from(timeout.as_millis()).unwrap_or(i64::MAX);
        match self.call(Request::End(millis)).await? {
            Response::Done => {}
            other => return Err(unexpected(other)),
        }
        drop(self.framing);

        let Some(mut child) = self.child.take() else {
            return Ok(None);
        };
        let status = child
            .wait()
            .await
            .map_err(|e| RendezvousError::io("waiting for server to exit", e))?;
        tracing::debug!(%status, "server exited");
        Ok(Some(status))
    }

    async fn call(&self, request: Request) -> Result<Response> {
        let mut framing = self.framing.lock().await;
        framing.write_request(&request).await?;
        framing
            .read_response(&request)
            .await?
            .map_err(RendezvousError::remote)
    }
}

fn unexpected(response: Response) -> RendezvousError {
    RendezvousError::protocol(format!("unexpected reply {response:?}"))
}
