//! Server side of the remote-control protocol.

use std::sync::Arc;
use std::time::Duration;

use super::protocol::{end_timeout, HelloReply, Request, Response};
use super::ServerFraming;
use crate::error::{RendezvousError, Result};
use crate::host::ServiceHost;

/// How a remote-control session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerExit {
    /// The controller sent END and the host has shut down.
    Ended,
    /// The controller's handshake was refused; the host keeps running.
    Rejected,
    /// The stream broke, or carried garbage after the handshake; the host
    /// was shut down.
    Aborted,
}

/// Serves one remote-control stream against a [`ServiceHost`].
pub struct RemoteHandler {
    host: Arc<ServiceHost>,
}

impl RemoteHandler {
    pub fn new(host: Arc<ServiceHost>) -> Self {
        Self { host }
    }

    /// Runs the session to completion. The stream is closed on return.
    pub async fn run(&self, mut framing: Box<dyn ServerFraming>) -> HandlerExit {
        tracing::debug!("running remote handler");

        let exit = match self.handshake(framing.as_mut()).await {
            Ok(false) => HandlerExit::Rejected,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "remote controller lost during handshake, ending server"
                );
                HandlerExit::Aborted
            }
            Ok(true) => match self.serve(framing.as_mut()).await {
                Ok(()) => HandlerExit::Ended,
                Err(e) => {
                    if e.is_disconnect() {
                        tracing::warn!("remote control stream closed, ending server");
                    } else {
                        tracing::error!(
                            error = %e,
                            "error on handling remote request, ending server"
                        );
                    }
                    HandlerExit::Aborted
                }
            },
        };

        if let Err(e) = framing.close().await {
            tracing::debug!(error = %e, "closing remote stream");
        }
        if exit == HandlerExit::Aborted {
            self.host.shutdown(Duration::ZERO).await;
        }
        exit
    }

    /// Ok(false) when the controller was turned away; an error means the
    /// stream itself broke.
    async fn handshake(&self, framing: &mut dyn ServerFraming) -> Result<bool> {
        let hello = match framing.read_hello().await {
            Ok(hello) => hello,
            Err(e) if e.is_disconnect() || matches!(e, RendezvousError::Io { .. }) => {
                return Err(e)
            }
            Err(e) => {
                tracing::warn!(error = %e, "malformed handshake from remote controller");
                framing.write_error(&e.to_string()).await?;
                return Ok(false);
            }
        };
        if let Err(message) = hello.check() {
            tracing::warn!(%message, "rejecting remote controller");
            framing
                .write_hello_reply(&HelloReply::Rejected { message })
                .await?;
            return Ok(false);
        }

        framing
            .write_hello_reply(&HelloReply::Accepted {
                local_address: self.host.local_address().to_string(),
            })
            .await?;
        Ok(true)
    }

    async fn serve(&self, framing: &mut dyn ServerFraming) -> Result<()> {
        loop {
            let request = framing.read_request().await?;
            tracing::debug!(opcode = request.keyword(), "got remote request");

            let response = match request {
                Request::AddHubs(hubs) => {
                    let added = self.host.add_peer_addresses(hubs);
                    tracing::debug!(added, "hubs added");
                    Response::Done
                }
                Request::GetHubs => Response::Hubs(self.host.known_peer_addresses()),
                Request::GetServiceNames => Response::ServiceNames(self.host.service_names()),
                Request::GetStatistics(name) => Response::Statistics(self.host.statistics(&name)),
                Request::End(millis) => {
                    self.host.shutdown(end_timeout(millis)).await;
                    framing.write_response(&Response::Done).await?;
                    return Ok(());
                }
            };
            framing.write_response(&response).await?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Framing;
    use crate::host::{Service, Statistics};
    use crate::codec::LineReader;
    use crate::remote::protocol::{Hello, MAGIC, SERVER_MARKER, VERSION};
    use crate::remote::{server_framing, BinaryFraming, ClientFraming, RemoteClient};
    use async_trait::async_trait;
    use tokio::io::{duplex, split, AsyncWriteExt, BufReader};
    use tokio::task::JoinHandle;

    struct StubService;

    #[async_trait]
    impl Service for StubService {
        fn name(&self) -> &str {
            "coordination"
        }

        async fn end(&self, _timeout: Duration) {}

        fn statistics(&self) -> Statistics {
            let mut stats = Statistics::new();
            stats.insert("pools".to_string(), Some("0".to_string()));
            stats.insert("last_pool".to_string(), None);
            stats
        }
    }

    fn host() -> Arc<ServiceHost> {
        Arc::new(ServiceHost::with_services(
            "server0:8888",
            Vec::new(),
            vec![Arc::new(StubService) as Arc<dyn Service>],
        ))
    }

    async fn connected(
        framing: Framing,
    ) -> (RemoteClient, Arc<ServiceHost>, JoinHandle<HandlerExit>) {
        let host = host();
        let (server_end, client_end) = duplex(4096);
        let (server_read, server_write) = split(server_end);
        let (client_read, client_write) = split(client_end);

        let handler = RemoteHandler::new(host.clone());
        let session = tokio::spawn(async move {
            handler
                .run(server_framing(framing, server_read, server_write))
                .await
        });
        let client = RemoteClient::connect(client_read, client_write, framing)
            .await
            .unwrap();
        (client, host, session)
    }

    #[tokio::test]
    async fn test_management_round_trip() {
        for framing in [Framing::Binary, Framing::Line] {
            let (client, host, session) = connected(framing).await;
            assert_eq!(client.local_address(), "server0:8888");

            client.add_hubs(&["h1:1000", "h2:2000"]).await.unwrap();
            let hubs = client.get_hubs().await.unwrap();
            assert_eq!(hubs, vec!["h1:1000".to_string(), "h2:2000".to_string()]);

            let names = client.get_service_names().await.unwrap();
            assert_eq!(names, vec!["coordination".to_string()]);

            assert!(client.get_statistics("nonexistent").await.unwrap().is_none());
            let stats = client.get_statistics("coordination").await.unwrap().unwrap();
            assert_eq!(stats.get("pools"), Some(&Some("0".to_string())));
            assert_eq!(stats.get("last_pool"), Some(&None));

            assert_eq!(client.end(Duration::from_millis(100)).await.unwrap(), None);
            assert_eq!(session.await.unwrap(), HandlerExit::Ended);
            assert!(host.is_shutting_down());
        }
    }

    #[tokio::test]
    async fn test_wrong_magic_rejected() {
        let host = host();
        let (server_end, client_end) = duplex(1024);
        let (server_read, server_write) = split(server_end);
        let (client_read, client_write) = split(client_end);

        let handler = RemoteHandler::new(host.clone());
        let session = tokio::spawn(async move {
            handler
                .run(server_framing(Framing::Binary, server_read, server_write))
                .await
        });

        let mut client = BinaryFraming::new(client_read, client_write);
        client
            .write_hello(&Hello { magic: i32::from(MAGIC) + 1, version: VERSION })
            .await
            .unwrap();
        match client.read_hello_reply().await.unwrap() {
            HelloReply::Rejected { message } => assert!(message.contains("wrong magic byte")),
            other => panic!("expected rejection, got {other:?}"),
        }

        assert_eq!(session.await.unwrap(), HandlerExit::Rejected);
        assert!(!host.is_shutting_down());
    }

    #[tokio::test]
    async fn test_unknown_opcode_shuts_host_down() {
        let host = host();
        let (server_end, client_end) = duplex(1024);
        let (server_read, server_write) = split(server_end);
        let (client_read, client_write) = split(client_end);

        let handler = RemoteHandler::new(host.clone());
        let session = tokio::spawn(async move {
            handler
                .run(server_framing(Framing::Binary, server_read, server_write))
                .await
        });

        let mut client = BinaryFraming::new(client_read, client_write);
        client.write_hello(&Hello::current()).await.unwrap();
        assert!(matches!(
            client.read_hello_reply().await.unwrap(),
            HelloReply::Accepted { .. }
        ));

        let (_, mut raw_write) = client.into_inner();
        raw_write.write_all(&[42]).await.unwrap();
        raw_write.flush().await.unwrap();

        assert_eq!(session.await.unwrap(), HandlerExit::Aborted);
        assert!(host.is_shutting_down());
    }

    #[tokio::test]
    async fn test_line_framing_tolerates_diagnostics() {
        let host = host();
        let (server_end, client_end) = duplex(4096);
        let (server_read, server_write) = split(server_end);
        let (_client_read, mut client_write) = split(client_end);

        let handler = RemoteHandler::new(host.clone());
        let session = tokio::spawn(async move {
            handler
                .run(server_framing(Framing::Line, server_read, server_write))
                .await
        });

        client_write
            .write_all(
                b"Picked up JAVA_TOOL_OPTIONS\nRDV-CONTROL HELLO 53 2\n\
                  debug noise\nRDV-CONTROL ADD_HUBS 1 h9%3A1\nRDV-CONTROL END 0\n",
            )
            .await
            .unwrap();

        assert_eq!(session.await.unwrap(), HandlerExit::Ended);
        assert_eq!(host.known_peer_addresses(), vec!["h9:1".to_string()]);
    }

    fn spawn_session(
        host: &Arc<ServiceHost>,
        framing: Framing,
    ) -> (
        JoinHandle<HandlerExit>,
        tokio::io::ReadHalf<tokio::io::DuplexStream>,
        tokio::io::WriteHalf<tokio::io::DuplexStream>,
    ) {
        let (server_end, client_end) = duplex(4096);
        let (server_read, server_write) = split(server_end);
        let (client_read, client_write) = split(client_end);

        let handler = RemoteHandler::new(host.clone());
        let session = tokio::spawn(async move {
            handler
                .run(server_framing(framing, server_read, server_write))
                .await
        });
        (session, client_read, client_write)
    }

    #[tokio::test]
    async fn test_line_framing_skips_non_utf8_noise() {
        let host = host();
        let (session, _client_read, mut client_write) = spawn_session(&host, Framing::Line);

        client_write
            .write_all(
                b"RDV-CONTROL HELLO 53 2\nwarning: caf\xe9 locale\n\
                  RDV-CONTROL ADD_HUBS 1 h9%3A1\nRDV-CONTROL END 0\n",
            )
            .await
            .unwrap();

        assert_eq!(session.await.unwrap(), HandlerExit::Ended);
        assert_eq!(host.known_peer_addresses(), vec!["h9:1".to_string()]);
    }

    #[tokio::test]
    async fn test_unparseable_line_handshake_gets_error_reply() {
        for (hello, expected) in [
            (&b"RDV-CONTROL HELLO 999 2\n"[..], "wrong magic byte: 999 instead of 53"),
            (&b"RDV-CONTROL GET_HUBS\n"[..], "expected HELLO"),
            (&b"RDV-CONTROL HELLO fifty-three 2\n"[..], "malformed number"),
        ] {
            let host = host();
            let (session, client_read, mut client_write) = spawn_session(&host, Framing::Line);
            client_write.write_all(hello).await.unwrap();

            let mut replies = LineReader::new(BufReader::new(client_read), SERVER_MARKER);
            let reply = replies.read_fields("reading handshake reply").await.unwrap();
            assert_eq!(reply[0], "ERROR");
            assert!(reply[1].contains(expected), "{:?}", reply);

            assert_eq!(session.await.unwrap(), HandlerExit::Rejected);
            assert!(!host.is_shutting_down());
        }
    }

    #[tokio::test]
    async fn test_controller_lost_before_handshake_shuts_host_down() {
        for framing in [Framing::Binary, Framing::Line] {
            let host = host();
            let (session, client_read, client_write) = spawn_session(&host, framing);
            drop(client_write);
            drop(client_read);

            assert_eq!(session.await.unwrap(), HandlerExit::Aborted);
            assert!(host.is_shutting_down());
        }
    }
}
