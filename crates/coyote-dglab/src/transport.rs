//! Session-manager seam implemented on top of the embedded server.

use std::time::Duration;

use async_trait::async_trait;
use coyote_session::transport::{DeviceServer, DeviceTransport, TransportError};

use crate::client::LocalClient;
use crate::server::DgLabServer;

/// Starts [`DgLabServer`]s for the session manager.
#[derive(Debug, Clone, Copy, Default)]
pub struct DgLabTransport;

#[async_trait]
impl DeviceTransport for DgLabTransport {
    type Server = DgLabServer;
    type Client = LocalClient;

    async fn start_server(
        &self,
        host: &str,
        port: u16,
        heartbeat: Duration,
    ) -> Result<DgLabServer, TransportError> {
        DgLabServer::start(host, port, heartbeat)
            .await
            .map_err(|e| TransportError::StartFailed {
                addr: format!("{host}:{port}"),
                detail: e.to_string(),
            })
    }
}

#[async_trait]
impl DeviceServer for DgLabServer {
    type Client = LocalClient;

    fn new_local_client(&self) -> LocalClient {
        self.local_client()
    }

    async fn shutdown(&self) -> Result<(), TransportError> {
        DgLabServer::shutdown(self).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coyote_session::transport::DeviceClient;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn start_server_reports_bind_failure() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = taken.local_addr().unwrap().port();

        let err = DgLabTransport
            .start_server("127.0.0.1", port, Duration::from_secs(20))
            .await
            .unwrap_err();
        let TransportError::StartFailed { addr, .. } = err else {
            panic!("expected StartFailed, got {err:?}");
        };
        assert_eq!(addr, format!("127.0.0.1:{port}"));
    }

    #[tokio::test]
    async fn server_hands_out_local_clients() {
        let server = DgLabTransport
            .start_server("127.0.0.1", 0, Duration::from_secs(20))
            .await
            .unwrap();
        let a = server.new_local_client();
        let b = server.new_local_client();
        assert_ne!(a.client_id(), b.client_id());

        DeviceServer::shutdown(&server).await.unwrap();
        assert!(server.is_closed());
    }
}
