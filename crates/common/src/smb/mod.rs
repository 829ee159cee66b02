// Native SMB2 client used to authenticate and enumerate shares

mod ntlm;
mod packet;
mod rpc;
mod session;
mod transport;
mod wire;

use std::time::Duration;

use rand::RngCore;
use tracing::info;

use crate::error::Result;
use crate::types::ShareInfo;

pub use ntlm::Credentials;
pub use session::SmbSession;
pub use transport::NETBIOS_SESSION_PORT;

/// Default port for direct-hosted SMB
pub const DEFAULT_PORT: u16 = 445;

/// Workstation name sent during authentication
const WORKSTATION: &str = "SMBLAUNCHER";

/// Opens authenticated sessions to a file server
pub trait ShareClient: Send + Sync {
    type Session: ShareSession;

    fn connect(&self, host: &str, port: u16, credentials: &Credentials) -> Result<Self::Session>;
}

/// An authenticated session that can list the server's shares
pub trait ShareSession {
    fn list_shares(&mut self) -> Result<Vec<ShareInfo>>;

    /// Release the session; later calls to `list_shares` fail
    fn close(&mut self) -> Result<()>;
}

/// [`ShareClient`] speaking SMB 2.0.2 / 2.1 over TCP
#[derive(Debug, Clone)]
pub struct SmbClient {
    timeout: Duration,
}

impl SmbClient {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl ShareClient for SmbClient {
    type Session = SmbSession;

    fn connect(&self, host: &str, port: u16, credentials: &Credentials) -> Result<SmbSession> {
        let transport = transport::Transport::connect(host, port, self.timeout)?;

        let mut client_challenge = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut client_challenge);
        let params = session::SessionParams {
            host,
            credentials,
            workstation: WORKSTATION,
            client_guid: *uuid::Uuid::new_v4().as_bytes(),
            client_challenge,
        };

        let session = SmbSession::establish(transport, &params)?;
        info!("Authenticated to {}:{} as {}", host, port, credentials.user);
        Ok(session)
    }
}

impl ShareSession for SmbSession {
    fn list_shares(&mut self) -> Result<Vec<ShareInfo>> {
        SmbSession::list_shares(self)
    }

    fn close(&mut self) -> Result<()> {
        SmbSession::close(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::net::TcpListener;

    #[test]
    fn test_unreachable_host_is_network_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let client = SmbClient::new(Duration::from_secs(2));
        let creds = Credentials::new("alice", "secret", "WORKGROUP");
        let err = client.connect("127.0.0.1", port, &creds).err().unwrap();
        assert!(matches!(err, Error::Network(_)), "got {err:?}");
    }
}
