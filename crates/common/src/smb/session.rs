// Authenticated SMB2 session able to enumerate shares over srvsvc

use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::error::{Error, Result};
use crate::types::ShareInfo;

use super::ntlm::{self, Challenge, Credentials};
use super::packet::{self, status, Command, Header, NegotiateResponse, SessionSetupResponse};
use super::rpc;
use super::transport::Transport;

const MAX_IO_CHUNK: u32 = 64 * 1024;
const SRVSVC_PIPE: &str = "srvsvc";

/// Parameters of one session setup
pub struct SessionParams<'a> {
    pub host: &'a str,
    pub credentials: &'a Credentials,
    pub workstation: &'a str,
    pub client_guid: [u8; 16],
    pub client_challenge: [u8; 8],
}

pub struct SmbSession {
    transport: Transport,
    host: String,
    dialect: u16,
    message_id: u64,
    session_id: u64,
    signing_key: Option<Zeroizing<[u8; 16]>>,
    max_transact: u32,
    max_read: u32,
    logged_on: bool,
}

impl SmbSession {
    /// Negotiate a dialect and authenticate over an open transport
    pub fn establish(transport: Transport, params: &SessionParams<'_>) -> Result<Self> {
        let mut session = Self {
            transport,
            host: params.host.to_string(),
            dialect: packet::DIALECT_2_0_2,
            message_id: 0,
            session_id: 0,
            signing_key: None,
            max_transact: MAX_IO_CHUNK,
            max_read: MAX_IO_CHUNK,
            logged_on: false,
        };

        let signing_required = session.negotiate(&params.client_guid)?;
        session.authenticate(params, signing_required)?;
        Ok(session)
    }

    pub fn dialect(&self) -> u16 {
        self.dialect
    }

    pub fn is_signing(&self) -> bool {
        self.signing_key.is_some()
    }

    fn negotiate(&mut self, client_guid: &[u8; 16]) -> Result<bool> {
        let (header, msg) = self.call(
            Command::Negotiate,
            0,
            &packet::negotiate_request(client_guid),
        )?;
        if header.status != status::SUCCESS {
            return Err(packet::status_error("Negotiate", header.status));
        }
        let resp = NegotiateResponse::decode(&msg)?;
        if !packet::SUPPORTED_DIALECTS.contains(&resp.dialect) {
            return Err(Error::Protocol(format!(
                "Server selected unsupported dialect 0x{:04x}",
                resp.dialect
            )));
        }
        self.dialect = resp.dialect;
        self.max_transact = resp.max_transact_size.clamp(1024, MAX_IO_CHUNK);
        self.max_read = resp.max_read_size.clamp(1024, MAX_IO_CHUNK);
        debug!(
            "Negotiated SMB dialect 0x{:04x} with {}",
            self.dialect,
            self.transport.peer()
        );
        Ok(resp.security_mode & packet::SIGNING_REQUIRED != 0)
    }

    fn authenticate(&mut self, params: &SessionParams<'_>, signing_required: bool) -> Result<()> {
        let first = ntlm::spnego_init(&ntlm::negotiate_message());
        let (header, msg) = self.call(
            Command::SessionSetup,
            0,
            &packet::session_setup_request(&first),
        )?;
        if header.status != status::MORE_PROCESSING_REQUIRED {
            return Err(packet::status_error("Login", header.status));
        }
        self.session_id = header.session_id;

        let resp = SessionSetupResponse::decode(&msg)?;
        let challenge = Challenge::decode(ntlm::extract_ntlm(&resp.security_blob)?)?;
        let auth = ntlm::authenticate_message(
            params.credentials,
            &challenge,
            &params.client_challenge,
            params.workstation,
        );

        let second = ntlm::spnego_response(&auth.message);
        let (header, msg) = self.call(
            Command::SessionSetup,
            0,
            &packet::session_setup_request(&second),
        )?;
        if header.status != status::SUCCESS {
            return Err(packet::status_error("Login", header.status));
        }
        let resp = SessionSetupResponse::decode(&msg)?;
        let anonymous =
            resp.session_flags & (packet::SESSION_FLAG_IS_GUEST | packet::SESSION_FLAG_IS_NULL) != 0;
        if signing_required && !anonymous {
            self.signing_key = Some(auth.session_key);
        } else if signing_required {
            warn!("Server requires signing but granted a guest session");
        }
        self.logged_on = true;
        debug!(
            "Logged on to {} as {}\\{} (signing: {})",
            self.host,
            params.credentials.domain,
            params.credentials.user,
            self.is_signing()
        );
        Ok(())
    }

    /// Enumerate every share the server exports
    pub fn list_shares(&mut self) -> Result<Vec<ShareInfo>> {
        if !self.logged_on {
            return Err(Error::Protocol("session is not authenticated".to_string()));
        }

        let unc = format!("\\\\{}\\IPC$", self.host);
        let (header, _) = self.call(Command::TreeConnect, 0, &packet::tree_connect_request(&unc))?;
        if header.status != status::SUCCESS {
            return Err(packet::status_error("Connect to IPC$", header.status));
        }
        let tree_id = header.tree_id;

        let result = self.enumerate_on_tree(tree_id);
        if let Err(e) = self.call(Command::TreeDisconnect, tree_id, &packet::empty_request()) {
            debug!("Tree disconnect failed: {}", e);
        }
        result
    }

    fn enumerate_on_tree(&mut self, tree_id: u32) -> Result<Vec<ShareInfo>> {
        let (header, msg) = self.call(
            Command::Create,
            tree_id,
            &packet::create_pipe_request(SRVSVC_PIPE),
        )?;
        if header.status != status::SUCCESS {
            return Err(packet::status_error("Open srvsvc pipe", header.status));
        }
        let file_id = packet::decode_create_response(&msg)?;

        let result = self.share_enum(tree_id, &file_id);
        if let Err(e) = self.call(Command::Close, tree_id, &packet::close_request(&file_id)) {
            debug!("Closing srvsvc pipe failed: {}", e);
        }
        result
    }

    fn share_enum(&mut self, tree_id: u32, file_id: &[u8; 16]) -> Result<Vec<ShareInfo>> {
        let ack = self.transact(tree_id, file_id, &rpc::bind_request(1))?;
        rpc::check_bind_ack(&ack)?;

        let request = rpc::share_enum_request(&self.host, 2);
        let response = self.transact(tree_id, file_id, &request)?;
        let shares = rpc::parse_share_enum(&rpc::response_stub(&response)?)?;
        debug!("{} reported {} share(s)", self.host, shares.len());
        Ok(shares)
    }

    /// Write one RPC PDU to the pipe and collect the complete reply
    fn transact(&mut self, tree_id: u32, file_id: &[u8; 16], input: &[u8]) -> Result<Vec<u8>> {
        let body = packet::transceive_request(file_id, input, self.max_transact);
        let (header, msg) = self.call(Command::Ioctl, tree_id, &body)?;
        let mut data = match header.status {
            status::SUCCESS | status::BUFFER_OVERFLOW => packet::decode_ioctl_response(&msg)?,
            code => return Err(packet::status_error("srvsvc request", code)),
        };

        while !rpc::is_complete(&data)? {
            if data.len() > rpc::MAX_RESPONSE {
                return Err(Error::Protocol("srvsvc response too large".to_string()));
            }
            let body = packet::read_request(file_id, self.max_read);
            let (header, msg) = self.call(Command::Read, tree_id, &body)?;
            let chunk = match header.status {
                status::SUCCESS | status::BUFFER_OVERFLOW => packet::decode_read_response(&msg)?,
                code => return Err(packet::status_error("srvsvc read", code)),
            };
            if chunk.is_empty() {
                return Err(Error::Protocol("srvsvc pipe returned no data".to_string()));
            }
            data.extend(chunk);
        }
        Ok(data)
    }

    /// Send a request and wait for its final response
    fn call(&mut self, command: Command, tree_id: u32, body: &[u8]) -> Result<(Header, Vec<u8>)> {
        let message_id = self.message_id;
        self.message_id += 1;

        let mut header = Header::request(command, message_id);
        header.credit_charge = if self.dialect == packet::DIALECT_2_0_2 { 0 } else { 1 };
        header.tree_id = tree_id;
        header.session_id = self.session_id;

        let mut msg = packet::message(&header, body);
        if let Some(key) = &self.signing_key {
            packet::prepare_for_signing(&mut msg);
            let mut mac = Hmac::<Sha256>::new_from_slice(key.as_slice())
                .expect("HMAC accepts keys of any length");
            mac.update(&msg);
            let digest = mac.finalize().into_bytes();
            let mut signature = [0u8; 16];
            signature.copy_from_slice(&digest[..16]);
            packet::sign(&mut msg, &signature);
        }
        self.transport.send(&msg)?;

        loop {
            let reply = self.transport.recv()?;
            let reply_header = Header::decode(&reply)?;
            if reply_header.message_id != message_id {
                debug!(
                    "Ignoring response for message {} while waiting for {}",
                    reply_header.message_id, message_id
                );
                continue;
            }
            if reply_header.status == status::PENDING
                && reply_header.flags & packet::FLAG_ASYNC != 0
            {
                continue;
            }
            return Ok((reply_header, reply));
        }
    }

    /// Log off and close the connection
    pub fn close(&mut self) -> Result<()> {
        if !self.logged_on {
            return Ok(());
        }
        self.logged_on = false;
        let result = self
            .call(Command::Logoff, 0, &packet::empty_request())
            .and_then(|(header, _)| match header.status {
                status::SUCCESS => Ok(()),
                code => Err(packet::status_error("Logoff", code)),
            });
        self.transport.shutdown();
        result
    }
}

impl Drop for SmbSession {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            debug!("Closing SMB session failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::smb::wire::{Reader, Writer};
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    struct Script {
        login_status: u32,
    }

    fn read_message(sock: &mut TcpStream) -> Option<Vec<u8>> {
        let mut header = [0u8; 4];
        sock.read_exact(&mut header).ok()?;
        let len = ((header[1] as usize) << 16) | ((header[2] as usize) << 8) | header[3] as usize;
        let mut body = vec![0u8; len];
        sock.read_exact(&mut body).ok()?;
        Some(body)
    }

    fn write_message(sock: &mut TcpStream, msg: &[u8]) {
        let len = msg.len();
        sock.write_all(&[0, (len >> 16) as u8, (len >> 8) as u8, len as u8])
            .unwrap();
        sock.write_all(msg).unwrap();
    }

    fn challenge_blob() -> Vec<u8> {
        let mut w = Writer::new();
        w.bytes(b"NTLMSSP\0")
            .u32(2)
            .u16(0)
            .u16(0)
            .u32(48)
            .u32(0xE288_8215)
            .bytes(&[1, 2, 3, 4, 5, 6, 7, 8])
            .zeros(8)
            .u16(4)
            .u16(4)
            .u32(48)
            .u32(0);
        w.into_inner()
    }

    fn rpc_pdu(ptype: u8, body: &[u8]) -> Vec<u8> {
        let mut w = Writer::new();
        w.u8(5)
            .u8(0)
            .u8(ptype)
            .u8(3)
            .bytes(&[0x10, 0, 0, 0])
            .u16((16 + body.len()) as u16)
            .u16(0)
            .u32(1)
            .bytes(body);
        w.into_inner()
    }

    fn bind_ack() -> Vec<u8> {
        let mut w = Writer::new();
        w.u16(4280).u16(4280).u32(1).u16(0).align(4);
        w.u8(1).zeros(3).u16(0).u16(0).zeros(20);
        rpc_pdu(12, &w.into_inner())
    }

    fn share_enum_response() -> Vec<u8> {
        let mut w = Writer::new();
        w.u32(0).u16(0).u8(0).u8(0); // alloc hint, context, cancel count
        w.u32(1).u32(1).u32(0x0002_0000).u32(1).u32(0x0002_0004).u32(1);
        w.u32(0x0002_0008).u32(0).u32(0x0002_000c);
        for s in ["data", ""] {
            let units: Vec<u16> = s.encode_utf16().chain(std::iter::once(0)).collect();
            w.align(4).u32(units.len() as u32).u32(0).u32(units.len() as u32);
            for u in units {
                w.u16(u);
            }
        }
        w.align(4).u32(1).u32(0).u32(0);
        rpc_pdu(2, &w.into_inner())
    }

    fn respond(request: &[u8], script: &Script) -> Vec<u8> {
        let req = Header::decode(request).unwrap();
        let mut header = req.clone();
        header.flags = packet::FLAG_RESPONSE;
        header.session_id = 0x42;
        let mut body = Writer::new();

        match req.command {
            c if c == Command::Negotiate as u16 => {
                body.u16(65)
                    .u16(packet::SIGNING_ENABLED)
                    .u16(packet::DIALECT_2_1)
                    .u16(0)
                    .zeros(16)
                    .u32(0)
                    .u32(65536)
                    .u32(65536)
                    .u32(65536)
                    .u64(0)
                    .u64(0)
                    .u16(0)
                    .u16(0)
                    .u32(0);
            }
            c if c == Command::SessionSetup as u16 => {
                if request.len() > 64 + 24 && request[64 + 24..].starts_with(&[0x60]) {
                    let blob = challenge_blob();
                    header.status = status::MORE_PROCESSING_REQUIRED;
                    body.u16(9).u16(0).u16(72).u16(blob.len() as u16).bytes(&blob);
                } else {
                    header.status = script.login_status;
                    body.u16(9).u16(0).u16(0).u16(0);
                }
            }
            c if c == Command::TreeConnect as u16 => {
                header.tree_id = 5;
                body.u16(16).u8(2).u8(0).u32(0).u32(0).u32(0x001F_01FF);
            }
            c if c == Command::Create as u16 => {
                body.u16(89).zeros(62).bytes(&[7; 16]).zeros(8);
            }
            c if c == Command::Ioctl as u16 => {
                let input = &request[64 + 56..];
                let output = if input[2] == 11 { bind_ack() } else { share_enum_response() };
                body.u16(49)
                    .u16(0)
                    .u32(0x0011_C017)
                    .bytes(&[7; 16])
                    .u32(0)
                    .u32(0)
                    .u32(112)
                    .u32(output.len() as u32)
                    .u32(0)
                    .u32(0)
                    .bytes(&output);
            }
            c if c == Command::Close as u16 => {
                body.u16(60).zeros(58);
            }
            _ => {
                body.u16(4).u16(0);
            }
        }

        let mut w = Writer::new();
        header.encode(&mut w);
        w.bytes(&body.into_inner());
        w.into_inner()
    }

    fn fake_server(script: Script) -> (u16, mpsc::Receiver<u16>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            while let Some(request) = read_message(&mut sock) {
                let command = Reader::at(&request, 12).u16().unwrap();
                let _ = tx.send(command);
                write_message(&mut sock, &respond(&request, &script));
            }
        });
        (port, rx)
    }

    fn params<'a>(creds: &'a Credentials) -> SessionParams<'a> {
        SessionParams {
            host: "127.0.0.1",
            credentials: creds,
            workstation: "TEST",
            client_guid: [9; 16],
            client_challenge: [0xaa; 8],
        }
    }

    fn open(port: u16, creds: &Credentials) -> Result<SmbSession> {
        let transport = Transport::connect("127.0.0.1", port, Duration::from_secs(5))?;
        SmbSession::establish(transport, &params(creds))
    }

    #[test]
    fn test_list_shares_and_logoff() {
        let (port, commands) = fake_server(Script {
            login_status: status::SUCCESS,
        });
        let creds = Credentials::new("alice", "secret", "WORKGROUP");

        let mut session = open(port, &creds).unwrap();
        assert_eq!(session.dialect(), packet::DIALECT_2_1);
        assert!(!session.is_signing());

        let shares = session.list_shares().unwrap();
        assert_eq!(shares.len(), 1);
        assert_eq!(shares[0].name, "data");

        session.close().unwrap();
        let seen: Vec<u16> = commands.try_iter().collect();
        assert_eq!(seen.last(), Some(&(Command::Logoff as u16)));
        assert!(seen.contains(&(Command::Close as u16)));
        assert!(seen.contains(&(Command::TreeDisconnect as u16)));

        // A closed session cannot enumerate
        assert!(matches!(session.list_shares(), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_rejected_login_is_auth_error() {
        let (port, _commands) = fake_server(Script {
            login_status: status::LOGON_FAILURE,
        });
        let creds = Credentials::new("alice", "wrong", "WORKGROUP");

        let err = open(port, &creds).err().unwrap();
        assert!(matches!(err, Error::Auth(_)), "got {err:?}");
    }
}
