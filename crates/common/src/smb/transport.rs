// SMB transport: direct-hosted TCP (445) or NetBIOS session service (139)

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::{Error, Result};

/// Port that requires a NetBIOS session request before SMB traffic
pub const NETBIOS_SESSION_PORT: u16 = 139;

const SESSION_MESSAGE: u8 = 0x00;
const SESSION_REQUEST: u8 = 0x81;
const POSITIVE_RESPONSE: u8 = 0x82;
const NEGATIVE_RESPONSE: u8 = 0x83;
const RETARGET_RESPONSE: u8 = 0x84;
const SESSION_KEEPALIVE: u8 = 0x85;

/// Largest frame accepted from a server
const MAX_FRAME: usize = 0x00FF_FFFF;

const CALLED_NAME: &str = "*SMBSERVER";
const CALLING_NAME: &str = "SMBLAUNCHER";

/// Framed byte stream to an SMB server
#[derive(Debug)]
pub struct Transport {
    stream: TcpStream,
    peer: String,
}

impl Transport {
    /// Open a TCP connection with a bounded connect, read and write timeout
    pub fn connect(host: &str, port: u16, timeout: Duration) -> Result<Self> {
        let peer = format!("{host}:{port}");
        let addrs: Vec<SocketAddr> = (host, port)
            .to_socket_addrs()
            .map_err(|e| Error::Network(format!("Cannot resolve {host}: {e}")))?
            .collect();

        if addrs.is_empty() {
            return Err(Error::Network(format!("No addresses found for {host}")));
        }
        let stream = connect_within(&addrs, &peer, Instant::now() + timeout)
            .map_err(|e| io_error(&peer, e))?;

        stream
            .set_read_timeout(Some(timeout))
            .and_then(|_| stream.set_write_timeout(Some(timeout)))
            .and_then(|_| stream.set_nodelay(true))
            .map_err(|e| io_error(&peer, e))?;

        let mut transport = Self { stream, peer };
        if port == NETBIOS_SESSION_PORT {
            transport.request_netbios_session()?;
        }
        Ok(transport)
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Send one SMB message
    pub fn send(&mut self, message: &[u8]) -> Result<()> {
        if message.len() > MAX_FRAME {
            return Err(Error::Protocol(format!(
                "Message too large: {} bytes",
                message.len()
            )));
        }
        let frame = frame_header(SESSION_MESSAGE, message.len());
        self.stream
            .write_all(&frame)
            .and_then(|_| self.stream.write_all(message))
            .and_then(|_| self.stream.flush())
            .map_err(|e| io_error(&self.peer, e))
    }

    /// Receive one SMB message, skipping keepalives
    pub fn recv(&mut self) -> Result<Vec<u8>> {
        loop {
            let (kind, len) = self.read_frame_header()?;
            let mut payload = vec![0u8; len];
            self.stream
                .read_exact(&mut payload)
                .map_err(|e| io_error(&self.peer, e))?;

            match kind {
                SESSION_MESSAGE => return Ok(payload),
                SESSION_KEEPALIVE => continue,
                other => {
                    return Err(Error::Protocol(format!(
                        "Unexpected session packet type 0x{other:02x}"
                    )))
                }
            }
        }
    }

    /// Close both directions of the socket
    pub fn shutdown(&mut self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }

    fn read_frame_header(&mut self) -> Result<(u8, usize)> {
        let mut header = [0u8; 4];
        self.stream
            .read_exact(&mut header)
            .map_err(|e| io_error(&self.peer, e))?;
        let len = ((header[1] as usize) << 16) | ((header[2] as usize) << 8) | header[3] as usize;
        Ok((header[0], len))
    }

    fn request_netbios_session(&mut self) -> Result<()> {
        let mut request = Vec::with_capacity(72);
        request.extend_from_slice(&frame_header(SESSION_REQUEST, 68));
        request.extend_from_slice(&encode_netbios_name(CALLED_NAME, 0x20));
        request.extend_from_slice(&encode_netbios_name(CALLING_NAME, 0x00));
        self.stream
            .write_all(&request)
            .map_err(|e| io_error(&self.peer, e))?;

        let (kind, len) = self.read_frame_header()?;
        let mut body = vec![0u8; len];
        self.stream
            .read_exact(&mut body)
            .map_err(|e| io_error(&self.peer, e))?;

        match kind {
            POSITIVE_RESPONSE => {
                debug!("NetBIOS session established with {}", self.peer);
                Ok(())
            }
            NEGATIVE_RESPONSE => Err(Error::Network(format!(
                "NetBIOS session refused by {} (code 0x{:02x})",
                self.peer,
                body.first().copied().unwrap_or(0)
            ))),
            RETARGET_RESPONSE => Err(Error::Network(format!(
                "NetBIOS session retargeted by {}",
                self.peer
            ))),
            other => Err(Error::Protocol(format!(
                "Unexpected NetBIOS response 0x{other:02x}"
            ))),
        }
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn frame_header(kind: u8, len: usize) -> [u8; 4] {
    [kind, (len >> 16) as u8, (len >> 8) as u8, len as u8]
}

/// First-level encoding of a NetBIOS name (RFC 1001 §14.1)
pub fn encode_netbios_name(name: &str, suffix: u8) -> [u8; 34] {
    let mut raw = [b' '; 16];
    for (slot, b) in raw.iter_mut().zip(name.bytes().take(15)) {
        *slot = b.to_ascii_uppercase();
    }
    raw[15] = suffix;

    let mut out = [0u8; 34];
    out[0] = 32;
    for (i, b) in raw.iter().enumerate() {
        out[1 + 2 * i] = b'A' + (b >> 4);
        out[2 + 2 * i] = b'A' + (b & 0x0F);
    }
    out
}

fn io_error(peer: &str, e: io::Error) -> Error {
    match e.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => {
            Error::Network(format!("Timed out talking to {peer}"))
        }
        io::ErrorKind::UnexpectedEof
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe => Error::Network(format!("Connection to {peer} closed")),
        io::ErrorKind::ConnectionRefused => Error::Network(format!("Connection refused by {peer}")),
        _ => Error::Network(format!("{peer}: {e}")),
    }
}

/// Try each address in turn, sharing one deadline across all of them
fn connect_within(addrs: &[SocketAddr], peer: &str, deadline: Instant) -> io::Result<TcpStream> {
    let mut last_err = None;
    for addr in addrs {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        debug!("Connecting to {} ({}), {:?} left", peer, addr, remaining);
        match TcpStream::connect_timeout(addr, remaining) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_err = Some(e),
        }
    }
    Err(last_err.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::TimedOut, "connect timed out")
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn test_netbios_name_encoding() {
        let encoded = encode_netbios_name("*SMBSERVER", 0x20);
        assert_eq!(encoded[0], 32);
        assert_eq!(&encoded[1..33], b"CKFDENECFDEFFCFGEFFCCACACACACACA");
        assert_eq!(encoded[33], 0);
    }

    #[test]
    fn test_refused_is_network_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = Transport::connect("127.0.0.1", port, Duration::from_secs(2)).unwrap_err();
        assert!(matches!(err, Error::Network(_)), "got {err:?}");
    }

    #[test]
    fn test_expired_deadline_skips_remaining_addresses() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let err = connect_within(&[addr, addr], "lab", Instant::now()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);

        let stream = connect_within(&[addr], "lab", Instant::now() + Duration::from_secs(2));
        assert!(stream.is_ok());
    }

    #[test]
    fn test_frame_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            let mut header = [0u8; 4];
            sock.read_exact(&mut header).unwrap();
            let len = header[3] as usize;
            let mut body = vec![0u8; len];
            sock.read_exact(&mut body).unwrap();
            // keepalive first, then the echo
            sock.write_all(&[SESSION_KEEPALIVE, 0, 0, 0]).unwrap();
            sock.write_all(&header).unwrap();
            sock.write_all(&body).unwrap();
        });

        let mut transport =
            Transport::connect("127.0.0.1", port, Duration::from_secs(2)).unwrap();
        transport.send(b"hello").unwrap();
        assert_eq!(transport.recv().unwrap(), b"hello");
        server.join().unwrap();
    }

    #[test]
    fn test_closed_mid_frame_is_network_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            sock.write_all(&[0, 0, 0, 10, 1, 2]).unwrap();
        });

        let mut transport =
            Transport::connect("127.0.0.1", port, Duration::from_secs(2)).unwrap();
        server.join().unwrap();
        assert!(matches!(transport.recv(), Err(Error::Network(_))));
    }
}
