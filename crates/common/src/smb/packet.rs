// SMB2 message codec (MS-SMB2 §2.2), limited to the commands needed to
// authenticate and enumerate shares over the srvsvc pipe

use crate::error::{Error, Result};

use super::wire::{slice_at, utf16le, Reader, Writer};

pub const HEADER_LEN: usize = 64;
const PROTOCOL_ID: [u8; 4] = [0xFE, b'S', b'M', b'B'];
const SIGNATURE_OFFSET: usize = 48;

pub const DIALECT_2_0_2: u16 = 0x0202;
pub const DIALECT_2_1: u16 = 0x0210;
pub const SUPPORTED_DIALECTS: [u16; 2] = [DIALECT_2_0_2, DIALECT_2_1];

pub const SIGNING_ENABLED: u16 = 0x0001;
pub const SIGNING_REQUIRED: u16 = 0x0002;

pub const FLAG_RESPONSE: u32 = 0x0000_0001;
pub const FLAG_ASYNC: u32 = 0x0000_0002;
pub const FLAG_SIGNED: u32 = 0x0000_0008;

pub const SESSION_FLAG_IS_GUEST: u16 = 0x0001;
pub const SESSION_FLAG_IS_NULL: u16 = 0x0002;

const FSCTL_PIPE_TRANSCEIVE: u32 = 0x0011_C017;
const IOCTL_IS_FSCTL: u32 = 0x0000_0001;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Command {
    Negotiate = 0x0000,
    SessionSetup = 0x0001,
    Logoff = 0x0002,
    TreeConnect = 0x0003,
    TreeDisconnect = 0x0004,
    Create = 0x0005,
    Close = 0x0006,
    Read = 0x0008,
    Ioctl = 0x000B,
}

/// NTSTATUS values the client reacts to
pub mod status {
    pub const SUCCESS: u32 = 0x0000_0000;
    pub const PENDING: u32 = 0x0000_0103;
    pub const BUFFER_OVERFLOW: u32 = 0x8000_0005;
    pub const MORE_PROCESSING_REQUIRED: u32 = 0xC000_0016;
    pub const ACCESS_DENIED: u32 = 0xC000_0022;
    pub const NO_SUCH_USER: u32 = 0xC000_0064;
    pub const WRONG_PASSWORD: u32 = 0xC000_006A;
    pub const LOGON_FAILURE: u32 = 0xC000_006D;
    pub const ACCOUNT_RESTRICTION: u32 = 0xC000_006E;
    pub const INVALID_LOGON_HOURS: u32 = 0xC000_006F;
    pub const PASSWORD_EXPIRED: u32 = 0xC000_0071;
    pub const ACCOUNT_DISABLED: u32 = 0xC000_0072;
    pub const NOT_SUPPORTED: u32 = 0xC000_00BB;
    pub const BAD_NETWORK_NAME: u32 = 0xC000_00CC;
    pub const PASSWORD_MUST_CHANGE: u32 = 0xC000_0224;
    pub const ACCOUNT_LOCKED_OUT: u32 = 0xC000_0234;
}

/// Map a failing NTSTATUS to an error kind
pub fn status_error(context: &str, code: u32) -> Error {
    let detail = match code {
        status::LOGON_FAILURE | status::WRONG_PASSWORD | status::NO_SUCH_USER => {
            "invalid username or password"
        }
        status::ACCOUNT_DISABLED => "account disabled",
        status::ACCOUNT_LOCKED_OUT => "account locked out",
        status::PASSWORD_EXPIRED | status::PASSWORD_MUST_CHANGE => "password expired",
        status::ACCOUNT_RESTRICTION | status::INVALID_LOGON_HOURS => "account restricted",
        status::ACCESS_DENIED => "access denied",
        status::BAD_NETWORK_NAME => {
            return Error::Protocol(format!("{context}: share not found on server"))
        }
        status::NOT_SUPPORTED => {
            return Error::Protocol(format!("{context}: operation not supported by server"))
        }
        other => return Error::Protocol(format!("{context}: status 0x{other:08x}")),
    };
    Error::Auth(format!("{context}: {detail}"))
}

/// Fixed 64-byte SMB2 sync header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub credit_charge: u16,
    pub status: u32,
    pub command: u16,
    pub credits: u16,
    pub flags: u32,
    pub message_id: u64,
    pub tree_id: u32,
    pub session_id: u64,
}

impl Header {
    pub fn request(command: Command, message_id: u64) -> Self {
        Self {
            credit_charge: 0,
            status: 0,
            command: command as u16,
            credits: 31,
            flags: 0,
            message_id,
            tree_id: 0,
            session_id: 0,
        }
    }

    pub fn encode(&self, w: &mut Writer) {
        w.bytes(&PROTOCOL_ID)
            .u16(HEADER_LEN as u16)
            .u16(self.credit_charge)
            .u32(self.status)
            .u16(self.command)
            .u16(self.credits)
            .u32(self.flags)
            .u32(0) // NextCommand
            .u64(self.message_id)
            .u32(0) // Reserved (ProcessId)
            .u32(self.tree_id)
            .u64(self.session_id)
            .zeros(16); // Signature
    }

    pub fn decode(message: &[u8]) -> Result<Self> {
        let mut r = Reader::new(message);
        if r.bytes(4)? != PROTOCOL_ID {
            return Err(Error::Protocol("Not an SMB2 message".to_string()));
        }
        if r.u16()? as usize != HEADER_LEN {
            return Err(Error::Protocol("Bad SMB2 header size".to_string()));
        }
        let credit_charge = r.u16()?;
        let status = r.u32()?;
        let command = r.u16()?;
        let credits = r.u16()?;
        let flags = r.u32()?;
        r.skip(4)?; // NextCommand
        let message_id = r.u64()?;
        // Async responses carry an AsyncId here instead of ProcessId/TreeId
        let tree_id = if flags & FLAG_ASYNC != 0 {
            r.skip(8)?;
            0
        } else {
            r.skip(4)?;
            r.u32()?
        };
        let session_id = r.u64()?;
        Ok(Self {
            credit_charge,
            status,
            command,
            credits,
            flags,
            message_id,
            tree_id,
            session_id,
        })
    }
}

/// Build a complete message from a header and command body
pub fn message(header: &Header, body: &[u8]) -> Vec<u8> {
    let mut w = Writer::with_capacity(HEADER_LEN + body.len());
    header.encode(&mut w);
    w.bytes(body);
    w.into_inner()
}

/// Mark `message` as signed and store its signature
pub fn sign(message: &mut [u8], signature: &[u8; 16]) {
    let flags = u32::from_le_bytes([message[16], message[17], message[18], message[19]])
        | FLAG_SIGNED;
    message[16..20].copy_from_slice(&flags.to_le_bytes());
    message[SIGNATURE_OFFSET..HEADER_LEN].copy_from_slice(signature);
}

/// Set the signed flag and zero the signature field before computing a MAC
pub fn prepare_for_signing(message: &mut [u8]) {
    sign(message, &[0u8; 16]);
}

pub fn negotiate_request(client_guid: &[u8; 16]) -> Vec<u8> {
    let mut w = Writer::new();
    w.u16(36)
        .u16(SUPPORTED_DIALECTS.len() as u16)
        .u16(SIGNING_ENABLED)
        .u16(0)
        .u32(0) // Capabilities
        .bytes(client_guid)
        .u64(0); // ClientStartTime
    for dialect in SUPPORTED_DIALECTS {
        w.u16(dialect);
    }
    w.into_inner()
}

#[derive(Debug, Clone)]
pub struct NegotiateResponse {
    pub security_mode: u16,
    pub dialect: u16,
    pub max_transact_size: u32,
    pub max_read_size: u32,
    pub security_blob: Vec<u8>,
}

impl NegotiateResponse {
    pub fn decode(message: &[u8]) -> Result<Self> {
        let mut r = Reader::at(message, HEADER_LEN);
        expect_structure_size(&mut r, 65, "NEGOTIATE")?;
        let security_mode = r.u16()?;
        let dialect = r.u16()?;
        r.skip(2 + 16 + 4)?; // NegotiateContextCount, ServerGuid, Capabilities
        let max_transact_size = r.u32()?;
        let max_read_size = r.u32()?;
        r.skip(4 + 8 + 8)?; // MaxWriteSize, SystemTime, ServerStartTime
        let blob_offset = r.u16()? as usize;
        let blob_len = r.u16()? as usize;
        let security_blob = if blob_len == 0 {
            Vec::new()
        } else {
            slice_at(message, blob_offset, blob_len)?.to_vec()
        };
        Ok(Self {
            security_mode,
            dialect,
            max_transact_size,
            max_read_size,
            security_blob,
        })
    }
}

pub fn session_setup_request(security_blob: &[u8]) -> Vec<u8> {
    let mut w = Writer::new();
    w.u16(25)
        .u8(0) // Flags
        .u8(SIGNING_ENABLED as u8)
        .u32(0) // Capabilities
        .u32(0) // Channel
        .u16((HEADER_LEN + 24) as u16)
        .u16(security_blob.len() as u16)
        .u64(0) // PreviousSessionId
        .bytes(security_blob);
    w.into_inner()
}

#[derive(Debug, Clone)]
pub struct SessionSetupResponse {
    pub session_flags: u16,
    pub security_blob: Vec<u8>,
}

impl SessionSetupResponse {
    pub fn decode(message: &[u8]) -> Result<Self> {
        let mut r = Reader::at(message, HEADER_LEN);
        expect_structure_size(&mut r, 9, "SESSION_SETUP")?;
        let session_flags = r.u16()?;
        let blob_offset = r.u16()? as usize;
        let blob_len = r.u16()? as usize;
        let security_blob = if blob_len == 0 {
            Vec::new()
        } else {
            slice_at(message, blob_offset, blob_len)?.to_vec()
        };
        Ok(Self {
            session_flags,
            security_blob,
        })
    }
}

/// TREE_CONNECT for a UNC path such as `\\host\IPC$`
pub fn tree_connect_request(unc_path: &str) -> Vec<u8> {
    let path = utf16le(unc_path);
    let mut w = Writer::new();
    w.u16(9)
        .u16(0)
        .u16((HEADER_LEN + 8) as u16)
        .u16(path.len() as u16)
        .bytes(&path);
    w.into_inner()
}

/// CREATE opening a named pipe on the IPC$ tree
pub fn create_pipe_request(pipe_name: &str) -> Vec<u8> {
    const IMPERSONATION: u32 = 2;
    const FILE_READ_WRITE_ACCESS: u32 = 0x0012_019F;
    const SHARE_READ_WRITE: u32 = 0x0000_0003;
    const FILE_OPEN: u32 = 0x0000_0001;
    const FILE_NON_DIRECTORY_FILE: u32 = 0x0000_0040;

    let name = utf16le(pipe_name);
    let mut w = Writer::new();
    w.u16(57)
        .u8(0) // SecurityFlags
        .u8(0) // RequestedOplockLevel
        .u32(IMPERSONATION)
        .u64(0) // SmbCreateFlags
        .u64(0) // Reserved
        .u32(FILE_READ_WRITE_ACCESS)
        .u32(0) // FileAttributes
        .u32(SHARE_READ_WRITE)
        .u32(FILE_OPEN)
        .u32(FILE_NON_DIRECTORY_FILE)
        .u16((HEADER_LEN + 56) as u16)
        .u16(name.len() as u16)
        .u32(0) // CreateContextsOffset
        .u32(0) // CreateContextsLength
        .bytes(&name);
    w.into_inner()
}

/// Extract the FileId from a CREATE response
pub fn decode_create_response(message: &[u8]) -> Result<[u8; 16]> {
    let mut r = Reader::at(message, HEADER_LEN);
    expect_structure_size(&mut r, 89, "CREATE")?;
    r.skip(62)?;
    let mut file_id = [0u8; 16];
    file_id.copy_from_slice(r.bytes(16)?);
    Ok(file_id)
}

/// IOCTL FSCTL_PIPE_TRANSCEIVE: write `input` to the pipe and read the reply
pub fn transceive_request(file_id: &[u8; 16], input: &[u8], max_output: u32) -> Vec<u8> {
    let mut w = Writer::new();
    w.u16(57)
        .u16(0)
        .u32(FSCTL_PIPE_TRANSCEIVE)
        .bytes(file_id)
        .u32((HEADER_LEN + 56) as u32) // InputOffset
        .u32(input.len() as u32)
        .u32(0) // MaxInputResponse
        .u32(0) // OutputOffset
        .u32(0) // OutputCount
        .u32(max_output)
        .u32(IOCTL_IS_FSCTL)
        .u32(0)
        .bytes(input);
    w.into_inner()
}

/// Output buffer of an IOCTL response
pub fn decode_ioctl_response(message: &[u8]) -> Result<Vec<u8>> {
    let mut r = Reader::at(message, HEADER_LEN);
    expect_structure_size(&mut r, 49, "IOCTL")?;
    r.skip(2 + 4 + 16 + 4 + 4)?; // Reserved, CtlCode, FileId, InputOffset, InputCount
    let out_offset = r.u32()? as usize;
    let out_len = r.u32()? as usize;
    Ok(slice_at(message, out_offset, out_len)?.to_vec())
}

pub fn read_request(file_id: &[u8; 16], length: u32) -> Vec<u8> {
    let mut w = Writer::new();
    w.u16(49)
        .u8(0x50) // Padding: data offset hint
        .u8(0)
        .u32(length)
        .u64(0) // Offset
        .bytes(file_id)
        .u32(0) // MinimumCount
        .u32(0) // Channel
        .u32(0) // RemainingBytes
        .u16(0)
        .u16(0)
        .u8(0); // Buffer
    w.into_inner()
}

pub fn decode_read_response(message: &[u8]) -> Result<Vec<u8>> {
    let mut r = Reader::at(message, HEADER_LEN);
    expect_structure_size(&mut r, 17, "READ")?;
    let data_offset = r.u8()? as usize;
    r.skip(1)?;
    let data_len = r.u32()? as usize;
    Ok(slice_at(message, data_offset, data_len)?.to_vec())
}

pub fn close_request(file_id: &[u8; 16]) -> Vec<u8> {
    let mut w = Writer::new();
    w.u16(24).u16(0).u32(0).bytes(file_id);
    w.into_inner()
}

/// Body shared by TREE_DISCONNECT and LOGOFF
pub fn empty_request() -> Vec<u8> {
    vec![4, 0, 0, 0]
}

fn expect_structure_size(r: &mut Reader<'_>, expected: u16, what: &str) -> Result<()> {
    let size = r.u16()?;
    if size != expected {
        return Err(Error::Protocol(format!(
            "{what} response has structure size {size}, expected {expected}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response_header(command: Command, status: u32) -> Vec<u8> {
        let mut header = Header::request(command, 7);
        header.flags = FLAG_RESPONSE;
        header.status = status;
        header.session_id = 0x1122_3344_5566_7788;
        header.tree_id = 9;
        let mut w = Writer::new();
        header.encode(&mut w);
        w.into_inner()
    }

    #[test]
    fn test_header_round_trip() {
        let bytes = response_header(Command::TreeConnect, status::SUCCESS);
        assert_eq!(bytes.len(), HEADER_LEN);
        let header = Header::decode(&bytes).unwrap();
        assert_eq!(header.command, Command::TreeConnect as u16);
        assert_eq!(header.message_id, 7);
        assert_eq!(header.tree_id, 9);
        assert_eq!(header.session_id, 0x1122_3344_5566_7788);
    }

    #[test]
    fn test_header_rejects_smb1() {
        let mut bytes = response_header(Command::Negotiate, 0);
        bytes[0] = 0xFF;
        assert!(matches!(Header::decode(&bytes), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_request_body_sizes() {
        // Fixed parts must line up with the offsets written into them
        assert_eq!(negotiate_request(&[0; 16]).len(), 36 + 4);
        assert_eq!(session_setup_request(b"xy").len(), 24 + 2);
        assert_eq!(tree_connect_request("\\\\h\\IPC$").len(), 8 + 16);
        assert_eq!(create_pipe_request("srvsvc").len(), 56 + 12);
        assert_eq!(transceive_request(&[0; 16], b"abc", 1024).len(), 56 + 3);
        assert_eq!(read_request(&[0; 16], 1024).len(), 49);
        assert_eq!(close_request(&[0; 16]).len(), 24);
    }

    #[test]
    fn test_decode_negotiate_response() {
        let mut msg = response_header(Command::Negotiate, status::SUCCESS);
        let mut w = Writer::new();
        w.u16(65)
            .u16(SIGNING_ENABLED | SIGNING_REQUIRED)
            .u16(DIALECT_2_1)
            .u16(0)
            .zeros(16)
            .u32(0)
            .u32(65536)
            .u32(65536)
            .u32(65536)
            .u64(0)
            .u64(0)
            .u16((HEADER_LEN + 64) as u16)
            .u16(3)
            .u32(0)
            .bytes(b"abc");
        msg.extend(w.into_inner());

        let resp = NegotiateResponse::decode(&msg).unwrap();
        assert_eq!(resp.dialect, DIALECT_2_1);
        assert_ne!(resp.security_mode & SIGNING_REQUIRED, 0);
        assert_eq!(resp.security_blob, b"abc");
    }

    #[test]
    fn test_truncated_blob_is_protocol_error() {
        let mut msg = response_header(Command::SessionSetup, status::SUCCESS);
        let mut w = Writer::new();
        w.u16(9).u16(0).u16((HEADER_LEN + 8) as u16).u16(200);
        msg.extend(w.into_inner());
        assert!(matches!(
            SessionSetupResponse::decode(&msg),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            status_error("login", status::LOGON_FAILURE),
            Error::Auth(_)
        ));
        assert!(matches!(
            status_error("login", status::ACCOUNT_DISABLED),
            Error::Auth(_)
        ));
        assert!(matches!(
            status_error("tree", status::BAD_NETWORK_NAME),
            Error::Protocol(_)
        ));
        assert!(matches!(status_error("x", 0xC000_9999), Error::Protocol(_)));
    }

    #[test]
    fn test_sign_sets_flag() {
        let mut msg = message(&Header::request(Command::Close, 3), &close_request(&[1; 16]));
        sign(&mut msg, &[0xAA; 16]);
        let header = Header::decode(&msg).unwrap();
        assert_ne!(header.flags & FLAG_SIGNED, 0);
        assert_eq!(&msg[48..64], &[0xAA; 16]);
    }
}
