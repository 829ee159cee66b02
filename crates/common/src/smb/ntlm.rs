// NTLMv2 authentication (MS-NLMP) wrapped in SPNEGO (RFC 4178)

use hmac::{Hmac, Mac};
use md4::{Digest, Md4};
use md5::Md5;
use zeroize::Zeroizing;

use crate::error::{Error, Result};

use super::wire::{slice_at, utf16le, Reader, Writer};

type HmacMd5 = Hmac<Md5>;

const SIGNATURE: &[u8; 8] = b"NTLMSSP\0";
const NEGOTIATE_MESSAGE: u32 = 1;
const CHALLENGE_MESSAGE: u32 = 2;
const AUTHENTICATE_MESSAGE: u32 = 3;

const NEGOTIATE_UNICODE: u32 = 0x0000_0001;
const REQUEST_TARGET: u32 = 0x0000_0004;
const NEGOTIATE_SIGN: u32 = 0x0000_0010;
const NEGOTIATE_NTLM: u32 = 0x0000_0200;
const NEGOTIATE_ALWAYS_SIGN: u32 = 0x0000_8000;
const NEGOTIATE_EXTENDED_SESSIONSECURITY: u32 = 0x0008_0000;
const NEGOTIATE_TARGET_INFO: u32 = 0x0080_0000;
const NEGOTIATE_128: u32 = 0x2000_0000;
const NEGOTIATE_56: u32 = 0x8000_0000;

const CLIENT_FLAGS: u32 = NEGOTIATE_UNICODE
    | REQUEST_TARGET
    | NEGOTIATE_SIGN
    | NEGOTIATE_NTLM
    | NEGOTIATE_ALWAYS_SIGN
    | NEGOTIATE_EXTENDED_SESSIONSECURITY
    | NEGOTIATE_TARGET_INFO
    | NEGOTIATE_128
    | NEGOTIATE_56;

const AV_EOL: u16 = 0;
const AV_TIMESTAMP: u16 = 7;

/// Seconds between 1601-01-01 and the Unix epoch
const FILETIME_EPOCH_OFFSET: i64 = 11_644_473_600;

/// Account used for NTLM authentication
#[derive(Clone)]
pub struct Credentials {
    pub domain: String,
    pub user: String,
    pub password: Zeroizing<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("domain", &self.domain)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    /// Split `DOMAIN\user`; otherwise use `default_domain`
    pub fn new(username: &str, password: &str, default_domain: &str) -> Self {
        let (domain, user) = match username.split_once('\\') {
            Some((domain, user)) => (domain.to_string(), user.to_string()),
            None => (default_domain.to_string(), username.to_string()),
        };
        Self {
            domain,
            user,
            password: Zeroizing::new(password.to_string()),
        }
    }
}

/// Parsed CHALLENGE_MESSAGE
#[derive(Debug, Clone)]
pub struct Challenge {
    pub flags: u32,
    pub server_challenge: [u8; 8],
    pub target_info: Vec<u8>,
}

impl Challenge {
    pub fn decode(msg: &[u8]) -> Result<Self> {
        let mut r = Reader::new(msg);
        if r.bytes(8)? != SIGNATURE {
            return Err(Error::Protocol("Missing NTLMSSP signature".to_string()));
        }
        if r.u32()? != CHALLENGE_MESSAGE {
            return Err(Error::Protocol("Expected NTLM challenge message".to_string()));
        }
        r.skip(8)?; // TargetNameFields
        let flags = r.u32()?;
        let mut server_challenge = [0u8; 8];
        server_challenge.copy_from_slice(r.bytes(8)?);
        r.skip(8)?; // Reserved
        let info_len = r.u16()? as usize;
        r.skip(2)?;
        let info_offset = r.u32()? as usize;
        let target_info = if info_len == 0 {
            Vec::new()
        } else {
            slice_at(msg, info_offset, info_len)?.to_vec()
        };
        Ok(Self {
            flags,
            server_challenge,
            target_info,
        })
    }

    /// MsvAvTimestamp from the target info, if the server sent one
    pub fn timestamp(&self) -> Option<u64> {
        let mut r = Reader::new(&self.target_info);
        while r.remaining() >= 4 {
            let id = r.u16().ok()?;
            let len = r.u16().ok()? as usize;
            if id == AV_EOL {
                break;
            }
            let value = r.bytes(len).ok()?;
            if id == AV_TIMESTAMP && len == 8 {
                let mut arr = [0u8; 8];
                arr.copy_from_slice(value);
                return Some(u64::from_le_bytes(arr));
            }
        }
        None
    }
}

/// NEGOTIATE_MESSAGE with empty domain and workstation fields
pub fn negotiate_message() -> Vec<u8> {
    let mut w = Writer::with_capacity(32);
    w.bytes(SIGNATURE)
        .u32(NEGOTIATE_MESSAGE)
        .u32(CLIENT_FLAGS)
        .u16(0)
        .u16(0)
        .u32(32)
        .u16(0)
        .u16(0)
        .u32(32);
    w.into_inner()
}

/// Result of answering a challenge
pub struct Authentication {
    pub message: Vec<u8>,
    pub session_key: Zeroizing<[u8; 16]>,
}

/// Build the AUTHENTICATE_MESSAGE for `challenge`
pub fn authenticate_message(
    creds: &Credentials,
    challenge: &Challenge,
    client_challenge: &[u8; 8],
    workstation: &str,
) -> Authentication {
    let key = ntowfv2(&creds.password, &creds.user, &creds.domain);
    let server_timestamp = challenge.timestamp();
    let timestamp = server_timestamp.unwrap_or_else(filetime_now);

    let (nt_response, session_key) = ntlmv2_response(
        &key,
        &challenge.server_challenge,
        client_challenge,
        timestamp,
        &challenge.target_info,
    );

    // With a server timestamp the LM response is sent as zeros
    let lm_response = if server_timestamp.is_some() {
        vec![0u8; 24]
    } else {
        lmv2_response(&key, &challenge.server_challenge, client_challenge).to_vec()
    };

    let flags = (challenge.flags & CLIENT_FLAGS) | NEGOTIATE_UNICODE;
    let domain = utf16le(&creds.domain);
    let user = utf16le(&creds.user);
    let host = utf16le(workstation);

    const FIXED_LEN: usize = 64;
    let mut payload = Writer::new();
    let mut fields = Writer::with_capacity(FIXED_LEN);
    fields.bytes(SIGNATURE).u32(AUTHENTICATE_MESSAGE);

    let mut field = |data: &[u8]| {
        let offset = FIXED_LEN + payload.len();
        fields
            .u16(data.len() as u16)
            .u16(data.len() as u16)
            .u32(offset as u32);
        payload.bytes(data);
    };
    field(&lm_response);
    field(&nt_response);
    field(&domain);
    field(&user);
    field(&host);
    field(&[]); // EncryptedRandomSessionKey

    fields.u32(flags);
    let mut message = fields.into_inner();
    message.extend(payload.into_inner());

    Authentication {
        message,
        session_key,
    }
}

/// NTOWFv2: HMAC-MD5 of MD4(password) over UPPER(user) + domain
pub fn ntowfv2(password: &str, user: &str, domain: &str) -> Zeroizing<[u8; 16]> {
    let password_bytes = Zeroizing::new(utf16le(password));
    let mut nt_hash = Zeroizing::new([0u8; 16]);
    nt_hash.copy_from_slice(&Md4::digest(password_bytes.as_slice()));

    let identity = utf16le(&format!("{}{}", user.to_uppercase(), domain));
    Zeroizing::new(hmac_md5(nt_hash.as_slice(), &[&identity]))
}

/// LMv2 response: HMAC-MD5(server || client challenge) followed by the client challenge
pub fn lmv2_response(key: &[u8; 16], server_challenge: &[u8; 8], client_challenge: &[u8; 8]) -> [u8; 24] {
    let proof = hmac_md5(key, &[server_challenge, client_challenge]);
    let mut out = [0u8; 24];
    out[..16].copy_from_slice(&proof);
    out[16..].copy_from_slice(client_challenge);
    out
}

/// NTLMv2 response and the session base key derived from it
pub fn ntlmv2_response(
    key: &[u8; 16],
    server_challenge: &[u8; 8],
    client_challenge: &[u8; 8],
    timestamp: u64,
    target_info: &[u8],
) -> (Vec<u8>, Zeroizing<[u8; 16]>) {
    let mut temp = Writer::with_capacity(32 + target_info.len());
    temp.u8(1)
        .u8(1)
        .zeros(6)
        .u64(timestamp)
        .bytes(client_challenge)
        .zeros(4)
        .bytes(target_info)
        .zeros(4);
    let temp = temp.into_inner();

    let nt_proof = hmac_md5(key, &[server_challenge, &temp]);
    let session_key = Zeroizing::new(hmac_md5(key, &[&nt_proof]));

    let mut response = nt_proof.to_vec();
    response.extend_from_slice(&temp);
    (response, session_key)
}

fn hmac_md5(key: &[u8], parts: &[&[u8]]) -> [u8; 16] {
    let mut mac = HmacMd5::new_from_slice(key).expect("HMAC accepts keys of any length");
    for part in parts {
        mac.update(part);
    }
    let mut out = [0u8; 16];
    out.copy_from_slice(&mac.finalize().into_bytes());
    out
}

fn filetime_now() -> u64 {
    let now = chrono::Utc::now();
    let secs = (now.timestamp() + FILETIME_EPOCH_OFFSET).max(0) as u64;
    secs * 10_000_000 + u64::from(now.timestamp_subsec_nanos() / 100)
}

// SPNEGO framing

const SPNEGO_OID: [u8; 6] = [0x2b, 0x06, 0x01, 0x05, 0x05, 0x02];
const NTLMSSP_OID: [u8; 10] = [0x2b, 0x06, 0x01, 0x04, 0x01, 0x82, 0x37, 0x02, 0x02, 0x0a];

fn der(tag: u8, content: &[u8]) -> Vec<u8> {
    let len = content.len();
    let mut out = Vec::with_capacity(len + 6);
    out.push(tag);
    if len < 0x80 {
        out.push(len as u8);
    } else if len <= 0xFF {
        out.extend_from_slice(&[0x81, len as u8]);
    } else if len <= 0xFFFF {
        out.extend_from_slice(&[0x82, (len >> 8) as u8, len as u8]);
    } else {
        out.extend_from_slice(&[0x83, (len >> 16) as u8, (len >> 8) as u8, len as u8]);
    }
    out.extend_from_slice(content);
    out
}

/// GSS-API InitialContextToken carrying a NegTokenInit with an NTLM token
pub fn spnego_init(ntlm_token: &[u8]) -> Vec<u8> {
    let mech_types = der(0xa0, &der(0x30, &der(0x06, &NTLMSSP_OID)));
    let mech_token = der(0xa2, &der(0x04, ntlm_token));
    let mut seq = mech_types;
    seq.extend(mech_token);
    let neg_token_init = der(0xa0, &der(0x30, &seq));

    let mut inner = der(0x06, &SPNEGO_OID);
    inner.extend(neg_token_init);
    der(0x60, &inner)
}

/// NegTokenResp carrying the NTLM authenticate token
pub fn spnego_response(ntlm_token: &[u8]) -> Vec<u8> {
    der(0xa1, &der(0x30, &der(0xa2, &der(0x04, ntlm_token))))
}

/// Locate the NTLM message inside a server security blob
pub fn extract_ntlm(blob: &[u8]) -> Result<&[u8]> {
    blob.windows(SIGNATURE.len())
        .position(|w| w == SIGNATURE)
        .map(|pos| &blob[pos..])
        .ok_or_else(|| Error::Protocol("Server did not offer NTLM authentication".to_string()))
}
