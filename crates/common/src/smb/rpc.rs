// DCE/RPC over the srvsvc named pipe: bind and NetrShareEnum (level 1)

use crate::error::{Error, Result};
use crate::types::ShareInfo;

use super::wire::{from_utf16le, Reader, Writer};

const PTYPE_REQUEST: u8 = 0;
const PTYPE_RESPONSE: u8 = 2;
const PTYPE_FAULT: u8 = 3;
const PTYPE_BIND: u8 = 11;
const PTYPE_BIND_ACK: u8 = 12;
const PTYPE_BIND_NAK: u8 = 13;

const PFC_FIRST_FRAG: u8 = 0x01;
const PFC_LAST_FRAG: u8 = 0x02;

const HEADER_LEN: usize = 16;
const MAX_FRAG: u16 = 4280;

/// Upper bound on a reassembled response
pub const MAX_RESPONSE: usize = 4 * 1024 * 1024;

const SRVSVC_UUID: [u8; 16] = [
    0xc8, 0x4f, 0x32, 0x4b, 0x70, 0x16, 0xd3, 0x01, 0x12, 0x78, 0x5a, 0x47, 0xbf, 0x6e, 0xe1, 0x88,
];
const SRVSVC_VERSION: (u16, u16) = (3, 0);
const NDR_UUID: [u8; 16] = [
    0x04, 0x5d, 0x88, 0x8a, 0xeb, 0x1c, 0xc9, 0x11, 0x9f, 0xe8, 0x08, 0x00, 0x2b, 0x10, 0x48, 0x60,
];
const NDR_VERSION: u32 = 2;

const OPNUM_NETR_SHARE_ENUM: u16 = 15;
const WERR_ACCESS_DENIED: u32 = 5;

fn header(w: &mut Writer, ptype: u8, frag_len: u16, call_id: u32) {
    w.u8(5)
        .u8(0)
        .u8(ptype)
        .u8(PFC_FIRST_FRAG | PFC_LAST_FRAG)
        .bytes(&[0x10, 0, 0, 0]) // little-endian, ASCII, IEEE float
        .u16(frag_len)
        .u16(0)
        .u32(call_id);
}

/// Bind to the srvsvc interface with NDR transfer syntax
pub fn bind_request(call_id: u32) -> Vec<u8> {
    const LEN: u16 = 72;
    let mut w = Writer::with_capacity(LEN as usize);
    header(&mut w, PTYPE_BIND, LEN, call_id);
    w.u16(MAX_FRAG)
        .u16(MAX_FRAG)
        .u32(0) // assoc group
        .u8(1) // context count
        .zeros(3)
        .u16(0) // context id
        .u8(1) // transfer syntax count
        .u8(0)
        .bytes(&SRVSVC_UUID)
        .u16(SRVSVC_VERSION.0)
        .u16(SRVSVC_VERSION.1)
        .bytes(&NDR_UUID)
        .u32(NDR_VERSION);
    w.into_inner()
}

/// Verify that the server accepted the presentation context
pub fn check_bind_ack(pdu: &[u8]) -> Result<()> {
    let ptype = packet_type(pdu)?;
    if ptype == PTYPE_BIND_NAK {
        return Err(Error::Protocol("srvsvc bind rejected".to_string()));
    }
    if ptype != PTYPE_BIND_ACK {
        return Err(Error::Protocol(format!(
            "Expected bind ack, got packet type {ptype}"
        )));
    }
    let mut r = Reader::at(pdu, 24);
    let addr_len = r.u16()? as usize;
    r.skip(addr_len)?;
    r.align(4)?;
    let results = r.u8()?;
    r.skip(3)?;
    if results == 0 {
        return Err(Error::Protocol("Bind ack has no results".to_string()));
    }
    let result = r.u16()?;
    if result != 0 {
        return Err(Error::Protocol(format!(
            "srvsvc presentation context rejected (result {result})"
        )));
    }
    Ok(())
}

/// NetrShareEnum request asking for SHARE_INFO_1 entries
pub fn share_enum_request(host: &str, call_id: u32) -> Vec<u8> {
    let mut stub = Writer::new();
    let server = format!("\\\\{host}");
    let units: Vec<u16> = server.encode_utf16().chain(std::iter::once(0)).collect();

    // ServerName: unique pointer to a conformant varying string
    stub.u32(0x0002_0000)
        .u32(units.len() as u32)
        .u32(0)
        .u32(units.len() as u32);
    for unit in &units {
        stub.u16(*unit);
    }
    stub.align(4);

    // InfoStruct: level 1, empty SHARE_INFO_1_CONTAINER
    stub.u32(1)
        .u32(1)
        .u32(0x0002_0004)
        .u32(0) // EntriesRead
        .u32(0) // Buffer (null)
        .u32(0xFFFF_FFFF) // PreferedMaximumLength
        .u32(0); // ResumeHandle (null)
    let stub = stub.into_inner();

    let frag_len = (HEADER_LEN + 8 + stub.len()) as u16;
    let mut w = Writer::with_capacity(frag_len as usize);
    header(&mut w, PTYPE_REQUEST, frag_len, call_id);
    w.u32(stub.len() as u32) // alloc hint
        .u16(0)
        .u16(OPNUM_NETR_SHARE_ENUM)
        .bytes(&stub);
    w.into_inner()
}

fn packet_type(pdu: &[u8]) -> Result<u8> {
    if pdu.len() < HEADER_LEN || pdu[0] != 5 {
        return Err(Error::Protocol("Malformed DCE/RPC packet".to_string()));
    }
    Ok(pdu[2])
}

/// Length of the fragment at the start of `pdu` and whether it is the last one
pub fn fragment_info(pdu: &[u8]) -> Result<(usize, bool)> {
    packet_type(pdu)?;
    let frag_len = u16::from_le_bytes([pdu[8], pdu[9]]) as usize;
    if frag_len < HEADER_LEN {
        return Err(Error::Protocol(format!("Bad fragment length {frag_len}")));
    }
    Ok((frag_len, pdu[3] & PFC_LAST_FRAG != 0))
}

/// Whether `data` holds whole fragments up to and including the last one
pub fn is_complete(data: &[u8]) -> Result<bool> {
    let mut rest = data;
    while rest.len() >= HEADER_LEN {
        let (frag_len, last) = fragment_info(rest)?;
        if frag_len > rest.len() {
            return Ok(false);
        }
        if last {
            return Ok(true);
        }
        rest = &rest[frag_len..];
    }
    Ok(false)
}

/// Concatenate the stub data of every response fragment in `data`
pub fn response_stub(data: &[u8]) -> Result<Vec<u8>> {
    let mut stub = Vec::new();
    let mut rest = data;
    loop {
        let (frag_len, last) = fragment_info(rest)?;
        if frag_len > rest.len() {
            return Err(Error::Protocol("Truncated DCE/RPC fragment".to_string()));
        }
        let frag = &rest[..frag_len];
        match frag[2] {
            PTYPE_RESPONSE => {
                let auth_len = u16::from_le_bytes([frag[10], frag[11]]) as usize;
                let end = frag_len.saturating_sub(if auth_len > 0 { auth_len + 8 } else { 0 });
                if end < 24 {
                    return Err(Error::Protocol("Short DCE/RPC response".to_string()));
                }
                stub.extend_from_slice(&frag[24..end]);
            }
            PTYPE_FAULT => {
                let status = Reader::at(frag, 24).u32()?;
                return Err(Error::Protocol(format!(
                    "srvsvc call failed with fault 0x{status:08x}"
                )));
            }
            other => {
                return Err(Error::Protocol(format!(
                    "Unexpected DCE/RPC packet type {other}"
                )))
            }
        }
        if stub.len() > MAX_RESPONSE {
            return Err(Error::Protocol("srvsvc response too large".to_string()));
        }
        rest = &rest[frag_len..];
        if last {
            return Ok(stub);
        }
        if rest.is_empty() {
            return Err(Error::Protocol("Missing final DCE/RPC fragment".to_string()));
        }
    }
}

/// Decode the NetrShareEnum response stub into share records
pub fn parse_share_enum(stub: &[u8]) -> Result<Vec<ShareInfo>> {
    let mut r = Reader::new(stub);
    let level = r.u32()?;
    r.skip(4)?; // union switch
    if level != 1 {
        return Err(Error::Protocol(format!("Unexpected share info level {level}")));
    }

    let container = r.u32()?;
    let mut shares = Vec::new();
    if container != 0 {
        let entries_read = r.u32()? as usize;
        let buffer = r.u32()?;
        if buffer != 0 {
            let count = r.u32()? as usize;
            if count != entries_read || count > r.remaining() / 12 {
                return Err(Error::Protocol(format!(
                    "Share count mismatch ({count} vs {entries_read})"
                )));
            }
            let mut fixed = Vec::with_capacity(count);
            for _ in 0..count {
                let name_ref = r.u32()?;
                let raw_type = r.u32()?;
                let remark_ref = r.u32()?;
                fixed.push((name_ref, raw_type, remark_ref));
            }
            for (name_ref, raw_type, remark_ref) in fixed {
                let name = if name_ref != 0 { read_string(&mut r)? } else { String::new() };
                let remark = if remark_ref != 0 { read_string(&mut r)? } else { String::new() };
                shares.push(ShareInfo::from_raw_type(name, raw_type, remark));
            }
        }
    }

    r.align(4)?;
    r.skip(4)?; // TotalEntries
    if r.u32()? != 0 {
        r.skip(4)?; // ResumeHandle value
    }
    match r.u32()? {
        0 => Ok(shares),
        WERR_ACCESS_DENIED => Err(Error::Auth(
            "Server denied share enumeration".to_string(),
        )),
        code => Err(Error::Protocol(format!(
            "NetrShareEnum failed with error {code}"
        ))),
    }
}

fn read_string(r: &mut Reader<'_>) -> Result<String> {
    r.align(4)?;
    r.skip(8)?; // MaxCount, Offset
    let actual = r.u32()? as usize;
    let bytes = r.bytes(actual.checked_mul(2).ok_or_else(|| {
        Error::Protocol("String length overflow".to_string())
    })?)?;
    Ok(from_utf16le(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ndr_string(w: &mut Writer, s: &str) {
        let units: Vec<u16> = s.encode_utf16().chain(std::iter::once(0)).collect();
        w.align(4)
            .u32(units.len() as u32)
            .u32(0)
            .u32(units.len() as u32);
        for unit in units {
            w.u16(unit);
        }
    }

    fn enum_stub(shares: &[(&str, u32, &str)], werror: u32) -> Vec<u8> {
        let mut w = Writer::new();
        w.u32(1).u32(1).u32(0x0002_0000);
        w.u32(shares.len() as u32).u32(0x0002_0004).u32(shares.len() as u32);
        for (i, (_, raw, _)) in shares.iter().enumerate() {
            w.u32(0x0002_0008 + i as u32 * 8).u32(*raw).u32(0x0002_000c + i as u32 * 8);
        }
        for (name, _, remark) in shares {
            ndr_string(&mut w, name);
            ndr_string(&mut w, remark);
        }
        w.align(4).u32(shares.len() as u32).u32(0).u32(werror);
        w.into_inner()
    }

    fn response_pdu(stub: &[u8], flags: u8) -> Vec<u8> {
        let mut w = Writer::new();
        w.u8(5)
            .u8(0)
            .u8(PTYPE_RESPONSE)
            .u8(flags)
            .bytes(&[0x10, 0, 0, 0])
            .u16((24 + stub.len()) as u16)
            .u16(0)
            .u32(2)
            .u32(stub.len() as u32)
            .u16(0)
            .u8(0)
            .u8(0)
            .bytes(stub);
        w.into_inner()
    }

    #[test]
    fn test_bind_request_layout() {
        let bind = bind_request(1);
        assert_eq!(bind.len(), 72);
        assert_eq!(bind[2], PTYPE_BIND);
        assert_eq!(&bind[32..48], &SRVSVC_UUID);
    }

    #[test]
    fn test_bind_ack_accepted_and_rejected() {
        let mut ack = Writer::new();
        ack.u8(5).u8(0).u8(PTYPE_BIND_ACK).u8(3).zeros(12);
        ack.u16(MAX_FRAG).u16(MAX_FRAG).u32(0x1234);
        ack.u16(13).bytes(b"\\PIPE\\srvsvc\0");
        ack.align(4).u8(1).zeros(3).u16(0).u16(0).zeros(20);
        assert!(check_bind_ack(&ack.into_inner()).is_ok());

        let mut nak = Writer::new();
        nak.u8(5).u8(0).u8(PTYPE_BIND_NAK).u8(3).zeros(12).u16(0);
        assert!(matches!(check_bind_ack(&nak.into_inner()), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_share_enum_request_alignment() {
        let req = share_enum_request("nas", 2);
        let (len, last) = fragment_info(&req).unwrap();
        assert_eq!(len, req.len());
        assert!(last);
        assert_eq!(u16::from_le_bytes([req[22], req[23]]), OPNUM_NETR_SHARE_ENUM);
        assert_eq!((req.len() - 24) % 4, 0);
    }

    #[test]
    fn test_parse_share_enum() {
        let stub = enum_stub(
            &[
                ("data", 0, "Team files"),
                ("IPC$", 0x8000_0003, "Remote IPC"),
                ("C$", 0x8000_0000, ""),
            ],
            0,
        );
        let pdu = response_pdu(&stub, PFC_FIRST_FRAG | PFC_LAST_FRAG);
        let shares = parse_share_enum(&response_stub(&pdu).unwrap()).unwrap();

        assert_eq!(shares.len(), 3);
        assert_eq!(shares[0].name, "data");
        assert_eq!(shares[0].remark, "Team files");
        assert!(shares[0].is_browsable());
        assert!(!shares[1].is_browsable());
        assert!(shares[2].special);
    }

    #[test]
    fn test_fragmented_response_reassembly() {
        let stub = enum_stub(&[("media", 0, "")], 0);
        let (a, b) = stub.split_at(stub.len() / 2);
        let mut data = response_pdu(a, PFC_FIRST_FRAG);
        assert!(!is_complete(&data).unwrap());
        data.extend(response_pdu(b, PFC_LAST_FRAG));
        assert!(is_complete(&data).unwrap());
        assert!(!is_complete(&data[..data.len() - 1]).unwrap());

        let shares = parse_share_enum(&response_stub(&data).unwrap()).unwrap();
        assert_eq!(shares[0].name, "media");
    }

    #[test]
    fn test_access_denied_is_auth_error() {
        let mut w = Writer::new();
        w.u32(1).u32(1).u32(0).u32(0).u32(0).u32(WERR_ACCESS_DENIED);
        assert!(matches!(parse_share_enum(&w.into_inner()), Err(Error::Auth(_))));
    }

    #[test]
    fn test_fault_is_protocol_error() {
        let mut w = Writer::new();
        w.u8(5)
            .u8(0)
            .u8(PTYPE_FAULT)
            .u8(3)
            .bytes(&[0x10, 0, 0, 0])
            .u16(32)
            .u16(0)
            .u32(2)
            .zeros(8)
            .u32(0x1c01_0002)
            .u32(0);
        assert!(matches!(response_stub(&w.into_inner()), Err(Error::Protocol(_))));
    }
}
