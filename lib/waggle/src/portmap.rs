//! Stateless port-mapper message codec.
//!
//! Requests arrive as the payload of a `u16`-length frame; the first payload
//! byte is the message tag. Replies are self-delimited and written back
//! without a length prefix. All multi-byte integers are big-endian.

use crate::net::support::{ErrorType, NetError, NetResult};
use byteorder::{BigEndian, ByteOrder, WriteBytesExt};

pub const ALIVE2_REQ: u8 = 120; // 'x'
pub const ALIVE2_RESP: u8 = 121; // 'y'
pub const PORT_PLEASE2_REQ: u8 = 122; // 'z'
pub const PORT2_RESP: u8 = 119; // 'w'
pub const NAMES_REQ: u8 = 110; // 'n'
pub const DUMP_REQ: u8 = 100; // 'd'
pub const STOP_REQ: u8 = 115; // 's'
pub const KILL_REQ: u8 = 107; // 'k'

/// Private diagnostic tag, out-of-band with respect to the published
/// protocol. Answered with a tab-delimited table of all registrations.
pub const ADMIN_DUMP_REQ: u8 = 78; // 'N'

pub const NODE_TYPE_NORMAL: u8 = 77;
pub const NODE_TYPE_HIDDEN: u8 = 72;

/// Everything a node advertises about itself, plus the registry-assigned
/// incarnation counter. The parser always yields `creation = 0`; the value
/// is assigned by the registry service alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    pub name: String,
    pub port: u16,
    pub node_type: u8,
    pub protocol: u8,
    pub high_vsn: u16,
    pub low_vsn: u16,
    pub extra: Vec<u8>,
    pub creation: u16,
}

pub fn read_alive2_req(buf: &[u8]) -> NetResult<NodeInfo> {
    if buf.len() < 11 {
        return Err(NetError::Fatal(ErrorType::BadFrame));
    }
    let port = BigEndian::read_u16(&buf[1..3]);
    let node_type = buf[3];
    let protocol = buf[4];
    let high_vsn = BigEndian::read_u16(&buf[5..7]);
    let low_vsn = BigEndian::read_u16(&buf[7..9]);
    let name_len = usize::from(BigEndian::read_u16(&buf[9..11]));

    let offset = 11 + name_len;
    if name_len == 0 || buf.len() < offset + 2 {
        return Err(NetError::Fatal(ErrorType::BadFrame));
    }
    let name = String::from_utf8(buf[11..offset].to_vec())
        .map_err(|_| NetError::Fatal(ErrorType::BadFrame))?;

    let extra_len = usize::from(BigEndian::read_u16(&buf[offset..offset + 2]));
    if buf.len() != offset + 2 + extra_len {
        return Err(NetError::Fatal(ErrorType::BadFrame));
    }
    let extra = buf[offset + 2..].to_vec();

    Ok(NodeInfo {
        name,
        port,
        node_type,
        protocol,
        high_vsn,
        low_vsn,
        extra,
        creation: 0,
    })
}

/// Client-side composition of a registration request, used by the
/// self-publication link.
pub fn compose_alive2_req(info: &NodeInfo) -> Vec<u8> {
    let mut out = Vec::with_capacity(13 + info.name.len() + info.extra.len());
    out.push(ALIVE2_REQ);
    out.write_u16::<BigEndian>(info.port).expect("vec write");
    out.push(info.node_type);
    out.push(info.protocol);
    out.write_u16::<BigEndian>(info.high_vsn).expect("vec write");
    out.write_u16::<BigEndian>(info.low_vsn).expect("vec write");
    out.write_u16::<BigEndian>(info.name.len() as u16).expect("vec write");
    out.extend_from_slice(info.name.as_bytes());
    out.write_u16::<BigEndian>(info.extra.len() as u16).expect("vec write");
    out.extend_from_slice(&info.extra);
    out
}

/// `Some(creation)` composes the success form, `None` the conflict form
/// (status 1, creation placeholder 99).
pub fn compose_alive2_resp(creation: Option<u16>) -> Vec<u8> {
    let mut out = Vec::with_capacity(4);
    out.push(ALIVE2_RESP);
    match creation {
        Some(value) => {
            out.push(0);
            out.write_u16::<BigEndian>(value).expect("vec write");
        }
        None => {
            out.push(1);
            out.write_u16::<BigEndian>(99).expect("vec write");
        }
    }
    out
}

pub fn read_alive2_resp(buf: &[u8]) -> NetResult<(bool, u16)> {
    if buf.len() < 4 || buf[0] != ALIVE2_RESP {
        return Err(NetError::Fatal(ErrorType::BadFrame));
    }
    Ok((buf[1] == 0, BigEndian::read_u16(&buf[2..4])))
}

/// The PORT_PLEASE2 and STOP bodies are both just the node name, occupying
/// the rest of the frame after the tag.
pub fn read_name_req(buf: &[u8]) -> NetResult<String> {
    if buf.is_empty() {
        return Err(NetError::Fatal(ErrorType::BadFrame));
    }
    String::from_utf8(buf[1..].to_vec()).map_err(|_| NetError::Fatal(ErrorType::BadFrame))
}

/// `Some` composes the full record, `None` the two-byte miss form `{w, 1}`.
pub fn compose_port2_resp(info: Option<&NodeInfo>) -> Vec<u8> {
    let info = match info {
        Some(info) => info,
        None => return vec![PORT2_RESP, 1],
    };

    let mut out = Vec::with_capacity(14 + info.name.len() + info.extra.len());
    out.push(PORT2_RESP);
    out.push(0);
    out.write_u16::<BigEndian>(info.port).expect("vec write");
    out.push(info.node_type);
    out.push(info.protocol);
    out.write_u16::<BigEndian>(info.high_vsn).expect("vec write");
    out.write_u16::<BigEndian>(info.low_vsn).expect("vec write");
    out.write_u16::<BigEndian>(info.name.len() as u16).expect("vec write");
    out.extend_from_slice(info.name.as_bytes());
    out.write_u16::<BigEndian>(info.extra.len() as u16).expect("vec write");
    out.extend_from_slice(&info.extra);
    out
}

/// NAMES and DUMP responses open with the mapper's own listen port.
pub fn compose_names_start(listen_port: u16) -> Vec<u8> {
    let mut out = Vec::with_capacity(4);
    out.write_u32::<BigEndian>(u32::from(listen_port)).expect("vec write");
    out
}

pub fn append_names_entry(out: &mut Vec<u8>, info: &NodeInfo) {
    out.extend_from_slice(format!("name {} at port {}\n", info.name, info.port).as_bytes());
}

pub fn append_dump_active(out: &mut Vec<u8>, info: &NodeInfo) {
    out.extend_from_slice(
        format!("active name     <{}> at port {}\n", info.name, info.port).as_bytes(),
    );
}

pub fn append_dump_unused(out: &mut Vec<u8>, info: &NodeInfo) {
    out.extend_from_slice(
        format!("old/unused name <{}>, port = {}\n", info.name, info.port).as_bytes(),
    );
}

pub fn compose_stop_resp(stopped: bool) -> Vec<u8> {
    comb::choose!(stopped => b"STOPPED".to_vec(), b"NOEXIST".to_vec())
}

pub fn compose_kill_resp() -> Vec<u8> {
    b"OK".to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node1() -> NodeInfo {
        NodeInfo {
            name: "node1".to_string(),
            port: 0x1389,
            node_type: NODE_TYPE_NORMAL,
            protocol: 0,
            high_vsn: 5,
            low_vsn: 5,
            extra: Vec::new(),
            creation: 0,
        }
    }

    #[test]
    fn test_read_alive2_req() {
        let payload = [
            ALIVE2_REQ, 0x13, 0x89, 77, 0, 0, 5, 0, 5, 0, 5, b'n', b'o', b'd', b'e', b'1', 0, 0,
        ];
        let info = read_alive2_req(&payload).unwrap();
        assert_eq!(info, node1());
    }

    #[test]
    fn test_alive2_req_roundtrip() {
        let mut info = node1();
        info.extra = vec![9, 8, 7];
        let wire = compose_alive2_req(&info);
        assert_eq!(wire.len(), 13 + info.name.len() + info.extra.len());
        assert_eq!(read_alive2_req(&wire).unwrap(), info);
    }

    #[test]
    fn test_read_alive2_req_rejects_garbage() {
        assert!(read_alive2_req(&[ALIVE2_REQ, 0, 1]).is_err());
        // Name length pointing past the end of the frame.
        assert!(read_alive2_req(&[ALIVE2_REQ, 0, 1, 77, 0, 0, 5, 0, 5, 0, 99, b'x', 0, 0]).is_err());
        // Empty name.
        assert!(read_alive2_req(&[ALIVE2_REQ, 0, 1, 77, 0, 0, 5, 0, 5, 0, 0, 0, 0]).is_err());
        // Trailing junk beyond the declared extra length.
        let mut wire = compose_alive2_req(&node1());
        wire.push(0xff);
        assert!(read_alive2_req(&wire).is_err());
    }

    #[test]
    fn test_compose_alive2_resp_forms() {
        assert_eq!(compose_alive2_resp(Some(1)), [0x79, 0x00, 0x00, 0x01]);
        assert_eq!(compose_alive2_resp(None), [0x79, 0x01, 0x00, 0x63]);
    }

    #[test]
    fn test_read_alive2_resp() {
        assert_eq!(read_alive2_resp(&[0x79, 0, 0, 2]).unwrap(), (true, 2));
        assert_eq!(read_alive2_resp(&[0x79, 1, 0, 99]).unwrap(), (false, 99));
        assert!(read_alive2_resp(&[0x78, 0, 0, 2]).is_err());
    }

    #[test]
    fn test_compose_port2_resp_hit() {
        let expected = [
            0x77, 0x00, 0x13, 0x89, 0x4d, 0x00, 0x00, 0x05, 0x00, 0x05, 0x00, 0x05, b'n', b'o',
            b'd', b'e', b'1', 0x00, 0x00,
        ];
        assert_eq!(compose_port2_resp(Some(&node1())), expected);
    }

    #[test]
    fn test_compose_port2_resp_miss() {
        assert_eq!(compose_port2_resp(None), [0x77, 0x01]);
    }

    #[test]
    fn test_read_name_req() {
        let mut payload = vec![PORT_PLEASE2_REQ];
        payload.extend_from_slice(b"node1");
        assert_eq!(read_name_req(&payload).unwrap(), "node1");
        assert!(read_name_req(&[]).is_err());
    }

    #[test]
    fn test_names_listing() {
        let mut out = compose_names_start(4369);
        assert_eq!(out, [0, 0, 0x11, 0x11]);
        append_names_entry(&mut out, &node1());
        assert_eq!(&out[4..], b"name node1 at port 5001\n");
    }

    #[test]
    fn test_dump_lines() {
        let mut out = Vec::new();
        append_dump_active(&mut out, &node1());
        append_dump_unused(&mut out, &node1());
        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text,
            "active name     <node1> at port 5001\nold/unused name <node1>, port = 5001\n"
        );
    }

    #[test]
    fn test_stop_and_kill_resp() {
        assert_eq!(compose_stop_resp(true), b"STOPPED");
        assert_eq!(compose_stop_resp(false), b"NOEXIST");
        assert_eq!(compose_kill_resp(), b"OK");
    }
}
