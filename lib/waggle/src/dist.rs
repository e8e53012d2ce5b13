//! Cluster distribution protocol: the challenge/digest handshake and the
//! connected-mode term exchange.
//!
//! Handshake frames are `u16`-length-prefixed; once a link is established
//! the framing widens to `u32` and every non-empty payload tagged `p`
//! carries a sequence of top-level terms.

use crate::net::support::{ErrorType, NetError, NetResult};
use crate::term;
use crate::term::Term;
use bitflags::bitflags;
use byteorder::{BigEndian, ByteOrder, ReadBytesExt, WriteBytesExt};
use comb::cookie::Cookie;
use comb::crypto;
use std::io;

/// The distribution protocol version both sides must speak.
pub const DIST_VERSION: u16 = 5;

const TAG_SEND_NAME: u8 = b'n';
const TAG_STATUS: u8 = b's';
const TAG_CHALLENGE: u8 = b'n';
const TAG_CHALLENGE_REPLY: u8 = b'r';
const TAG_CHALLENGE_ACK: u8 = b'a';

/// Payload tag for a connected-mode frame carrying terms.
const TAG_PASS_THROUGH: u8 = b'p';

bitflags! {
    /// Capability flags advertised on SEND_NAME and SEND_CHALLENGE. The
    /// numeric values are wire-visible and part of the interface.
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct DistFlags: u32 {
        const PUBLISHED = 0x1;
        const EXTENDED_REFERENCES = 0x4;
        const EXTENDED_PIDS_PORTS = 0x100;
        const UNICODE_IO = 0x1000;
    }
}

impl DistFlags {
    /// The set this node advertises.
    pub fn local() -> DistFlags {
        DistFlags::PUBLISHED
            | DistFlags::EXTENDED_REFERENCES
            | DistFlags::EXTENDED_PIDS_PORTS
            | DistFlags::UNICODE_IO
    }
}

/// Identity this process presents on distribution links.
#[derive(Debug, Clone)]
pub struct NodeDesc {
    pub name: String,
    pub cookie: Cookie,
    pub flags: DistFlags,
    pub version: u16,
}

impl NodeDesc {
    pub fn new<S: Into<String>>(name: S, cookie: Cookie) -> NodeDesc {
        NodeDesc {
            name: name.into(),
            cookie,
            flags: DistFlags::local(),
            version: DIST_VERSION,
        }
    }
}

/// What the remote side told us about itself during the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteNode {
    pub name: String,
    pub flags: DistFlags,
    pub version: u16,
}

/// Progress of the accept-side handshake after feeding it one frame.
#[derive(Debug)]
pub enum Step {
    /// Frames to write back; the handshake continues.
    Reply(Vec<Vec<u8>>),
    /// Digest verified: write the ack, then the link is connected.
    Established { remote: RemoteNode, ack: Vec<u8> },
}

enum AcceptState {
    WaitName,
    WaitReply {
        remote: RemoteNode,
        our_challenge: u32,
    },
    Done,
}

/// Accept-side handshake state machine. Owned by a peer link; fed one
/// handshake frame at a time.
pub struct Accept {
    local: NodeDesc,
    state: AcceptState,
}

impl Accept {
    pub fn new(local: NodeDesc) -> Accept {
        Accept {
            local,
            state: AcceptState::WaitName,
        }
    }

    pub fn on_frame(&mut self, payload: &[u8]) -> NetResult<Step> {
        match std::mem::replace(&mut self.state, AcceptState::Done) {
            AcceptState::WaitName => self.on_send_name(payload),
            AcceptState::WaitReply {
                remote,
                our_challenge,
            } => self.on_challenge_reply(payload, remote, our_challenge),
            AcceptState::Done => Err(NetError::Fatal(ErrorType::BadHandshake)),
        }
    }

    fn on_send_name(&mut self, payload: &[u8]) -> NetResult<Step> {
        let (version, flags, name) = read_send_name(payload)?;
        if version != self.local.version {
            return Err(NetError::Fatal(ErrorType::BadHandshake));
        }
        let remote = RemoteNode {
            name,
            flags,
            version,
        };

        let our_challenge = crypto::challenge();
        let replies = vec![
            compose_status_ok(),
            compose_challenge(&self.local, our_challenge),
        ];
        self.state = AcceptState::WaitReply {
            remote,
            our_challenge,
        };
        Ok(Step::Reply(replies))
    }

    fn on_challenge_reply(
        &mut self,
        payload: &[u8],
        remote: RemoteNode,
        our_challenge: u32,
    ) -> NetResult<Step> {
        let (their_challenge, digest) = read_challenge_reply(payload)?;
        let expected = crypto::digest(self.local.cookie.as_str(), our_challenge);
        if !crypto::digest_eq(&digest, &expected) {
            return Err(NetError::Fatal(ErrorType::BadHandshake));
        }

        let ack = compose_challenge_ack(crypto::digest(
            self.local.cookie.as_str(),
            their_challenge,
        ));
        Ok(Step::Established { remote, ack })
    }
}

fn read_send_name(payload: &[u8]) -> NetResult<(u16, DistFlags, String)> {
    if payload.len() < 8 || payload[0] != TAG_SEND_NAME {
        return Err(NetError::Fatal(ErrorType::BadHandshake));
    }
    let version = BigEndian::read_u16(&payload[1..3]);
    let flags = DistFlags::from_bits_truncate(BigEndian::read_u32(&payload[3..7]));
    let name = String::from_utf8(payload[7..].to_vec())
        .map_err(|_| NetError::Fatal(ErrorType::BadHandshake))?;
    Ok((version, flags, name))
}

fn read_challenge_reply(payload: &[u8]) -> NetResult<(u32, [u8; crypto::DIGEST_SIZE])> {
    if payload.len() != 5 + crypto::DIGEST_SIZE || payload[0] != TAG_CHALLENGE_REPLY {
        return Err(NetError::Fatal(ErrorType::BadHandshake));
    }
    let challenge = BigEndian::read_u32(&payload[1..5]);
    let mut digest = [0u8; crypto::DIGEST_SIZE];
    digest.copy_from_slice(&payload[5..]);
    Ok((challenge, digest))
}

fn compose_send_name(local: &NodeDesc) -> Vec<u8> {
    let mut out = Vec::with_capacity(7 + local.name.len());
    out.push(TAG_SEND_NAME);
    out.write_u16::<BigEndian>(local.version).expect("vec write");
    out.write_u32::<BigEndian>(local.flags.bits()).expect("vec write");
    out.extend_from_slice(local.name.as_bytes());
    out
}

fn compose_status_ok() -> Vec<u8> {
    vec![TAG_STATUS, b'o', b'k']
}

fn compose_challenge(local: &NodeDesc, challenge: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(11 + local.name.len());
    out.push(TAG_CHALLENGE);
    out.write_u16::<BigEndian>(local.version).expect("vec write");
    out.write_u32::<BigEndian>(local.flags.bits()).expect("vec write");
    out.write_u32::<BigEndian>(challenge).expect("vec write");
    out.extend_from_slice(local.name.as_bytes());
    out
}

fn compose_challenge_reply(challenge: u32, digest: [u8; crypto::DIGEST_SIZE]) -> Vec<u8> {
    let mut out = Vec::with_capacity(5 + crypto::DIGEST_SIZE);
    out.push(TAG_CHALLENGE_REPLY);
    out.write_u32::<BigEndian>(challenge).expect("vec write");
    out.extend_from_slice(&digest);
    out
}

fn compose_challenge_ack(digest: [u8; crypto::DIGEST_SIZE]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + crypto::DIGEST_SIZE);
    out.push(TAG_CHALLENGE_ACK);
    out.extend_from_slice(&digest);
    out
}

/// Initiator-side handshake over a blocking stream: offer our name, answer
/// the peer's challenge, verify its ack. Used by outbound links.
pub fn connect<S: io::Read + io::Write>(stream: &mut S, local: &NodeDesc) -> io::Result<RemoteNode> {
    write_frame(stream, &compose_send_name(local))?;

    let status = read_frame(stream)?;
    if status.first() != Some(&TAG_STATUS) {
        return Err(bad_handshake("unexpected status tag"));
    }
    match &status[1..] {
        b"ok" | b"ok_simultaneous" => {}
        _ => return Err(bad_handshake("handshake refused")),
    }

    let challenge_frame = read_frame(stream)?;
    if challenge_frame.len() < 12 || challenge_frame[0] != TAG_CHALLENGE {
        return Err(bad_handshake("unexpected challenge tag"));
    }
    let version = BigEndian::read_u16(&challenge_frame[1..3]);
    if version != local.version {
        return Err(bad_handshake("version mismatch"));
    }
    let flags = DistFlags::from_bits_truncate(BigEndian::read_u32(&challenge_frame[3..7]));
    let their_challenge = BigEndian::read_u32(&challenge_frame[7..11]);
    let name = String::from_utf8(challenge_frame[11..].to_vec())
        .map_err(|_| bad_handshake("peer name is not utf-8"))?;

    let our_challenge = crypto::challenge();
    let reply_digest = crypto::digest(local.cookie.as_str(), their_challenge);
    write_frame(stream, &compose_challenge_reply(our_challenge, reply_digest))?;

    let ack = read_frame(stream)?;
    if ack.len() != 1 + crypto::DIGEST_SIZE || ack[0] != TAG_CHALLENGE_ACK {
        return Err(bad_handshake("unexpected ack tag"));
    }
    let mut their_digest = [0u8; crypto::DIGEST_SIZE];
    their_digest.copy_from_slice(&ack[1..]);
    let expected = crypto::digest(local.cookie.as_str(), our_challenge);
    if !crypto::digest_eq(&their_digest, &expected) {
        return Err(bad_handshake("digest mismatch"));
    }

    Ok(RemoteNode {
        name,
        flags,
        version,
    })
}

/// Writes one `u16`-framed handshake message.
pub fn write_frame<W: io::Write>(stream: &mut W, payload: &[u8]) -> io::Result<()> {
    let mut wire = Vec::with_capacity(2 + payload.len());
    wire.write_u16::<BigEndian>(payload.len() as u16).expect("vec write");
    wire.extend_from_slice(payload);
    stream.write_all(&wire)
}

/// Reads one `u16`-framed handshake message, blocking until complete.
pub fn read_frame<R: io::Read>(stream: &mut R) -> io::Result<Vec<u8>> {
    let length = stream.read_u16::<BigEndian>()?;
    let mut payload = vec![0u8; usize::from(length)];
    stream.read_exact(&mut payload)?;
    Ok(payload)
}

/// Composes a complete connected-mode frame: `u32` length, the pass-through
/// tag, then each term's encoding with its own version byte.
pub fn compose_data_frame(terms: &[Term]) -> Vec<u8> {
    let mut payload = vec![TAG_PASS_THROUGH];
    for term in terms {
        term::encode(term, &mut payload);
    }

    let mut wire = Vec::with_capacity(4 + payload.len());
    wire.write_u32::<BigEndian>(payload.len() as u32).expect("vec write");
    wire.extend_from_slice(&payload);
    wire
}

/// An empty connected-mode frame; consumed silently by the peer.
pub fn compose_keepalive() -> Vec<u8> {
    vec![0, 0, 0, 0]
}

/// Decodes the payload of a non-empty connected-mode frame. `None` means
/// the tag is not one this node consumes and the frame should be skipped.
pub fn parse_data_payload(payload: &[u8]) -> Result<Option<Vec<Term>>, term::TermError> {
    if payload.first() != Some(&TAG_PASS_THROUGH) {
        return Ok(None);
    }

    let mut terms = Vec::new();
    let mut offset = 1;
    while let Some((decoded, used)) = term::decode(&payload[offset..])? {
        terms.push(decoded);
        offset += used;
    }
    Ok(Some(terms))
}

fn bad_handshake(detail: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, format!("bad handshake: {}", detail))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local() -> NodeDesc {
        NodeDesc::new("mapper@hive", Cookie::from("monster"))
    }

    fn send_name_payload(name: &str) -> Vec<u8> {
        let peer = NodeDesc::new(name, Cookie::from("monster"));
        compose_send_name(&peer)
    }

    /// Extracts the 32-bit challenge from a composed SEND_CHALLENGE frame.
    fn challenge_of(frame: &[u8]) -> u32 {
        BigEndian::read_u32(&frame[7..11])
    }

    #[test]
    fn test_flag_values_are_wire_visible() {
        assert_eq!(DistFlags::PUBLISHED.bits(), 0x1);
        assert_eq!(DistFlags::EXTENDED_REFERENCES.bits(), 0x4);
        assert_eq!(DistFlags::EXTENDED_PIDS_PORTS.bits(), 0x100);
        assert_eq!(DistFlags::UNICODE_IO.bits(), 0x1000);
        assert_eq!(DistFlags::local().bits(), 0x1105);
    }

    #[test]
    fn test_accept_happy_path() {
        let mut accept = Accept::new(local());

        let replies = match accept.on_frame(&send_name_payload("peer@host")).unwrap() {
            Step::Reply(replies) => replies,
            Step::Established { .. } => panic!("established before the challenge reply"),
        };
        assert_eq!(replies[0], [b's', b'o', b'k']);
        assert_eq!(replies[1][0], b'n');
        assert_eq!(BigEndian::read_u16(&replies[1][1..3]), DIST_VERSION);
        assert_eq!(BigEndian::read_u32(&replies[1][3..7]), 0x1105);
        assert_eq!(&replies[1][11..], b"mapper@hive");

        let our_challenge = challenge_of(&replies[1]);
        let reply = compose_challenge_reply(0xdead_beef, crypto::digest("monster", our_challenge));
        match accept.on_frame(&reply).unwrap() {
            Step::Established { remote, ack } => {
                assert_eq!(remote.name, "peer@host");
                assert_eq!(remote.version, DIST_VERSION);
                assert_eq!(ack[0], b'a');
                assert_eq!(
                    ack[1..],
                    crypto::digest("monster", 0xdead_beef)
                );
            }
            Step::Reply(_) => panic!("expected the link to establish"),
        }
    }

    #[test]
    fn test_accept_rejects_wrong_cookie() {
        let mut accept = Accept::new(local());
        let replies = match accept.on_frame(&send_name_payload("peer@host")).unwrap() {
            Step::Reply(replies) => replies,
            Step::Established { .. } => panic!("established before the challenge reply"),
        };

        let our_challenge = challenge_of(&replies[1]);
        let reply = compose_challenge_reply(1, crypto::digest("imposter", our_challenge));
        assert_eq!(
            accept.on_frame(&reply).unwrap_err(),
            NetError::Fatal(ErrorType::BadHandshake)
        );
    }

    #[test]
    fn test_accept_rejects_stale_challenge_digest() {
        let mut accept = Accept::new(local());
        let replies = match accept.on_frame(&send_name_payload("peer@host")).unwrap() {
            Step::Reply(replies) => replies,
            Step::Established { .. } => panic!("established before the challenge reply"),
        };

        let our_challenge = challenge_of(&replies[1]);
        let reply =
            compose_challenge_reply(1, crypto::digest("monster", our_challenge.wrapping_add(1)));
        assert!(accept.on_frame(&reply).is_err());
    }

    #[test]
    fn test_accept_rejects_bad_tags_and_versions() {
        let mut accept = Accept::new(local());
        assert!(accept.on_frame(b"x_garbage").is_err());

        let mut accept = Accept::new(local());
        let mut wrong_version = send_name_payload("peer@host");
        wrong_version[2] = 6;
        assert!(accept.on_frame(&wrong_version).is_err());

        // A challenge reply before SEND_NAME is out of order.
        let mut accept = Accept::new(local());
        let premature = compose_challenge_reply(1, [0; crypto::DIGEST_SIZE]);
        assert!(accept.on_frame(&premature).is_err());
    }

    #[test]
    fn test_frame_io_roundtrip() {
        let mut wire = Vec::new();
        write_frame(&mut wire, b"payload").unwrap();
        assert_eq!(wire[..2], [0, 7]);
        let mut cursor = &wire[..];
        assert_eq!(read_frame(&mut cursor).unwrap(), b"payload");
    }

    #[test]
    fn test_data_frame_roundtrip() {
        let terms = vec![
            Term::Tuple(vec![Term::Atom("ping".to_string()), Term::Int(1)]),
            Term::Nil,
        ];
        let wire = compose_data_frame(&terms);
        assert_eq!(BigEndian::read_u32(&wire[..4]) as usize, wire.len() - 4);
        assert_eq!(wire[4], b'p');

        let decoded = parse_data_payload(&wire[4..]).unwrap().unwrap();
        assert_eq!(decoded, terms);
    }

    #[test]
    fn test_data_payload_foreign_tag_is_skipped() {
        assert_eq!(parse_data_payload(&[b'q', 1, 2, 3]).unwrap(), None);
    }

    #[test]
    fn test_data_payload_truncation_is_fatal() {
        let wire = compose_data_frame(&[Term::Atom("ping".to_string())]);
        let payload = &wire[4..];
        assert!(parse_data_payload(&payload[..payload.len() - 1]).is_err());
    }

    #[test]
    fn test_keepalive_form() {
        assert_eq!(compose_keepalive(), [0, 0, 0, 0]);
    }
}
