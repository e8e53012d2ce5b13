//! Peer-facing surface of the distribution side: events delivered to the
//! upstream consumer and self-publication against a port mapper.

use crate::net::support::ConnId;
use crate::portmap;
use crate::portmap::NodeInfo;
use crate::term::Term;
use byteorder::{BigEndian, WriteBytesExt};
use std::io;
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};

/// Events emitted by distribution links. `Ready` carries a writer half of
/// the socket so the consumer can push outbound frames; everything above
/// the term level (mailboxes, actors) lives outside this crate.
pub enum PeerEvent {
    Ready {
        conn: ConnId,
        name: String,
        writer: TcpStream,
    },
    Term {
        conn: ConnId,
        term: Term,
    },
    Closed {
        conn: ConnId,
    },
}

/// Registers this process under `info.name` with the port mapper at
/// `mapper`. Returns the open registration link and the creation the
/// registry assigned. The link must be kept alive: its TCP lifetime is the
/// node's liveness proof, and dropping it unregisters the name.
pub fn publish<A: ToSocketAddrs>(mapper: A, info: &NodeInfo) -> io::Result<(TcpStream, u16)> {
    let mut stream = TcpStream::connect(mapper)?;

    let payload = portmap::compose_alive2_req(info);
    let mut wire = Vec::with_capacity(2 + payload.len());
    wire.write_u16::<BigEndian>(payload.len() as u16).expect("vec write");
    wire.extend_from_slice(&payload);
    stream.write_all(&wire)?;

    // The registration answer is self-delimited at four bytes.
    let mut answer = [0u8; 4];
    stream.read_exact(&mut answer)?;
    let (ok, creation) = portmap::read_alive2_resp(&answer)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "malformed registration answer"))?;
    if !ok {
        return Err(io::Error::new(
            io::ErrorKind::AddrInUse,
            format!("name {} is already registered", info.name),
        ));
    }

    Ok((stream, creation))
}
