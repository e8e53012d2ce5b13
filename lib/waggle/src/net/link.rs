//! Peer link tasks. Each accepted connection is owned by exactly one link,
//! which holds the socket, a private read accumulator, and the link state.
//! Registry links speak the port-mapper protocol over `u16` frames; node
//! links run the handshake over `u16` frames and then switch to `u32`
//! framed term exchange.

use crate::dist;
use crate::dist::{Accept, NodeDesc, RemoteNode, Step};
use crate::net::buffer::{take_frame, Buffer, Framing, MAX_DIST_PAYLOAD};
use crate::net::support::{ConnId, ErrorType, NetError, NetResult};
use crate::node::PeerEvent;
use crate::registry::Request;
use comb::logging;
use crossbeam_channel::{bounded, Sender};
use std::io::Write;
use std::net::{Shutdown, TcpStream};

/// One maximal `u16` frame plus its prefix.
const MAPPER_BUF_LIMIT: usize = 2 + 65535;
const DIST_BUF_LIMIT: usize = 4 + MAX_DIST_PAYLOAD;

/// A port-mapper connection. Forwards decoded frames to the registry
/// service and writes back whatever it composes; at most one request is in
/// flight at a time.
pub struct MapperLink {
    id: ConnId,
    stream: TcpStream,
    buf: Buffer,
    registry: Sender<Request>,
    log: logging::Logger,
}

impl MapperLink {
    pub fn new(
        id: ConnId,
        stream: TcpStream,
        registry: Sender<Request>,
        log: &logging::Logger,
    ) -> MapperLink {
        MapperLink {
            id,
            stream,
            buf: Buffer::new(MAPPER_BUF_LIMIT),
            registry,
            log: log.new(logging::o!("conn" => id)),
        }
    }

    pub fn run(mut self) {
        match self.serve() {
            Ok(()) => logging::debug!(self.log, "mapper link closed"),
            Err(err) => logging::debug!(self.log, "mapper link failed"; "error" => ?err),
        }
        // Whatever the exit path, the registry must observe the drop so the
        // liveness bookkeeping stays correct.
        let _ = self.registry.send(Request::ConnectionGone { conn: self.id });
        let _ = self.stream.shutdown(Shutdown::Both);
    }

    fn serve(&mut self) -> NetResult<()> {
        loop {
            let payload = next_frame(&mut self.buf, &mut self.stream, Framing::U16)?;
            if payload.is_empty() {
                return Err(NetError::Fatal(ErrorType::BadFrame));
            }

            let (reply_tx, reply_rx) = bounded(1);
            self.registry
                .send(Request::Frame {
                    payload,
                    reply: reply_tx,
                    conn: self.id,
                })
                .map_err(|_| NetError::Fatal(ErrorType::RegistryGone))?;
            let answer = reply_rx
                .recv()
                .map_err(|_| NetError::Fatal(ErrorType::RegistryGone))?;

            if let Some(data) = answer.data {
                self.stream.write_all(&data)?;
            }
            if answer.close {
                return Ok(());
            }
        }
    }
}

/// A distribution connection accepted on the node listener. Starts in
/// handshake mode and, once the digest checks out, delivers decoded terms
/// to the upstream consumer.
pub struct PeerLink {
    id: ConnId,
    stream: TcpStream,
    buf: Buffer,
    local: NodeDesc,
    events: Sender<PeerEvent>,
    log: logging::Logger,
}

impl PeerLink {
    pub fn new(
        id: ConnId,
        stream: TcpStream,
        local: NodeDesc,
        events: Sender<PeerEvent>,
        log: &logging::Logger,
    ) -> PeerLink {
        PeerLink {
            id,
            stream,
            buf: Buffer::new(DIST_BUF_LIMIT),
            local,
            events,
            log: log.new(logging::o!("conn" => id)),
        }
    }

    pub fn run(mut self) {
        match self.serve() {
            Ok(()) => logging::debug!(self.log, "peer link closed"),
            Err(err) => logging::debug!(self.log, "peer link failed"; "error" => ?err),
        }
        let _ = self.events.send(PeerEvent::Closed { conn: self.id });
        let _ = self.stream.shutdown(Shutdown::Both);
    }

    fn serve(&mut self) -> NetResult<()> {
        let remote = self.handshake()?;
        logging::info!(self.log, "node ready"; "remote" => remote.name.as_str());

        let writer = self.stream.try_clone().map_err(NetError::from)?;
        self.events
            .send(PeerEvent::Ready {
                conn: self.id,
                name: remote.name.clone(),
                writer,
            })
            .map_err(|_| NetError::Fatal(ErrorType::UpstreamGone))?;

        self.connected()
    }

    fn handshake(&mut self) -> NetResult<RemoteNode> {
        let mut accept = Accept::new(self.local.clone());
        loop {
            let payload = next_frame(&mut self.buf, &mut self.stream, Framing::U16)?;
            match accept.on_frame(&payload)? {
                Step::Reply(replies) => {
                    for reply in replies {
                        dist::write_frame(&mut self.stream, &reply)?;
                    }
                }
                Step::Established { remote, ack } => {
                    dist::write_frame(&mut self.stream, &ack)?;
                    return Ok(remote);
                }
            }
        }
    }

    fn connected(&mut self) -> NetResult<()> {
        loop {
            let payload = next_frame(&mut self.buf, &mut self.stream, Framing::U32)?;
            if payload.is_empty() {
                logging::trace!(self.log, "keepalive");
                continue;
            }

            match dist::parse_data_payload(&payload) {
                Ok(Some(terms)) => {
                    for term in terms {
                        self.events
                            .send(PeerEvent::Term {
                                conn: self.id,
                                term,
                            })
                            .map_err(|_| NetError::Fatal(ErrorType::UpstreamGone))?;
                    }
                }
                Ok(None) => {
                    logging::debug!(self.log, "skipping frame with foreign tag"; "tag" => payload[0]);
                }
                Err(err) => {
                    // A truncated term costs the frame, not the link.
                    logging::warn!(self.log, "dropped undecodable frame"; "error" => %err);
                }
            }
        }
    }
}

/// Reads until one complete frame is buffered, tolerating arbitrary read
/// boundaries. A zero-byte read is end of stream.
fn next_frame(buf: &mut Buffer, stream: &mut TcpStream, framing: Framing) -> NetResult<Vec<u8>> {
    loop {
        match take_frame(buf, framing) {
            Err(NetError::Wait) => {
                if buf.ingress(stream)? == 0 {
                    return Err(NetError::Fatal(ErrorType::Closed));
                }
            }
            other => return other,
        }
    }
}
