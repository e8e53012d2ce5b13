//! Accept tasks. One thread per listening socket; every accepted stream is
//! handed to a dedicated link thread together with a fresh connection id.

use crate::dist::NodeDesc;
use crate::net::link::{MapperLink, PeerLink};
use crate::net::support::ConnId;
use crate::node::PeerEvent;
use crate::registry::Request;
use comb::logging;
use crossbeam_channel::Sender;
use std::net::TcpListener;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

/// Monotonic connection-id allocator, shared by all listeners of one
/// process so identities never collide across sockets.
#[derive(Default)]
pub struct ConnIds(AtomicU64);

impl ConnIds {
    pub fn next(&self) -> ConnId {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// Accepts port-mapper clients; each one is served by a `MapperLink`.
pub fn spawn_portmap(
    listener: TcpListener,
    registry: Sender<Request>,
    ids: Arc<ConnIds>,
    log: logging::Logger,
) -> thread::JoinHandle<()> {
    thread::Builder::new()
        .name("portmap-accept".to_string())
        .spawn(move || {
            for stream in listener.incoming() {
                match stream {
                    Ok(stream) => {
                        let id = ids.next();
                        logging::debug!(log, "accepted mapper connection";
                                        "conn" => id,
                                        "peer" => ?stream.peer_addr().ok());
                        let link = MapperLink::new(id, stream, registry.clone(), &log);
                        spawn_link("mapper-link", id, &log, move || link.run());
                    }
                    Err(err) => logging::warn!(log, "accept failed"; "error" => ?err),
                }
            }
        })
        .expect("failed to spawn the portmap accept thread")
}

/// Accepts distribution peers; each one is served by a `PeerLink` starting
/// in handshake mode with this node's descriptor.
pub fn spawn_node(
    listener: TcpListener,
    local: NodeDesc,
    events: Sender<PeerEvent>,
    ids: Arc<ConnIds>,
    log: logging::Logger,
) -> thread::JoinHandle<()> {
    thread::Builder::new()
        .name("node-accept".to_string())
        .spawn(move || {
            for stream in listener.incoming() {
                match stream {
                    Ok(stream) => {
                        let id = ids.next();
                        logging::debug!(log, "accepted distribution connection";
                                        "conn" => id,
                                        "peer" => ?stream.peer_addr().ok());
                        let link = PeerLink::new(id, stream, local.clone(), events.clone(), &log);
                        spawn_link("peer-link", id, &log, move || link.run());
                    }
                    Err(err) => logging::warn!(log, "accept failed"; "error" => ?err),
                }
            }
        })
        .expect("failed to spawn the node accept thread")
}

fn spawn_link<F: FnOnce() + Send + 'static>(kind: &str, id: ConnId, log: &logging::Logger, run: F) {
    if let Err(err) = thread::Builder::new()
        .name(format!("{}-{}", kind, id))
        .spawn(run)
    {
        logging::error!(log, "failed to spawn link thread"; "conn" => id, "error" => ?err);
    }
}
