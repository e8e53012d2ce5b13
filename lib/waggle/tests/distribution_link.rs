//! Full distribution sessions against the node listener: handshake,
//! keep-alive, term delivery and cookie rejection.

use comb::cookie::Cookie;
use comb::logging;
use crossbeam_channel::{bounded, Receiver};
use std::io::Write;
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::Duration;
use waggle::dist;
use waggle::dist::{DistFlags, NodeDesc};
use waggle::net::listener::{spawn_node, ConnIds};
use waggle::node::PeerEvent;
use waggle::term::Term;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

fn start_node(cookie: &str) -> (SocketAddr, Receiver<PeerEvent>) {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let (events_tx, events_rx) = bounded(64);
    spawn_node(
        listener,
        NodeDesc::new("mapper@hive", Cookie::from(cookie)),
        events_tx,
        Arc::new(ConnIds::default()),
        logging::discard(),
    );

    (addr, events_rx)
}

#[test]
fn test_handshake_keepalive_and_terms() {
    let (addr, events) = start_node("monster");

    let mut stream = TcpStream::connect(addr).unwrap();
    let local = NodeDesc::new("peer@hive", Cookie::from("monster"));
    let remote = dist::connect(&mut stream, &local).unwrap();
    assert_eq!(remote.name, "mapper@hive");
    assert_eq!(remote.version, dist::DIST_VERSION);
    assert_eq!(remote.flags, DistFlags::local());

    match events.recv_timeout(RECV_TIMEOUT).unwrap() {
        PeerEvent::Ready { name, .. } => assert_eq!(name, "peer@hive"),
        _ => panic!("expected the ready event first"),
    }

    // An empty frame is consumed silently and must not produce an event.
    stream.write_all(&dist::compose_keepalive()).unwrap();

    let sent = Term::Tuple(vec![
        Term::Atom("call".to_string()),
        Term::Int(7),
        Term::Nil,
    ]);
    stream
        .write_all(&dist::compose_data_frame(std::slice::from_ref(&sent)))
        .unwrap();

    match events.recv_timeout(RECV_TIMEOUT).unwrap() {
        PeerEvent::Term { term, .. } => assert_eq!(term, sent),
        _ => panic!("expected the decoded term"),
    }

    drop(stream);
    match events.recv_timeout(RECV_TIMEOUT).unwrap() {
        PeerEvent::Closed { .. } => {}
        _ => panic!("expected the link to report closure"),
    }
}

#[test]
fn test_multiple_terms_per_frame() {
    let (addr, events) = start_node("monster");

    let mut stream = TcpStream::connect(addr).unwrap();
    let local = NodeDesc::new("peer@hive", Cookie::from("monster"));
    dist::connect(&mut stream, &local).unwrap();
    match events.recv_timeout(RECV_TIMEOUT).unwrap() {
        PeerEvent::Ready { .. } => {}
        _ => panic!("expected the ready event first"),
    }

    let batch = vec![Term::Atom("first".to_string()), Term::Int(1000)];
    stream.write_all(&dist::compose_data_frame(&batch)).unwrap();

    for expected in batch {
        match events.recv_timeout(RECV_TIMEOUT).unwrap() {
            PeerEvent::Term { term, .. } => assert_eq!(term, expected),
            _ => panic!("expected a decoded term"),
        }
    }
}

#[test]
fn test_wrong_cookie_is_rejected() {
    let (addr, events) = start_node("monster");

    let mut stream = TcpStream::connect(addr).unwrap();
    let local = NodeDesc::new("peer@hive", Cookie::from("imposter"));
    assert!(dist::connect(&mut stream, &local).is_err());

    // The link must close without ever reporting readiness.
    match events.recv_timeout(RECV_TIMEOUT).unwrap() {
        PeerEvent::Closed { .. } => {}
        _ => panic!("a rejected peer must not become ready"),
    }
}
