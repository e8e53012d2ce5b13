use comb::cookie::Cookie;
use comb::logging;
use crossbeam_channel::{bounded, Receiver};
use serde_derive::Deserialize;
use std::io;
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use waggle::dist::{NodeDesc, DIST_VERSION};
use waggle::net::listener::{spawn_node, spawn_portmap, ConnIds};
use waggle::node;
use waggle::node::PeerEvent;
use waggle::portmap::{NodeInfo, NODE_TYPE_HIDDEN};
use waggle::registry;
use waggle::registry::Settings;

/// Capacity of the distribution event channel feeding the log sink.
const PEER_EVENT_QUEUE_DEPTH: usize = 64;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub listen_port: u16,
    pub reg_limit: usize,
    /// Minutes an inactive registration must age before pruning.
    pub unreg_ttl: u64,
    pub publish_self: bool,
    pub node_name: String,
    pub node_cookie: Cookie,
    pub node_port: u16,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            listen_port: 4369,
            reg_limit: 1000,
            unreg_ttl: 10,
            publish_self: false,
            node_name: "waggle@localhost".to_string(),
            node_cookie: Cookie::default(),
            node_port: 5858,
            log_level: "info".to_string(),
        }
    }
}

/// Handles that must stay alive for the daemon's lifetime. Dropping the
/// registration link unregisters the published node.
pub struct Daemon {
    _alive2: Option<TcpStream>,
}

pub fn run(config: &Config, log: &logging::Logger) -> io::Result<Daemon> {
    let listener = TcpListener::bind(("0.0.0.0", config.listen_port))?;
    logging::info!(log, "port mapper listening"; "port" => config.listen_port);

    let settings = Settings {
        listen_port: config.listen_port,
        reg_limit: config.reg_limit,
        unreg_ttl: Duration::from_secs(config.unreg_ttl * 60),
    };
    let (registry_tx, _registry) =
        registry::spawn(settings, log.new(logging::o!("task" => "registry")));

    let ids = Arc::new(ConnIds::default());
    spawn_portmap(
        listener,
        registry_tx,
        ids.clone(),
        log.new(logging::o!("task" => "portmap")),
    );

    let alive2 = if config.publish_self {
        Some(publish_self(config, ids, log)?)
    } else {
        None
    };

    Ok(Daemon { _alive2: alive2 })
}

/// Opens the node listener for distribution peers, then registers this
/// process with its own port mapper over a plain TCP registration link.
fn publish_self(
    config: &Config,
    ids: Arc<ConnIds>,
    log: &logging::Logger,
) -> io::Result<TcpStream> {
    let node_listener = TcpListener::bind(("0.0.0.0", config.node_port))?;
    let local = NodeDesc::new(config.node_name.clone(), config.node_cookie.clone());

    let (events_tx, events_rx) = bounded(PEER_EVENT_QUEUE_DEPTH);
    spawn_node(
        node_listener,
        local,
        events_tx,
        ids,
        log.new(logging::o!("task" => "node")),
    );
    spawn_event_sink(events_rx, log.new(logging::o!("task" => "peers")));

    let info = NodeInfo {
        name: registered_name(&config.node_name).to_string(),
        port: config.node_port,
        node_type: NODE_TYPE_HIDDEN,
        protocol: 0,
        high_vsn: DIST_VERSION,
        low_vsn: DIST_VERSION,
        extra: Vec::new(),
        creation: 0,
    };
    let (link, creation) = node::publish(("127.0.0.1", config.listen_port), &info)?;
    logging::info!(log, "published self";
                   "name" => info.name.as_str(),
                   "port" => config.node_port,
                   "creation" => creation);
    Ok(link)
}

/// The daemon's upstream consumer is a plain log sink; anything smarter
/// (mailboxes, actors) belongs to an embedding runtime.
fn spawn_event_sink(events: Receiver<PeerEvent>, log: logging::Logger) {
    thread::Builder::new()
        .name("peer-events".to_string())
        .spawn(move || {
            for event in events.iter() {
                match event {
                    PeerEvent::Ready { conn, name, .. } => {
                        logging::info!(log, "peer connected"; "conn" => conn, "name" => name.as_str());
                    }
                    PeerEvent::Term { conn, term } => {
                        logging::debug!(log, "term received"; "conn" => conn, "term" => ?term);
                    }
                    PeerEvent::Closed { conn } => {
                        logging::info!(log, "peer gone"; "conn" => conn);
                    }
                }
            }
        })
        .expect("failed to spawn the peer event sink");
}

/// Registrations carry the node name without the host part.
fn registered_name(node_name: &str) -> &str {
    node_name.split('@').next().unwrap_or(node_name)
}
