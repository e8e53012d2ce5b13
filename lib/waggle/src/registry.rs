//! The registry service: a single-writer actor owning the name table.
//!
//! Every mutation of the table happens on the service thread, which consumes
//! typed requests from a bounded channel. Peer links never touch the table;
//! they hand over the raw frame payload together with a single-use reply
//! channel and their connection identity.

use crate::net::support::ConnId;
use crate::portmap;
use crate::portmap::NodeInfo;
use comb::logging;
use crossbeam_channel::{bounded, Receiver, Sender};
use hashbrown::HashMap;
use std::thread;
use std::time::{Duration, SystemTime};

/// Capacity of the request channel. A full queue blocks link threads on
/// send, which throttles admission while the service catches up.
const REQUEST_QUEUE_DEPTH: usize = 10;

/// A composed answer for the requesting link. `data = None` means close
/// without writing anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub data: Option<Vec<u8>>,
    pub close: bool,
}

pub enum Request {
    /// A complete frame payload read off a link.
    Frame {
        payload: Vec<u8>,
        reply: Sender<Reply>,
        conn: ConnId,
    },
    /// The link owning `conn` has closed.
    ConnectionGone { conn: ConnId },
}

#[derive(Debug, Clone)]
pub struct Settings {
    /// Port the mapper itself listens on; echoed in NAMES/DUMP responses.
    pub listen_port: u16,
    /// Table size above which the prune sweep becomes active.
    pub reg_limit: usize,
    /// Minimum age of an inactive entry before it is eligible for eviction.
    pub unreg_ttl: Duration,
}

impl Default for Settings {
    fn default() -> Settings {
        Settings {
            listen_port: 4369,
            reg_limit: 1000,
            unreg_ttl: Duration::from_secs(600),
        }
    }
}

struct Registration {
    info: NodeInfo,
    active: bool,
    conn: Option<ConnId>,
    last_change: SystemTime,
}

pub struct Registry {
    table: HashMap<String, Registration>,
    settings: Settings,
    log: logging::Logger,
}

impl Registry {
    pub fn new(settings: Settings, log: logging::Logger) -> Registry {
        Registry {
            table: HashMap::new(),
            settings,
            log,
        }
    }

    pub fn handle(&mut self, request: Request, now: SystemTime) {
        match request {
            Request::Frame {
                payload,
                reply,
                conn,
            } => {
                let answer = self.on_frame(&payload, conn, now);
                // The link may already be gone; a dead reply channel is not
                // the service's problem.
                let _ = reply.send(answer);
            }
            Request::ConnectionGone { conn } => self.on_connection_gone(conn, now),
        }
    }

    fn on_frame(&mut self, payload: &[u8], conn: ConnId, now: SystemTime) -> Reply {
        match payload.first() {
            Some(&portmap::ALIVE2_REQ) => self.on_alive2(payload, conn, now),
            Some(&portmap::PORT_PLEASE2_REQ) => self.on_port_please(payload),
            Some(&portmap::NAMES_REQ) => self.on_names(),
            Some(&portmap::DUMP_REQ) => self.on_dump(),
            Some(&portmap::STOP_REQ) => self.on_stop(payload),
            Some(&portmap::KILL_REQ) => Reply {
                data: Some(portmap::compose_kill_resp()),
                close: true,
            },
            Some(&portmap::ADMIN_DUMP_REQ) => self.on_admin_dump(),
            tag => {
                logging::warn!(self.log, "unknown request"; "tag" => ?tag, "conn" => conn);
                Reply {
                    data: None,
                    close: true,
                }
            }
        }
    }

    fn on_alive2(&mut self, payload: &[u8], conn: ConnId, now: SystemTime) -> Reply {
        let mut info = match portmap::read_alive2_req(payload) {
            Ok(info) => info,
            Err(err) => {
                logging::warn!(self.log, "malformed registration"; "conn" => conn, "error" => ?err);
                return Reply {
                    data: None,
                    close: true,
                };
            }
        };
        debug_assert_eq!(info.creation, 0, "creation is assigned by the registry");

        let reply = match self.table.get_mut(&info.name) {
            Some(rec) if rec.active => {
                logging::info!(self.log, "registration conflict";
                               "name" => info.name.as_str(),
                               "owner" => rec.conn,
                               "conn" => conn);
                portmap::compose_alive2_resp(None)
            }
            Some(rec) => {
                info.creation = (rec.info.creation % 3) + 1;
                logging::info!(self.log, "node re-registered";
                               "name" => info.name.as_str(),
                               "port" => info.port,
                               "creation" => info.creation,
                               "conn" => conn);
                let creation = info.creation;
                rec.info = info;
                rec.active = true;
                rec.conn = Some(conn);
                rec.last_change = now;
                portmap::compose_alive2_resp(Some(creation))
            }
            None => {
                info.creation = 1;
                logging::info!(self.log, "node registered";
                               "name" => info.name.as_str(),
                               "port" => info.port,
                               "conn" => conn);
                let reply = portmap::compose_alive2_resp(Some(info.creation));
                self.table.insert(
                    info.name.clone(),
                    Registration {
                        info,
                        active: true,
                        conn: Some(conn),
                        last_change: now,
                    },
                );
                reply
            }
        };

        // The link stays open: its continued existence is the node's
        // liveness proof.
        Reply {
            data: Some(reply),
            close: false,
        }
    }

    fn on_port_please(&self, payload: &[u8]) -> Reply {
        let data = match portmap::read_name_req(payload) {
            Ok(name) => match self.table.get(&name) {
                Some(rec) if rec.active => portmap::compose_port2_resp(Some(&rec.info)),
                _ => portmap::compose_port2_resp(None),
            },
            Err(_) => portmap::compose_port2_resp(None),
        };
        Reply {
            data: Some(data),
            close: true,
        }
    }

    fn on_names(&self) -> Reply {
        let mut out = portmap::compose_names_start(self.settings.listen_port);
        for name in self.sorted_names() {
            let rec = &self.table[name];
            if rec.active {
                portmap::append_names_entry(&mut out, &rec.info);
            }
        }
        Reply {
            data: Some(out),
            close: true,
        }
    }

    fn on_dump(&self) -> Reply {
        let mut out = portmap::compose_names_start(self.settings.listen_port);
        for name in self.sorted_names() {
            let rec = &self.table[name];
            if rec.active {
                portmap::append_dump_active(&mut out, &rec.info);
            } else {
                portmap::append_dump_unused(&mut out, &rec.info);
            }
        }
        Reply {
            data: Some(out),
            close: true,
        }
    }

    fn on_stop(&self, payload: &[u8]) -> Reply {
        let stopped = match portmap::read_name_req(payload) {
            Ok(name) => matches!(self.table.get(&name), Some(rec) if rec.active),
            Err(_) => false,
        };
        // The named node's own link is left untouched; STOPPED only reports
        // that the name was found alive.
        Reply {
            data: Some(portmap::compose_stop_resp(stopped)),
            close: true,
        }
    }

    /// Diagnostic table for the admin shell: one tab-delimited line per
    /// entry, names right-aligned to the longest registered name.
    fn on_admin_dump(&self) -> Reply {
        let width = self
            .table
            .keys()
            .map(String::len)
            .max()
            .unwrap_or(0);

        let mut out = Vec::new();
        for name in self.sorted_names() {
            let rec = &self.table[name];
            let conn = rec
                .conn
                .map_or_else(|| "none".to_string(), |id| id.to_string());
            let line = format!(
                "{:>width$}\t{}\t{}\t{}\t{}\t{}\n",
                rec.info.name,
                rec.info.port,
                conn,
                comb::choose!(rec.active => "active", "down"),
                rec.info.creation,
                comb::time::format_ansic(rec.last_change),
                width = width
            );
            out.extend_from_slice(line.as_bytes());
        }
        Reply {
            data: Some(out),
            close: true,
        }
    }

    fn on_connection_gone(&mut self, conn: ConnId, now: SystemTime) {
        for rec in self.table.values_mut() {
            if rec.conn == Some(conn) {
                logging::info!(self.log, "connection for node dropped";
                               "name" => rec.info.name.as_str(),
                               "conn" => conn);
                rec.active = false;
                rec.conn = None;
                rec.last_change = now;
            }
        }

        if self.table.len() > self.settings.reg_limit {
            let ttl = self.settings.unreg_ttl;
            let log = &self.log;
            self.table.retain(|name, rec| {
                let age = now
                    .duration_since(rec.last_change)
                    .unwrap_or(Duration::ZERO);
                let keep = rec.active || age <= ttl;
                if !keep {
                    logging::info!(log, "pruned stale registration";
                                   "name" => name.as_str(),
                                   "age_secs" => age.as_secs());
                }
                keep
            });
        }
    }

    fn sorted_names(&self) -> Vec<&String> {
        let mut names: Vec<&String> = self.table.keys().collect();
        names.sort();
        names
    }
}

/// Starts the service thread and returns the request channel.
pub fn spawn(settings: Settings, log: logging::Logger) -> (Sender<Request>, thread::JoinHandle<()>) {
    let (tx, rx): (Sender<Request>, Receiver<Request>) = bounded(REQUEST_QUEUE_DEPTH);
    let handle = thread::Builder::new()
        .name("registry".to_string())
        .spawn(move || {
            let mut registry = Registry::new(settings, log);
            for request in rx.iter() {
                registry.handle(request, SystemTime::now());
            }
        })
        .expect("failed to spawn the registry thread");
    (tx, handle)
}
