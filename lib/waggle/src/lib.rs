//! Node port mapper and distribution peer for a clustered actor runtime.
//!
//! The crate is organized leaves-first: `term` is the self-describing binary
//! term codec, `portmap` the stateless port-mapper message codec, `registry`
//! the single-writer name table service, and `net`/`dist` the per-connection
//! peer links with their framing rules and the cluster handshake.

pub mod dist;
pub mod net;
pub mod node;
pub mod portmap;
pub mod registry;
pub mod term;
