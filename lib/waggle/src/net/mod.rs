//! Per-connection plumbing: read accumulation, frame assembly and the peer
//! link tasks that own each accepted socket.

pub mod buffer;
pub mod link;
pub mod listener;
pub mod support;
