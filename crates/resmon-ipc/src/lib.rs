//! Control-plane plumbing shared by the daemon and the CLI client: the
//! JSON-RPC 2.0 envelope rules and the Unix datagram transport they ride on.

pub mod jrpc;
pub mod sock;
