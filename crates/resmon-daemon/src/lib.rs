//! The resmon daemon: source adapters feeding the register decoder, and the
//! JSON-RPC control server that reports the mirrored counters.

mod back;
mod notify;
mod server;

pub use back::{Backend, Mode};
pub use server::{Daemon, DaemonError};
